//! The 1im type system.
//!
//! This module defines the closed sum of surface types. Composite types
//! hold arena-bound references to their element types, so `Type` stays
//! `Copy` and structural equality is the derived one. It is intentionally
//! self-contained and does not depend on parsing or code generation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type<'a> {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Void,
    /// Fixed-length array, `[N]T` in surface syntax.
    Array { len: usize, elem: &'a Type<'a> },
    /// Borrowed contiguous sequence, `[]T` in surface syntax.
    Slice { elem: &'a Type<'a> },
    /// Value-or-error pair, `T!E` in surface syntax.
    ErrorUnion { ok: &'a Type<'a>, err: &'a Type<'a> },
}

impl<'a> Type<'a> {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::I8
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// True for the 64-bit integer types; range loops widen their induction
    /// variable when an endpoint has one of these.
    pub fn is_64_bit(&self) -> bool {
        matches!(self, Type::I64 | Type::U64)
    }

    /// Check the structural invariants of composite types:
    /// an error union's sides must differ and neither may be an array or
    /// another union; a slice element must not be an array.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Type::Array { elem, .. } => elem.validate(),
            Type::Slice { elem } => {
                if matches!(elem, Type::Array { .. }) {
                    return Err(format!("slice of array type {self} is not allowed"));
                }
                elem.validate()
            }
            Type::ErrorUnion { ok, err } => {
                if ok == err {
                    return Err(format!(
                        "error union {self} must have distinct value and error types"
                    ));
                }
                for side in [ok, err] {
                    if matches!(side, Type::ErrorUnion { .. }) {
                        return Err(format!("error union {self} cannot nest another union"));
                    }
                    if matches!(side, Type::Array { .. }) {
                        return Err(format!("error union {self} cannot carry an array"));
                    }
                }
                ok.validate()?;
                err.validate()
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::U8 => write!(f, "u8"),
            Type::U16 => write!(f, "u16"),
            Type::U32 => write!(f, "u32"),
            Type::U64 => write!(f, "u64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "str"),
            Type::Void => write!(f, "void"),
            Type::Array { len, elem } => write!(f, "[{len}]{elem}"),
            Type::Slice { elem } => write!(f, "[]{elem}"),
            Type::ErrorUnion { ok, err } => write!(f, "{ok}!{err}"),
        }
    }
}
