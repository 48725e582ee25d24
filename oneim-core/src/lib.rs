//! Core compilation pipeline for the 1im language.
//!
//! The pipeline is:
//!
//!   source .1im
//!     -> lexer      (flat token stream, newline-significant)
//!     -> parser     (arena-allocated AST, column-anchored blocks)
//!     -> typecheck  (scoping and typing checks, resolved signatures)
//!     -> codegen_c  (one C11 translation unit)
//!
//! Higher-level tools (the CLI in particular) should depend on this crate
//! rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------

pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layer: types and checking
// ---------------------------------------------------------------------

pub mod types;
pub mod typecheck;

// ---------------------------------------------------------------------
// Back-end: C generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_c;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::compile_to_c;
pub use error::CoreError;
