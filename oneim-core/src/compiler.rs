//! Pipeline orchestration.
//!
//! `compile_to_c` runs the whole front end over one source file and returns
//! the C translation unit. The arena owning every AST node and type lives
//! exactly as long as the compilation; only the generated C escapes.

use bumpalo::Bump;

use crate::codegen_c;
use crate::error::CoreError;
use crate::lexer;
use crate::parser;
use crate::typecheck;

pub fn compile_to_c(source: &str) -> Result<String, CoreError> {
    let arena = Bump::new();
    let tokens = lexer::lex(source)?;
    let program = parser::parse(&arena, &tokens)?;
    let sigs = typecheck::analyze(&arena, &program)?;
    codegen_c::generate(&arena, &program, &sigs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_the_canonical_scenarios() {
        let scenarios = [
            "set age to 41\nprint(age)",
            "set add with a as i32, b as i32 returns i32\n    return a + b\nprint(add(2, 3))",
            "set i to 0\nloop while i < 3\n    print(i)\n    set i to i + 1",
            "set nums to [1, 2, 3]\nloop for n in nums\n    print(n)",
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set main as fn\n    try fail() catch err\n        print(err)",
            "set show_a as fn\n    print(100)\nset show_b as fn\n    print(200)\n\
             parallel\n    show_a()\n    show_b()",
        ];
        for source in scenarios {
            let c = compile_to_c(source).expect("scenario should compile");
            assert!(c.contains("int main(void) {"), "no main in:\n{c}");
        }
    }

    #[test]
    fn is_deterministic_across_runs() {
        let source = "set fail as fn returns i32!str\n    return \"boom\"\n\
                      set s as []u8 to [1, 2]\ntry fail() catch e\n    print(e)";
        assert_eq!(
            compile_to_c(source).expect("compile"),
            compile_to_c(source).expect("compile")
        );
    }

    #[test]
    fn surfaces_each_error_stage() {
        let lex = compile_to_c("set x to @").unwrap_err();
        assert!(lex.to_string().starts_with("lex error"));

        let parse = compile_to_c("set x 41").unwrap_err();
        assert!(parse.to_string().starts_with("parse error"));

        let semantic = compile_to_c("print(missing)").unwrap_err();
        assert!(semantic.to_string().starts_with("semantic error"));
    }

    #[test]
    fn produces_no_output_on_failure() {
        assert!(compile_to_c("loop while 1\n    print(1)").is_err());
    }
}
