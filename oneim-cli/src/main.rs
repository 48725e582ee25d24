use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use anyhow::{bail, Context, Result};
use clap::Parser;
use oneim_core::compile_to_c;

/// Compiler for the 1im language: translates a source file to C, builds it
/// with the host C compiler, and runs the resulting binary.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the 1im source file
    input: String,

    #[arg(long, help = "Stop after writing the generated C file")]
    emit_only: bool,

    #[arg(long, default_value = "cc", help = "Host C compiler to invoke")]
    cc: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: &Cli) -> Result<ExitCode> {
    let input = PathBuf::from(&cli.input);
    let source = fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    // The pipeline runs to completion before anything is written, so a
    // failed compilation leaves no partial output behind.
    let c_source = compile_to_c(&source)?;
    let c_path = write_c_file(&input, &c_source)?;

    if cli.emit_only {
        return Ok(ExitCode::SUCCESS);
    }

    let binary = c_path.with_extension("");
    let status = Command::new(&cli.cc)
        .arg("-o")
        .arg(&binary)
        .arg(&c_path)
        .args(["-O3", "-march=native", "-pthread"])
        .status()
        .with_context(|| format!("failed to invoke '{}'", cli.cc))?;
    if !status.success() {
        bail!("host C compiler failed on {}", c_path.display());
    }

    let run = Command::new(&binary)
        .status()
        .with_context(|| format!("failed to run {}", binary.display()))?;
    // Propagate the child's exit code; a signal death maps to failure.
    Ok(ExitCode::from(run.code().unwrap_or(1).clamp(0, 255) as u8))
}

/// Write the translation unit to `<dir>/codegen/<stem>.c` next to the input.
fn write_c_file(input: &Path, c_source: &str) -> Result<PathBuf> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .with_context(|| format!("input path {} has no file name", input.display()))?;
    let out_dir = dir.join("codegen");
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.display()))?;
    let c_path = out_dir.join(format!("{}.c", stem.to_string_lossy()));
    fs::write(&c_path, c_source)
        .with_context(|| format!("failed to write output file {}", c_path.display()))?;
    Ok(c_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(input: &Path) -> Cli {
        Cli {
            input: input.to_string_lossy().to_string(),
            emit_only: true,
            cc: "cc".to_string(),
        }
    }

    #[test]
    fn writes_the_c_file_next_to_the_source() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("hello.1im");
        fs::write(&input, "set age to 41\nprint(age)").expect("write input");

        execute(&cli(&input)).expect("cli should succeed");

        let c_path = dir.path().join("codegen").join("hello.c");
        let c_source = fs::read_to_string(&c_path).expect("c output readable");
        assert!(c_source.contains("#include <stdio.h>"));
        assert!(c_source.contains("int32_t age = 41;"));
        assert!(c_source.contains("int main(void) {"));
    }

    #[test]
    fn reports_missing_input() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("absent.1im");
        let err = execute(&cli(&input)).expect_err("cli should fail");
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn reports_compile_errors_without_writing_output() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("bad.1im");
        fs::write(&input, "set x to @").expect("write input");

        let err = execute(&cli(&input)).expect_err("cli should fail");
        assert!(err.to_string().contains("lex error"));
        assert!(
            !dir.path().join("codegen").join("bad.c").exists(),
            "no partial output may be written"
        );
    }

    #[test]
    fn diagnostics_carry_line_and_column() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("diag.1im");
        fs::write(&input, "set x to 1\nset y 2").expect("write input");

        let err = execute(&cli(&input)).expect_err("cli should fail");
        let message = format!("{err:#}");
        assert!(message.contains("parse error at 2:7"), "{message}");
    }

    #[test]
    fn semantic_failures_surface_as_one_line() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("sem.1im");
        fs::write(&input, "break").expect("write input");

        let err = execute(&cli(&input)).expect_err("cli should fail");
        let message = format!("{err:#}");
        assert_eq!(message.lines().count(), 1, "{message}");
        assert!(message.contains("'break' outside of a loop"));
    }
}
