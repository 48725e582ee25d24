use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("lex error at {line}:{col}: {message}")]
    Lex { line: u32, col: u32, message: String },
    #[error("parse error at {line}:{col}: {message}")]
    Parse { line: u32, col: u32, message: String },
    #[error("semantic error: {0}")]
    Semantic(String),
    #[error("codegen error: {0}")]
    Codegen(String),
}
