use thiserror::Error;

// Unified error type for parmg

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported block size {0} (compiled block sizes: 1, 3, 4)")]
    UnsupportedBlockSize(usize),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error in {file}: {msg}")]
    Parse { file: String, msg: String },
    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),
    #[error("solver breakdown: {0}")]
    Breakdown(&'static str),
}

impl Error {
    pub(crate) fn parse(file: &str, msg: impl Into<String>) -> Self {
        Error::Parse { file: file.to_string(), msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
