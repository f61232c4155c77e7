use thiserror::Error;

#[derive(Error, Debug)]
pub enum DendriteError {
    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown function name: {name}")]
    UnknownFunction { name: String },
    #[error("header error: {0}")]
    Header(String),
    #[error("illegal model: {0}")]
    Legality(String),
    #[error("build error: {0}")]
    Build(String),
    #[error("usage error: {0}")]
    Usage(String),
    #[error("unknown node name: {0}")]
    UnknownNode(String),
}

pub type DendriteResult<T> = Result<T, DendriteError>;
