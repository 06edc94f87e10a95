use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("client not found")]
    ClientNotFound,

    #[error("class index {0} out of range")]
    InvalidClass(u8),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("kernel sync error: {0}")]
    Kernel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
