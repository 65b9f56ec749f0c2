/// Integrity and IO errors of the persistent wallet state
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The password does not decrypt the stored view keys
    #[error("wrong password")]
    WrongPassword,
    /// A stored secret key does not derive to its stored public key
    #[error("stored key pair mismatch")]
    KeyMismatch,
    /// The file was written by an unknown future version
    #[error("unsupported wallet file version {0}")]
    UnsupportedVersion(u32),
    /// The stream does not decode
    #[error("corrupt wallet file: {0}")]
    Corrupt(String),
    /// Reading or writing the underlying stream failed
    #[error("wallet file io failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;
