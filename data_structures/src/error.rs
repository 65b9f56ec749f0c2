use serde::{Deserialize, Serialize};

/// Error raised when a chain payload received from a node does not decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// A binary blob did not deserialize into the expected structure
    #[error("malformed binary payload: {0}")]
    Decode(String),
    /// A transaction extra field is truncated or carries an unknown tag
    #[error("malformed transaction extra")]
    MalformedExtra,
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
