//! Various hash functions

use sha3::{Digest, Keccak256};

/// Keccak-256 digest, the content hash used across the chain formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Keccak(pub [u8; 32]);

/// Calculate the Keccak-256 hash
pub fn calculate_keccak256(bytes: &[u8]) -> Keccak {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let mut hash = [0; 32];
    hash.copy_from_slice(&hasher.finalize());
    Keccak(hash)
}

impl AsRef<[u8]> for Keccak {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty_input() {
        let hash = calculate_keccak256(b"");

        assert_eq!(
            hex::encode(hash.0),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_known_vector() {
        let hash = calculate_keccak256(b"abc");

        assert_eq!(
            hex::encode(hash.0),
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
    }
}
