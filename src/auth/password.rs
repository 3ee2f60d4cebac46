//! Password hashing. One path only: bcrypt at configurable cost.

use anyhow::anyhow;
use openpenpal_core::error::CoreError;

pub fn hash(password: &str, cost: u32) -> Result<String, CoreError> {
    bcrypt::hash(password, cost).map_err(|e| CoreError::Internal(anyhow!("bcrypt hash: {e}")))
}

pub fn verify(password: &str, hashed: &str) -> bool {
    bcrypt::verify(password, hashed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_reject() {
        // Minimum cost keeps the test fast; production cost comes from
        // config.
        let hashed = hash("correct horse", 4).unwrap();
        assert!(verify("correct horse", &hashed));
        assert!(!verify("wrong", &hashed));
        assert!(!verify("correct horse", "not-a-bcrypt-hash"));
    }
}
