use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hex SHA-256 of the canonical JSON encoding of a parameter set.
///
/// Two parameter sets share a fingerprint exactly when they serialize to the
/// same JSON, so field order and vector order both matter.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let encoded = serde_json::to_vec(value).unwrap_or_else(|e| {
        warn!("⚠️ Failed to encode parameters for fingerprint: {}", e);
        Vec::new()
    });
    hex::encode(Sha256::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable_and_order_sensitive() {
        let a = fingerprint(&json!({ "addresses": ["0x1", "0x2"] }));
        let b = fingerprint(&json!({ "addresses": ["0x1", "0x2"] }));
        let c = fingerprint(&json!({ "addresses": ["0x2", "0x1"] }));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
