use serde::Serialize;
use sha2::{Digest, Sha256};

// Hashing helpers shared by descriptors and store snapshots. Kept separate so both the model
// and the sync session reuse one definition.
pub fn digest_json<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    let payload = serde_json::to_vec(value).unwrap_or_default();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_changes_with_content() {
        assert_ne!(digest_json(&("a", 1)), digest_json(&("a", 2)));
        assert_eq!(digest_json(&("a", 1)), digest_json(&("a", 1)));
    }
}
