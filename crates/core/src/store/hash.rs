//! Storage key generation for request identities.

use sha2::{Digest, Sha256};

/// Compute the storage key for a request identity.
///
/// The method is length-prefixed so no (method, url) pair can hash the same
/// bytes as another.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((method.len() as u64).to_be_bytes());
    hasher.update(method.as_bytes());
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_cache_key("GET", "https://example.com/");
        let hash2 = compute_cache_key("GET", "https://example.com/");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_different_method() {
        assert_ne!(compute_cache_key("GET", "https://example.com/"), compute_cache_key("HEAD", "https://example.com/"));
    }

    #[test]
    fn test_hash_no_field_bleed() {
        assert_ne!(compute_cache_key("GET", "\nhttps://a"), compute_cache_key("GET\n", "https://a"));
    }

    #[test]
    fn test_identity_keys_differ_by_method_and_url() {
        use crate::identity::RequestIdentity;
        use http::Method;
        use url::Url;

        let url = Url::parse("https://example.com/data?page=1").unwrap();
        let get = RequestIdentity::new(Method::GET, &url).unwrap();
        let head = RequestIdentity::new(Method::HEAD, &url).unwrap();
        let other = RequestIdentity::parse_get("https://example.com/data?page=2", None).unwrap();
        let fragment = RequestIdentity::parse_get("https://EXAMPLE.com/data?page=1#top", None).unwrap();

        assert_ne!(get.cache_key(), head.cache_key());
        assert_ne!(get.cache_key(), other.cache_key());
        assert_eq!(get.cache_key(), fragment.cache_key());
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_cache_key("GET", "https://example.com/");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
