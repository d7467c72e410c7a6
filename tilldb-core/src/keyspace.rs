//! Key-space partitioning.
//!
//! Every document id has the shape `<namespace>:<local-key>`. Namespaces are
//! purely lexical: the range of a namespace is `<ns>:` (inclusive) up to
//! `<ns>:` followed by [`SENTINEL`].

use crate::error::{StoreError, StoreResult};

/// Separator between namespace and local key
pub const DELIMITER: char = ':';

/// Upper bound character of a namespace range.
///
/// Local keys may only contain characters strictly below it, so
/// `<ns>:<SENTINEL>` sorts after every valid key of the namespace.
pub const SENTINEL: char = '\u{FFF0}';

/// Namespace part of an id (text before the first delimiter).
///
/// Returns `None` when the id has no delimiter.
pub fn namespace_of(id: &str) -> Option<&str> {
    id.split_once(DELIMITER).map(|(ns, _)| ns)
}

/// Local key part of an id (text after the first delimiter).
pub fn local_key_of(id: &str) -> Option<&str> {
    id.split_once(DELIMITER).map(|(_, key)| key)
}

/// Prefix shared by every key of `namespace`, i.e. `<ns>:`
pub fn prefix(namespace: &str) -> String {
    format!("{}{}", namespace, DELIMITER)
}

/// Inclusive lower bound of a namespace range
pub fn lower_bound(namespace: &str) -> String {
    prefix(namespace)
}

/// Inclusive upper bound of a namespace range, i.e. `<ns>:\u{FFF0}`
pub fn upper_bound(namespace: &str) -> String {
    format!("{}{}{}", namespace, DELIMITER, SENTINEL)
}

/// Join a namespace and a local key into a full id
pub fn join(namespace: &str, local_key: &str) -> String {
    format!("{}{}{}", namespace, DELIMITER, local_key)
}

pub fn validate_namespace(namespace: &str) -> StoreResult<()> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidKey("namespace must not be empty".to_string()));
    }
    if namespace.contains(DELIMITER) {
        return Err(StoreError::InvalidKey(format!(
            "namespace '{}' must not contain '{}'",
            namespace, DELIMITER
        )));
    }
    Ok(())
}

/// Validate a full document id.
///
/// The local key may be empty only while an id is still being generated;
/// stored ids always carry a non-empty local key.
pub fn validate_id(id: &str) -> StoreResult<()> {
    let (namespace, local_key) = id
        .split_once(DELIMITER)
        .ok_or_else(|| StoreError::InvalidKey(format!("id '{}' has no namespace", id)))?;
    validate_namespace(namespace)?;
    if local_key.is_empty() {
        return Err(StoreError::InvalidKey(format!("id '{}' has an empty local key", id)));
    }
    if let Some(c) = local_key.chars().find(|c| *c >= SENTINEL) {
        return Err(StoreError::InvalidKey(format!(
            "local key of '{}' contains U+{:04X}, keys must stay below U+{:04X}",
            id, c as u32, SENTINEL as u32
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("products:1"), Some("products"));
        assert_eq!(namespace_of("orders:2024:17"), Some("orders"));
        assert_eq!(namespace_of("nodelimiter"), None);
        assert_eq!(local_key_of("orders:2024:17"), Some("2024:17"));
    }

    #[test]
    fn test_bounds_enclose_namespace() {
        let lo = lower_bound("products");
        let hi = upper_bound("products");
        for key in ["products:", "products:1", "products:zzz", "products:~~~", "products:é"] {
            assert!(lo.as_str() <= key && key <= hi.as_str(), "{} out of range", key);
        }
    }

    #[test]
    fn test_bounds_exclude_adjacent_namespaces() {
        let lo = lower_bound("products");
        let hi = upper_bound("products");
        for key in ["product:1", "products2:1", "productsa:1", "orders:1", "sales:1"] {
            assert!(!(lo.as_str() <= key && key <= hi.as_str()), "{} in range", key);
        }
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("products:1").is_ok());
        assert!(validate_id("orders:2024:17").is_ok());
        assert!(validate_id("products:Ωmega").is_ok());

        assert!(matches!(validate_id("noprefix"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(validate_id(":1"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(validate_id("products:"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(validate_id("products:\u{FFF0}"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(validate_id("products:🍔"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("orders").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("a:b").is_err());
    }
}
