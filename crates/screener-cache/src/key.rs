//! File-name derivation for cache keys.

use sha2::{Digest, Sha256};

use screener_core::CacheKey;

/// Keys longer than this are hashed.
pub const MAX_KEY_LEN: usize = 200;

/// Human-readable prefix kept in front of the hash of a long key.
const HASHED_PREFIX_LEN: usize = 50;

/// Hex digits of the key hash appended to a sanitized stem.
const SANITIZED_SUFFIX_LEN: usize = 8;

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Returns a filesystem-safe stem for `key`.
///
/// Characters outside `[A-Za-z0-9_-]` become `_` and the stem gains the first
/// 8 hex digits of the key's sha256, so `X.SH` and `X_SH` stay apart. Reserved
/// device names get a leading `_`, and keys over [`MAX_KEY_LEN`] characters are
/// shortened to `<first 50 safe chars>_<sha256 hex>`.
#[must_use]
pub fn file_stem(key: &CacheKey) -> String {
    let raw = key.as_str();
    let safe: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let stem = if raw.chars().count() > MAX_KEY_LEN {
        let prefix: String = safe.chars().take(HASHED_PREFIX_LEN).collect();
        format!("{prefix}_{:x}", Sha256::digest(raw.as_bytes()))
    } else if safe != raw {
        let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
        format!("{safe}_{}", &digest[..SANITIZED_SUFFIX_LEN])
    } else {
        safe
    };

    if RESERVED_NAMES
        .iter()
        .any(|name| stem.eq_ignore_ascii_case(name))
    {
        format!("_{stem}")
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem(raw: &str) -> String {
        file_stem(&CacheKey::new(raw).unwrap())
    }

    #[test]
    fn test_unsafe_characters_collapse() {
        assert_eq!(
            stem("600519.SH_20180101_20221231_5"),
            "600519_SH_20180101_20221231_5_56adde79"
        );
        assert_eq!(stem("../etc/passwd"), "___etc_passwd_7fef78f5");
        assert_eq!(stem(r"a\b:c*d"), "a_b_c_d_7c376bed");
        assert_eq!(stem("600519_SH_history"), "600519_SH_history");
    }

    #[test]
    fn test_sanitized_keys_do_not_collide() {
        assert_eq!(stem("X.SH_history"), "X_SH_history_358fed58");
        assert_ne!(stem("X.SH_history"), stem("X_SH_history"));
        assert_ne!(stem("X.SH_history"), stem("X/SH_history"));
    }

    #[test]
    fn test_reserved_names_prefixed() {
        assert_eq!(stem("con"), "_con");
        assert_eq!(stem("LPT1"), "_LPT1");
        assert_eq!(stem("console"), "console");
    }

    #[test]
    fn test_long_keys_hashed() {
        let long = "x".repeat(MAX_KEY_LEN + 1);
        let hashed = stem(&long);
        assert_eq!(hashed.len(), HASHED_PREFIX_LEN + 1 + 64);
        assert!(hashed.starts_with(&"x".repeat(HASHED_PREFIX_LEN)));
        assert_ne!(hashed, stem(&format!("{long}y")));
        assert_eq!(hashed, stem(&long));

        let boundary = "x".repeat(MAX_KEY_LEN);
        assert_eq!(stem(&boundary), boundary);
    }
}
