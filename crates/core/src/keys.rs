//! Keys that describe the storage itself rather than user content.

use std::collections::BTreeSet;

/// Key holding the persisted backend preference.
pub const STORAGE_PREFERENCE_KEY: &str = "storagePreference";

/// Key holding the UI theme mode.
pub const THEME_MODE_KEY: &str = "themeMode";

/// Prefix of implementation-internal keys. These are never migrated.
pub const INTERNAL_KEY_PREFIX: &str = "__clipdo";

/// Keys exempt from bulk clears and from migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedKeys {
    keys: BTreeSet<String>,
    internal_prefix: String,
}

impl PreservedKeys {
    /// An empty set, preserving nothing.
    pub fn none() -> Self {
        Self {
            keys: BTreeSet::new(),
            internal_prefix: INTERNAL_KEY_PREFIX.to_string(),
        }
    }

    /// Add a preserved key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into());
        self
    }

    /// Replace the internal key prefix.
    pub fn with_internal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefix = prefix.into();
        self
    }

    /// Whether `key` must survive clears.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Whether `key` is reserved for internal bookkeeping.
    pub fn is_internal(&self, key: &str) -> bool {
        !self.internal_prefix.is_empty() && key.starts_with(&self.internal_prefix)
    }

    /// Whether `key` carries user content that migration should move.
    pub fn is_migratable(&self, key: &str) -> bool {
        !self.contains(key) && !self.is_internal(key)
    }

    /// Iterate the preserved key names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl Default for PreservedKeys {
    fn default() -> Self {
        Self::none()
            .with_key(STORAGE_PREFERENCE_KEY)
            .with_key(THEME_MODE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let keys = PreservedKeys::default();
        assert!(keys.contains(STORAGE_PREFERENCE_KEY));
        assert!(keys.contains(THEME_MODE_KEY));
        assert!(!keys.contains("todos"));
        assert!(keys.is_migratable("todos"));
        assert!(!keys.is_migratable(THEME_MODE_KEY));
    }

    #[test]
    fn test_internal_prefix() {
        let keys = PreservedKeys::default();
        assert!(keys.is_internal("__clipdo_session"));
        assert!(!keys.is_migratable("__clipdo_session"));
        // Internal keys are skipped by migration but not protected from clears.
        assert!(!keys.contains("__clipdo_session"));

        let keys = PreservedKeys::none().with_internal_prefix("");
        assert!(!keys.is_internal("__clipdo_session"));
    }
}
