//! Storage medium selection.

use serde::{Deserialize, Serialize};

/// One of the three mutually exclusive storage mediums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Browser-style cookies with an expiration window
    Cookie,
    /// Durable local key/value storage
    Local,
    /// Remote rows scoped to a signed-in user
    Cloud,
}

impl BackendKind {
    /// All kinds, in display order.
    pub const ALL: [BackendKind; 3] = [BackendKind::Cookie, BackendKind::Local, BackendKind::Cloud];

    /// Wire name used for the persisted preference.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Cookie => "cookie",
            BackendKind::Local => "local",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown storage backend: {0:?} (expected cookie, local or cloud)")]
pub struct ParseBackendKindError(pub String);

impl std::str::FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(BackendKind::Cookie),
            "local" => Ok(BackendKind::Local),
            "cloud" => Ok(BackendKind::Cloud),
            _ => Err(ParseBackendKindError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!(" Cloud ".parse::<BackendKind>().unwrap(), BackendKind::Cloud);
        assert!("indexeddb".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&BackendKind::Cookie).unwrap();
        assert_eq!(json, "\"cookie\"");
        let kind: BackendKind = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(kind, BackendKind::Local);
    }
}
