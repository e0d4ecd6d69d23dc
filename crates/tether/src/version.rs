//! Version information reported by the host.

use serde::{Deserialize, Serialize};

/// Tether version from Cargo.toml
pub const TETHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bumped whenever the envelope or a command schema changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub tether: String,
    pub protocol: u32,
    /// Embedding host application, e.g. `"tether-host 0.3.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            tether: TETHER_VERSION.to_string(),
            protocol: PROTOCOL_VERSION,
            host: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.tether, TETHER_VERSION);
        assert_eq!(info.protocol, PROTOCOL_VERSION);
        assert!(info.host.is_none());
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            tether: "0.1.0".to_string(),
            protocol: 1,
            host: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "tether": "0.1.0",
          "protocol": 1
        }
        "#);
    }

    #[test]
    fn host_label_is_serialized_when_set() {
        let info = VersionInfo::new().with_host("tether-host 0.3.0");
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["host"], "tether-host 0.3.0");
        assert_eq!(value["protocol"], PROTOCOL_VERSION);
    }
}
