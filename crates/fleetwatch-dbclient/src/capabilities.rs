use crate::info::InfoSnapshot;

/// What the connected instance supports, derived from `INFO server`
/// plus a best-effort `COMMAND DOCS` probe. A capability that can't be
/// determined degrades to `false` rather than surfacing an error —
/// the engine treats "unknown" the same as "unsupported".
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub server_name: String,
    pub version: String,
    pub supports_acl: bool,
    pub supports_cluster: bool,
    pub supports_command_docs: bool,
}

impl Capabilities {
    pub fn from_info(info: &InfoSnapshot, command_docs_available: bool) -> Self {
        let (server_name, version) = if let Some(v) = info.get("server", "valkey_version") {
            ("valkey".to_string(), v.to_string())
        } else if let Some(v) = info.get("server", "redis_version") {
            ("redis".to_string(), v.to_string())
        } else {
            ("unknown".to_string(), "0.0.0".to_string())
        };

        let supports_cluster = info
            .get("cluster", "cluster_enabled")
            .map(|v| v == "1")
            .unwrap_or(false);

        Self {
            server_name,
            version,
            supports_acl: major_version(&version) >= 6,
            supports_cluster,
            supports_command_docs: command_docs_available,
        }
    }
}

fn major_version(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_valkey_from_info() {
        let info = InfoSnapshot::parse("# Server\r\nvalkey_version:8.0.0\r\n");
        let caps = Capabilities::from_info(&info, true);
        assert_eq!(caps.server_name, "valkey");
        assert!(caps.supports_acl);
    }

    #[test]
    fn degrades_missing_capability_to_false() {
        let info = InfoSnapshot::parse("");
        let caps = Capabilities::from_info(&info, false);
        assert_eq!(caps.server_name, "unknown");
        assert!(!caps.supports_acl);
        assert!(!caps.supports_command_docs);
    }
}
