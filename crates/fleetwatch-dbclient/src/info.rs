use std::collections::HashMap;

/// Parsed `INFO` output: `section -> field -> value`. Comments (`#`)
/// become section headers; blank lines are skipped, matching the
/// `# section\r\nkey:value\r\n` layout both Redis and Valkey emit.
#[derive(Debug, Clone, Default)]
pub struct InfoSnapshot {
    sections: HashMap<String, HashMap<String, String>>,
}

impl InfoSnapshot {
    pub fn parse(raw: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = "default".to_string();

        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('#') {
                current = name.trim().to_lowercase();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
            }
        }

        Self { sections }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(|s| s.as_str())
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Option<f64> {
        self.get(section, key).and_then(|v| v.parse().ok())
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get(section, key).and_then(|v| v.parse().ok())
    }

    pub fn section(&self, section: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(section)
    }

    /// Look up `key` in any section, for metric extractors that don't
    /// want to hard-code which `INFO` section a field lives under (it
    /// varies slightly across Redis/Valkey versions and cluster vs.
    /// standalone mode).
    pub fn find(&self, key: &str) -> Option<&str> {
        self.sections.values().find_map(|fields| fields.get(key)).map(|s| s.as_str())
    }

    pub fn find_f64(&self, key: &str) -> Option<f64> {
        self.find(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_fields() {
        let raw = "# Server\r\nredis_version:7.2.4\r\ntcp_port:6379\r\n\r\n# Clients\r\nconnected_clients:12\r\n";
        let snapshot = InfoSnapshot::parse(raw);
        assert_eq!(snapshot.get("server", "redis_version"), Some("7.2.4"));
        assert_eq!(snapshot.get_u64("server", "tcp_port"), Some(6379));
        assert_eq!(snapshot.get_u64("clients", "connected_clients"), Some(12));
    }

    #[test]
    fn missing_field_returns_none() {
        let snapshot = InfoSnapshot::parse("# Server\r\nredis_version:7.2.4\r\n");
        assert_eq!(snapshot.get("server", "nonexistent"), None);
        assert_eq!(snapshot.get("nonexistent-section", "x"), None);
    }

    #[test]
    fn find_locates_field_without_knowing_its_section() {
        let raw = "# Memory\r\nused_memory:1048576\r\nmem_fragmentation_ratio:1.8\r\n";
        let snapshot = InfoSnapshot::parse(raw);
        assert_eq!(snapshot.find_f64("used_memory"), Some(1_048_576.0));
        assert_eq!(snapshot.find("nonexistent"), None);
    }
}
