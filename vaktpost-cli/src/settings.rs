//! Optional YAML settings file; CLI flags take precedence.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub listen: Option<SocketAddr>,
    pub backend: Option<String>,
    pub message: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_settings() {
        let settings: Settings = serde_yaml::from_str("listen: 127.0.0.1:9000\n").unwrap();
        assert_eq!(settings.listen.unwrap().port(), 9000);
        assert!(settings.backend.is_none());
    }
}
