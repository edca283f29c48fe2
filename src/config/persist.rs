//! Write runtime stream settings back to the config file.
//!
//! Uses toml_edit so comments and layout in the operator's file survive.

use super::StreamingMode;
use anyhow::{Context, Result};
use std::path::Path;
use toml_edit::{value, DocumentMut, Item, Table};

/// Update `stream.enabled` and `stream.mode`, leaving everything else alone
pub fn update_stream_settings(path: &Path, enabled: bool, mode: StreamingMode) -> Result<()> {
    let content = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = content
        .parse()
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if !doc.contains_table("stream") {
        doc.insert("stream", Item::Table(Table::new()));
    }
    doc["stream"]["enabled"] = value(enabled);
    doc["stream"]["mode"] = value(mode.as_str());

    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn test_update_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liverelay.toml");
        std::fs::write(
            &path,
            "# relay settings\n[server]\nport = 9000\n\n[stream]\n# keep it short\nlive_edge = 3\n",
        )
        .unwrap();

        update_stream_settings(&path, false, StreamingMode::StreamOnly).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# relay settings"));
        assert!(content.contains("# keep it short"));

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.stream.live_edge, 3);
        assert!(!config.stream.enabled);
        assert_eq!(config.stream.mode, StreamingMode::StreamOnly);
    }

    #[test]
    fn test_update_creates_stream_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 9001\n").unwrap();

        update_stream_settings(&path, true, StreamingMode::StreamAndSave).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.stream.enabled);
        assert_eq!(config.stream.mode, StreamingMode::StreamAndSave);
    }
}
