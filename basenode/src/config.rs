//! Basenode configuration file (basenode.conf) support
//!
//! Format: alias IP:port operating_privkey collateral_txid collateral_output_index
//!
//! Example:
//! mn1 192.168.1.100:9340 9f86d081884c7d65... 2bcd3c84c84f87eaa86e4e56834c92927a07f9e18718810b92e0d0324456a67c 0

use crate::error::{BasenodeError, Result};
use credo_core::{Hash256, OutPoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Single basenode configuration entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasenodeConfigEntry {
    /// Alias/name for this basenode
    pub alias: String,

    /// IP address and port (e.g., "192.168.1.100:9340")
    pub ip_port: String,

    /// Operating private key (for signing pings and votes)
    pub operating_privkey: String,

    /// Collateral transaction hash
    pub collateral_txid: String,

    /// Collateral output index
    pub collateral_output_index: u32,
}

impl BasenodeConfigEntry {
    /// Parse a single line from basenode.conf
    pub fn parse_line(line: &str, line_num: usize) -> Result<Self> {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return Err(BasenodeError::ConfigParse {
                line: line_num,
                message: "Empty or comment line".to_string(),
            });
        }

        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts.len() != 5 {
            return Err(BasenodeError::ConfigParse {
                line: line_num,
                message: format!(
                    "Expected 5 fields, got {}. Format: alias IP:port privkey txid index",
                    parts.len()
                ),
            });
        }

        if !parts[1].contains(':') {
            return Err(BasenodeError::ConfigParse {
                line: line_num,
                message: "Invalid IP:port format".to_string(),
            });
        }

        if parts[3].len() != 64 || !parts[3].chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BasenodeError::ConfigParse {
                line: line_num,
                message: "Invalid transaction ID format".to_string(),
            });
        }

        let collateral_output_index =
            parts[4].parse().map_err(|_| BasenodeError::ConfigParse {
                line: line_num,
                message: "Invalid output index".to_string(),
            })?;

        Ok(BasenodeConfigEntry {
            alias: parts[0].to_string(),
            ip_port: parts[1].to_string(),
            operating_privkey: parts[2].to_string(),
            collateral_txid: parts[3].to_string(),
            collateral_output_index,
        })
    }

    /// Serialize back to the single-line file format
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.alias,
            self.ip_port,
            self.operating_privkey,
            self.collateral_txid,
            self.collateral_output_index
        )
    }

    /// The configured collateral as an outpoint
    pub fn outpoint(&self) -> Result<OutPoint> {
        let txid =
            Hash256::from_hex(&self.collateral_txid).map_err(|e| BasenodeError::ConfigParse {
                line: 0,
                message: e.to_string(),
            })?;
        Ok(OutPoint::new(txid, self.collateral_output_index))
    }
}

/// All configured basenodes this process can control
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasenodeConfig {
    entries: Vec<BasenodeConfigEntry>,
}

impl BasenodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from basenode.conf; empty or comment lines are skipped
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::new();

        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            config.add(BasenodeConfigEntry::parse_line(trimmed, i + 1)?)?;
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::from("# basenode config file\n");
        out.push_str("# alias IP:port operating_privkey collateral_txid collateral_output_index\n");
        for entry in &self.entries {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }

    pub fn add(&mut self, entry: BasenodeConfigEntry) -> Result<()> {
        if self.entries.iter().any(|e| e.alias == entry.alias) {
            return Err(BasenodeError::AlreadyRegistered(entry.alias));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[BasenodeConfigEntry] {
        &self.entries
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<&BasenodeConfigEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "2bcd3c84c84f87eaa86e4e56834c92927a07f9e18718810b92e0d0324456a67c";

    #[test]
    fn test_parse_line() {
        let line = format!("mn1 192.168.1.100:9340 deadbeef {TXID} 0");
        let entry = BasenodeConfigEntry::parse_line(&line, 1).unwrap();
        assert_eq!(entry.alias, "mn1");
        assert_eq!(entry.collateral_output_index, 0);
        assert_eq!(entry.outpoint().unwrap().vout, 0);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(BasenodeConfigEntry::parse_line("", 1).is_err());
        assert!(BasenodeConfigEntry::parse_line("# comment", 1).is_err());
        assert!(BasenodeConfigEntry::parse_line("mn1 no-port key txid 0", 1).is_err());
        let line = format!("mn1 1.2.3.4:9340 key {TXID} not-a-number");
        assert!(BasenodeConfigEntry::parse_line(&line, 1).is_err());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut config = BasenodeConfig::new();
        let line = format!("mn1 1.2.3.4:9340 key {TXID} 0");
        let entry = BasenodeConfigEntry::parse_line(&line, 1).unwrap();
        config.add(entry.clone()).unwrap();
        assert!(config.add(entry).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basenode.conf");

        let mut config = BasenodeConfig::new();
        for alias in ["mn1", "mn2"] {
            let line = format!("{alias} 1.2.3.4:9340 key {TXID} 1");
            config
                .add(BasenodeConfigEntry::parse_line(&line, 1).unwrap())
                .unwrap();
        }
        config.save(&path).unwrap();

        let loaded = BasenodeConfig::load(&path).unwrap();
        assert_eq!(loaded.entries().len(), 2);
        assert!(loaded.find_by_alias("mn2").is_some());
        assert!(loaded.find_by_alias("mn3").is_none());
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let config = BasenodeConfig::load(Path::new("/nonexistent/basenode.conf")).unwrap();
        assert!(config.entries().is_empty());
    }
}
