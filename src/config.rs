//! Fuse configuration file codec.
//!
//! Line-oriented `key = value` text, values decimal or `0x` hex, comments
//! from `#` or `;` to end of line. Keys keep their declaration order so a
//! file written from a fresh read matches what the layout declares.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct FuseConfig {
    entries: Vec<(String, u32)>,
}

impl FuseConfig {
    pub fn new() -> Self {
        FuseConfig::default()
    }

    /// Parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config = FuseConfig::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = match raw_line.find(['#', ';']) {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(Error::ConfigParse(index + 1))?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(Error::ConfigParse(index + 1));
            }
            let value = parse_int(value).ok_or(Error::ConfigParse(index + 1))?;
            config.set(key, value);
        }
        Ok(config)
    }

    /// Write every entry, in declaration order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(&format!("{key} = {value:#04x}\n"));
        }
        fs::write(path, out)?;
        Ok(())
    }

    /// Set a key, replacing an earlier value but keeping its position.
    pub fn set(&mut self, key: &str, value: u32) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Result<u32> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .ok_or_else(|| Error::UnknownKey(key.to_string()))
    }
}

fn parse_int(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
