// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hierarchical bridge configuration.
//!
//! The configuration is a JSON document. Keys are looked up with slash-separated
//! paths where `*` matches exactly one level and `**` matches any number of
//! levels, so `**/debug_bridge/start_addr` finds the key wherever the board
//! description nests the `debug_bridge` section.

use std::path::Path;

use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::loader::BootMode;

pub struct Config {
    root: Value,
}

impl Config {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BridgeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let root = serde_json::from_str(text)
            .map_err(|e| BridgeError::Config(format!("invalid JSON: {}", e)))?;
        Ok(Self::new(root))
    }

    /// Look up a key path. `null` values count as absent.
    pub fn get(&self, pattern: &str) -> Option<&Value> {
        let parts: Vec<&str> = pattern.split('/').filter(|p| !p.is_empty()).collect();
        lookup(&self.root, &parts).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, pattern: &str) -> Result<Option<&str>> {
        match self.get(pattern) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(BridgeError::Config(format!(
                "{} should be a string, got {}",
                pattern, other
            ))),
        }
    }

    /// Integers may be JSON numbers or strings in hex (`0x...`) or decimal.
    pub fn get_int(&self, pattern: &str) -> Result<Option<u64>> {
        let Some(value) = self.get(pattern) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => parse_int(s),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| {
                BridgeError::Config(format!("{} is not a valid integer: {}", pattern, value))
            })
    }

    pub fn get_u32(&self, pattern: &str) -> Result<Option<u32>> {
        match self.get_int(pattern)? {
            None => Ok(None),
            Some(v) => u32::try_from(v).map(Some).map_err(|_| {
                BridgeError::Config(format!("{} does not fit in 32 bits: 0x{:x}", pattern, v))
            }),
        }
    }

    /// Serialized view of the section matched by `pattern`, as handed to the engine.
    pub fn dump_section(&self, pattern: &str) -> Option<String> {
        self.get(pattern).map(|v| v.to_string())
    }

    pub fn dump(&self) -> String {
        self.root.to_string()
    }
}

fn lookup<'a>(value: &'a Value, parts: &[&str]) -> Option<&'a Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value);
    };
    match *head {
        "**" => lookup(value, rest).or_else(|| {
            value
                .as_object()?
                .values()
                .find_map(|child| lookup(child, parts))
        }),
        "*" => value
            .as_object()?
            .values()
            .find_map(|child| lookup(child, rest)),
        key => lookup(value.as_object()?.get(key)?, rest),
    }
}

fn parse_int(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

/// A memory-mapped location the boot ROM or runtime polls to start or stop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Doorbell {
    pub addr: u32,
    pub value: u32,
}

/// Typed view of the `debug_bridge` section.
#[derive(Debug, Clone, Default)]
pub struct BridgeSettings {
    pub cable_type: Option<String>,
    pub boot_mode: BootMode,
    pub set_pc_addr: Option<u32>,
    pub start: Option<Doorbell>,
    pub stop: Option<Doorbell>,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let boot_mode = config
            .get("**/debug_bridge/boot-mode")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Ok(Self {
            cable_type: config
                .get_str("**/debug_bridge/cable/type")?
                .map(str::to_string),
            boot_mode,
            set_pc_addr: config.get_u32("**/debug_bridge/set_pc_addr")?,
            start: doorbell(config, "start")?,
            stop: doorbell(config, "stop")?,
        })
    }
}

fn doorbell(config: &Config, name: &str) -> Result<Option<Doorbell>> {
    let Some(addr) = config.get_u32(&format!("**/debug_bridge/{}_addr", name))? else {
        return Ok(None);
    };
    let value = config
        .get_u32(&format!("**/debug_bridge/{}_value", name))?
        .ok_or_else(|| {
            BridgeError::Config(format!(
                "debug_bridge/{}_addr is set but debug_bridge/{}_value is missing",
                name, name
            ))
        })?;
    Ok(Some(Doorbell { addr, value }))
}
