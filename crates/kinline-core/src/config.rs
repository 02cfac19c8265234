use crate::errors::{InlineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capacity of one segmented LRU table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCapacity {
    /// Entries kept after a second hit
    pub protected: usize,
    /// Entries seen once
    pub probationary: usize,
}

impl CacheCapacity {
    pub const fn new(protected: usize, probationary: usize) -> Self {
        Self {
            protected,
            probationary,
        }
    }
}

fn default_class_bytes_cache() -> CacheCapacity {
    CacheCapacity::new(30, 20)
}

fn default_method_node_cache() -> CacheCapacity {
    CacheCapacity::new(60, 50)
}

fn default_true() -> bool {
    true
}

/// Options that change the code the inliner emits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineConfig {
    /// Write SMAP debug extensions into changed classes (default: true)
    #[serde(default = "default_true")]
    pub generate_smap: bool,

    /// Use the current SMAP syntax; false writes the syntax older
    /// debuggers expect (default: true)
    #[serde(default = "default_true")]
    pub correct_source_mapping_syntax: bool,

    /// Give regenerated objects their own `$assertionsDisabled` (default: false)
    #[serde(default)]
    pub generate_assert_field: bool,

    /// Cast failures throw the unified null-check exception (default: true)
    #[serde(default = "default_true")]
    pub unified_null_checks: bool,

    #[serde(default = "default_class_bytes_cache")]
    pub class_bytes_cache: CacheCapacity,

    #[serde(default = "default_method_node_cache")]
    pub method_node_cache: CacheCapacity,

    /// Module being compiled; objects from other modules must be public ABI
    #[serde(default)]
    pub module_name: Option<String>,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            generate_smap: true,
            correct_source_mapping_syntax: true,
            generate_assert_field: false,
            unified_null_checks: true,
            class_bytes_cache: default_class_bytes_cache(),
            method_node_cache: default_method_node_cache(),
            module_name: None,
        }
    }
}

impl InlineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| InlineError::Config(e.to_string()))
    }

    /// Create a default configuration and write it to a file
    pub fn init_file(path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&InlineConfig::default())
            .map_err(|e| InlineError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn backwards_compatible_smap_syntax(&self) -> bool {
        !self.correct_source_mapping_syntax
    }
}
