// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for MetaFS

use serde::{Deserialize, Serialize};

/// Kernel cache lifetimes used by the FUSE bridge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

/// Filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub cache: CachePolicy,
    /// Seed `/exemplo.txt` with sample content and xattrs at startup
    pub seed_sample: bool,
    /// Name reported to the kernel as the filesystem source
    pub fs_name: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache: CachePolicy::default(),
            seed_sample: true,
            fs_name: "metafs".to_string(),
        }
    }
}

impl FsConfig {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}
