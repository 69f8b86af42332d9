// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MetaFS Core - in-memory flat filesystem with extended attribute support
//!
//! All state lives in [`FileStore`]: a metadata table, a data table and an
//! xattr table keyed by absolute path, guarded by one store-wide lock.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{CachePolicy, FsConfig};
pub use error::{FsError, FsResult};
pub use store::{FileStore, ROOT_PATH};
pub use types::{AttributeRecord, Descriptor, StoreStats, XattrOptions};
