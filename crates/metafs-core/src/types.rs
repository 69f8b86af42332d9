// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for MetaFS

use std::time::SystemTime;

/// File type bits as stored in `AttributeRecord::mode`.
pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;

/// Permission, setuid/setgid and sticky bits
pub const PERMISSION_MASK: u32 = 0o7777;

/// Opaque descriptor handed out by `open` and `create`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Descriptor(pub u64);

impl Descriptor {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Per-path metadata record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeRecord {
    pub mode: u32,
    pub nlink: u32,
    /// Length of the data blob; always 0 for the root directory
    pub size: u64,
    pub created_at: SystemTime,
    pub modified_at: SystemTime,
    pub accessed_at: SystemTime,
}

impl AttributeRecord {
    pub(crate) fn directory(permissions: u32, now: SystemTime) -> Self {
        Self {
            mode: S_IFDIR | (permissions & PERMISSION_MASK),
            nlink: 2,
            size: 0,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        }
    }

    pub(crate) fn regular(permissions: u32, size: u64, now: SystemTime) -> Self {
        Self {
            mode: S_IFREG | (permissions & PERMISSION_MASK),
            nlink: 1,
            size,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_MASK
    }
}

/// Creation/replacement flags and position passed along with `setxattr`.
///
/// These are recorded for logging only; every set is create-or-replace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XattrOptions {
    pub flags: i32,
    pub position: u32,
}

/// Store statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub files: u64,
    pub bytes: u64,
    pub descriptors_issued: u64,
}
