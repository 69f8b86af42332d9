// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for MetaFS Core

use libc::c_int;

/// ENOATTR is an alias of ENODATA on Linux and only exists as its own
/// constant on the BSD family.
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
const ENOATTR: c_int = libc::ENOATTR;
#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
const ENOATTR: c_int = libc::ENODATA;

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("no extended attribute table for path")]
    NoAttributeSupport,
    #[error("extended attribute not found")]
    AttributeNotFound,
    #[error("is a directory")]
    IsADirectory,
}

impl FsError {
    /// Kernel status code reported back through the FUSE reply.
    pub fn errno(self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NoAttributeSupport => ENOATTR,
            FsError::AttributeNotFound => libc::ENODATA,
            FsError::IsADirectory => libc::EISDIR,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
