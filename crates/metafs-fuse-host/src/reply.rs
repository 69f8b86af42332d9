// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Buffer sizing rules for xattr replies
//!
//! The kernel first probes with `size == 0` to learn how large a buffer it
//! needs, then repeats the call with a buffer of that size.

/// How to answer a getxattr/listxattr request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum XattrReply {
    /// Size probe: report the number of bytes needed
    Size(u32),
    /// The payload fits into the caller's buffer
    Data,
    /// The caller's buffer is too small (ERANGE)
    TooSmall,
}

pub(crate) fn xattr_reply(len: usize, requested: u32) -> XattrReply {
    if requested == 0 {
        XattrReply::Size(u32::try_from(len).unwrap_or(u32::MAX))
    } else if len <= requested as usize {
        XattrReply::Data
    } else {
        XattrReply::TooSmall
    }
}

/// listxattr wire format: every name followed by a NUL byte
pub(crate) fn encode_xattr_names(names: &[String]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    for name in names {
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(0);
    }
    buffer
}
