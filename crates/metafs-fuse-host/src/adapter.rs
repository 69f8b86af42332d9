// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MetaFS FUSE adapter implementation
//!
//! Maps FUSE operations to FileStore calls. FUSE addresses nodes by inode
//! number, the store by path, so the adapter keeps the mapping between them.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use crate::reply::{encode_xattr_names, xattr_reply, XattrReply};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{c_int, EINVAL, ENAMETOOLONG, ENOENT, ENOTDIR, ERANGE};
use metafs_core::{AttributeRecord, FileStore, FsConfig, XattrOptions, ROOT_PATH};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Maximum single path component length to guard against overly long names
const NAME_MAX: usize = 255;

/// MetaFS FUSE filesystem adapter
pub struct MetaFsFuse {
    /// Shared in-memory store
    store: Arc<FileStore>,
    /// TTL for attribute cache responses
    attr_ttl: Duration,
    /// TTL for directory entry cache responses
    entry_ttl: Duration,
    /// Owner reported for every node (the mounting user)
    uid: u32,
    gid: u32,
    /// Inode to path mappings
    inodes: HashMap<u64, String>,
    /// Reverse mapping from path to inode
    paths: HashMap<String, u64>,
    /// Next available inode number
    next_inode: u64,
}

impl MetaFsFuse {
    /// Create a new FUSE adapter over `store`
    pub fn new(store: Arc<FileStore>, config: &FsConfig) -> Self {
        let mut inodes = HashMap::new();
        let mut paths = HashMap::new();
        inodes.insert(FUSE_ROOT_ID, ROOT_PATH.to_string());
        paths.insert(ROOT_PATH.to_string(), FUSE_ROOT_ID);

        Self {
            store,
            attr_ttl: Duration::from_millis(config.cache.attr_ttl_ms as u64),
            entry_ttl: Duration::from_millis(config.cache.entry_ttl_ms as u64),
            uid: 0,
            gid: 0,
            inodes,
            paths,
            next_inode: FUSE_ROOT_ID + 1,
        }
    }

    /// Get the path for a given inode
    fn inode_to_path(&self, ino: u64) -> Option<&str> {
        self.inodes.get(&ino).map(String::as_str)
    }

    /// Get or allocate inode for a path
    fn get_or_alloc_inode(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.paths.get(path) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.paths.insert(path.to_string(), inode);
        self.inodes.insert(inode, path.to_string());
        inode
    }

    fn remove_path_mapping(&mut self, path: &str) -> Option<u64> {
        let inode = self.paths.remove(path)?;
        self.inodes.remove(&inode);
        Some(inode)
    }

    fn forget_inode(&mut self, inode: u64) {
        if inode == FUSE_ROOT_ID {
            return;
        }
        if let Some(path) = self.inodes.remove(&inode) {
            self.paths.remove(&path);
        }
    }

    /// Resolve `name` under `parent`. Only the root is a directory.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        if name.as_bytes().len() > NAME_MAX {
            return Err(ENAMETOOLONG);
        }
        if parent != FUSE_ROOT_ID {
            return Err(if self.inodes.contains_key(&parent) { ENOTDIR } else { ENOENT });
        }
        let name = name.to_str().ok_or(EINVAL)?;
        Ok(format!("/{name}"))
    }

    fn path_for(&self, ino: u64) -> Result<String, c_int> {
        self.inode_to_path(ino).map(str::to_string).ok_or(ENOENT)
    }

    /// Convert a store record to a FUSE FileAttr
    fn attr_to_fuse(&self, attr: &AttributeRecord, ino: u64) -> FileAttr {
        let kind = if attr.is_dir() { FileType::Directory } else { FileType::RegularFile };

        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512), // 512-byte blocks
            atime: attr.accessed_at,
            mtime: attr.modified_at,
            ctime: attr.created_at,
            crtime: attr.created_at,
            kind,
            perm: attr.permissions() as u16,
            nlink: attr.nlink.max(1),
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0, // macOS specific
        }
    }

    fn stat(&self, path: &str, ino: u64) -> Result<FileAttr, c_int> {
        let attr = self.store.attributes(path).map_err(|e| e.errno())?;
        Ok(self.attr_to_fuse(&attr, ino))
    }
}

fn xattr_name(name: &OsStr) -> Result<&str, c_int> {
    name.to_str().ok_or(EINVAL)
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl fuser::Filesystem for MetaFsFuse {
    fn init(&mut self, req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        self.uid = req.uid();
        self.gid = req.gid();
        info!(
            "MetaFS FUSE adapter initialized (uid={}, gid={}, attr_ttl={:?}, entry_ttl={:?})",
            self.uid, self.gid, self.attr_ttl, self.entry_ttl
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let stats = self.store.stats();
        info!(
            files = stats.files,
            bytes = stats.bytes,
            descriptors = stats.descriptors_issued,
            "MetaFS FUSE adapter destroyed"
        );
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        self.forget_inode(ino);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        match self.store.attributes(&path) {
            Ok(attr) => {
                let ino = self.get_or_alloc_inode(&path);
                let fuse_attr = self.attr_to_fuse(&attr, ino);
                reply.entry(&self.entry_ttl, &fuse_attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.path_for(ino).and_then(|path| self.stat(&path, ino)) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        // Apply size (truncate)
        if let Some(new_size) = size {
            if let Err(e) = self.store.truncate(&path, new_size) {
                reply.error(e.errno());
                return;
            }
        }

        if let Some(new_mode) = mode {
            if let Err(e) = self.store.set_mode(&path, new_mode) {
                reply.error(e.errno());
                return;
            }
        }

        if atime.is_some() || mtime.is_some() {
            if let Err(e) =
                self.store.set_times(&path, atime.map(resolve_time), mtime.map(resolve_time))
            {
                reply.error(e.errno());
                return;
            }
        }

        match self.stat(&path, ino) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.path_for(ino) {
            Ok(path) => {
                let descriptor = self.store.open(&path, flags);
                reply.opened(descriptor.as_u64(), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let result = self
            .path_for(ino)
            .and_then(|path| self.store.read(&path, size as usize, offset as u64).map_err(|e| e.errno()));
        match result {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let result = self
            .path_for(ino)
            .and_then(|path| self.store.write(&path, data, offset as u64).map_err(|e| e.errno()));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // Descriptors are not tracked by the store; nothing to close
        debug!("release fh {}", fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        let entries = self.store.list_entries(&path);
        for (i, name) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            let (entry_ino, file_type) = match name.as_str() {
                "." => (ino, FileType::Directory),
                ".." => (FUSE_ROOT_ID, FileType::Directory),
                _ => (self.get_or_alloc_inode(&format!("/{name}")), FileType::RegularFile),
            };

            if reply.add(entry_ino, (i + 1) as i64, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        let descriptor = match self.store.create(&path, mode & !umask) {
            Ok(d) => d,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let ino = self.get_or_alloc_inode(&path);
        match self.stat(&path, ino) {
            Ok(attr) => reply.created(&self.entry_ttl, &attr, 0, descriptor.as_u64(), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        match self.store.unlink(&path) {
            Ok(()) => {
                self.remove_path_mapping(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let result = self.path_for(ino).and_then(|path| {
            let name = xattr_name(name)?;
            self.store.get_xattr(&path, name).map_err(|e| e.errno())
        });

        match result {
            Ok(value) => match xattr_reply(value.len(), size) {
                XattrReply::Size(len) => reply.size(len),
                XattrReply::Data => reply.data(&value),
                XattrReply::TooSmall => reply.error(ERANGE),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        let result = self.path_for(ino).and_then(|path| {
            let name = xattr_name(name)?;
            let options = XattrOptions { flags, position };
            self.store.set_xattr(&path, name, value, options).map_err(|e| e.errno())
        });

        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        let result = self
            .path_for(ino)
            .and_then(|path| self.store.list_xattr(&path).map_err(|e| e.errno()));

        match result {
            Ok(names) => {
                let buffer = encode_xattr_names(&names);
                match xattr_reply(buffer.len(), size) {
                    XattrReply::Size(len) => reply.size(len),
                    XattrReply::Data => reply.data(&buffer),
                    XattrReply::TooSmall => reply.error(ERANGE),
                }
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.path_for(ino).and_then(|path| {
            let name = xattr_name(name)?;
            self.store.remove_xattr(&path, name).map_err(|e| e.errno())
        });

        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
