// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory file store backing the MetaFS mount

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::{error, info};

use crate::error::{FsError, FsResult};
use crate::types::{
    AttributeRecord, Descriptor, StoreStats, XattrOptions, PERMISSION_MASK, S_IFMT,
};
use crate::FsConfig;

pub const ROOT_PATH: &str = "/";

const SAMPLE_PATH: &str = "/exemplo.txt";
const SAMPLE_CONTENT: &[u8] = b"This file has metadata!\n";
const SAMPLE_XATTRS: [(&str, &[u8]); 3] = [
    ("user.category", b"documents"),
    ("user.tags", b"sample,python"),
    ("user.classification", b"important"),
];

type XattrSet = HashMap<String, Vec<u8>>;

/// The three path-keyed tables plus the descriptor counter.
///
/// A non-root path is either present in all three tables or in none of them.
/// Root lives in `metadata` and `xattrs` only.
#[derive(Default)]
struct Tables {
    metadata: HashMap<String, AttributeRecord>,
    data: HashMap<String, Vec<u8>>,
    xattrs: HashMap<String, XattrSet>,
    next_descriptor: u64,
}

impl Tables {
    fn issue_descriptor(&mut self) -> Descriptor {
        self.next_descriptor += 1;
        Descriptor(self.next_descriptor)
    }

    /// Error for a path that has no data blob. Root and unknown paths are
    /// ordinary misses; a known file without a blob means the tables drifted.
    fn missing_blob(&self, path: &str) -> FsError {
        if path != ROOT_PATH && self.metadata.contains_key(path) {
            error!(target: "metafs::ops", path, "metadata entry without data blob");
        }
        FsError::NotFound
    }
}

/// In-memory flat filesystem: metadata, data and xattr tables behind a
/// single store-wide lock.
pub struct FileStore {
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Create a store with the root directory and, if configured, the sample file
    pub fn new(config: &FsConfig) -> Self {
        let store = Self::empty();
        if config.seed_sample {
            store.seed_sample();
        }
        info!(
            target: "metafs::ops",
            seed_sample = config.seed_sample,
            "filesystem initialized in memory"
        );
        store
    }

    /// Create a store that holds only the root directory
    pub fn empty() -> Self {
        let mut tables = Tables::default();
        tables
            .metadata
            .insert(ROOT_PATH.to_string(), AttributeRecord::directory(0o755, SystemTime::now()));
        tables.xattrs.insert(ROOT_PATH.to_string(), XattrSet::new());
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn seed_sample(&self) {
        let mut tables = self.lock();
        let now = SystemTime::now();
        tables.metadata.insert(
            SAMPLE_PATH.to_string(),
            AttributeRecord::regular(0o644, SAMPLE_CONTENT.len() as u64, now),
        );
        tables.data.insert(SAMPLE_PATH.to_string(), SAMPLE_CONTENT.to_vec());
        tables.xattrs.insert(
            SAMPLE_PATH.to_string(),
            SAMPLE_XATTRS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_vec()))
                .collect(),
        );
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attributes(&self, path: &str) -> FsResult<AttributeRecord> {
        info!(target: "metafs::ops", path, "getattr");
        self.lock().metadata.get(path).cloned().ok_or(FsError::NotFound)
    }

    /// Directory listing. The namespace is flat, so every file shows up
    /// regardless of which directory is listed.
    pub fn list_entries(&self, path: &str) -> Vec<String> {
        info!(target: "metafs::ops", path, "readdir");
        let tables = self.lock();
        let mut names: Vec<String> = tables
            .metadata
            .keys()
            .filter(|p| p.as_str() != ROOT_PATH)
            .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
            .collect();
        names.sort();

        let mut entries = Vec::with_capacity(names.len() + 2);
        entries.push(".".to_string());
        entries.push("..".to_string());
        entries.extend(names);
        entries
    }

    pub fn read(&self, path: &str, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        info!(target: "metafs::ops", path, size, offset, "read");
        let tables = self.lock();
        let blob = tables.data.get(path).ok_or_else(|| tables.missing_blob(path))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(blob.len());
        let end = start.saturating_add(size).min(blob.len());
        Ok(blob[start..end].to_vec())
    }

    /// Create (or silently replace) a regular file with empty content and no xattrs
    pub fn create(&self, path: &str, mode: u32) -> FsResult<Descriptor> {
        info!(target: "metafs::ops", path, mode = %format!("{mode:o}"), "create");
        if path == ROOT_PATH {
            return Err(FsError::IsADirectory);
        }
        let mut tables = self.lock();
        tables
            .metadata
            .insert(path.to_string(), AttributeRecord::regular(mode, 0, SystemTime::now()));
        tables.data.insert(path.to_string(), Vec::new());
        tables.xattrs.insert(path.to_string(), XattrSet::new());
        Ok(tables.issue_descriptor())
    }

    /// Hand out a fresh descriptor. Neither the path nor the flags are checked.
    pub fn open(&self, path: &str, flags: i32) -> Descriptor {
        info!(target: "metafs::ops", path, flags, "open");
        self.lock().issue_descriptor()
    }

    /// Shrink the file to `length` bytes. Lengths past the end leave the data untouched.
    pub fn truncate(&self, path: &str, length: u64) -> FsResult<()> {
        info!(target: "metafs::ops", path, length, "truncate");
        let mut guard = self.lock();
        let tables = &mut *guard;
        let Some(blob) = tables.data.get_mut(path) else {
            return Err(tables.missing_blob(path));
        };
        let keep = usize::try_from(length).unwrap_or(usize::MAX).min(blob.len());
        blob.truncate(keep);
        let size = blob.len() as u64;
        Self::record_resize(&mut tables.metadata, path, size)
    }

    /// Replace everything from `offset` onwards with `data`.
    ///
    /// Bytes that used to sit past `offset + data.len()` are dropped, and an
    /// offset past the end appends without zero fill.
    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        info!(target: "metafs::ops", path, offset, bytes = data.len(), "write");
        let mut guard = self.lock();
        let tables = &mut *guard;
        let Some(blob) = tables.data.get_mut(path) else {
            return Err(tables.missing_blob(path));
        };
        let keep = usize::try_from(offset).unwrap_or(usize::MAX).min(blob.len());
        blob.truncate(keep);
        blob.extend_from_slice(data);
        let size = blob.len() as u64;
        Self::record_resize(&mut tables.metadata, path, size)?;
        Ok(data.len())
    }

    fn record_resize(
        metadata: &mut HashMap<String, AttributeRecord>,
        path: &str,
        size: u64,
    ) -> FsResult<()> {
        match metadata.get_mut(path) {
            Some(record) => {
                record.size = size;
                record.modified_at = SystemTime::now();
                Ok(())
            }
            None => {
                error!(target: "metafs::ops", path, "data blob without metadata entry");
                Err(FsError::NotFound)
            }
        }
    }

    /// Remove a file from all three tables
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        info!(target: "metafs::ops", path, "unlink");
        if path == ROOT_PATH {
            return Err(FsError::IsADirectory);
        }
        let mut tables = self.lock();
        tables.metadata.remove(path).ok_or(FsError::NotFound)?;
        if tables.data.remove(path).is_none() || tables.xattrs.remove(path).is_none() {
            error!(target: "metafs::ops", path, "unlinked entry was missing data or xattrs");
        }
        Ok(())
    }

    /// Replace permission bits, keeping the file type bits
    pub fn set_mode(&self, path: &str, mode: u32) -> FsResult<()> {
        info!(target: "metafs::ops", path, mode = %format!("{mode:o}"), "chmod");
        let mut tables = self.lock();
        let record = tables.metadata.get_mut(path).ok_or(FsError::NotFound)?;
        record.mode = (record.mode & S_IFMT) | (mode & PERMISSION_MASK);
        Ok(())
    }

    pub fn set_times(
        &self,
        path: &str,
        accessed_at: Option<SystemTime>,
        modified_at: Option<SystemTime>,
    ) -> FsResult<()> {
        info!(target: "metafs::ops", path, ?accessed_at, ?modified_at, "utimens");
        let mut tables = self.lock();
        let record = tables.metadata.get_mut(path).ok_or(FsError::NotFound)?;
        if let Some(atime) = accessed_at {
            record.accessed_at = atime;
        }
        if let Some(mtime) = modified_at {
            record.modified_at = mtime;
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.lock();
        StoreStats {
            files: tables.data.len() as u64,
            bytes: tables.data.values().map(|blob| blob.len() as u64).sum(),
            descriptors_issued: tables.next_descriptor,
        }
    }

    // Extended attributes operations

    pub fn get_xattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        info!(target: "metafs::ops", path, name, "getxattr");
        let tables = self.lock();
        let attrs = tables.xattrs.get(path).ok_or(FsError::NoAttributeSupport)?;
        attrs.get(name).cloned().ok_or(FsError::AttributeNotFound)
    }

    /// Create or replace `name`. The flags in `options` are not enforced.
    pub fn set_xattr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
        options: XattrOptions,
    ) -> FsResult<()> {
        info!(
            target: "metafs::ops",
            path,
            name,
            len = value.len(),
            flags = options.flags,
            position = options.position,
            "setxattr"
        );
        let mut tables = self.lock();
        let attrs = tables.xattrs.get_mut(path).ok_or(FsError::NoAttributeSupport)?;
        attrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    pub fn list_xattr(&self, path: &str) -> FsResult<Vec<String>> {
        info!(target: "metafs::ops", path, "listxattr");
        let tables = self.lock();
        let attrs = tables.xattrs.get(path).ok_or(FsError::NoAttributeSupport)?;
        let mut names: Vec<String> = attrs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        info!(target: "metafs::ops", path, name, "removexattr");
        let mut tables = self.lock();
        let attrs = tables.xattrs.get_mut(path).ok_or(FsError::NoAttributeSupport)?;
        attrs.remove(name).map(|_| ()).ok_or(FsError::AttributeNotFound)
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(&FsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{S_IFDIR, S_IFREG};
    use std::time::{Duration, UNIX_EPOCH};

    fn file_with(store: &FileStore, path: &str, content: &[u8]) {
        store.create(path, 0o644).expect("create file");
        store.write(path, content, 0).expect("write content");
    }

    fn content(store: &FileStore, path: &str) -> Vec<u8> {
        store.read(path, usize::MAX, 0).expect("read whole file")
    }

    #[test]
    fn test_root_initialized() {
        let store = FileStore::empty();
        let root = store.attributes("/").expect("root attributes");
        assert_eq!(root.mode, S_IFDIR | 0o755);
        assert_eq!(root.nlink, 2);
        assert!(root.is_dir());
        assert!(store.list_xattr("/").expect("root xattrs").is_empty());
        assert_eq!(store.list_entries("/"), vec![".", ".."]);
    }

    #[test]
    fn test_sample_file_seeded() {
        let store = FileStore::default();
        let attr = store.attributes(SAMPLE_PATH).expect("sample attributes");
        assert_eq!(attr.mode, S_IFREG | 0o644);
        assert_eq!(attr.size, SAMPLE_CONTENT.len() as u64);
        assert_eq!(content(&store, SAMPLE_PATH), SAMPLE_CONTENT);
        assert_eq!(
            store.get_xattr(SAMPLE_PATH, "user.tags").expect("sample tag"),
            b"sample,python"
        );
        assert_eq!(
            store.list_xattr(SAMPLE_PATH).expect("sample xattrs"),
            vec!["user.category", "user.classification", "user.tags"]
        );
    }

    #[test]
    fn test_seeding_can_be_disabled() {
        let config = FsConfig {
            seed_sample: false,
            ..FsConfig::default()
        };
        let store = FileStore::new(&config);
        assert_eq!(store.attributes(SAMPLE_PATH), Err(FsError::NotFound));
    }

    #[test]
    fn test_unknown_path_not_found() {
        let store = FileStore::empty();
        for path in ["/missing", "/a.txt", "/nested/file", ""] {
            assert_eq!(store.attributes(path), Err(FsError::NotFound));
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let store = FileStore::empty();
        store.create("/data.bin", 0o600).expect("create");
        let payload = [0u8, 1, 2, 254, 255];
        assert_eq!(store.write("/data.bin", &payload, 0), Ok(payload.len()));
        assert_eq!(store.read("/data.bin", payload.len(), 0).expect("read"), payload);
    }

    #[test]
    fn test_write_discards_tail() {
        let store = FileStore::empty();
        file_with(&store, "/t", b"ABCDE");
        assert_eq!(store.write("/t", b"xy", 1), Ok(2));
        assert_eq!(content(&store, "/t"), b"Axy");
        assert_eq!(store.attributes("/t").expect("attributes").size, 3);
    }

    #[test]
    fn test_write_past_end_appends_without_padding() {
        let store = FileStore::empty();
        file_with(&store, "/t", b"AB");
        store.write("/t", b"CD", 10).expect("write past end");
        assert_eq!(content(&store, "/t"), b"ABCD");
        assert_eq!(store.attributes("/t").expect("attributes").size, 4);
    }

    #[test]
    fn test_sequential_writes_extend_file() {
        let store = FileStore::empty();
        store.create("/log", 0o644).expect("create");
        store.write("/log", b"hello ", 0).expect("first chunk");
        store.write("/log", b"world", 6).expect("second chunk");
        assert_eq!(content(&store, "/log"), b"hello world");
    }

    #[test]
    fn test_truncate_shrinks_only() {
        let store = FileStore::empty();
        file_with(&store, "/t", b"ABCDE");

        store.truncate("/t", 2).expect("shrink");
        assert_eq!(content(&store, "/t"), b"AB");
        assert_eq!(store.attributes("/t").expect("attributes").size, 2);

        store.truncate("/t", 100).expect("grow request");
        assert_eq!(content(&store, "/t"), b"AB");
        assert_eq!(store.attributes("/t").expect("attributes").size, 2);
    }

    #[test]
    fn test_truncate_and_write_missing_file() {
        let store = FileStore::empty();
        assert_eq!(store.truncate("/nope", 0), Err(FsError::NotFound));
        assert_eq!(store.write("/nope", b"x", 0), Err(FsError::NotFound));
        assert_eq!(store.truncate("/", 0), Err(FsError::NotFound));
        assert_eq!(store.write("/", b"x", 0), Err(FsError::NotFound));
    }

    #[test]
    fn test_read_ranges() {
        let store = FileStore::empty();
        file_with(&store, "/r", b"0123456789");
        assert_eq!(store.read("/r", 3, 2).expect("middle"), b"234");
        assert_eq!(store.read("/r", 100, 8).expect("tail"), b"89");
        assert!(store.read("/r", 4, 10).expect("at end").is_empty());
        assert!(store.read("/r", 4, 1_000).expect("past end").is_empty());
        assert!(store.read("/r", 0, 0).expect("empty size").is_empty());
    }

    #[test]
    fn test_read_without_blob_is_not_found() {
        let store = FileStore::empty();
        assert_eq!(store.read("/", 10, 0), Err(FsError::NotFound));
        assert_eq!(store.read("/ghost", 10, 0), Err(FsError::NotFound));
    }

    #[test]
    fn test_create_overwrites_existing_entry() {
        let store = FileStore::empty();
        file_with(&store, "/dup", b"old content");
        store
            .set_xattr("/dup", "user.k", b"v", XattrOptions::default())
            .expect("set xattr");

        store.create("/dup", 0o600).expect("recreate");
        let attr = store.attributes("/dup").expect("attributes");
        assert_eq!(attr.size, 0);
        assert_eq!(attr.permissions(), 0o600);
        assert!(content(&store, "/dup").is_empty());
        assert!(store.list_xattr("/dup").expect("xattrs").is_empty());
    }

    #[test]
    fn test_create_masks_mode_and_sets_link_count() {
        let store = FileStore::empty();
        store.create("/m", S_IFREG | 0o640).expect("create");
        let attr = store.attributes("/m").expect("attributes");
        assert_eq!(attr.mode, S_IFREG | 0o640);
        assert_eq!(attr.nlink, 1);
        assert!(!attr.is_dir());
    }

    #[test]
    fn test_root_is_protected() {
        let store = FileStore::empty();
        assert_eq!(store.create("/", 0o644), Err(FsError::IsADirectory));
        assert_eq!(store.unlink("/"), Err(FsError::IsADirectory));
        assert!(store.attributes("/").expect("root").is_dir());
    }

    #[test]
    fn test_descriptors_increase() {
        let store = FileStore::empty();
        let first = store.create("/a", 0o644).expect("create");
        let second = store.open("/a", libc::O_RDONLY);
        let third = store.open("/never-created", libc::O_RDWR);
        assert!(first < second && second < third);
        assert_eq!(store.stats().descriptors_issued, third.as_u64());
    }

    #[test]
    fn test_open_does_not_create() {
        let store = FileStore::empty();
        store.open("/phantom", libc::O_CREAT | libc::O_WRONLY);
        assert_eq!(store.attributes("/phantom"), Err(FsError::NotFound));
        assert_eq!(store.list_entries("/"), vec![".", ".."]);
    }

    #[test]
    fn test_unlink_removes_everything() {
        let store = FileStore::empty();
        file_with(&store, "/gone", b"bytes");
        store.unlink("/gone").expect("unlink");

        assert_eq!(store.attributes("/gone"), Err(FsError::NotFound));
        assert_eq!(store.list_xattr("/gone"), Err(FsError::NoAttributeSupport));
        assert_eq!(store.read("/gone", 5, 0), Err(FsError::NotFound));
        assert!(!store.list_entries("/").contains(&"gone".to_string()));
        assert_eq!(store.unlink("/gone"), Err(FsError::NotFound));
    }

    #[test]
    fn test_list_entries_is_flat() {
        let store = FileStore::empty();
        file_with(&store, "/b.txt", b"");
        file_with(&store, "/a.txt", b"");
        let expected = vec![".", "..", "a.txt", "b.txt"];
        assert_eq!(store.list_entries("/"), expected);
        assert_eq!(store.list_entries("/a.txt"), expected);
    }

    #[test]
    fn test_xattr_crud() {
        let store = FileStore::empty();
        store.create("/p", 0o644).expect("create");

        store
            .set_xattr("/p", "user.k", b"v1", XattrOptions::default())
            .expect("set");
        assert_eq!(store.get_xattr("/p", "user.k").expect("get"), b"v1");

        store
            .set_xattr("/p", "user.k", b"v2", XattrOptions { flags: libc::XATTR_CREATE, position: 0 })
            .expect("overwrite ignores create flag");
        assert_eq!(store.get_xattr("/p", "user.k").expect("get"), b"v2");

        store
            .set_xattr("/p", "user.other", b"", XattrOptions { flags: libc::XATTR_REPLACE, position: 0 })
            .expect("replace flag still creates");
        assert_eq!(
            store.list_xattr("/p").expect("list"),
            vec!["user.k", "user.other"]
        );

        store.remove_xattr("/p", "user.k").expect("remove");
        assert_eq!(store.get_xattr("/p", "user.k"), Err(FsError::AttributeNotFound));
        assert_eq!(store.remove_xattr("/p", "user.k"), Err(FsError::AttributeNotFound));
        assert_eq!(store.list_xattr("/p").expect("list"), vec!["user.other"]);
    }

    #[test]
    fn test_xattr_on_root() {
        let store = FileStore::empty();
        store
            .set_xattr("/", "user.volume", b"scratch", XattrOptions::default())
            .expect("set on root");
        assert_eq!(store.get_xattr("/", "user.volume").expect("get"), b"scratch");
    }

    #[test]
    fn test_xattr_unknown_path() {
        let store = FileStore::empty();
        assert_eq!(store.get_xattr("/x", "user.k"), Err(FsError::NoAttributeSupport));
        assert_eq!(
            store.set_xattr("/x", "user.k", b"v", XattrOptions::default()),
            Err(FsError::NoAttributeSupport)
        );
        assert_eq!(store.list_xattr("/x"), Err(FsError::NoAttributeSupport));
        assert_eq!(store.remove_xattr("/x", "user.k"), Err(FsError::NoAttributeSupport));
        assert_eq!(store.attributes("/x"), Err(FsError::NotFound));
    }

    #[test]
    fn test_set_mode_keeps_file_type() {
        let store = FileStore::empty();
        store.create("/exe", 0o644).expect("create");
        store.set_mode("/exe", 0o755).expect("chmod");
        assert_eq!(store.attributes("/exe").expect("attributes").mode, S_IFREG | 0o755);

        store.set_mode("/", 0o700).expect("chmod root");
        assert_eq!(store.attributes("/").expect("root").mode, S_IFDIR | 0o700);
        assert_eq!(store.set_mode("/none", 0o600), Err(FsError::NotFound));
    }

    #[test]
    fn test_set_times() {
        let store = FileStore::empty();
        store.create("/t", 0o644).expect("create");
        let before = store.attributes("/t").expect("attributes");
        let stamp = UNIX_EPOCH + Duration::from_secs(1_000_000);

        store.set_times("/t", Some(stamp), None).expect("set atime");
        let after = store.attributes("/t").expect("attributes");
        assert_eq!(after.accessed_at, stamp);
        assert_eq!(after.modified_at, before.modified_at);

        store.set_times("/t", None, Some(stamp)).expect("set mtime");
        assert_eq!(store.attributes("/t").expect("attributes").modified_at, stamp);
        assert_eq!(store.set_times("/none", None, None), Err(FsError::NotFound));
    }

    #[test]
    fn test_write_refreshes_mtime() {
        let store = FileStore::empty();
        store.create("/t", 0o644).expect("create");
        let old = UNIX_EPOCH + Duration::from_secs(1);
        store.set_times("/t", None, Some(old)).expect("backdate");
        store.write("/t", b"x", 0).expect("write");
        assert!(store.attributes("/t").expect("attributes").modified_at > old);
    }

    #[test]
    fn test_stats() {
        let store = FileStore::empty();
        file_with(&store, "/a", b"abc");
        file_with(&store, "/b", b"de");
        let stats = store.stats();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 5);
        assert_eq!(stats.descriptors_issued, 2);
    }
}
