//! Filesystem cache engine.
//!
//! One file per key, named by the SHA-256 of the key. A file holds an 8-byte
//! big-endian expiration (unix milliseconds), the key length as a big-endian
//! `u32`, the key itself and then the payload. Writes land in a temporary file
//! in the cache directory and are renamed into place while the index lock is
//! held, so readers see either the old or the new entry and the index always
//! matches the directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::Cache;
use super::config::{CacheConfig, CacheEngine, DEFAULT_FILESYSTEM_PATH};
use super::error::CacheError;
use super::index::{CacheIndex, deadline_after};
use super::instrument::{
    cache_error, observe_cache_closed, observe_cache_del, observe_cache_event,
    observe_cache_expired, observe_cache_miss, observe_cache_operation,
};
use super::status::LookupStatus;

const CACHE_TYPE: &str = "filesystem";
const DEADLINE_LEN: usize = 8;
const KEY_LEN_LEN: usize = 4;
const FILE_SUFFIX: &str = ".data";

/// Cache engine persisting entries as files under a directory.
pub struct FilesystemCache {
    config: CacheConfig,
    root: PathBuf,
    index: CacheIndex,
    open: AtomicBool,
}

impl FilesystemCache {
    pub fn new(config: CacheConfig) -> Self {
        let root = match &config.engine {
            CacheEngine::Filesystem { path } => path.clone(),
            CacheEngine::Memory => PathBuf::from(DEFAULT_FILESYSTEM_PATH),
        };
        let index = CacheIndex::new(&config.name, CACHE_TYPE, config.index.clone());
        Self {
            config,
            root,
            index,
            open: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(observe_cache_closed(self.name(), CACHE_TYPE))
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(file_name_for(key))
    }

    /// Writes a complete entry to a temporary file next to its final path.
    fn stage_entry(
        &self,
        key: &str,
        expires_at: SystemTime,
        data: &[u8],
    ) -> std::io::Result<NamedTempFile> {
        let key_len = u32::try_from(key.len())
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "cache key too long"))?;
        let mut file = NamedTempFile::new_in(&self.root)?;
        file.write_all(&encode_deadline(expires_at))?;
        file.write_all(&key_len.to_be_bytes())?;
        file.write_all(key.as_bytes())?;
        file.write_all(data)?;
        file.flush()?;
        Ok(file)
    }

    fn write_failed(&self, key: &str, path: &Path, err: &std::io::Error) -> CacheError {
        warn!(
            cache_name = %self.config.name,
            path = %path.display(),
            error = %err,
            "failed to write cache file"
        );
        cache_error(key, self.name(), CACHE_TYPE, "write_failed")
    }

    /// Rebuilds the index from the files already present under the root.
    fn load_index(&self) -> std::io::Result<usize> {
        let mut loaded = 0;
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let is_entry = dir_entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(FILE_SUFFIX));
            if !is_entry {
                continue;
            }

            let mut file = File::open(dir_entry.path())?;
            let Some((expires_at, key)) = read_header(&mut file) else {
                warn!(
                    cache_name = %self.config.name,
                    path = %dir_entry.path().display(),
                    "skipping unreadable cache file"
                );
                continue;
            };
            if dir_entry.file_name().to_str() != Some(file_name_for(&key).as_str()) {
                warn!(
                    cache_name = %self.config.name,
                    path = %dir_entry.path().display(),
                    "skipping cache file stored under a foreign name"
                );
                continue;
            }
            let size = dir_entry.metadata()?.len();
            self.index.update_object(&key, size, expires_at);
            loaded += 1;
        }
        Ok(loaded)
    }
}

impl Cache for FilesystemCache {
    fn connect(&self) -> Result<(), CacheError> {
        let loaded = fs::create_dir_all(&self.root)
            .and_then(|_| self.load_index())
            .map_err(|err| {
                observe_cache_event(self.name(), CACHE_TYPE, "error", "connect");
                CacheError::connection(
                    self.name(),
                    format!("cache path `{}`: {err}", self.root.display()),
                )
            })?;

        info!(
            cache_name = %self.config.name,
            cache_type = CACHE_TYPE,
            cache_path = %self.root.display(),
            loaded,
            "filesystem cache setup"
        );
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn store(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_open()?;
        let expires_at = deadline_after(SystemTime::now(), ttl);
        let path = self.path_for(key);

        let staged = self
            .stage_entry(key, expires_at, &data)
            .map_err(|err| self.write_failed(key, &path, &err))?;

        let mut index = self.index.locked("store");
        staged
            .persist(&path)
            .map_err(|err| self.write_failed(key, &path, &err.error))?;
        index.update_object(key, entry_len(key, data.len()), expires_at);
        drop(index);

        observe_cache_operation(self.name(), CACHE_TYPE, "set", "success", data.len() as u64);
        Ok(())
    }

    fn retrieve(&self, key: &str, allow_expired: bool) -> Result<(Bytes, LookupStatus), CacheError> {
        self.ensure_open()?;
        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(
                        cache_name = %self.config.name,
                        path = %path.display(),
                        error = %err,
                        "failed to read cache file"
                    );
                }
                return Err(observe_cache_miss(key, self.name(), CACHE_TYPE));
            }
        };

        let Some((expires_at, stored_key)) = read_header(&mut raw.as_slice()) else {
            warn!(
                cache_name = %self.config.name,
                path = %path.display(),
                "cache file is shorter than its header"
            );
            return Err(observe_cache_miss(key, self.name(), CACHE_TYPE));
        };
        if stored_key != key {
            return Err(observe_cache_miss(key, self.name(), CACHE_TYPE));
        }

        let status = if expires_at > SystemTime::now() {
            LookupStatus::Hit
        } else if allow_expired {
            LookupStatus::ExpiredHit
        } else {
            return Err(observe_cache_expired(key, self.name(), CACHE_TYPE));
        };

        let data = Bytes::from(raw).slice(header_len(key)..);
        self.index.touch(key);
        observe_cache_operation(
            self.name(),
            CACHE_TYPE,
            "get",
            status.as_str(),
            data.len() as u64,
        );
        Ok((data, status))
    }

    fn set_ttl(&self, key: &str, ttl: Duration) {
        if self.ensure_open().is_err() {
            return;
        }
        let expires_at = deadline_after(SystemTime::now(), ttl);
        let path = self.path_for(key);
        let mut index = self.index.locked("set_ttl");
        let mut file = match OpenOptions::new().write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(
                    cache_name = %self.config.name,
                    path = %path.display(),
                    error = %err,
                    "failed to open cache file for ttl update"
                );
                observe_cache_event(self.name(), CACHE_TYPE, "error", "update_ttl_failed");
                return;
            }
        };

        if let Err(err) = file.write_all(&encode_deadline(expires_at)) {
            warn!(
                cache_name = %self.config.name,
                path = %path.display(),
                error = %err,
                "failed to rewrite cache file deadline"
            );
            observe_cache_event(self.name(), CACHE_TYPE, "error", "update_ttl_failed");
            return;
        }

        index.update_expiration(key, expires_at);
        drop(index);
        observe_cache_operation(self.name(), CACHE_TYPE, "update-ttl", "success", 0);
    }

    fn remove(&self, key: &str) {
        self.bulk_remove(&[key.to_string()], false);
    }

    fn bulk_remove(&self, keys: &[String], no_lock: bool) {
        if self.ensure_open().is_err() {
            return;
        }
        let mut index = (!no_lock).then(|| self.index.locked("bulk_remove"));
        let mut removed = 0;
        for key in keys {
            match fs::remove_file(self.path_for(key)) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        cache_name = %self.config.name,
                        key = %key,
                        error = %err,
                        "failed to remove cache file"
                    );
                    observe_cache_event(self.name(), CACHE_TYPE, "error", "remove_failed");
                }
            }
        }
        if let Some(index) = index.as_mut() {
            index.remove_objects(keys);
        }
        drop(index);
        observe_cache_del(self.name(), CACHE_TYPE, removed);
    }

    fn close(&self) -> Result<(), CacheError> {
        self.open.store(false, Ordering::Release);
        self.index.locked("close").clear();
        info!(
            cache_name = %self.config.name,
            cache_type = CACHE_TYPE,
            "filesystem cache closed"
        );
        Ok(())
    }

    fn configuration(&self) -> &CacheConfig {
        &self.config
    }

    fn reap(&self) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.index
            .reap(SystemTime::now(), |victims| self.bulk_remove(victims, true));
    }
}

fn file_name_for(key: &str) -> String {
    format!("{}{FILE_SUFFIX}", hex::encode(Sha256::digest(key.as_bytes())))
}

fn header_len(key: &str) -> usize {
    DEADLINE_LEN + KEY_LEN_LEN + key.len()
}

/// Bytes a stored entry occupies on disk.
fn entry_len(key: &str, payload_len: usize) -> u64 {
    (header_len(key) + payload_len) as u64
}

fn encode_deadline(expires_at: SystemTime) -> [u8; DEADLINE_LEN] {
    let millis = expires_at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    millis.to_be_bytes()
}

fn decode_deadline(header: [u8; DEADLINE_LEN]) -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::from_millis(u64::from_be_bytes(header)))
        .unwrap_or(UNIX_EPOCH)
}

/// Reads the deadline and key that open every cache file.
fn read_header(reader: &mut impl Read) -> Option<(SystemTime, String)> {
    let mut deadline = [0_u8; DEADLINE_LEN];
    reader.read_exact(&mut deadline).ok()?;
    let mut key_len = [0_u8; KEY_LEN_LEN];
    reader.read_exact(&mut key_len).ok()?;
    let key_len = u64::from(u32::from_be_bytes(key_len));
    let mut key = Vec::new();
    reader.take(key_len).read_to_end(&mut key).ok()?;
    if key.len() as u64 != key_len {
        return None;
    }
    Some((decode_deadline(deadline), String::from_utf8(key).ok()?))
}
