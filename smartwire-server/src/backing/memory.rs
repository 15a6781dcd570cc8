//! In-memory backing transport.

use super::{normalize_path, Transport};
use bytes::Bytes;
use parking_lot::RwLock;
use smartwire_protocol::{Stat, TransportError};
use std::collections::BTreeMap;
use std::io;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

#[derive(Debug, Clone)]
enum Entry {
    File { data: Bytes, mode: u32 },
    Dir { mode: u32 },
}

/// A transport holding its tree in memory. The root directory always exists.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Normalised key for `path`; the root is the empty string.
fn key(path: &str) -> Result<String, TransportError> {
    Ok(normalize_path(path)?.join("/"))
}

fn parent_of(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn child_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

fn no_such_file(path: &str) -> TransportError {
    TransportError::NoSuchFile {
        path: path.to_string(),
    }
}

fn not_a(kind: &str, path: &str) -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("{path}: not a {kind}"),
    ))
}

fn is_dir(entries: &BTreeMap<String, Entry>, key: &str) -> bool {
    key.is_empty() || matches!(entries.get(key), Some(Entry::Dir { .. }))
}

fn exists(entries: &BTreeMap<String, Entry>, key: &str) -> bool {
    key.is_empty() || entries.contains_key(key)
}

fn keys_under(entries: &BTreeMap<String, Entry>, key: &str) -> Vec<String> {
    let prefix = child_prefix(key);
    entries
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

impl MemoryTransport {
    fn write_file(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let key = key(path)?;
        let mut entries = self.entries.write();
        if key.is_empty() || matches!(entries.get(&key), Some(Entry::Dir { .. })) {
            return Err(not_a("file", path));
        }
        if !is_dir(&entries, parent_of(&key)) {
            return Err(no_such_file(path));
        }
        entries.insert(
            key,
            Entry::File {
                data: Bytes::copy_from_slice(bytes),
                mode: mode.unwrap_or(DEFAULT_FILE_MODE),
            },
        );
        Ok(())
    }

    fn relocate(&self, from: &str, to: &str, replace: bool) -> Result<(), TransportError> {
        let source = key(from)?;
        let target = key(to)?;
        let mut entries = self.entries.write();

        if source.is_empty() || !entries.contains_key(&source) {
            return Err(no_such_file(from));
        }
        if exists(&entries, &target) {
            if !replace || target.is_empty() {
                return Err(TransportError::FileExists {
                    path: to.to_string(),
                });
            }
            if !keys_under(&entries, &target).is_empty() {
                return Err(TransportError::DirectoryNotEmpty {
                    path: to.to_string(),
                });
            }
        }
        if !is_dir(&entries, parent_of(&target)) {
            return Err(no_such_file(to));
        }

        let moved = keys_under(&entries, &source);
        if let Some(entry) = entries.remove(&source) {
            entries.insert(target.clone(), entry);
        }
        let source_prefix = child_prefix(&source);
        let target_prefix = child_prefix(&target);
        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                let new = format!("{target_prefix}{}", &old[source_prefix.len()..]);
                entries.insert(new, entry);
            }
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn has(&self, path: &str) -> Result<bool, TransportError> {
        let key = key(path)?;
        Ok(exists(&self.entries.read(), &key))
    }

    fn get_bytes(&self, path: &str) -> Result<Bytes, TransportError> {
        let key = key(path)?;
        match self.entries.read().get(&key) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Dir { .. }) => Err(not_a("file", path)),
            None if key.is_empty() => Err(not_a("file", path)),
            None => Err(no_such_file(path)),
        }
    }

    fn put_bytes(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        self.write_file(path, bytes, mode)
    }

    fn put_bytes_non_atomic(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
        create_parent_dir: bool,
        dir_mode: Option<u32>,
    ) -> Result<(), TransportError> {
        match self.write_file(path, bytes, mode) {
            Err(TransportError::NoSuchFile { .. }) if create_parent_dir => {
                let key = key(path)?;
                let parent = parent_of(&key).to_string();
                self.mkdir(&parent, dir_mode)?;
                self.write_file(path, bytes, mode)
            }
            other => other,
        }
    }

    fn append_bytes(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<u64, TransportError> {
        let key = key(path)?;
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(Entry::File { data, .. }) => {
                let old_len = data.len() as u64;
                let mut joined = Vec::with_capacity(data.len() + bytes.len());
                joined.extend_from_slice(data);
                joined.extend_from_slice(bytes);
                *data = Bytes::from(joined);
                Ok(old_len)
            }
            Some(Entry::Dir { .. }) => Err(not_a("file", path)),
            None => {
                if key.is_empty() {
                    return Err(not_a("file", path));
                }
                if !is_dir(&entries, parent_of(&key)) {
                    return Err(no_such_file(path));
                }
                entries.insert(
                    key,
                    Entry::File {
                        data: Bytes::copy_from_slice(bytes),
                        mode: mode.unwrap_or(DEFAULT_FILE_MODE),
                    },
                );
                Ok(0)
            }
        }
    }

    fn delete(&self, path: &str) -> Result<(), TransportError> {
        let key = key(path)?;
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::File { .. }) => {
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::Dir { .. }) => Err(not_a("file", path)),
            None => Err(no_such_file(path)),
        }
    }

    fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), TransportError> {
        let key = key(path)?;
        let mut entries = self.entries.write();
        if exists(&entries, &key) {
            return Err(TransportError::FileExists {
                path: path.to_string(),
            });
        }
        if !is_dir(&entries, parent_of(&key)) {
            return Err(no_such_file(path));
        }
        entries.insert(
            key,
            Entry::Dir {
                mode: mode.unwrap_or(DEFAULT_DIR_MODE),
            },
        );
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), TransportError> {
        let key = key(path)?;
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(Entry::Dir { .. }) => {
                if !keys_under(&entries, &key).is_empty() {
                    return Err(TransportError::DirectoryNotEmpty {
                        path: path.to_string(),
                    });
                }
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::File { .. }) => Err(not_a("directory", path)),
            None if key.is_empty() => Err(TransportError::DirectoryNotEmpty {
                path: path.to_string(),
            }),
            None => Err(no_such_file(path)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        self.relocate(from, to, false)
    }

    fn move_path(&self, from: &str, to: &str) -> Result<(), TransportError> {
        self.relocate(from, to, true)
    }

    fn stat(&self, path: &str) -> Result<Stat, TransportError> {
        let key = key(path)?;
        match self.entries.read().get(&key) {
            Some(Entry::File { data, mode }) => Ok(Stat {
                size: data.len() as u64,
                mode: S_IFREG | mode,
            }),
            Some(Entry::Dir { mode }) => Ok(Stat {
                size: 0,
                mode: S_IFDIR | mode,
            }),
            None if key.is_empty() => Ok(Stat {
                size: 0,
                mode: S_IFDIR | DEFAULT_DIR_MODE,
            }),
            None => Err(no_such_file(path)),
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let key = key(path)?;
        let entries = self.entries.read();
        if !exists(&entries, &key) {
            return Err(no_such_file(path));
        }
        if !is_dir(&entries, &key) {
            return Err(not_a("directory", path));
        }
        let prefix = child_prefix(&key);
        Ok(keys_under(&entries, &key)
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .filter(|rel| !rel.contains('/'))
            .collect())
    }

    fn iter_files_recursive(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let key = key(path)?;
        let entries = self.entries.read();
        if !is_dir(&entries, &key) {
            return Err(no_such_file(path));
        }
        let prefix = child_prefix(&key);
        Ok(keys_under(&entries, &key)
            .into_iter()
            .filter(|k| matches!(entries.get(k), Some(Entry::File { .. })))
            .map(|k| k[prefix.len()..].to_string())
            .collect())
    }
}
