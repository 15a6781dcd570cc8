//! Filesystem backing transport rooted at a directory.

use super::{normalize_path, Transport};
use bytes::Bytes;
use smartwire_protocol::{ReadvRange, Stat, TransportError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Serves files below `root`. Client paths cannot escape the root.
#[derive(Debug)]
pub struct LocalTransport {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abspath(&self, path: &str) -> Result<PathBuf, TransportError> {
        let mut full = self.root.clone();
        full.extend(normalize_path(path)?);
        Ok(full)
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.tmp.{}.{n}", std::process::id()))
    }

    fn write_file(&self, target: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()> {
        let mut file = File::create(target)?;
        file.write_all(bytes)?;
        if let Some(mode) = mode {
            set_mode(target, mode)?;
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn has(&self, path: &str) -> Result<bool, TransportError> {
        Ok(self.abspath(path)?.exists())
    }

    fn get_bytes(&self, path: &str) -> Result<Bytes, TransportError> {
        let full = self.abspath(path)?;
        let data = fs::read(&full).map_err(|e| map_io(e, path))?;
        Ok(Bytes::from(data))
    }

    fn put_bytes(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let target = self.abspath(path)?;
        if target == self.root {
            return Err(TransportError::PathNotPermitted(path.to_string()));
        }
        let temp = self.temp_path(&target);
        if let Err(e) = self.write_file(&temp, bytes, mode) {
            let _ = fs::remove_file(&temp);
            return Err(map_io(e, path));
        }
        fs::rename(&temp, &target).map_err(|e| {
            let _ = fs::remove_file(&temp);
            map_io(e, path)
        })
    }

    fn put_bytes_non_atomic(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
        create_parent_dir: bool,
        dir_mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let target = self.abspath(path)?;
        match self.write_file(&target, bytes, mode) {
            Err(e) if e.kind() == ErrorKind::NotFound && create_parent_dir => {
                if let Some(parent) = target.parent() {
                    fs::create_dir(parent).map_err(|e| map_io(e, path))?;
                    if let Some(dir_mode) = dir_mode {
                        set_mode(parent, dir_mode).map_err(|e| map_io(e, path))?;
                    }
                }
                self.write_file(&target, bytes, mode)
                    .map_err(|e| map_io(e, path))
            }
            other => other.map_err(|e| map_io(e, path)),
        }
    }

    fn append_bytes(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<u64, TransportError> {
        let target = self.abspath(path)?;
        let existed = target.exists();
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&target)
            .map_err(|e| map_io(e, path))?;
        let old_len = file.metadata().map_err(|e| map_io(e, path))?.len();
        file.write_all(bytes).map_err(|e| map_io(e, path))?;
        if let (false, Some(mode)) = (existed, mode) {
            set_mode(&target, mode).map_err(|e| map_io(e, path))?;
        }
        Ok(old_len)
    }

    fn delete(&self, path: &str) -> Result<(), TransportError> {
        let target = self.abspath(path)?;
        fs::remove_file(target).map_err(|e| map_io(e, path))
    }

    fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), TransportError> {
        let target = self.abspath(path)?;
        fs::create_dir(&target).map_err(|e| map_io(e, path))?;
        if let Some(mode) = mode {
            set_mode(&target, mode).map_err(|e| map_io(e, path))?;
        }
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), TransportError> {
        let target = self.abspath(path)?;
        let mut entries = fs::read_dir(&target).map_err(|e| map_io(e, path))?;
        if entries.next().is_some() {
            return Err(TransportError::DirectoryNotEmpty {
                path: path.to_string(),
            });
        }
        fs::remove_dir(&target).map_err(|e| map_io(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let source = self.abspath(from)?;
        let target = self.abspath(to)?;
        if !source.exists() {
            return Err(TransportError::NoSuchFile {
                path: from.to_string(),
            });
        }
        if target.exists() {
            return Err(TransportError::FileExists {
                path: to.to_string(),
            });
        }
        fs::rename(source, target).map_err(|e| map_io(e, from))
    }

    fn move_path(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let source = self.abspath(from)?;
        let target = self.abspath(to)?;
        fs::rename(source, target).map_err(|e| map_io(e, from))
    }

    fn stat(&self, path: &str) -> Result<Stat, TransportError> {
        let meta = fs::metadata(self.abspath(path)?).map_err(|e| map_io(e, path))?;
        Ok(Stat {
            size: meta.len(),
            mode: file_mode(&meta),
        })
    }

    fn readv(&self, path: &str, ranges: &[ReadvRange]) -> Result<Vec<Bytes>, TransportError> {
        let mut file = File::open(self.abspath(path)?).map_err(|e| map_io(e, path))?;
        let len = file.metadata().map_err(|e| map_io(e, path))?.len();

        let mut parts = Vec::with_capacity(ranges.len());
        for range in ranges {
            if range.end() > len {
                return Err(TransportError::ShortReadv {
                    path: path.to_string(),
                    offset: range.start,
                    length: range.length,
                    actual: len.saturating_sub(range.start),
                });
            }
            let mut buf = vec![0u8; range.length as usize];
            file.seek(SeekFrom::Start(range.start))
                .map_err(|e| map_io(e, path))?;
            file.read_exact(&mut buf).map_err(|e| map_io(e, path))?;
            parts.push(Bytes::from(buf));
        }
        Ok(parts)
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let target = self.abspath(path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(target).map_err(|e| map_io(e, path))? {
            let entry = entry.map_err(|e| map_io(e, path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn iter_files_recursive(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let base = self.abspath(path)?;
        let mut files = Vec::new();
        let mut pending = vec![(base, String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            for entry in fs::read_dir(&dir).map_err(|e| map_io(e, path))? {
                let entry = entry.map_err(|e| map_io(e, path))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let relpath = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                if entry.file_type().map_err(|e| map_io(e, path))?.is_dir() {
                    pending.push((entry.path(), relpath));
                } else {
                    files.push(relpath);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn map_io(err: io::Error, path: &str) -> TransportError {
    match err.kind() {
        ErrorKind::NotFound => TransportError::NoSuchFile {
            path: path.to_string(),
        },
        ErrorKind::AlreadyExists => TransportError::FileExists {
            path: path.to_string(),
        },
        _ => TransportError::Io(err),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o040755
    } else {
        0o100644
    }
}
