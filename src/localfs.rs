//! Filesystem backend, a more or less 1:1 mapping of `std::fs` onto
//! `DavFileSystem` (§3.6 resource backend / out of the core's scope, but
//! shipped here the way the rest of the pack ships one).
//!
//! Every blocking `std::fs` call runs on `tokio::task::spawn_blocking` so a
//! slow disk never stalls the worker thread the request landed on (§5
//! "any I/O... may block").
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use futures_util::stream;
use sha2::{Digest, Sha256};

use crate::davpath::DavPath;
use crate::fs::*;
use crate::localfs_windows;

/// Simple filesystem backend, serving files and directories from a single
/// directory on disk.
#[derive(Debug, Clone)]
pub struct LocalFs {
    inner: std::sync::Arc<LocalFsInner>,
}

#[derive(Debug)]
struct LocalFsInner {
    basedir: PathBuf,
    public: bool,
    case_insensitive: bool,
    macos: bool,
}

#[derive(Debug)]
struct LocalFsMetaData(std::fs::Metadata);

#[derive(Debug)]
struct LocalFsFile(std::fs::File);

#[derive(Debug)]
struct LocalFsDirEntry {
    meta: std::io::Result<std::fs::Metadata>,
    name: Vec<u8>,
}

async fn blocking<F, T>(f: F) -> FsResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(t)) => Ok(t),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(FsError::GeneralFailure),
    }
}

impl LocalFs {
    /// Create a new `LocalFs`, serving `base`.
    ///
    /// - `public`: newly created files/directories get mode 644/755 instead
    ///   of 600/700 (umask still applies on top).
    /// - `case_insensitive`: resolve path lookups the way Windows clients
    ///   expect (§3.6 "case-sensitivity flag").
    /// - `macos`: hide the handful of dotfile names the macOS Finder probes
    ///   for (`.localized`) from directory listings and `GET`/`PROPFIND`.
    pub fn new<P: AsRef<Path>>(base: P, public: bool, case_insensitive: bool, macos: bool) -> Box<LocalFs> {
        Box::new(LocalFs {
            inner: std::sync::Arc::new(LocalFsInner {
                basedir: base.as_ref().to_path_buf(),
                public,
                case_insensitive,
                macos,
            }),
        })
    }

    fn fspath(&self, path: &DavPath) -> PathBuf {
        if self.inner.case_insensitive {
            localfs_windows::resolve(self.inner.basedir.clone(), path)
        } else {
            let mut p = self.inner.basedir.clone();
            p.push(path.as_rel_ospath());
            p
        }
    }

    fn is_hidden(&self, name: &[u8]) -> bool {
        self.inner.macos && name == b".localized"
    }
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let p = self.fspath(path);
            let m = blocking(move || std::fs::metadata(&p)).await?;
            Ok(Box::new(LocalFsMetaData(m)) as Box<dyn DavMetaData>)
        })
    }

    fn symlink_metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let p = self.fspath(path);
            let m = blocking(move || std::fs::symlink_metadata(&p)).await?;
            Ok(Box::new(LocalFsMetaData(m)) as Box<dyn DavMetaData>)
        })
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<'a, Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let p = self.fspath(path);
            let entries = blocking(move || {
                let mut v = Vec::new();
                for entry in std::fs::read_dir(&p)? {
                    let entry = entry?;
                    v.push((entry.file_name().as_bytes().to_vec(), entry.metadata()));
                }
                Ok(v)
            })
            .await?;
            let v: Vec<FsResult<Box<dyn DavDirEntry>>> = entries
                .into_iter()
                .filter(|(name, _)| !self.is_hidden(name))
                .map(|(name, meta)| Ok(Box::new(LocalFsDirEntry { name, meta }) as Box<dyn DavDirEntry>))
                .collect();
            let strm: FsStream<'a, Box<dyn DavDirEntry>> = Box::pin(stream::iter(v));
            Ok(strm)
        })
    }

    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let p = self.fspath(path);
            let public = self.inner.public;
            let file = blocking(move || {
                std::fs::OpenOptions::new()
                    .read(options.read)
                    .write(options.write)
                    .append(options.append)
                    .truncate(options.truncate)
                    .create(options.create)
                    .create_new(options.create_new)
                    .mode(if public { 0o644 } else { 0o600 })
                    .open(&p)
            })
            .await?;
            Ok(Box::new(LocalFsFile(file)) as Box<dyn DavFile>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let p = self.fspath(path);
            let public = self.inner.public;
            blocking(move || {
                std::fs::DirBuilder::new()
                    .mode(if public { 0o755 } else { 0o700 })
                    .create(&p)
            })
            .await
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let p = self.fspath(path);
            blocking(move || std::fs::remove_dir(&p)).await
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let p = self.fspath(path);
            blocking(move || std::fs::remove_file(&p)).await
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let f = self.fspath(from);
            let t = self.fspath(to);
            blocking(move || std::fs::rename(&f, &t)).await
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let f = self.fspath(from);
            let t = self.fspath(to);
            #[cfg(feature = "reflink-copy")]
            let res = blocking(move || reflink_copy::reflink_or_copy(&f, &t).map(|_: Option<u64>| ())).await;
            #[cfg(not(feature = "reflink-copy"))]
            let res = blocking(move || std::fs::copy(&f, &t).map(|_| ())).await;
            res
        })
    }

    fn get_quota<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, (u64, Option<u64>)> {
        let base = self.inner.basedir.clone();
        Box::pin(async move {
            let used = blocking(move || {
                let m = std::fs::metadata(&base)?;
                Ok(m.blocks() as u64 * 512)
            })
            .await
            .unwrap_or(0);
            Ok((used, None))
        })
    }
}

impl DavDirEntry for LocalFsDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.clone()
    }

    fn metadata<'a>(&'a self) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match &self.meta {
                Ok(m) => Ok(Box::new(LocalFsMetaData(m.clone())) as Box<dyn DavMetaData>),
                Err(e) => Err(FsError::from(io::Error::new(e.kind(), e.to_string()))),
            }
        })
    }

    fn is_dir<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.meta.as_ref().map(|m| m.is_dir()).unwrap_or(false)) })
    }

    fn is_file<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.meta.as_ref().map(|m| m.is_file()).unwrap_or(false)) })
    }

    fn is_symlink<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.meta.as_ref().map(|m| m.is_symlink()).unwrap_or(false)) })
    }
}

impl DavFile for LocalFsFile {
    fn metadata<'a>(&'a mut self) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let meta = self.0.metadata()?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        })
    }

    fn write_bytes<'a>(&'a mut self, buf: Bytes) -> FsFuture<'a, ()> {
        Box::pin(async move { self.0.write_all(&buf).map_err(|e| e.into()) })
    }

    fn write_buf<'a>(&'a mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'a, ()> {
        Box::pin(async move {
            while buf.has_remaining() {
                let n = {
                    let chunk = buf.chunk();
                    self.0.write(chunk)?
                };
                if n == 0 {
                    return Err(FsError::GeneralFailure);
                }
                buf.advance(n);
            }
            Ok(())
        })
    }

    fn read_bytes<'a>(&'a mut self, count: usize) -> FsFuture<'a, Bytes> {
        Box::pin(async move {
            let mut v = vec![0u8; count];
            let n = self.0.read(&mut v)?;
            v.truncate(n);
            Ok(Bytes::from(v))
        })
    }

    fn seek<'a>(&'a mut self, pos: SeekFrom) -> FsFuture<'a, u64> {
        Box::pin(async move { self.0.seek(pos).map_err(|e| e.into()) })
    }

    fn flush<'a>(&'a mut self) -> FsFuture<'a, ()> {
        Box::pin(async move { self.0.flush().map_err(|e| e.into()) })
    }
}

impl DavMetaData for LocalFsMetaData {
    fn len(&self) -> u64 {
        self.0.len()
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.0.modified().map_err(|e| e.into())
    }

    fn accessed(&self) -> FsResult<SystemTime> {
        self.0.accessed().map_err(|e| e.into())
    }

    fn created(&self) -> FsResult<SystemTime> {
        self.0.created().map_err(|e| e.into())
    }

    #[cfg(target_os = "linux")]
    fn status_changed(&self) -> FsResult<SystemTime> {
        Ok(UNIX_EPOCH + Duration::new(self.0.ctime() as u64, 0))
    }

    fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    fn is_file(&self) -> bool {
        self.0.is_file()
    }

    fn is_symlink(&self) -> bool {
        self.0.file_type().is_symlink()
    }

    fn executable(&self) -> FsResult<bool> {
        if self.0.is_file() {
            return Ok((self.0.permissions().mode() & 0o100) > 0);
        }
        Err(FsError::NotImplemented)
    }

    // content-derived etag: hash mtime, size and inode, like the upstream
    // Apache module does, rather than the default len+mtime-seconds one
    // (fs.rs's default clashes too easily when mtime has only 1s resolution).
    #[cfg(target_os = "linux")]
    fn etag(&self) -> String {
        let mut d = Sha256::new();
        if let Ok(t) = self.0.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                d.update(t.as_secs().to_be_bytes());
                d.update((t.subsec_nanos() as u64).to_be_bytes());
            }
        }
        d.update(self.0.len().to_be_bytes());
        d.update(self.0.ino().to_be_bytes());
        let res = d.finalize();
        res[..10].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        if let Some(errno) = e.raw_os_error() {
            match errno {
                libc::EMLINK | libc::ENOSPC | libc::EDQUOT => return FsError::InsufficientStorage,
                libc::EFBIG => return FsError::TooLarge,
                libc::EACCES | libc::EPERM => return FsError::Forbidden,
                libc::ENOTEMPTY | libc::EEXIST => return FsError::Exists,
                libc::ELOOP => return FsError::LoopDetected,
                libc::ENAMETOOLONG => return FsError::PathTooLong,
                libc::ENOTDIR | libc::EISDIR | libc::EROFS => return FsError::Forbidden,
                libc::ENOENT => return FsError::NotFound,
                libc::ENOSYS => return FsError::NotImplemented,
                libc::EXDEV => return FsError::IsRemote,
                _ => {},
            }
        }
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            _ => FsError::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = std::env::temp_dir().join(format!("localfs-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let fs = LocalFs::new(&dir, false, false, false);
        let path = DavPath::new("/hello.txt").unwrap();
        let mut file = fs.open(&path, OpenOptions { create: true, write: true, ..OpenOptions::new() })
            .await
            .unwrap();
        file.write_bytes(Bytes::from_static(b"hi")).await.unwrap();
        drop(file);
        let meta = fs.metadata(&path).await.unwrap();
        assert_eq!(meta.len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
