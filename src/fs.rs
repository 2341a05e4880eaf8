//! The trait the core dispatches content and metadata operations through.
//!
//! Dead-property storage is *not* part of this trait (see `propstore.rs`):
//! a filesystem only ever answers for a resource's bytes, its directory
//! structure, and live metadata.
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use dyn_clone::DynClone;
use futures_util::stream::Stream;
use http::StatusCode;

use crate::davpath::DavPath;

pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;
pub type FsStream<'a, T> = Pin<Box<dyn Stream<Item = FsResult<T>> + Send + 'a>>;

macro_rules! notimplemented {
    ($method:expr) => {
        Box::pin(std::future::ready(Err(FsError::NotImplemented)))
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    InsufficientStorage,
    LoopDetected,
    PathTooLong,
    TooLarge,
    IsRemote,
}
pub type FsResult<T> = std::result::Result<T, FsError>;

/// A pluggable content/metadata backend.
///
/// Implementations must be cheap to clone (an `Arc`-backed handle, as
/// `MemFs`/`LocalFs` are) since a handle is cloned into every request.
pub trait DavFileSystem: Debug + Sync + Send + DynClone {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>>;
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, FsStream<'a, Box<dyn DavDirEntry>>>;
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// Like `metadata`, but does not follow a symlink at the final path component.
    fn symlink_metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        self.metadata(path)
    }

    #[allow(unused_variables)]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("create_dir")
    }
    #[allow(unused_variables)]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_dir")
    }
    #[allow(unused_variables)]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_file")
    }
    #[allow(unused_variables)]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("rename")
    }
    #[allow(unused_variables)]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("copy")
    }

    /// Available/total space, for the `DAV:quota-available-bytes` live property.
    #[allow(unused_variables)]
    fn get_quota<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, (u64, Option<u64>)> {
        notimplemented!("get_quota")
    }

    /// Handle a `POST` to this path. The core has no opinion on what `POST`
    /// means (§9 Open Question: "the source's handling of POST is
    /// permissive"); by default it is simply not implemented, and backends
    /// or services that want `POST` semantics override this.
    #[allow(unused_variables)]
    fn post<'a>(
        &'a self,
        path: &'a DavPath,
        content_type: Option<&'a str>,
        input: Bytes,
    ) -> FsFuture<'a, (StatusCode, Option<String>, Bytes)> {
        notimplemented!("post")
    }

    /// Whether this backend can be cloned cheaply and reused across requests.
    fn is_reusable(&self) -> bool {
        true
    }
}

dyn_clone::clone_trait_object!(DavFileSystem);

pub trait DavDirEntry: Debug + Send {
    fn name(&self) -> Vec<u8>;
    fn metadata<'a>(&'a self) -> FsFuture<'a, Box<dyn DavMetaData>>;

    // defaults: implementations can override these if their metadata() is
    // expensive and there is a cheaper way to know dir/file/symlink-ness.
    fn is_dir<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.metadata().await?.is_dir()) })
    }
    fn is_file<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.metadata().await?.is_file()) })
    }
    fn is_symlink<'a>(&'a self) -> FsFuture<'a, bool> {
        Box::pin(async move { Ok(self.metadata().await?.is_symlink()) })
    }
}

pub trait DavFile: Debug + Send {
    fn metadata<'a>(&'a mut self) -> FsFuture<'a, Box<dyn DavMetaData>>;
    fn write_bytes<'a>(&'a mut self, buf: Bytes) -> FsFuture<'a, ()>;
    fn write_buf<'a>(&'a mut self, buf: Box<dyn Buf + Send>) -> FsFuture<'a, ()>;
    fn read_bytes<'a>(&'a mut self, count: usize) -> FsFuture<'a, Bytes>;
    fn seek<'a>(&'a mut self, pos: std::io::SeekFrom) -> FsFuture<'a, u64>;
    fn flush<'a>(&'a mut self) -> FsFuture<'a, ()>;
}

pub trait DavMetaData: Debug {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    fn etag(&self) -> String {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                // apache style etag.
                return format!(
                    "{:x}-{:x}",
                    self.len(),
                    t.as_secs() * 1_000_000 + t.subsec_nanos() as u64 / 1000
                );
            }
        }
        format!("{:x}", self.len())
    }
    fn is_file(&self) -> bool {
        !self.is_dir()
    }
    fn is_symlink(&self) -> bool {
        false
    }

    fn accessed(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
    fn status_changed(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
    fn executable(&self) -> FsResult<bool> {
        Err(FsError::NotImplemented)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
    pub size: Option<u64>,
}

impl OpenOptions {
    #[allow(dead_code)]
    pub fn new() -> OpenOptions {
        OpenOptions {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            size: None,
        }
    }
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..OpenOptions::new()
        }
    }
    pub fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            ..OpenOptions::new()
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions::new()
    }
}

impl std::error::Error for FsError {}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
