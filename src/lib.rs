//! A pluggable, async WebDAV server framework (RFC 4918, with the
//! surrounding RFCs 7230-7233, 7231, 7232 and 4316).
//!
//! The crate does not speak HTTP on the wire itself: it takes an
//! [`http::Request`] (with any body type implementing [`http_body::Body`])
//! and returns an [`http::Response`]`<`[`body::Body`]`>`. Wiring that up to
//! an actual listener (hyper, axum, warp, ...) is the caller's job -- see
//! the `demos/` directory in the source repository for worked examples.
//!
//! The moving parts:
//!
//! - [`davhandler::DavHandler`] / [`davhandler::DavConfig`] -- the request
//!   pipeline and dispatcher (router entry point, per-request plumbing).
//! - [`fs::DavFileSystem`] -- the resource backend trait. [`localfs::LocalFs`]
//!   and [`memfs::MemFs`] are bundled implementations.
//! - [`ls::DavLockSystem`] -- the lock manager trait. [`memls::MemLs`] is a
//!   real (in-memory) implementation; [`fakels::FakeLs`] pretends every lock
//!   request succeeds, for clients (Windows, macOS) that refuse to work
//!   without seeing lock support.
//! - [`propstore::PropertyStore`] -- the dead-property store trait.
//! - [`property::Property`] -- the typed property value model.
//! - [`conditional`] -- the `If`/`If-Match`/... precondition evaluator.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davheaders;
mod encoding;
mod errors;
mod multierror;
mod tree;
mod util;
mod xmlsafety;
mod xmltree_ext;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_post;
mod handle_props;
mod handle_put;

pub mod async_stream;
pub mod body;
pub mod davhandler;
pub mod davpath;
pub mod fakels;
pub mod fs;
pub mod ls;
pub mod memfs;
pub mod memls;
pub mod property;
pub mod propstore;
pub mod router;

#[cfg(feature = "localfs")]
pub mod localfs;
#[cfg(feature = "localfs")]
mod localfs_windows;

pub use crate::davhandler::{DavConfig, DavHandler};
pub(crate) use crate::davhandler::DavInner;
pub(crate) use crate::errors::DavError;
pub(crate) use crate::fs::{FsError, FsResult};
pub use crate::util::{DavMethod, DavMethodSet};

pub(crate) type DavResult<T> = Result<T, DavError>;
