//! Contains the structs and traits that define a "locksystem" backend.
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use dyn_clone::DynClone;
use xmltree::Element;

use crate::davpath::DavPath;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    pub token: String,
    pub path: DavPath,
    pub principal: Option<String>,
    pub owner: Option<Element>,
    pub timeout_at: Option<SystemTime>,
    pub timeout: Option<Duration>,
    pub shared: bool,
    pub deep: bool,
}

/// The trait that defines a locksystem.
///
/// Implementations must be `Clone` (a cheap, `Arc`-backed handle clone) so
/// that `Box<dyn DavLockSystem>` itself implements `Clone` via `dyn-clone`.
pub trait DavLockSystem: Debug + Sync + Send + DynClone {
    /// Lock a node. Returns Ok(new_lock) if succeeded,
    /// or Err(conflicting_lock) if failed.
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, DavLock>;

    /// Unlock a node. Returns empty Ok if succeeded, empty Err if failed
    /// (because lock doesn't exist)
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()>;

    /// Refresh lock. Returns updated lock if succeeded.
    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>) -> Result<DavLock, ()>;

    /// Check if node is locked and if so, if we own all the locks.
    /// If not, returns as Err one conflicting lock.
    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: Vec<&str>,
    ) -> Result<(), DavLock>;

    /// Find and return all locks that cover a given path.
    fn discover(&self, path: &DavPath) -> Vec<DavLock>;

    /// Delete all locks at this path and below (after MOVE or DELETE)
    fn delete(&self, path: &DavPath) -> Result<(), ()>;
}

dyn_clone::clone_trait_object!(DavLockSystem);
