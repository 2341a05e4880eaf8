//! Dead-property storage, split out of `DavFileSystem` (§4.12).
//!
//! A `PropertyStore` answers for the properties attached to a path by
//! PROPPATCH; it knows nothing about file content or directory structure.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use dyn_clone::DynClone;

use crate::davpath::DavPath;
use crate::fs::{FsError, FsFuture, FsResult};
use crate::property::{Property, QName};
use crate::tree::{self, Tree};

/// A single PROPPATCH instruction: set a property, or remove one by name.
#[derive(Debug, Clone)]
pub enum PropPatch {
    Set(Property),
    Remove(QName),
}

/// A pluggable dead-property backend, independent of `DavFileSystem`.
///
/// Implementations must be cheap to clone, same as `DavFileSystem`/
/// `DavLockSystem` — a handle is cloned into every request.
pub trait PropertyStore: Debug + Sync + Send + DynClone {
    /// Look up a single named property.
    fn get<'a>(&'a self, path: &'a DavPath, name: &'a QName) -> FsFuture<'a, Property>;

    /// All properties currently stored for a path.
    fn get_all<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Property>>;

    /// Apply a batch of set/remove instructions atomically — either all
    /// instructions take effect or none do, per §4.5 PROPPATCH atomicity.
    /// Returns the per-property outcome in the same order as `patch`.
    fn patch<'a>(&'a self, path: &'a DavPath, patch: Vec<PropPatch>) -> FsFuture<'a, Vec<(QName, FsResult<()>)>>;

    /// Drop every property stored for a path (used when a resource is deleted).
    fn clear<'a>(&'a self, path: &'a DavPath, recursive: bool) -> FsFuture<'a, ()>;

    fn is_reusable(&self) -> bool {
        true
    }
}

dyn_clone::clone_trait_object!(PropertyStore);

type PropTree = Tree<Vec<u8>, HashMap<QName, Property>>;

/// Ephemeral in-memory property store, the `propstore.rs` counterpart to
/// `MemFs`/`MemLs` — state lives only as long as the handle is kept alive.
#[derive(Debug, Clone)]
pub struct MemPropStore(Arc<Mutex<PropTree>>);

impl MemPropStore {
    pub fn new() -> Box<MemPropStore> {
        Box::new(MemPropStore(Arc::new(Mutex::new(Tree::new(HashMap::new())))))
    }
}

impl PropertyStore for MemPropStore {
    fn get<'a>(&'a self, path: &'a DavPath, name: &'a QName) -> FsFuture<'a, Property> {
        Box::pin(async move {
            let tree = self.0.lock().unwrap();
            let node_id = lookup_node(&tree, path).ok_or(FsError::NotFound)?;
            let props = tree.get_node(node_id)?;
            props.get(name).cloned().ok_or(FsError::NotFound)
        })
    }

    fn get_all<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<Property>> {
        Box::pin(async move {
            let tree = self.0.lock().unwrap();
            match lookup_node(&tree, path) {
                Some(node_id) => Ok(tree.get_node(node_id)?.values().cloned().collect()),
                None => Ok(Vec::new()),
            }
        })
    }

    fn patch<'a>(&'a self, path: &'a DavPath, patch: Vec<PropPatch>) -> FsFuture<'a, Vec<(QName, FsResult<()>)>> {
        Box::pin(async move {
            let mut tree = self.0.lock().unwrap();
            let node_id = get_or_create_node(&mut tree, path);
            let props = tree.get_node_mut(node_id)?;
            let mut results = Vec::with_capacity(patch.len());
            for instr in patch {
                match instr {
                    PropPatch::Set(p) => {
                        let name = p.name.clone();
                        if p.validate() {
                            props.insert(name.clone(), p);
                            results.push((name, Ok(())));
                        } else {
                            results.push((name, Err(FsError::GeneralFailure)));
                        }
                    }
                    PropPatch::Remove(name) => {
                        props.remove(&name);
                        results.push((name, Ok(())));
                    }
                }
            }
            Ok(results)
        })
    }

    fn clear<'a>(&'a self, path: &'a DavPath, recursive: bool) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let mut tree = self.0.lock().unwrap();
            if let Some(node_id) = lookup_node(&tree, path) {
                if recursive {
                    tree.delete_subtree(node_id).ok();
                } else if let Ok(props) = tree.get_node_mut(node_id) {
                    props.clear();
                }
            }
            Ok(())
        })
    }
}

fn path_to_segs(path: &DavPath) -> Vec<&[u8]> {
    path.as_bytes()
        .split(|&c| c == b'/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn lookup_node(tree: &PropTree, path: &DavPath) -> Option<u64> {
    let mut node_id = tree::ROOT_ID;
    for seg in path_to_segs(path) {
        node_id = match tree.get_child(node_id, seg) {
            Ok(n) => n,
            Err(_) => return None,
        };
    }
    Some(node_id)
}

fn get_or_create_node(tree: &mut PropTree, path: &DavPath) -> u64 {
    let mut node_id = tree::ROOT_ID;
    for seg in path_to_segs(path) {
        node_id = match tree.get_child(node_id, seg) {
            Ok(n) => n,
            Err(_) => tree.add_child(node_id, seg.to_vec(), HashMap::new(), false).unwrap(),
        };
    }
    node_id
}
