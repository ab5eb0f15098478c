//! Blob store
//!
//! A `Workspace` maps blob names to values and optionally borrows a parent.
//! Lookups walk the parent chain; writes always land in the local map.
//! Dropping a child workspace releases exactly the blobs it bound itself.

use std::collections::HashMap;

use crate::errors::{ExecError, ExecResult};
use crate::types::{ScopeRef, Snapshot, Val};

/// Named, mutable value store with single-inheritance lookup
#[derive(Debug, Default)]
pub struct Workspace<'p> {
    blobs: HashMap<String, Val>,
    parent: Option<&'p Workspace<'p>>,
}

impl Workspace<'static> {
    /// Root workspace with no parent
    pub fn new() -> Self {
        Workspace {
            blobs: HashMap::new(),
            parent: None,
        }
    }
}

impl<'p> Workspace<'p> {
    /// New empty workspace whose lookups fall back to `self`
    pub fn create_child(&self) -> Workspace<'_> {
        Workspace {
            blobs: HashMap::new(),
            parent: Some(self),
        }
    }

    /// Look a name up locally, then along the parent chain
    pub fn get(&self, name: &str) -> ExecResult<&Val> {
        let mut current: Option<&Workspace<'_>> = Some(self);
        while let Some(ws) = current {
            if let Some(value) = ws.blobs.get(name) {
                return Ok(value);
            }
            current = ws.parent;
        }
        Err(ExecError::BlobNotFound {
            name: name.to_string(),
        })
    }

    /// Local-only lookup
    pub fn get_local(&self, name: &str) -> Option<&Val> {
        self.blobs.get(name)
    }

    /// Create or update `name` in the local map; ancestors are never touched
    pub fn set(&mut self, name: impl Into<String>, value: Val) {
        self.blobs.insert(name.into(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    /// Names bound directly in this workspace, sorted
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Depth of the parent chain (0 for a root workspace)
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent;
        while let Some(ws) = current {
            depth += 1;
            current = ws.parent;
        }
        depth
    }

    /// Resolve `name` to a scope handle
    pub fn scope(&self, name: &str) -> ExecResult<ScopeRef> {
        match self.get(name)? {
            Val::Scope(scope) => Ok(scope.clone()),
            _ => Err(ExecError::NotAScope {
                name: name.to_string(),
            }),
        }
    }

    /// Copy of the current values of `names`; missing names are skipped
    pub fn capture<'n>(&self, names: impl IntoIterator<Item = &'n String>) -> Snapshot {
        names
            .into_iter()
            .filter_map(|name| self.get(name).ok().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Bind every snapshot entry locally
    pub fn restore(&mut self, snapshot: &Snapshot) {
        for (name, value) in snapshot {
            self.blobs.insert(name.clone(), value.clone());
        }
    }

    /// Release the local map, returning what was bound here
    pub fn destroy(self) -> HashMap<String, Val> {
        self.blobs
    }

    /* ===================== Blob I/O ===================== */

    /// Driver-side write, same as `set`
    pub fn feed(&mut self, name: impl Into<String>, value: impl Into<Val>) {
        self.set(name, value.into());
    }

    /// Driver-side read returning an owned value
    pub fn fetch(&self, name: &str) -> ExecResult<Val> {
        self.get(name).cloned()
    }
}
