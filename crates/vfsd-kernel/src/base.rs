//! Shared state for provider implementations.
//!
//! [`ProviderBase`] holds what every provider carries: its name, its fixed
//! capability set, and a table of open file handles.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use vfsd_types::{Capabilities, VfsPath};

/// Opaque handle for an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(u64);

impl FileHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh{}", self.0)
    }
}

#[derive(Debug)]
struct OpenFile {
    path: VfsPath,
    position: u64,
}

#[derive(Debug)]
struct HandleState {
    next: u64,
    open: HashMap<FileHandle, OpenFile>,
}

/// Open-file table.
///
/// Handles start at 1 and only ever increase, so a released handle is never
/// handed out again by the same table.
#[derive(Debug)]
pub struct HandleTable {
    state: Mutex<HandleState>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HandleState {
                next: 1,
                open: HashMap::new(),
            }),
        }
    }

    /// Open `path`, returning a fresh handle positioned at 0.
    pub fn allocate(&self, path: VfsPath) -> FileHandle {
        let mut state = self.state.lock();
        let handle = FileHandle(state.next);
        state.next += 1;
        state.open.insert(handle, OpenFile { path, position: 0 });
        handle
    }

    /// Close a handle. Returns false if it was not open.
    pub fn release(&self, handle: FileHandle) -> bool {
        self.state.lock().open.remove(&handle).is_some()
    }

    /// Path a handle was opened for.
    pub fn path(&self, handle: FileHandle) -> Option<VfsPath> {
        self.state.lock().open.get(&handle).map(|f| f.path.clone())
    }

    pub fn position(&self, handle: FileHandle) -> Option<u64> {
        self.state.lock().open.get(&handle).map(|f| f.position)
    }

    /// Move a handle's position. Returns false if the handle is not open.
    pub fn set_position(&self, handle: FileHandle, position: u64) -> bool {
        match self.state.lock().open.get_mut(&handle) {
            Some(file) => {
                file.position = position;
                true
            }
            None => false,
        }
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.state.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Name, capabilities and handle table for a provider.
///
/// Embed one in a provider struct and delegate `name()`/`capabilities()` to
/// it; optional operations fall back to the trait defaults.
#[derive(Debug)]
pub struct ProviderBase {
    name: String,
    capabilities: Capabilities,
    handles: HandleTable,
}

impl ProviderBase {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
            handles: HandleTable::new(),
        }
    }

    /// A read-only base.
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::new(name, Capabilities::READ_ONLY)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn allocate_handle(&self, path: VfsPath) -> FileHandle {
        self.handles.allocate(path)
    }

    pub fn release_handle(&self, handle: FileHandle) -> bool {
        self.handles.release(handle)
    }

    pub fn handle_path(&self, handle: FileHandle) -> Option<VfsPath> {
        self.handles.path(handle)
    }

    pub fn handle_position(&self, handle: FileHandle) -> Option<u64> {
        self.handles.position(handle)
    }

    pub fn set_handle_position(&self, handle: FileHandle, position: u64) -> bool {
        self.handles.set_position(handle, position)
    }
}
