use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{CacheError, CacheResult, ContentVersion, MetadataCache};
use crate::vfs::types::{ConflictKind, FileContent, LocalId, Node, NodeKind, ROOT_ID};

/// An entry of the remote listing, relative to the account root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    /// Opaque remote revision; also used as the content fingerprint of
    /// downloaded files.
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    node: Node,
    /// Location on the remote as of the last successful sync.
    #[serde(default)]
    remote_path: Option<PathBuf>,
    #[serde(default)]
    remote_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    next_id: LocalId,
    records: HashMap<LocalId, Record>,
    /// Children in insertion order. Duplicate names are allowed here.
    children: HashMap<LocalId, Vec<LocalId>>,
    /// Remote paths of synced nodes removed locally, waiting to be pushed.
    #[serde(default)]
    tombstones: Vec<PathBuf>,
    /// Nodes removed locally whose cached content is still on disk.
    #[serde(default)]
    dropped: Vec<LocalId>,
}

impl StoreState {
    fn new() -> Self {
        let mut records = HashMap::new();
        records.insert(
            ROOT_ID,
            Record {
                node: Node::root(),
                remote_path: Some(PathBuf::new()),
                remote_version: None,
            },
        );
        StoreState {
            // Start at 2 because 1 is reserved for the root
            next_id: ROOT_ID + 1,
            records,
            children: HashMap::new(),
            tombstones: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> LocalId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn node(&self, id: LocalId) -> CacheResult<&Node> {
        self.records
            .get(&id)
            .map(|r| &r.node)
            .ok_or(CacheError::NotFound)
    }

    fn find_child(&self, parent: LocalId, name: &str) -> Option<LocalId> {
        self.children.get(&parent).and_then(|ids| {
            ids.iter()
                .copied()
                .find(|id| self.records.get(id).is_some_and(|r| r.node.name == name))
        })
    }

    fn has_children(&self, id: LocalId) -> bool {
        self.children.get(&id).is_some_and(|ids| !ids.is_empty())
    }

    fn require_folder(&self, id: LocalId) -> CacheResult<()> {
        if self.node(id)?.is_folder() {
            Ok(())
        } else {
            Err(CacheError::Conflict(ConflictKind::NotADirectory))
        }
    }

    fn insert(&mut self, record: Record) {
        if let Some(parent) = record.node.parent {
            self.children.entry(parent).or_default().push(record.node.id);
        }
        self.records.insert(record.node.id, record);
    }

    fn detach(&mut self, parent: LocalId, id: LocalId) {
        if let Some(ids) = self.children.get_mut(&parent) {
            ids.retain(|child| *child != id);
        }
    }

    /// Drop a childless node, remembering its remote location if it had one.
    fn drop_node(&mut self, id: LocalId) {
        if let Some(record) = self.records.remove(&id) {
            if let Some(parent) = record.node.parent {
                self.detach(parent, id);
            }
            self.children.remove(&id);
            if !record.node.is_folder() {
                self.dropped.push(id);
            }
            if let Some(path) = record.remote_path {
                self.tombstones.push(path);
            }
        }
    }

    fn path_of(&self, id: LocalId) -> CacheResult<PathBuf> {
        let mut names = Vec::new();
        let mut current = id;
        while current != ROOT_ID {
            let node = self.node(current)?;
            names.push(node.name.as_str());
            current = node.parent.ok_or_else(|| {
                CacheError::Corrupt(format!("node {} has no parent", node.id))
            })?;
            if names.len() > self.records.len() {
                return Err(CacheError::Corrupt(format!("cycle above node {}", id)));
            }
        }
        Ok(names.iter().rev().collect())
    }

    fn resolve_path(&self, path: &Path) -> Option<LocalId> {
        let mut current = ROOT_ID;
        for component in path.iter() {
            let name = component.to_str()?;
            current = self.find_child(current, name)?;
        }
        Some(current)
    }

    fn is_ancestor(&self, ancestor: LocalId, mut id: LocalId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.records.get(&id).and_then(|r| r.node.parent) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }
}

/// In-memory metadata tree with optional JSON snapshot persistence.
///
/// All mutations run under one write lock, so each trait call is atomic with
/// respect to other adapter calls and to the sync engine.
pub struct MetaStore {
    state: RwLock<StoreState>,
    snapshot_path: Option<PathBuf>,
    unique_names: bool,
}

impl MetaStore {
    pub fn new(unique_names: bool) -> Self {
        MetaStore {
            state: RwLock::new(StoreState::new()),
            snapshot_path: None,
            unique_names,
        }
    }

    /// Load the snapshot at `path`, or start empty if it does not exist yet.
    pub fn open(path: &Path, unique_names: bool) -> CacheResult<Self> {
        let state = if path.exists() {
            let bytes = fs::read(path)?;
            let state: StoreState = serde_json::from_slice(&bytes).map_err(|e| {
                CacheError::Corrupt(format!("invalid snapshot {}: {}", path.display(), e))
            })?;
            if !state.records.contains_key(&ROOT_ID) {
                return Err(CacheError::Corrupt(format!(
                    "snapshot {} has no root node",
                    path.display()
                )));
            }
            tracing::info!(
                "Loaded {} cached nodes from {}",
                state.records.len(),
                path.display()
            );
            state
        } else {
            StoreState::new()
        };

        Ok(MetaStore {
            state: RwLock::new(state),
            snapshot_path: Some(path.to_path_buf()),
            unique_names,
        })
    }

    /// Write the snapshot atomically. No-op for purely in-memory stores.
    pub fn save(&self) -> CacheResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let bytes = {
            let state = self.state.read();
            serde_json::to_vec(&*state)
                .map_err(|e| CacheError::Corrupt(format!("failed to encode snapshot: {}", e)))?
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        tracing::debug!("Saved metadata snapshot to {}", path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn path_of(&self, id: LocalId) -> CacheResult<PathBuf> {
        self.state.read().path_of(id)
    }

    /// Location of a node on the remote as of the last sync.
    pub fn remote_path(&self, id: LocalId) -> Option<PathBuf> {
        self.state
            .read()
            .records
            .get(&id)
            .and_then(|r| r.remote_path.clone())
    }

    /// All file nodes, for content prefetching.
    pub fn files(&self) -> Vec<Node> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| !r.node.is_folder())
            .map(|r| r.node.clone())
            .collect()
    }

    /// Merge one remote entry into the tree.
    ///
    /// Returns the id of a file whose content must be (re)downloaded.
    /// Dirty files keep their local content; entries whose parent is not
    /// known yet, or that were removed locally, are skipped.
    pub fn apply_remote_entry(&self, entry: &RemoteEntry) -> CacheResult<Option<LocalId>> {
        let mut state = self.state.write();

        if state.tombstones.iter().any(|t| t == &entry.path) {
            return Ok(None);
        }

        if let Some(id) = state.resolve_path(&entry.path) {
            let record = state
                .records
                .get_mut(&id)
                .ok_or_else(|| CacheError::Corrupt(format!("dangling child {}", id)))?;
            if record.node.is_folder() != entry.is_dir {
                tracing::warn!(
                    "Remote entry {} changed kind, keeping local node {}",
                    entry.path.display(),
                    id
                );
                return Ok(None);
            }
            record.remote_path = Some(entry.path.clone());
            if record.remote_version.as_deref() == Some(entry.version.as_str()) {
                return Ok(None);
            }
            let Some(content) = record.node.content_mut() else {
                record.remote_version = Some(entry.version.clone());
                return Ok(None);
            };
            if content.dirty {
                return Ok(None);
            }
            content.fingerprint = entry.version.clone();
            content.size = entry.size;
            record.node.last_modified = Utc::now();
            record.remote_version = Some(entry.version.clone());
            return Ok(Some(id));
        }

        let (Some(parent_path), Some(name)) = (entry.path.parent(), entry.path.file_name()) else {
            return Ok(None);
        };
        let Some(parent) = state.resolve_path(parent_path) else {
            return Ok(None);
        };
        if state.require_folder(parent).is_err() {
            return Ok(None);
        }

        let id = state.alloc_id();
        let kind = if entry.is_dir {
            NodeKind::Folder
        } else {
            NodeKind::File(FileContent {
                fingerprint: entry.version.clone(),
                size: entry.size,
                dirty: false,
            })
        };
        state.insert(Record {
            node: Node {
                id,
                parent: Some(parent),
                name: name.to_string_lossy().into_owned(),
                last_modified: Utc::now(),
                kind,
            },
            remote_path: Some(entry.path.clone()),
            remote_version: Some(entry.version.clone()),
        });
        tracing::debug!("Discovered remote entry {} as node {}", entry.path.display(), id);

        Ok((!entry.is_dir).then_some(id))
    }

    /// Remove clean nodes whose remote path no longer appears in the listing.
    ///
    /// Folders are only dropped once they are empty, so unsynced local
    /// children keep their parent. Returns the removed ids.
    pub fn apply_remote_deletions(&self, listed: &HashSet<PathBuf>) -> Vec<LocalId> {
        let mut state = self.state.write();

        let mut gone: Vec<(usize, LocalId)> = state
            .records
            .values()
            .filter(|r| r.node.id != ROOT_ID)
            .filter(|r| !r.node.content().is_some_and(|c| c.dirty))
            .filter_map(|r| {
                let remote = r.remote_path.as_ref()?;
                (!listed.contains(remote)).then(|| (remote.components().count(), r.node.id))
            })
            .collect();
        // Deepest first so folders are empty by the time we reach them
        gone.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, id) in gone {
            if state.has_children(id) {
                continue;
            }
            // Already absent remotely, so no tombstone
            if let Some(record) = state.records.remove(&id) {
                if let Some(parent) = record.node.parent {
                    state.detach(parent, id);
                }
                removed.push(id);
            }
        }
        removed
    }

    /// Folders created locally that do not exist remotely yet, parents first.
    pub fn pending_folders(&self) -> Vec<(LocalId, PathBuf)> {
        let state = self.state.read();
        let mut folders: Vec<(LocalId, PathBuf)> = state
            .records
            .values()
            .filter(|r| r.node.is_folder() && r.remote_path.is_none())
            .filter_map(|r| Some((r.node.id, state.path_of(r.node.id).ok()?)))
            .collect();
        folders.sort_by_key(|(_, path)| path.components().count());
        folders
    }

    /// The shallowest node whose local path differs from its remote path.
    pub fn next_pending_move(&self) -> Option<(LocalId, PathBuf, PathBuf)> {
        let state = self.state.read();
        state
            .records
            .values()
            .filter(|r| r.node.id != ROOT_ID)
            .filter_map(|r| {
                let from = r.remote_path.clone()?;
                let to = state.path_of(r.node.id).ok()?;
                (from != to).then_some((r.node.id, from, to))
            })
            .min_by_key(|(_, _, to)| to.components().count())
    }

    /// Record a remote move and rebase the remote paths of the subtree.
    pub fn mark_moved(&self, from: &Path, to: &Path) {
        let mut state = self.state.write();
        for record in state.records.values_mut() {
            let Some(remote) = &record.remote_path else {
                continue;
            };
            if let Ok(rest) = remote.strip_prefix(from) {
                record.remote_path = Some(if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                });
            }
        }
    }

    /// Files with local content not confirmed on the remote.
    pub fn dirty_files(&self) -> Vec<(Node, PathBuf)> {
        let state = self.state.read();
        state
            .records
            .values()
            .filter(|r| r.node.content().is_some_and(|c| c.dirty))
            .filter_map(|r| Some((r.node.clone(), state.path_of(r.node.id).ok()?)))
            .collect()
    }

    pub fn mark_folder_synced(&self, id: LocalId, path: &Path) {
        let mut state = self.state.write();
        if let Some(record) = state.records.get_mut(&id) {
            record.remote_path = Some(path.to_path_buf());
        }
    }

    /// Record a completed upload of `fingerprint`.
    ///
    /// The dirty flag is only cleared if no write landed since the upload
    /// started.
    pub fn mark_uploaded(&self, id: LocalId, fingerprint: &str, path: &Path, version: String) {
        let mut state = self.state.write();
        if let Some(record) = state.records.get_mut(&id) {
            record.remote_path = Some(path.to_path_buf());
            record.remote_version = Some(version);
            if let Some(content) = record.node.content_mut() {
                if content.fingerprint == fingerprint {
                    content.dirty = false;
                }
            }
        }
    }

    pub fn tombstones(&self) -> Vec<PathBuf> {
        self.state.read().tombstones.clone()
    }

    /// Tombstones safe to delete remotely: no live node still sits at or
    /// below them. Tombstones a moved node has taken over are dropped.
    pub fn removable_tombstones(&self) -> Vec<PathBuf> {
        let mut state = self.state.write();
        let live: Vec<PathBuf> = state
            .records
            .values()
            .filter(|r| r.node.id != ROOT_ID)
            .filter_map(|r| r.remote_path.clone())
            .collect();
        state.tombstones.retain(|t| !live.contains(t));
        state
            .tombstones
            .iter()
            .filter(|t| !live.iter().any(|p| p.starts_with(t)))
            .cloned()
            .collect()
    }

    /// Ids of files removed or replaced locally since the last call.
    pub fn take_dropped(&self) -> Vec<LocalId> {
        std::mem::take(&mut self.state.write().dropped)
    }

    pub fn clear_tombstone(&self, path: &Path) {
        self.state.write().tombstones.retain(|t| t != path);
    }
}

impl MetadataCache for MetaStore {
    fn node(&self, id: LocalId) -> CacheResult<Node> {
        self.state.read().node(id).cloned()
    }

    fn child_by_name(&self, parent: LocalId, name: &str) -> CacheResult<Node> {
        let state = self.state.read();
        let id = state.find_child(parent, name).ok_or(CacheError::NotFound)?;
        state.node(id).cloned()
    }

    fn children(&self, parent: LocalId) -> CacheResult<Vec<Node>> {
        let state = self.state.read();
        state.require_folder(parent)?;
        let ids = state.children.get(&parent).map(Vec::as_slice).unwrap_or(&[]);
        ids.iter().map(|id| state.node(*id).cloned()).collect()
    }

    fn create_local(
        &self,
        parent: LocalId,
        name: &str,
        size: u64,
        is_dir: bool,
    ) -> CacheResult<Node> {
        let mut state = self.state.write();
        state.require_folder(parent)?;
        if self.unique_names && state.find_child(parent, name).is_some() {
            return Err(CacheError::Conflict(ConflictKind::AlreadyExists));
        }

        let id = state.alloc_id();
        let kind = if is_dir {
            NodeKind::Folder
        } else {
            NodeKind::File(FileContent {
                fingerprint: String::new(),
                size,
                dirty: true,
            })
        };
        let node = Node {
            id,
            parent: Some(parent),
            name: name.to_string(),
            last_modified: Utc::now(),
            kind,
        };
        state.insert(Record {
            node: node.clone(),
            remote_path: None,
            remote_version: None,
        });
        tracing::debug!("create_local: node {} {:?} under {}", id, name, parent);
        Ok(node)
    }

    fn move_node(
        &self,
        parent: LocalId,
        old_name: &str,
        new_parent: LocalId,
        new_name: &str,
        size_hint: Option<u64>,
    ) -> CacheResult<()> {
        let mut state = self.state.write();
        let id = state
            .find_child(parent, old_name)
            .ok_or(CacheError::NotFound)?;
        state.require_folder(new_parent)?;

        let source_is_dir = state.node(id)?.is_folder();
        if source_is_dir && state.is_ancestor(id, new_parent) {
            return Err(CacheError::Conflict(ConflictKind::InvalidMove));
        }

        if let Some(target) = state.find_child(new_parent, new_name) {
            if target == id {
                return Ok(());
            }
            let target_is_dir = state.node(target)?.is_folder();
            match (source_is_dir, target_is_dir) {
                (true, false) => return Err(CacheError::Conflict(ConflictKind::NotADirectory)),
                (false, true) => return Err(CacheError::Conflict(ConflictKind::IsADirectory)),
                (true, true) if state.has_children(target) => {
                    return Err(CacheError::Conflict(ConflictKind::NotEmpty))
                }
                _ => {}
            }
            state.drop_node(target);
        }

        state.detach(parent, id);
        state.children.entry(new_parent).or_default().push(id);
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| CacheError::Corrupt(format!("dangling child {}", id)))?;
        record.node.parent = Some(new_parent);
        record.node.name = new_name.to_string();
        if let (Some(size), Some(content)) = (size_hint, record.node.content_mut()) {
            content.size = size;
        }
        tracing::debug!(
            "move_node: node {} {}/{:?} -> {}/{:?}",
            id,
            parent,
            old_name,
            new_parent,
            new_name
        );
        Ok(())
    }

    fn remove(&self, parent: LocalId, name: &str, is_dir: bool) -> CacheResult<()> {
        let mut state = self.state.write();
        let id = state.find_child(parent, name).ok_or(CacheError::NotFound)?;
        let node_is_dir = state.node(id)?.is_folder();
        match (is_dir, node_is_dir) {
            (true, false) => return Err(CacheError::Conflict(ConflictKind::NotADirectory)),
            (false, true) => return Err(CacheError::Conflict(ConflictKind::IsADirectory)),
            _ => {}
        }
        if node_is_dir && state.has_children(id) {
            return Err(CacheError::Conflict(ConflictKind::NotEmpty));
        }
        state.drop_node(id);
        tracing::debug!("remove: node {} {:?} from {}", id, name, parent);
        Ok(())
    }

    fn update_content(&self, id: LocalId, version: &ContentVersion) -> CacheResult<Node> {
        let mut state = self.state.write();
        let record = state.records.get_mut(&id).ok_or(CacheError::NotFound)?;
        let content = record
            .node
            .content_mut()
            .ok_or(CacheError::Conflict(ConflictKind::IsADirectory))?;
        content.fingerprint = version.fingerprint.clone();
        content.size = version.size;
        content.dirty = true;
        record.node.last_modified = Utc::now();
        Ok(record.node.clone())
    }
}
