//! Content-addressed reference store
//!
//! The cache manager owns every piece of content the solver touches.
//! Holders get reference handles:
//!
//! | Handle | Content | Becomes |
//! |--------|---------|---------|
//! | `MutableRef` | private, writable | `ImmutableRef` via `commit` |
//! | `ImmutableRef` | shared, frozen | more handles via `clone_ref` |
//!
//! Handles are released explicitly. Releasing a handle twice is a no-op;
//! a record disappears once its last handle is released. The store is
//! in memory only: nothing outlives the process.

pub mod contenthash;
pub mod results;
pub mod snapshot;

pub use snapshot::{normalize_path, Entry, Snapshot};

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Record {
    description: String,
    mutable: bool,
    handles: usize,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    records: HashMap<String, Record>,
    releases: HashMap<String, usize>,
}

/// In-memory cache manager
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct CacheManager {
    store: Arc<Mutex<Store>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, mutable: bool, description: String) -> String {
        let id = Uuid::new_v4().simple().to_string();
        debug!("allocating {} ref {}: {}", kind(mutable), id, description);
        self.lock().records.insert(
            id.clone(),
            Record {
                description,
                mutable,
                handles: 1,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Store `snapshot` as a new immutable record
    pub fn import(&self, snapshot: Snapshot, description: impl Into<String>) -> ImmutableRef {
        let id = self.register(false, description.into());
        ImmutableRef {
            id,
            content: Arc::new(snapshot),
            released: AtomicBool::new(false),
            manager: self.clone(),
        }
    }

    /// Allocate a writable copy of `parent` (or an empty tree)
    pub fn new_mutable(
        &self,
        parent: Option<&ImmutableRef>,
        description: impl Into<String>,
    ) -> KilnResult<MutableRef> {
        let content = match parent {
            Some(parent) => {
                if parent.is_released() {
                    return Err(KilnError::invalid_reference(format!(
                        "parent {} already released",
                        parent.id()
                    )));
                }
                parent.content.as_ref().clone()
            }
            None => Snapshot::new(),
        };
        let id = self.register(true, description.into());
        Ok(MutableRef {
            id,
            content: Mutex::new(content),
            finalized: AtomicBool::new(false),
            manager: self.clone(),
        })
    }

    fn add_handle(&self, id: &str) {
        if let Some(record) = self.lock().records.get_mut(id) {
            record.handles += 1;
        }
    }

    fn drop_handle(&self, id: &str) {
        let mut store = self.lock();
        *store.releases.entry(id.to_string()).or_insert(0) += 1;
        let remove = match store.records.get_mut(id) {
            Some(record) => {
                record.handles = record.handles.saturating_sub(1);
                record.handles == 0
            }
            None => {
                warn!("release of unknown ref {}", id);
                false
            }
        };
        if remove {
            store.records.remove(id);
            debug!("ref {} removed", id);
        }
    }

    fn finalize(&self, mutable_id: &str, content: Snapshot) -> KilnResult<ImmutableRef> {
        let description = {
            let mut store = self.lock();
            match store.records.get(mutable_id) {
                Some(record) if record.mutable => {}
                Some(_) => {
                    return Err(KilnError::invalid_reference(format!(
                        "{} is not mutable",
                        mutable_id
                    )))
                }
                None => {
                    return Err(KilnError::invalid_reference(format!(
                        "{} no longer exists",
                        mutable_id
                    )))
                }
            }
            store
                .records
                .remove(mutable_id)
                .map(|record| record.description)
                .unwrap_or_default()
        };
        let committed = self.import(content, description);
        debug!("committed {} as {}", mutable_id, committed.id());
        Ok(committed)
    }

    /// Number of records that still have live handles
    pub fn live_records(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the record `id` still has live handles
    pub fn is_live(&self, id: &str) -> bool {
        self.lock().records.contains_key(id)
    }

    /// How many handles of `id` have been released so far
    pub fn release_count(&self, id: &str) -> usize {
        self.lock().releases.get(id).copied().unwrap_or(0)
    }

    pub fn description(&self, id: &str) -> Option<String> {
        self.lock()
            .records
            .get(id)
            .map(|record| record.description.clone())
    }

    pub fn created_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.lock().records.get(id).map(|record| record.created_at)
    }
}

fn kind(mutable: bool) -> &'static str {
    if mutable {
        "mutable"
    } else {
        "immutable"
    }
}

/// A handle to frozen content
pub struct ImmutableRef {
    id: String,
    content: Arc<Snapshot>,
    released: AtomicBool,
    manager: CacheManager,
}

impl ImmutableRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The content this reference points at
    pub fn content(&self) -> Arc<Snapshot> {
        Arc::clone(&self.content)
    }

    /// A new handle on the same record; both must be released
    pub fn clone_ref(&self) -> ImmutableRef {
        self.manager.add_handle(&self.id);
        ImmutableRef {
            id: self.id.clone(),
            content: Arc::clone(&self.content),
            released: AtomicBool::new(false),
            manager: self.manager.clone(),
        }
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.manager.drop_handle(&self.id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ImmutableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmutableRef")
            .field("id", &self.id)
            .field("entries", &self.content.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// A handle to private, writable content
pub struct MutableRef {
    id: String,
    content: Mutex<Snapshot>,
    finalized: AtomicBool,
    manager: CacheManager,
}

impl MutableRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current content
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn replace(&self, content: Snapshot) {
        *self.lock() = content;
    }

    /// Freeze the content into a new immutable record.
    ///
    /// On success this handle is spent and releasing it does nothing.
    pub fn commit(&self) -> KilnResult<ImmutableRef> {
        if self.is_finalized() {
            return Err(KilnError::invalid_reference(format!(
                "{} already committed or released",
                self.id
            )));
        }
        let committed = self.manager.finalize(&self.id, self.snapshot())?;
        self.finalized.store(true, Ordering::Release);
        Ok(committed)
    }

    pub fn release(&self) {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            self.manager.drop_handle(&self.id);
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MutableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableRef")
            .field("id", &self.id)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

/// Any reference a vertex can consume or produce
#[derive(Debug)]
pub enum Reference {
    Immutable(ImmutableRef),
    Mutable(MutableRef),
}

impl Reference {
    pub fn id(&self) -> &str {
        match self {
            Self::Immutable(r) => r.id(),
            Self::Mutable(r) => r.id(),
        }
    }

    /// The storage-backed immutable handle, if this is one
    pub fn as_immutable(&self) -> Option<&ImmutableRef> {
        match self {
            Self::Immutable(r) => Some(r),
            Self::Mutable(_) => None,
        }
    }

    pub fn as_mutable(&self) -> Option<&MutableRef> {
        match self {
            Self::Mutable(r) => Some(r),
            Self::Immutable(_) => None,
        }
    }

    /// Current content, copied for mutable references
    pub fn content(&self) -> Arc<Snapshot> {
        match self {
            Self::Immutable(r) => r.content(),
            Self::Mutable(r) => Arc::new(r.snapshot()),
        }
    }

    pub fn release(&self) {
        match self {
            Self::Immutable(r) => r.release(),
            Self::Mutable(r) => r.release(),
        }
    }
}

/// References released when the guard goes out of scope
///
/// `into_inner` hands them back without releasing.
#[derive(Debug, Default)]
pub struct ReleaseGuard {
    refs: Vec<Reference>,
}

impl ReleaseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, reference: impl Into<Reference>) {
        self.refs.push(reference.into());
    }

    pub fn get(&self, index: usize) -> Option<&Reference> {
        self.refs.get(index)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn as_slice(&self) -> &[Reference] {
        &self.refs
    }

    pub fn into_inner(mut self) -> Vec<Reference> {
        std::mem::take(&mut self.refs)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        for reference in &self.refs {
            reference.release();
        }
    }
}

impl From<ImmutableRef> for Reference {
    fn from(r: ImmutableRef) -> Self {
        Self::Immutable(r)
    }
}

impl From<MutableRef> for Reference {
    fn from(r: MutableRef) -> Self {
        Self::Mutable(r)
    }
}
