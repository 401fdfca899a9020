//! Octant nodes and their load lifecycle.
//!
//! Octants live in the arena owned by [`crate::Octree`] and refer to each
//! other by [`NodeIndex`]. Structure is only changed through `&mut Octree`;
//! everything a loader or the frame traversal touches (object counts, load
//! status, payload, view state) is behind per-node atomics or locks so it
//! can be updated through a shared reference.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lodstar_codec::ParticleRecord;

use crate::geometry::Aabb;
use crate::id::OctantId;

/// Position of an octant in its tree's arena.
pub type NodeIndex = usize;

/// Immutable list of records owned by one octant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectGroup {
    records: Vec<ParticleRecord>,
}

impl ObjectGroup {
    #[must_use]
    pub fn new(records: Vec<ParticleRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[ParticleRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<ParticleRecord> {
        self.records
    }
}

/// Load state of an octant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadStatus {
    NotLoaded = 0,
    /// Requested from the loader, not started yet.
    Queued = 1,
    Loading = 2,
    /// Decoded, not yet attached.
    Ready = 3,
    PartiallyLoaded = 4,
    Loaded = 5,
    LoadingFailed = 6,
}

impl LoadStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Queued,
            2 => Self::Loading,
            3 => Self::Ready,
            4 => Self::PartiallyLoaded,
            5 => Self::Loaded,
            6 => Self::LoadingFailed,
            _ => Self::NotLoaded,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use LoadStatus::{Loaded, Loading, LoadingFailed, NotLoaded, PartiallyLoaded, Queued, Ready};
        matches!(
            (self, next),
            (NotLoaded, Queued)
                | (Queued, Loading | NotLoaded)
                | (Loading, Ready | LoadingFailed | NotLoaded)
                | (Ready, PartiallyLoaded | Loaded)
                | (PartiallyLoaded, Loaded)
                | (Loaded, NotLoaded)
                | (LoadingFailed, Queued)
        )
    }
}

/// Per-frame view data written by the visibility traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub observed: bool,
    /// Angle subtended by the bounding sphere, in radians.
    pub view_angle: f64,
    pub distance: f64,
    pub opacity: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            observed: false,
            view_angle: 0.0,
            distance: f64::INFINITY,
            opacity: 0.0,
        }
    }
}

/// A node of the octree.
#[derive(Debug)]
pub struct Octant {
    pub(crate) id: OctantId,
    pub(crate) bounds: Aabb,
    pub(crate) depth: u32,
    pub(crate) index: NodeIndex,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: [Option<NodeIndex>; 8],
    pub(crate) own_children: u32,
    pub(crate) recursive_children: u32,
    /// Own object count recorded in the dataset; zero means there is no
    /// payload to fetch.
    pub(crate) stored_objects: u64,
    own_objects: AtomicI64,
    recursive_objects: AtomicI64,
    payload: RwLock<Option<Arc<ObjectGroup>>>,
    status: AtomicU8,
    view: Mutex<ViewState>,
}

impl Octant {
    pub(crate) fn new(
        id: OctantId,
        bounds: Aabb,
        index: NodeIndex,
        parent: Option<NodeIndex>,
    ) -> Self {
        Self {
            id,
            bounds,
            depth: id.depth(),
            index,
            parent,
            children: [None; 8],
            own_children: 0,
            recursive_children: 0,
            stored_objects: 0,
            own_objects: AtomicI64::new(0),
            recursive_objects: AtomicI64::new(0),
            payload: RwLock::new(None),
            status: AtomicU8::new(LoadStatus::NotLoaded as u8),
            view: Mutex::new(ViewState::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> OctantId {
        self.id
    }

    #[must_use]
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Child in `slot`, if present.
    #[must_use]
    pub fn child(&self, slot: u8) -> Option<NodeIndex> {
        self.children[usize::from(slot)]
    }

    /// Present children in slot order.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = NodeIndex> + '_ {
        self.children.iter().flatten().copied()
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.own_children == 0
    }

    #[must_use]
    pub fn own_children(&self) -> u32 {
        self.own_children
    }

    #[must_use]
    pub fn recursive_children(&self) -> u32 {
        self.recursive_children
    }

    #[must_use]
    pub fn stored_objects(&self) -> u64 {
        self.stored_objects
    }

    #[must_use]
    pub fn own_objects(&self) -> u64 {
        u64::try_from(self.own_objects.load(Ordering::Acquire)).unwrap_or(0)
    }

    #[must_use]
    pub fn recursive_objects(&self) -> u64 {
        u64::try_from(self.recursive_objects.load(Ordering::Acquire)).unwrap_or(0)
    }

    pub(crate) fn set_counts(&self, own: u64, recursive: u64) {
        self.own_objects
            .store(i64::try_from(own).unwrap_or(i64::MAX), Ordering::Release);
        self.recursive_objects
            .store(i64::try_from(recursive).unwrap_or(i64::MAX), Ordering::Release);
    }

    pub(crate) fn add_own(&self, delta: i64) {
        self.own_objects.fetch_add(delta, Ordering::AcqRel);
    }

    pub(crate) fn add_recursive(&self, delta: i64) {
        self.recursive_objects.fetch_add(delta, Ordering::AcqRel);
    }

    #[must_use]
    pub fn status(&self) -> LoadStatus {
        LoadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` if the octant is still in `from` and the
    /// lifecycle allows it. Returns whether the transition happened.
    pub fn transition(&self, from: LoadStatus, to: LoadStatus) -> bool {
        from.can_transition_to(to)
            && self
                .status
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Force a status while the tree is being assembled.
    pub(crate) fn set_status(&self, status: LoadStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Currently attached payload.
    #[must_use]
    pub fn payload(&self) -> Option<Arc<ObjectGroup>> {
        self.payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the payload, returning the previous one.
    pub fn replace_payload(&self, group: Option<Arc<ObjectGroup>>) -> Option<Arc<ObjectGroup>> {
        let mut slot = self.payload.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, group)
    }

    #[must_use]
    pub fn view(&self) -> ViewState {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_view(&self, view: ViewState) {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = view;
    }

    /// Mark unobserved, keeping the last measured angle and distance.
    pub(crate) fn set_unobserved(&self) {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        view.observed = false;
        view.opacity = 0.0;
    }
}
