use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::FunctionId;

/// Identifier of a heap object.
///
/// Ids name arena slots. Compaction may relocate an object into another
/// slot (see [`Heap::relocate`]); registered [`AllocationTracker`]s are
/// notified of every such move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// A runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `undefined`.
    Undefined,
    /// A boolean.
    Boolean(bool),
    /// A number.
    Number(f64),
    /// A string or symbol primitive.
    Name(String),
    /// A reference to a heap object.
    Object(ObjectId),
}

impl Value {
    /// ECMAScript truthiness.
    pub fn boolean_value(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Name(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }
}

/// Rejection bookkeeping of a promise object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromiseState {
    /// Rejections of silent promises never surface through debug events.
    pub silent: bool,
    /// Whether user code attached a rejection handler.
    pub has_user_reject_handler: bool,
    /// Set once a rejection has been reported, so re-rejection stays quiet.
    pub debug_marked: bool,
}

/// Metadata of a single heap object.
#[derive(Clone, Debug, Default)]
pub struct ObjectInfo {
    /// Number of embedder fields; objects with embedder fields are opaque
    /// to side-effect tracking.
    pub embedder_field_count: u32,

    /// For generator objects, the backing generator function.
    pub generator_function: Option<FunctionId>,

    /// For promise objects, the rejection bookkeeping.
    pub promise: Option<PromiseState>,
}

/// Observer of heap allocations and compaction moves.
pub trait AllocationTracker: Send {
    /// A fresh object was allocated at `id`.
    fn object_allocated(&mut self, id: ObjectId);

    /// The object at `from` was relocated to `to`.
    fn object_moved(&mut self, from: ObjectId, to: ObjectId);
}

/// The object heap.
#[derive(Default)]
pub struct Heap {
    objects: IndexMap<ObjectId, ObjectInfo>,
    next_object_id: u64,
    tracker: Option<Arc<Mutex<dyn AllocationTracker>>>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("objects", &self.objects.len())
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

impl Heap {
    /// Allocates an object and notifies the registered tracker.
    pub fn allocate(&mut self, info: ObjectInfo) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(id, info);
        if let Some(tracker) = &self.tracker {
            if let Ok(mut tracker) = tracker.lock() {
                tracker.object_allocated(id);
            }
        }
        id
    }

    /// Relocates the object at `from` into the slot `to` and notifies the
    /// registered tracker.
    ///
    /// The slot `to` must be free or hold a dead object; whatever occupied
    /// it is dropped.
    pub fn relocate(&mut self, from: ObjectId, to: ObjectId) {
        if let Some(info) = self.objects.swap_remove(&from) {
            self.objects.insert(to, info);
            self.next_object_id = self.next_object_id.max(to.0 + 1);
            if let Some(tracker) = &self.tracker {
                if let Ok(mut tracker) = tracker.lock() {
                    tracker.object_moved(from, to);
                }
            }
        }
    }

    /// Frees the object at `id`.
    pub fn free(&mut self, id: ObjectId) {
        self.objects.swap_remove(&id);
    }

    /// Looks an object up.
    pub fn object(&self, id: ObjectId) -> Option<&ObjectInfo> {
        self.objects.get(&id)
    }

    /// Mutable object lookup.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectInfo> {
        self.objects.get_mut(&id)
    }

    /// Installs or removes the allocation tracker.
    pub fn set_allocation_tracker(&mut self, tracker: Option<Arc<Mutex<dyn AllocationTracker>>>) {
        self.tracker = tracker;
    }
}
