//! Arena of heap objects.
//!
//! Every object the compiler or the emitted program touches lives in one
//! arena owned by the VM. Slots are `Option<HeapEntry>`; vacated slots are
//! recycled through a free list. Back-pointers between objects are plain
//! [`HeapId`] indices, so the object graph's cycles (class → method →
//! closure → function → module → class) never become ownership cycles.
//!
//! The arena replaces the classic intrusive all-objects list: "walk all
//! objects" is "iterate the occupied slots", and the GC mark bit is the
//! `is_dark` flag on each entry. The collector itself lives with the
//! interpreter; this module only provides the mark/sweep plumbing.

use std::collections::BTreeMap;

use crate::types::{
    class::{ObjClass, ObjInstance, ObjRange},
    function::{ObjClosure, ObjFn, ObjUpvalue},
    list::ObjList,
    map::ObjMap,
    module::ObjModule,
    str::ObjStr,
    thread::ObjThread,
};

/// Index of a slot in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a heap slot: one variant per object kind.
#[derive(Debug, strum::IntoStaticStr)]
pub enum HeapData {
    Str(ObjStr),
    List(ObjList),
    Map(ObjMap),
    Range(ObjRange),
    Module(ObjModule),
    Fn(ObjFn),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Instance(ObjInstance),
    Class(ObjClass),
    Thread(ObjThread),
}

impl HeapData {
    /// Static name of the object kind, for stats and error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    /// Rough shallow size of the object in bytes: the slot itself plus any
    /// directly owned buffers. Used only for allocation accounting.
    #[must_use]
    fn shallow_size(&self) -> usize {
        use std::mem::size_of;
        let payload = match self {
            Self::Str(s) => s.len(),
            Self::List(l) => l.capacity() * size_of::<crate::value::Value>(),
            Self::Map(m) => m.capacity() * size_of::<crate::types::map::MapEntry>(),
            Self::Range(_) | Self::Upvalue(_) => 0,
            Self::Module(m) => m.var_count() * size_of::<crate::types::module::ModuleVar>(),
            Self::Fn(f) => f.code.len() + f.constants.len() * size_of::<crate::value::Value>(),
            Self::Closure(c) => c.upvalues.len() * size_of::<HeapId>(),
            Self::Instance(i) => i.fields.len() * size_of::<crate::value::Value>(),
            Self::Class(c) => c.methods.len() * size_of::<crate::types::class::Method>(),
            Self::Thread(t) => t.stack.capacity() * size_of::<crate::value::Value>(),
        };
        size_of::<HeapEntry>() + payload
    }
}

/// Object header plus payload: the class back-pointer (nullable only while
/// the built-in classes bootstrap themselves), the GC mark, and the data.
#[derive(Debug)]
pub struct HeapEntry {
    class: Option<HeapId>,
    is_dark: bool,
    data: HeapData,
}

/// Snapshot of heap state: live object counts by kind plus allocation totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of occupied slots.
    pub live_objects: usize,
    /// Recycled slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Live objects per kind name. `BTreeMap` for deterministic order.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Accumulated shallow allocation estimate in bytes.
    pub allocated_bytes: usize,
}

/// The arena.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    /// Slots vacated by `sweep`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    allocated_bytes: usize,
    live: usize,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an object, linking it into the arena with the given class
    /// back-pointer. Accounting is updated with the object's shallow size.
    pub fn allocate(&mut self, data: HeapData, class: Option<HeapId>) -> HeapId {
        self.allocated_bytes += data.shallow_size();
        self.live += 1;
        let entry = HeapEntry {
            class,
            is_dark: false,
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(u32::try_from(self.entries.len()).expect("heap slot count exceeds u32"));
            self.entries.push(Some(entry));
            id
        }
    }

    fn entry(&self, id: HeapId) -> &HeapEntry {
        self.entries[id.index()].as_ref().expect("vacant heap slot")
    }

    fn entry_mut(&mut self, id: HeapId) -> &mut HeapEntry {
        self.entries[id.index()].as_mut().expect("vacant heap slot")
    }

    #[must_use]
    pub fn data(&self, id: HeapId) -> &HeapData {
        &self.entry(id).data
    }

    pub fn data_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entry_mut(id).data
    }

    /// The object's class back-pointer. `None` only during bootstrap.
    #[must_use]
    pub fn class_of(&self, id: HeapId) -> Option<HeapId> {
        self.entry(id).class
    }

    /// Patches the class back-pointer; used by the two-step class bootstrap.
    pub fn set_class(&mut self, id: HeapId, class: HeapId) {
        self.entry_mut(id).class = Some(class);
    }

    /// Records a container reallocation so `allocated_bytes` tracks growth
    /// and shrinkage, not just initial allocation.
    pub fn note_resize(&mut self, old_bytes: usize, new_bytes: usize) {
        self.allocated_bytes = self.allocated_bytes - old_bytes + new_bytes;
    }

    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// Iterates the ids of all occupied slots.
    pub fn iter_ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| HeapId(i as u32))
    }

    // GC plumbing. The collector (tracing roots, deciding liveness) is the
    // interpreter's; these keep the mark bit and the sweep mechanics here.

    pub fn mark(&mut self, id: HeapId) {
        self.entry_mut(id).is_dark = true;
    }

    #[must_use]
    pub fn is_marked(&self, id: HeapId) -> bool {
        self.entry(id).is_dark
    }

    pub fn clear_marks(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.is_dark = false;
        }
    }

    /// Frees every unmarked object, clears surviving marks, and returns the
    /// number of freed slots.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (i, slot) in self.entries.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.is_dark => entry.is_dark = false,
                Some(entry) => {
                    self.allocated_bytes = self.allocated_bytes.saturating_sub(entry.data.shallow_size());
                    *slot = None;
                    self.free_list.push(HeapId(i as u32));
                    freed += 1;
                }
                None => {}
            }
        }
        self.live -= freed;
        freed
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        for entry in self.entries.iter().flatten() {
            *objects_by_type.entry(entry.data.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            allocated_bytes: self.allocated_bytes,
        }
    }
}

macro_rules! typed_accessors {
    ($(($name:ident, $name_mut:ident, $variant:ident, $ty:ty)),+ $(,)?) => {
        impl Heap {
            $(
                #[must_use]
                pub fn $name(&self, id: HeapId) -> &$ty {
                    match self.data(id) {
                        HeapData::$variant(obj) => obj,
                        other => panic!(
                            concat!("expected ", stringify!($variant), " object, found {}"),
                            other.kind_name()
                        ),
                    }
                }

                pub fn $name_mut(&mut self, id: HeapId) -> &mut $ty {
                    match self.data_mut(id) {
                        HeapData::$variant(obj) => obj,
                        other => panic!(
                            concat!("expected ", stringify!($variant), " object, found {}"),
                            other.kind_name()
                        ),
                    }
                }
            )+
        }
    };
}

typed_accessors!(
    (str, str_mut, Str, ObjStr),
    (list, list_mut, List, ObjList),
    (map, map_mut, Map, ObjMap),
    (range, range_mut, Range, ObjRange),
    (module, module_mut, Module, ObjModule),
    (function, function_mut, Fn, ObjFn),
    (upvalue, upvalue_mut, Upvalue, ObjUpvalue),
    (closure, closure_mut, Closure, ObjClosure),
    (instance, instance_mut, Instance, ObjInstance),
    (class, class_mut, Class, ObjClass),
    (thread, thread_mut, Thread, ObjThread),
);
