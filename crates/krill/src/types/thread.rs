//! Thread objects: cooperative coroutines.
//!
//! One thread runs at a time; control passes only at explicit yield-style
//! calls, so nothing here needs locking. A thread owns its value stack, its
//! frame stack, and the list of upvalues still aliasing its stack slots.

use crate::{heap::HeapId, value::Value};

/// Frames start at this capacity.
pub const INITIAL_FRAME_NUM: usize = 4;

/// One call frame: the next instruction offset, the closure being executed,
/// and where the frame's slots begin in the thread's shared stack.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub ip: usize,
    pub closure: HeapId,
    pub stack_start: usize,
}

/// A lightweight thread.
#[derive(Debug)]
pub struct ObjThread {
    /// The value stack shared by all of this thread's frames.
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    /// Upvalues still aliasing live stack slots, as `(slot, upvalue)` pairs
    /// kept sorted by descending slot so closing from a slot upward is a
    /// prefix drain.
    pub open_upvalues: Vec<(usize, HeapId)>,
    /// The thread that resumed this one, if any; errors propagate to it.
    pub caller: Option<HeapId>,
    /// A runtime error raised while this thread ran, or `Null`.
    pub error_object: Value,
}

impl ObjThread {
    /// A fresh thread ready to run `closure`, with room for `stack_capacity`
    /// values. The closure itself sits in slot 0 as the receiver.
    #[must_use]
    pub fn new(closure: HeapId, stack_capacity: usize) -> Self {
        let mut thread = Self {
            stack: Vec::with_capacity(stack_capacity.max(1)),
            frames: Vec::with_capacity(INITIAL_FRAME_NUM),
            open_upvalues: Vec::new(),
            caller: None,
            error_object: Value::Null,
        };
        thread.reset(closure);
        thread
    }

    /// Rewinds the thread to run `closure` from scratch.
    pub fn reset(&mut self, closure: HeapId) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.caller = None;
        self.error_object = Value::Null;
        self.stack.push(Value::Obj(closure));
        self.prepare_frame(closure, 0);
    }

    /// Pushes a frame executing `closure` whose slots begin at
    /// `stack_start`.
    pub fn prepare_frame(&mut self, closure: HeapId, stack_start: usize) {
        self.frames.push(Frame {
            ip: 0,
            closure,
            stack_start,
        });
    }

    /// Records an upvalue aliasing `slot`, keeping descending slot order.
    pub fn add_open_upvalue(&mut self, slot: usize, upvalue: HeapId) {
        let position = self
            .open_upvalues
            .iter()
            .position(|&(s, _)| s <= slot)
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(position, (slot, upvalue));
    }

    /// Detaches every open upvalue at or above `slot`; the interpreter
    /// closes each by copying the slot's value into the cell. O(k) in the
    /// number detached because the list is sorted descending.
    pub fn take_open_upvalues_from(&mut self, slot: usize) -> Vec<(usize, HeapId)> {
        let keep_from = self
            .open_upvalues
            .iter()
            .position(|&(s, _)| s < slot)
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.drain(..keep_from).collect()
    }
}
