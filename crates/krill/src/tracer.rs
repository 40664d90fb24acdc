//! Compile-time observability.
//!
//! A tracer receives coarse events while a module compiles: the module
//! starting, each function finishing (with its emitted size and frame
//! requirement), and the error that aborted compilation, if any. The
//! default hooks are empty so implementations opt into what they care
//! about.

use crate::error::CompileError;

/// Observer of compile progress.
pub trait CompileTracer {
    fn module_start(&mut self, name: &str) {
        let _ = name;
    }

    fn function_end(&mut self, name: &str, byte_len: usize, max_stack_slots: u32) {
        let _ = (name, byte_len, max_stack_slots);
    }

    fn error(&mut self, error: &CompileError) {
        let _ = error;
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

/// Writes events to stderr as they happen.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl CompileTracer for StderrTracer {
    fn module_start(&mut self, name: &str) {
        eprintln!("compiling module '{name}'");
    }

    fn function_end(&mut self, name: &str, byte_len: usize, max_stack_slots: u32) {
        eprintln!("  fn {name}: {byte_len} bytes, {max_stack_slots} stack slots");
    }

    fn error(&mut self, error: &CompileError) {
        eprintln!("{error}");
    }
}

/// One recorded compile event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    ModuleStart(String),
    FunctionEnd {
        name: String,
        byte_len: usize,
        max_stack_slots: u32,
    },
    Error(String),
}

/// Accumulates events for inspection; used by tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl CompileTracer for RecordingTracer {
    fn module_start(&mut self, name: &str) {
        self.events.push(TraceEvent::ModuleStart(name.to_owned()));
    }

    fn function_end(&mut self, name: &str, byte_len: usize, max_stack_slots: u32) {
        self.events.push(TraceEvent::FunctionEnd {
            name: name.to_owned(),
            byte_len,
            max_stack_slots,
        });
    }

    fn error(&mut self, error: &CompileError) {
        self.events.push(TraceEvent::Error(error.to_string()));
    }
}
