//! The VM context: one heap arena, the global method-name table, the
//! built-in class registry, and the flat module namespace.
//!
//! The VM is single-threaded during compilation; nested compilations
//! (triggered by `import`) are plain recursion. All the tables here are
//! append-only while compiling, so indices handed out early stay valid in
//! emitted bytecode.

use ahash::AHashMap;

use crate::{
    compiler,
    error::CompileResult,
    heap::{Heap, HeapData, HeapId},
    intern::SymbolTable,
    tracer::{CompileTracer, NoopTracer},
    types::{
        class::{ObjClass, ObjInstance, ObjRange},
        function::{ObjClosure, ObjUpvalue},
        list::ObjList,
        map::ObjMap,
        module::ObjModule,
        str::ObjStr,
        thread::ObjThread,
    },
    value::Value,
};

/// Identifiers (variables, module variables) are capped at this length.
pub const MAX_ID_LEN: usize = 128;

/// Handles to the built-in classes every value falls back to.
///
/// Created by [`Vm::new`] in a two-step bootstrap: raw classes first, then
/// header patching so every class object's own class points at `Class`. The
/// method tables stay empty here; populating them is the core-library
/// bootstrap, which belongs to the interpreter side.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    pub object: HeapId,
    pub class: HeapId,
    pub string: HeapId,
    pub list: HeapId,
    pub map: HeapId,
    pub range: HeapId,
    pub function: HeapId,
    pub boolean: HeapId,
    pub num: HeapId,
    pub null: HeapId,
    pub thread: HeapId,
    pub module: HeapId,
}

/// Process-wide state shared by the compiler and the object model.
#[derive(Debug)]
pub struct Vm {
    pub heap: Heap,
    /// Global table interning canonical method signatures; call opcodes
    /// carry indices into it.
    pub method_names: SymbolTable,
    pub core: CoreClasses,
    /// The unnamed module holding the built-in class variables; its
    /// variables are copied into every new module.
    pub core_module: HeapId,
    /// Flat namespace of loaded modules.
    modules: AHashMap<String, HeapId>,
    /// Entry closures of loaded modules, for the interpreter to run in
    /// load order.
    module_entries: AHashMap<String, HeapId>,
    /// Sources registered for `import`-driven compilation.
    module_sources: AHashMap<String, String>,
}

impl Vm {
    /// Creates a VM with the built-in classes bootstrapped and published as
    /// core-module variables.
    #[must_use]
    pub fn new() -> Self {
        let mut heap = Heap::new();

        // Two-step bootstrap: the first two classes exist before the class
        // of classes does, so their headers start out null and are patched.
        let object = heap.allocate(HeapData::Class(ObjClass::new_raw("Object", 0)), None);
        let class = heap.allocate(HeapData::Class(ObjClass::new_raw("Class", 0)), None);
        heap.set_class(object, class);
        heap.set_class(class, class);
        heap.class_mut(class).superclass = Some(object);

        let mut raw = |name: &str| {
            let id = heap.allocate(HeapData::Class(ObjClass::new_raw(name, 0)), Some(class));
            heap.class_mut(id).superclass = Some(object);
            id
        };
        let core = CoreClasses {
            object,
            class,
            string: raw("String"),
            list: raw("List"),
            map: raw("Map"),
            range: raw("Range"),
            function: raw("Fn"),
            boolean: raw("Bool"),
            num: raw("Num"),
            null: raw("Null"),
            thread: raw("Thread"),
            module: raw("Module"),
        };

        let core_module = heap.allocate(HeapData::Module(ObjModule::new(None)), Some(core.module));
        let mut vm = Self {
            heap,
            method_names: SymbolTable::new(),
            core,
            core_module,
            modules: AHashMap::new(),
            module_entries: AHashMap::new(),
            module_sources: AHashMap::new(),
        };
        for (name, id) in [
            ("Object", core.object),
            ("Class", core.class),
            ("String", core.string),
            ("List", core.list),
            ("Map", core.map),
            ("Range", core.range),
            ("Fn", core.function),
            ("Bool", core.boolean),
            ("Num", core.num),
            ("Null", core.null),
            ("Thread", core.thread),
        ] {
            vm.define_module_var(core_module, name, Value::Obj(id));
        }
        vm
    }

    // ------------------------------------------------------------------
    // Allocation helpers. Every constructor links the object to its
    // built-in class so `class_of` never dangles after bootstrap.

    pub fn new_str(&mut self, value: &str) -> HeapId {
        self.heap
            .allocate(HeapData::Str(ObjStr::new(value)), Some(self.core.string))
    }

    /// Convenience for constant-table entries.
    pub fn str_value(&mut self, value: &str) -> Value {
        Value::Obj(self.new_str(value))
    }

    pub fn new_list(&mut self) -> HeapId {
        self.heap.allocate(HeapData::List(ObjList::new()), Some(self.core.list))
    }

    pub fn new_map(&mut self) -> HeapId {
        self.heap.allocate(HeapData::Map(ObjMap::new()), Some(self.core.map))
    }

    pub fn new_range(&mut self, from: i32, to: i32) -> HeapId {
        self.heap
            .allocate(HeapData::Range(ObjRange::new(from, to)), Some(self.core.range))
    }

    /// Allocates a closure over `function`. The upvalue vector must match
    /// the function's `upvalue_num`.
    pub fn new_closure(&mut self, function: HeapId, upvalues: Vec<HeapId>) -> HeapId {
        debug_assert_eq!(
            upvalues.len(),
            self.heap.function(function).upvalue_num as usize,
            "closure upvalue count must match the function"
        );
        self.heap
            .allocate(HeapData::Closure(ObjClosure::new(function, upvalues)), Some(self.core.function))
    }

    pub fn new_open_upvalue(&mut self, slot: usize) -> HeapId {
        self.heap
            .allocate(HeapData::Upvalue(ObjUpvalue::Open { slot }), None)
    }

    /// Allocates an instance of `class_id` with its fields set to `Null`.
    pub fn new_instance(&mut self, class_id: HeapId) -> HeapId {
        let field_num = self.heap.class(class_id).field_num;
        self.heap
            .allocate(HeapData::Instance(ObjInstance::new(field_num)), Some(class_id))
    }

    /// Allocates a thread ready to run `closure`, sized from the closure's
    /// function.
    pub fn new_thread(&mut self, closure: HeapId) -> HeapId {
        let function = self.heap.closure(closure).function;
        let capacity = self.heap.function(function).max_stack_slots as usize + 1;
        self.heap
            .allocate(HeapData::Thread(ObjThread::new(closure, capacity)), Some(self.core.thread))
    }

    /// Allocates a raw class (no superclass, empty method table).
    pub fn new_raw_class(&mut self, name: &str, field_num: u32) -> HeapId {
        self.heap
            .allocate(HeapData::Class(ObjClass::new_raw(name, field_num)), Some(self.core.class))
    }

    /// The class a value dispatches through.
    ///
    /// # Panics
    ///
    /// Panics on `Undefined` (it has no class) or on an object whose header
    /// was never patched after bootstrap.
    #[must_use]
    pub fn class_of(&self, value: Value) -> HeapId {
        match value {
            Value::Null => self.core.null,
            Value::True | Value::False => self.core.boolean,
            Value::Num(_) => self.core.num,
            Value::Obj(id) => self.heap.class_of(id).expect("object class unset after bootstrap"),
            Value::Undefined => unreachable!("undefined values have no class"),
        }
    }

    // ------------------------------------------------------------------
    // Module variables and the module namespace.

    /// Defines a module variable; see [`ObjModule::define_var`] for the
    /// three-way behavior. `None` signals redefinition.
    ///
    /// # Panics
    ///
    /// Panics if `name` exceeds [`MAX_ID_LEN`]; callers with source context
    /// (the compiler) check first and report a compile error instead.
    pub fn define_module_var(&mut self, module: HeapId, name: &str, value: Value) -> Option<u32> {
        assert!(
            name.len() <= MAX_ID_LEN,
            "length of identifier \"{name}\" should be no more than {MAX_ID_LEN}"
        );
        self.heap.module_mut(module).define_var(name, value)
    }

    /// Creates an empty module. The core module's variables (`Object` and
    /// friends) are not copied eagerly; the compiler pulls each one in on
    /// first reference so user variables keep their declaration-order
    /// indices from 0.
    pub fn new_module(&mut self, name: Option<&str>) -> HeapId {
        self.heap
            .allocate(HeapData::Module(ObjModule::new(name)), Some(self.core.module))
    }

    /// Registers a source text the compiler may pull in through `import`.
    pub fn register_module_source(&mut self, name: &str, source: &str) {
        self.module_sources.insert(name.to_owned(), source.to_owned());
    }

    #[must_use]
    pub fn module_source(&self, name: &str) -> Option<&str> {
        self.module_sources.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<HeapId> {
        self.modules.get(name).copied()
    }

    pub(crate) fn add_module(&mut self, name: &str, module: HeapId) {
        self.modules.insert(name.to_owned(), module);
    }

    /// The entry closure produced when `name` was loaded, if any.
    #[must_use]
    pub fn module_entry(&self, name: &str) -> Option<HeapId> {
        self.module_entries.get(name).copied()
    }

    pub(crate) fn set_module_entry(&mut self, name: &str, closure: HeapId) {
        self.module_entries.insert(name.to_owned(), closure);
    }

    /// Compiles `source` as module `name` and returns the entry closure to
    /// hand to the interpreter.
    pub fn load_module(&mut self, name: &str, source: &str) -> CompileResult<HeapId> {
        self.load_module_traced(name, source, &mut NoopTracer)
    }

    /// As [`Vm::load_module`], reporting compile progress to `tracer`.
    pub fn load_module_traced(
        &mut self,
        name: &str,
        source: &str,
        tracer: &mut dyn CompileTracer,
    ) -> CompileResult<HeapId> {
        compiler::load_module(self, name, source, tracer)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
