//! The single-pass compiler: a Pratt expression parser and statement
//! compiler emitting straight into per-function bytecode builders.
//!
//! Compilation state is a stack of [`CompileUnit`]s, one per function being
//! built; the enclosing unit of a function is the element below it. Scope
//! and upvalue resolution walk this stack. A module compiles as one
//! outermost unit at `scope_depth == -1`; functions and methods start at
//! depth 0 with slot 0 reserved (anonymous in a function, the receiver
//! `this` in a method).
//!
//! Expressions are parsed with binding powers: every token that can extend
//! an expression carries a left binding power, a `nud` (how it begins an
//! expression), and a `led` (how it extends one). Binary and unary
//! operators on the language level are method calls; the compiler
//! synthesizes a signature from the operator lexeme and emits an
//! arity-encoded `Call` opcode.

use crate::{
    bytecode::{EmitError, Opcode, UpvalueDesc},
    error::{CompileError, CompileResult, ErrorKind},
    heap::{HeapData, HeapId},
    intern::SymbolTable,
    lexer::{Lexer, Literal, TokenKind},
    signature::{MAX_ARG_NUM, MAX_METHOD_NAME_LEN, MAX_SIGN_LEN, Signature, SignatureKind},
    tracer::CompileTracer,
    types::module::ModuleVar,
    value::Value,
    vm::{MAX_ID_LEN, Vm},
};

use crate::bytecode::FnBuilder;

/// Locals per function.
pub const MAX_LOCAL_VAR_NUM: usize = 128;

/// Upvalues per function.
pub const MAX_UPVALUE_NUM: usize = 128;

/// Instance fields per class, inherited fields included.
pub const MAX_FIELD_NUM: usize = 128;

/// Binding powers, ascending; higher binds tighter.
mod bp {
    pub const NONE: u8 = 0;
    pub const LOWEST: u8 = 1;
    pub const ASSIGN: u8 = 2;
    pub const CONDITION: u8 = 3;
    pub const LOGIC_OR: u8 = 4;
    pub const LOGIC_AND: u8 = 5;
    pub const EQUALITY: u8 = 6;
    pub const IS: u8 = 7;
    pub const CMP: u8 = 8;
    pub const BIT_OR: u8 = 9;
    pub const BIT_AND: u8 = 10;
    pub const BIT_SHIFT: u8 = 11;
    pub const RANGE: u8 = 12;
    pub const TERM: u8 = 13;
    pub const FACTOR: u8 = 14;
    pub const UNARY: u8 = 15;
    pub const CALL: u8 = 16;
}

/// A local variable slot.
#[derive(Debug)]
struct LocalVar {
    name: String,
    scope_depth: i32,
    /// Set by an inner function when it captures this local; scope exit
    /// then closes the upvalue instead of popping the slot.
    is_upvalue: bool,
}

/// Bookkeeping for one loop being compiled.
#[derive(Debug)]
struct LoopInfo {
    /// Where the condition starts; `continue` and the end-of-body jump
    /// land here.
    cond_start: usize,
    /// Where the body starts.
    body_start: usize,
    /// Scope depth at loop entry; `break`/`continue` discard deeper locals.
    scope_depth: i32,
    /// Forward jumps out of the loop, patched when the loop ends.
    exit_jumps: Vec<crate::bytecode::JumpLabel>,
}

/// Transient record for the class body being compiled.
#[derive(Debug)]
struct ClassBookKeep {
    name: String,
    /// Instance fields, created on first `_field` reference.
    fields: SymbolTable,
    in_static: bool,
    /// Signature symbols already bound, for duplicate detection.
    instance_methods: Vec<u16>,
    static_methods: Vec<u16>,
    /// The signature of the method currently compiling; `super` uses it.
    signature: Option<Signature>,
}

impl ClassBookKeep {
    fn new(name: String) -> Self {
        Self {
            name,
            fields: SymbolTable::new(),
            in_static: false,
            instance_methods: Vec::new(),
            static_methods: Vec::new(),
            signature: None,
        }
    }
}

/// Per-function compilation context.
struct CompileUnit {
    builder: FnBuilder,
    locals: Vec<LocalVar>,
    upvalues: Vec<UpvalueDesc>,
    /// -1 at module scope, 0 in a function body, 1+ in nested blocks.
    scope_depth: i32,
    loops: Vec<LoopInfo>,
    is_method: bool,
    is_constructor: bool,
    /// Set on the unit compiling a `class` statement while its body is
    /// open; method units find it by walking the unit stack.
    class_bk: Option<ClassBookKeep>,
}

/// Where a resolved variable lives.
#[derive(Debug, Clone, Copy)]
enum VarScope {
    Local(u8),
    Upvalue(u8),
    Module(u16),
}

/// Result of declaring a variable in the current scope.
#[derive(Debug, Clone, Copy)]
enum Declared {
    ModuleVar(u16),
    Local(u8),
}

type DenotationFn = for<'a, 'b> fn(&'b mut Compiler<'a>, bool) -> CompileResult<()>;
type SignatureFn = for<'a, 'b> fn(&'b mut Compiler<'a>, &mut Signature) -> CompileResult<()>;

/// One row of the Pratt table: left binding power plus the token's handlers.
struct Rule {
    lbp: u8,
    nud: Option<DenotationFn>,
    led: Option<DenotationFn>,
    /// How this token parses as a method name in a class body.
    method_sign: Option<SignatureFn>,
}

impl Rule {
    const NONE: Self = Self {
        lbp: bp::NONE,
        nud: None,
        led: None,
        method_sign: None,
    };

    fn nud(handler: DenotationFn) -> Self {
        Self {
            nud: Some(handler),
            ..Self::NONE
        }
    }

    fn infix(lbp: u8) -> Self {
        Self {
            lbp,
            led: Some(infix_op),
            method_sign: Some(infix_signature),
            ..Self::NONE
        }
    }
}

/// The token's lexeme when it names an operator method.
fn operator_text(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Add => "+",
        TokenKind::Sub => "-",
        TokenKind::Mul => "*",
        TokenKind::Div => "/",
        TokenKind::Mod => "%",
        TokenKind::DotDot => "..",
        TokenKind::BitAnd => "&",
        TokenKind::BitOr => "|",
        TokenKind::BitNot => "~",
        TokenKind::ShiftLeft => "<<",
        TokenKind::ShiftRight => ">>",
        TokenKind::Greater => ">",
        TokenKind::GreaterEqual => ">=",
        TokenKind::Less => "<",
        TokenKind::LessEqual => "<=",
        TokenKind::Equal => "==",
        TokenKind::NotEqual => "!=",
        TokenKind::LogicNot => "!",
        TokenKind::Is => "is",
        _ => unreachable!("token is not an operator"),
    }
}

fn rule_of(kind: TokenKind) -> Rule {
    use TokenKind as T;
    match kind {
        T::Num | T::Str | T::True | T::False | T::Null => Rule::nud(literal),
        T::Interpolation => Rule::nud(string_interpolation),
        T::Id => Rule {
            nud: Some(id),
            method_sign: Some(id_signature),
            ..Rule::NONE
        },
        T::This => Rule::nud(this_expr),
        T::Super => Rule::nud(super_expr),
        T::LeftParen => Rule {
            lbp: bp::CALL,
            nud: Some(grouping),
            led: Some(call_led),
            method_sign: None,
        },
        T::LeftBracket => Rule {
            lbp: bp::CALL,
            nud: Some(list_literal),
            led: Some(subscript_led),
            method_sign: Some(subscript_signature),
        },
        T::LeftBrace => Rule::nud(map_literal),
        T::Dot => Rule {
            lbp: bp::CALL,
            led: Some(dot_led),
            ..Rule::NONE
        },
        T::Question => Rule {
            lbp: bp::CONDITION,
            led: Some(condition),
            ..Rule::NONE
        },
        T::LogicAnd => Rule {
            lbp: bp::LOGIC_AND,
            led: Some(logic_and),
            ..Rule::NONE
        },
        T::LogicOr => Rule {
            lbp: bp::LOGIC_OR,
            led: Some(logic_or),
            ..Rule::NONE
        },
        T::Equal | T::NotEqual => Rule::infix(bp::EQUALITY),
        T::Is => Rule::infix(bp::IS),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => Rule::infix(bp::CMP),
        T::BitOr => Rule::infix(bp::BIT_OR),
        T::BitAnd => Rule::infix(bp::BIT_AND),
        T::ShiftLeft | T::ShiftRight => Rule::infix(bp::BIT_SHIFT),
        T::DotDot => Rule::infix(bp::RANGE),
        T::Add => Rule::infix(bp::TERM),
        T::Sub => Rule {
            lbp: bp::TERM,
            nud: Some(unary_op),
            led: Some(infix_op),
            method_sign: Some(mix_signature),
        },
        T::Mul | T::Div | T::Mod => Rule::infix(bp::FACTOR),
        T::LogicNot | T::BitNot => Rule {
            nud: Some(unary_op),
            method_sign: Some(unary_signature),
            ..Rule::NONE
        },
        _ => Rule::NONE,
    }
}

pub(crate) struct Compiler<'a> {
    vm: &'a mut Vm,
    lexer: Lexer<'a>,
    module: HeapId,
    units: Vec<CompileUnit>,
    tracer: &'a mut dyn CompileTracer,
}

/// Compiles `source` as a new module named `name`, registering the module
/// and its entry closure with the VM. Invoked recursively by `import`.
pub(crate) fn load_module(
    vm: &mut Vm,
    name: &str,
    source: &str,
    tracer: &mut dyn CompileTracer,
) -> CompileResult<HeapId> {
    let module = vm.new_module(Some(name));
    vm.add_module(name, module);
    let function = compile_module(vm, module, name, source, tracer)?;
    let closure = vm.new_closure(function, Vec::new());
    vm.set_module_entry(name, closure);
    Ok(closure)
}

/// Drives the compiler over `source`, producing the module's top-level
/// function.
pub(crate) fn compile_module(
    vm: &mut Vm,
    module: HeapId,
    file: &str,
    source: &str,
    tracer: &mut dyn CompileTracer,
) -> CompileResult<HeapId> {
    tracer.module_start(file);
    let result = {
        let mut compiler = Compiler {
            vm,
            lexer: Lexer::new(file, source),
            module,
            units: Vec::new(),
            tracer,
        };
        compiler.run()
    };
    if let Err(error) = &result {
        tracer.error(error);
    }
    result
}

impl<'a> Compiler<'a> {
    fn run(&mut self) -> CompileResult<HeapId> {
        self.push_unit(None, false);
        self.advance()?;
        while self.cur_kind() != TokenKind::Eof {
            self.compile_statement()?;
        }
        let function = self.end_unit()?;

        // Any slot still forward-declared names a variable that was
        // referenced but never defined.
        let undefined: Vec<(String, u32)> = self
            .vm
            .heap
            .module(self.module)
            .undefined_vars()
            .into_iter()
            .map(|(name, line)| (name.to_owned(), line))
            .collect();
        if let Some((_, first_line)) = undefined.first() {
            let mut list = String::new();
            for (i, (name, line)) in undefined.iter().enumerate() {
                if i > 0 {
                    list.push_str(", ");
                }
                list.push_str(&format!("'{name}' (line {line})"));
            }
            return Err(CompileError {
                kind: ErrorKind::Compile,
                file: self.lexer.file().to_owned(),
                line: *first_line,
                message: format!("module variable(s) referenced but never defined: {list}"),
            });
        }
        Ok(function)
    }

    // ------------------------------------------------------------------
    // Token plumbing.

    fn cur_kind(&self) -> TokenKind {
        self.lexer.peek().kind
    }

    fn advance(&mut self) -> CompileResult<()> {
        self.lexer.advance()?;
        let line = self.lexer.pre().line;
        if let Some(unit) = self.units.last_mut() {
            unit.builder.set_line(line);
        }
        Ok(())
    }

    fn match_token(&mut self, kind: TokenKind) -> CompileResult<bool> {
        if self.cur_kind() == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> CompileResult<()> {
        if self.cur_kind() == kind {
            self.advance()
        } else {
            Err(self.error_cur(ErrorKind::Parse, format!("{message}, found {}", self.token_desc())))
        }
    }

    fn token_desc(&self) -> String {
        let token = self.lexer.peek();
        match token.kind {
            TokenKind::Eof => "end of file".to_owned(),
            _ => format!("'{}'", self.lexer.text(token)),
        }
    }

    fn expect_id_text(&mut self, message: &str) -> CompileResult<String> {
        if self.cur_kind() != TokenKind::Id {
            return Err(self.error_cur(ErrorKind::Parse, format!("{message}, found {}", self.token_desc())));
        }
        let text = self.lexer.text(self.lexer.peek()).to_owned();
        self.advance()?;
        Ok(text)
    }

    fn error_cur(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            file: self.lexer.file().to_owned(),
            line: self.lexer.peek().line,
            message: message.into(),
        }
    }

    fn error_pre(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            file: self.lexer.file().to_owned(),
            line: self.lexer.pre().line,
            message: message.into(),
        }
    }

    // ------------------------------------------------------------------
    // Units, scopes, and variables.

    fn unit(&self) -> &CompileUnit {
        self.units.last().expect("compile unit stack is never empty")
    }

    fn unit_mut(&mut self) -> &mut CompileUnit {
        self.units.last_mut().expect("compile unit stack is never empty")
    }

    fn push_unit(&mut self, name: Option<String>, is_method: bool) {
        let module_scope = self.units.is_empty();
        let base_slots = u32::from(!module_scope);
        let mut unit = CompileUnit {
            builder: FnBuilder::new(self.module, name, base_slots),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: if module_scope { -1 } else { 0 },
            loops: Vec::new(),
            is_method,
            is_constructor: false,
            class_bk: None,
        };
        if !module_scope {
            // Slot 0: the receiver in a method, reserved in a function.
            unit.locals.push(LocalVar {
                name: if is_method { "this".to_owned() } else { String::new() },
                scope_depth: -1,
                is_upvalue: false,
            });
        }
        self.units.push(unit);
    }

    /// Ends the innermost unit: emits the implicit return and the `End`
    /// sentinel, allocates the function, and (when there is an enclosing
    /// unit) emits `CreateClosure` with the upvalue descriptors there.
    fn end_unit(&mut self) -> CompileResult<HeapId> {
        {
            let unit = self.unit_mut();
            if unit.is_constructor {
                unit.builder.emit(Opcode::LoadThis);
            } else {
                unit.builder.emit(Opcode::PushNull);
            }
            unit.builder.emit(Opcode::Return);
            unit.builder.emit(Opcode::End);
        }
        let unit = self.units.pop().expect("compile unit stack is never empty");
        let upvalues = unit.upvalues;
        let function = unit.builder.build(upvalues.len() as u32);
        let display = function.debug.name.clone().unwrap_or_else(|| "<module>".to_owned());
        self.tracer
            .function_end(&display, function.code.len(), function.max_stack_slots);
        let function_id = self
            .vm
            .heap
            .allocate(HeapData::Fn(function), Some(self.vm.core.function));
        if !self.units.is_empty() {
            let constant = self.add_constant(Value::Obj(function_id))?;
            self.unit_mut().builder.emit_closure(constant, &upvalues);
        }
        Ok(function_id)
    }

    fn enter_scope(&mut self) {
        self.unit_mut().scope_depth += 1;
    }

    /// Closes the innermost scope, emitting `CloseUpvalue` for captured
    /// locals (innermost first) and `Pop` for the rest.
    fn leave_scope(&mut self) {
        let unit = self.unit_mut();
        let depth = unit.scope_depth;
        loop {
            let Some(local) = unit.locals.last() else { break };
            if local.scope_depth < depth {
                break;
            }
            let op = if local.is_upvalue { Opcode::CloseUpvalue } else { Opcode::Pop };
            unit.locals.pop();
            unit.builder.emit(op);
        }
        unit.scope_depth -= 1;
    }

    /// Emits scope cleanup for `break`/`continue` without forgetting the
    /// locals: the loop exit path discards them, but compilation continues
    /// in the same scopes.
    fn discard_locals_above(&mut self, depth: i32) {
        let unit = self.unit_mut();
        let mut discarded = 0u32;
        for local in unit.locals.iter().rev() {
            if local.scope_depth <= depth {
                break;
            }
            let op = if local.is_upvalue { Opcode::CloseUpvalue } else { Opcode::Pop };
            unit.builder.emit(op);
            discarded += 1;
        }
        // This cleanup runs only on the jumped-out path; the fall-through
        // code still owns the slots.
        unit.builder.restore_slots(discarded);
    }

    fn declare_local(&mut self, name: &str) -> CompileResult<u8> {
        if name.len() > MAX_ID_LEN {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("length of identifier \"{name}\" should be no more than {MAX_ID_LEN}"),
            ));
        }
        let unit = self.unit();
        for local in unit.locals.iter().rev() {
            if local.scope_depth < unit.scope_depth {
                break;
            }
            if local.name == name {
                return Err(self.error_pre(ErrorKind::Compile, format!("identifier \"{name}\" redefinition")));
            }
        }
        if unit.locals.len() >= MAX_LOCAL_VAR_NUM {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("the number of local variables exceeds {MAX_LOCAL_VAR_NUM}"),
            ));
        }
        let unit = self.unit_mut();
        let index = unit.locals.len() as u8;
        let scope_depth = unit.scope_depth;
        unit.locals.push(LocalVar {
            name: name.to_owned(),
            scope_depth,
            is_upvalue: false,
        });
        Ok(index)
    }

    /// Declares a variable in the current scope: a module variable at
    /// module scope, a local otherwise.
    fn declare_variable(&mut self, name: &str) -> CompileResult<Declared> {
        if self.unit().scope_depth != -1 {
            return Ok(Declared::Local(self.declare_local(name)?));
        }
        if name.len() > MAX_ID_LEN {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("length of identifier \"{name}\" should be no more than {MAX_ID_LEN}"),
            ));
        }
        match self.vm.define_module_var(self.module, name, Value::Null) {
            Some(index) => Ok(Declared::ModuleVar(self.narrow_module_index(index)?)),
            None => Err(self.error_pre(ErrorKind::Compile, format!("identifier \"{name}\" redefinition"))),
        }
    }

    fn narrow_module_index(&self, index: u32) -> CompileResult<u16> {
        u16::try_from(index).map_err(|_| self.error_pre(ErrorKind::Compile, "too many module variables"))
    }

    fn find_local_in(unit: &CompileUnit, name: &str) -> Option<u8> {
        // Innermost first.
        unit.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(index, _)| index as u8)
    }

    fn add_upvalue(&mut self, unit_idx: usize, descriptor: UpvalueDesc) -> CompileResult<u8> {
        if let Some(position) = self.units[unit_idx].upvalues.iter().position(|u| *u == descriptor) {
            return Ok(position as u8);
        }
        if self.units[unit_idx].upvalues.len() >= MAX_UPVALUE_NUM {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("the number of upvalues exceeds {MAX_UPVALUE_NUM}"),
            ));
        }
        let index = self.units[unit_idx].upvalues.len() as u8;
        self.units[unit_idx].upvalues.push(descriptor);
        Ok(index)
    }

    /// Resolves `name` as an upvalue of `unit_idx`, recursing outward.
    /// Crossing from a method into the class-defining scope is blocked
    /// unless `synthetic` marks a compiler-synthesized static-field name.
    fn resolve_upvalue(&mut self, unit_idx: usize, name: &str, synthetic: bool) -> CompileResult<Option<u8>> {
        if unit_idx == 0 {
            return Ok(None);
        }
        let enclosing = unit_idx - 1;
        if !synthetic && self.units[enclosing].class_bk.is_some() {
            return Ok(None);
        }
        if let Some(local) = Self::find_local_in(&self.units[enclosing], name) {
            self.units[enclosing].locals[local as usize].is_upvalue = true;
            let descriptor = UpvalueDesc {
                is_enclosing_local: true,
                index: local,
            };
            return self.add_upvalue(unit_idx, descriptor).map(Some);
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name, synthetic)? {
            let descriptor = UpvalueDesc {
                is_enclosing_local: false,
                index: upvalue,
            };
            return self.add_upvalue(unit_idx, descriptor).map(Some);
        }
        Ok(None)
    }

    fn resolve_local_or_upvalue(&mut self, name: &str, synthetic: bool) -> CompileResult<Option<VarScope>> {
        if let Some(local) = Self::find_local_in(self.unit(), name) {
            return Ok(Some(VarScope::Local(local)));
        }
        let current = self.units.len() - 1;
        Ok(self.resolve_upvalue(current, name, synthetic)?.map(VarScope::Upvalue))
    }

    /// The index of `name` in the current module, copying the core
    /// module's definition on first use (`Object` and friends) or
    /// forward-declaring the name at `line` when nothing defines it yet.
    fn module_var_index(&mut self, name: &str, line: u32) -> CompileResult<u16> {
        if name.len() > MAX_ID_LEN {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("length of identifier \"{name}\" should be no more than {MAX_ID_LEN}"),
            ));
        }
        let index = match self.vm.heap.module(self.module).index_of(name) {
            Some(index) => index,
            None => {
                let core_value = {
                    let core = self.vm.heap.module(self.vm.core_module);
                    core.index_of(name).and_then(|i| match core.var_value(i) {
                        ModuleVar::Defined(value) => Some(value),
                        ModuleVar::ForwardDeclared { .. } => None,
                    })
                };
                match core_value {
                    Some(value) => self
                        .vm
                        .define_module_var(self.module, name, value)
                        .expect("name was absent, so defining it succeeds"),
                    None => self.vm.heap.module_mut(self.module).declare_var(name, line),
                }
            }
        };
        self.narrow_module_index(index)
    }

    fn class_bk_unit_index(&self) -> Option<usize> {
        self.units.iter().position(|unit| unit.class_bk.is_some())
    }

    // ------------------------------------------------------------------
    // Emission helpers.

    fn emit(&mut self, op: Opcode) {
        self.unit_mut().builder.emit(op);
    }

    fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.unit_mut().builder.emit_u8(op, operand);
    }

    fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.unit_mut().builder.emit_u16(op, operand);
    }

    fn map_emit_error(&self, error: EmitError) -> CompileError {
        let message = match error {
            EmitError::TooManyConstants => "too many constants in one function",
            EmitError::JumpTooFar => "code span too large to jump over",
        };
        self.error_pre(ErrorKind::Compile, message)
    }

    fn add_constant(&mut self, value: Value) -> CompileResult<u16> {
        let result = self.unit_mut().builder.add_constant(value);
        result.map_err(|e| self.map_emit_error(e))
    }

    fn patch_jump(&mut self, label: crate::bytecode::JumpLabel) -> CompileResult<()> {
        let result = self.unit_mut().builder.patch_jump(label);
        result.map_err(|e| self.map_emit_error(e))
    }

    fn emit_loop_to(&mut self, loop_start: usize) -> CompileResult<()> {
        let result = self.unit_mut().builder.emit_loop(loop_start);
        result.map_err(|e| self.map_emit_error(e))
    }

    fn emit_load(&mut self, scope: VarScope) {
        match scope {
            VarScope::Local(index) => self.emit_u8(Opcode::LoadLocalVar, index),
            VarScope::Upvalue(index) => self.emit_u8(Opcode::LoadUpvalue, index),
            VarScope::Module(index) => self.emit_u16(Opcode::LoadModuleVar, index),
        }
    }

    fn emit_store(&mut self, scope: VarScope) {
        match scope {
            VarScope::Local(index) => self.emit_u8(Opcode::StoreLocalVar, index),
            VarScope::Upvalue(index) => self.emit_u8(Opcode::StoreUpvalue, index),
            VarScope::Module(index) => self.emit_u16(Opcode::StoreModuleVar, index),
        }
    }

    /// Interns a canonical signature, yielding the 16-bit symbol call
    /// opcodes carry.
    fn ensure_symbol(&mut self, canonical: &str) -> CompileResult<u16> {
        if canonical.len() > MAX_SIGN_LEN {
            return Err(self.error_pre(ErrorKind::Compile, "method signature too long"));
        }
        let symbol = self.vm.method_names.ensure(canonical);
        u16::try_from(symbol).map_err(|_| self.error_pre(ErrorKind::Compile, "too many method names"))
    }

    fn emit_call_by_signature(&mut self, signature: &Signature) -> CompileResult<()> {
        let symbol = self.ensure_symbol(&signature.canonical())?;
        self.unit_mut().builder.emit_call(signature.arg_num, symbol);
        Ok(())
    }

    fn emit_super_by_signature(&mut self, signature: &Signature) -> CompileResult<()> {
        let symbol = self.ensure_symbol(&signature.canonical())?;
        // Reserve a constant slot; class binding fills in the superclass.
        let superclass_slot = self.add_constant(Value::Null)?;
        self.unit_mut()
            .builder
            .emit_super(signature.arg_num, symbol, superclass_slot);
        Ok(())
    }

    fn emit_load_this(&mut self) -> CompileResult<()> {
        match self.resolve_local_or_upvalue("this", false)? {
            Some(VarScope::Local(0)) if self.unit().is_method => self.emit(Opcode::LoadThis),
            Some(scope) => self.emit_load(scope),
            None => return Err(self.error_pre(ErrorKind::Compile, "'this' can only be used inside a method")),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions.

    /// The Pratt driver: parse a complete expression whose operators bind
    /// tighter than `rbp`.
    fn expression(&mut self, rbp: u8) -> CompileResult<()> {
        let Some(nud) = rule_of(self.cur_kind()).nud else {
            return Err(self.error_cur(
                ErrorKind::Parse,
                format!("expected an expression, found {}", self.token_desc()),
            ));
        };
        self.advance()?;
        // Only the loosest positions may consume `=`.
        let can_assign = rbp < bp::ASSIGN;
        nud(self, can_assign)?;
        while rbp < rule_of(self.cur_kind()).lbp {
            let Some(led) = rule_of(self.cur_kind()).led else {
                return Err(self.error_cur(
                    ErrorKind::Parse,
                    format!("{} cannot continue an expression", self.token_desc()),
                ));
            };
            self.advance()?;
            led(self, can_assign)?;
        }
        Ok(())
    }

    fn compile_var_access(&mut self, scope: VarScope, can_assign: bool) -> CompileResult<()> {
        if can_assign && self.match_token(TokenKind::Assign)? {
            self.expression(bp::LOWEST)?;
            self.emit_store(scope);
        } else {
            self.emit_load(scope);
        }
        Ok(())
    }

    /// Instance-field access (`_name`). Directly inside a method the
    /// receiver is implicit; inside a closure nested in a method the
    /// captured `this` is loaded explicitly.
    fn compile_field(&mut self, name: &str, can_assign: bool) -> CompileResult<()> {
        let Some(bk_idx) = self.class_bk_unit_index() else {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("instance field \"{name}\" can only be used inside a class"),
            ));
        };
        let field_index = {
            let bk = self.units[bk_idx].class_bk.as_mut().expect("class bookkeeping active");
            bk.fields.ensure(name)
        };
        if field_index as usize >= MAX_FIELD_NUM {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("the number of instance fields exceeds {MAX_FIELD_NUM}"),
            ));
        }
        let field_index = field_index as u8;
        if self.unit().is_method {
            if can_assign && self.match_token(TokenKind::Assign)? {
                self.expression(bp::LOWEST)?;
                self.emit_u8(Opcode::StoreFieldThis, field_index);
            } else {
                self.emit_u8(Opcode::LoadFieldThis, field_index);
            }
        } else if can_assign && self.cur_kind() == TokenKind::Assign {
            self.advance()?;
            self.expression(bp::LOWEST)?;
            self.emit_load_this()?;
            self.emit_u8(Opcode::StoreField, field_index);
        } else {
            self.emit_load_this()?;
            self.emit_u8(Opcode::LoadField, field_index);
        }
        Ok(())
    }

    fn process_arg_list(&mut self, signature: &mut Signature) -> CompileResult<()> {
        loop {
            if signature.arg_num == MAX_ARG_NUM {
                return Err(self.error_cur(
                    ErrorKind::Compile,
                    format!("the number of arguments exceeds {MAX_ARG_NUM}"),
                ));
            }
            signature.arg_num += 1;
            self.expression(bp::LOWEST)?;
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    fn process_para_list(&mut self, signature: &mut Signature) -> CompileResult<()> {
        loop {
            if signature.arg_num == MAX_ARG_NUM {
                return Err(self.error_cur(
                    ErrorKind::Compile,
                    format!("the number of parameters exceeds {MAX_ARG_NUM}"),
                ));
            }
            signature.arg_num += 1;
            let parameter = self.expect_id_text("expect parameter name")?;
            self.declare_local(&parameter)?;
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements.

    fn compile_statement(&mut self) -> CompileResult<()> {
        match self.cur_kind() {
            TokenKind::Semicolon => self.advance(),
            TokenKind::If => {
                self.advance()?;
                self.if_statement()
            }
            TokenKind::While => {
                self.advance()?;
                self.while_statement()
            }
            TokenKind::For => {
                self.advance()?;
                self.for_statement()
            }
            TokenKind::Break => {
                self.advance()?;
                self.break_statement()
            }
            TokenKind::Continue => {
                self.advance()?;
                self.continue_statement()
            }
            TokenKind::Return => {
                self.advance()?;
                self.return_statement()
            }
            TokenKind::LeftBrace => {
                self.advance()?;
                self.enter_scope();
                self.block_body()?;
                self.leave_scope();
                Ok(())
            }
            TokenKind::Var => {
                self.advance()?;
                self.var_definition()
            }
            TokenKind::Fun => {
                self.advance()?;
                self.fun_definition()
            }
            TokenKind::Class => {
                self.advance()?;
                self.class_definition()
            }
            TokenKind::Import => {
                self.advance()?;
                self.import_statement()
            }
            TokenKind::Static => Err(self.error_cur(ErrorKind::Compile, "'static' is only allowed inside a class body")),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> CompileResult<()> {
        self.expression(bp::LOWEST)?;
        if self.cur_kind() == TokenKind::Assign {
            return Err(self.error_cur(ErrorKind::Compile, "the left-hand side of '=' is not assignable"));
        }
        self.emit(Opcode::Pop);
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    /// Statements up to and including the closing `}`. The caller manages
    /// scope entry and exit.
    fn block_body(&mut self) -> CompileResult<()> {
        while !matches!(self.cur_kind(), TokenKind::RightBrace | TokenKind::Eof) {
            self.compile_statement()?;
        }
        self.consume(TokenKind::RightBrace, "expect '}' at the end of the block")
    }

    fn if_statement(&mut self) -> CompileResult<()> {
        self.consume(TokenKind::LeftParen, "expect '(' after 'if'")?;
        self.expression(bp::LOWEST)?;
        self.consume(TokenKind::RightParen, "expect ')' after the if condition")?;
        let false_jump = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse);
        self.compile_statement()?;
        if self.match_token(TokenKind::Else)? {
            let end_jump = self.unit_mut().builder.emit_jump(Opcode::Jump);
            self.patch_jump(false_jump)?;
            self.compile_statement()?;
            self.patch_jump(end_jump)?;
        } else {
            self.patch_jump(false_jump)?;
        }
        Ok(())
    }

    fn while_statement(&mut self) -> CompileResult<()> {
        let cond_start = self.unit().builder.ip();
        let scope_depth = self.unit().scope_depth;
        self.unit_mut().loops.push(LoopInfo {
            cond_start,
            body_start: 0,
            scope_depth,
            exit_jumps: Vec::new(),
        });
        self.consume(TokenKind::LeftParen, "expect '(' after 'while'")?;
        self.expression(bp::LOWEST)?;
        self.consume(TokenKind::RightParen, "expect ')' after the loop condition")?;
        let exit = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse);
        {
            let body_start = self.unit().builder.ip();
            let current = self.unit_mut().loops.last_mut().expect("loop just pushed");
            current.exit_jumps.push(exit);
            current.body_start = body_start;
        }
        self.compile_statement()?;
        self.emit_loop_to(cond_start)?;
        self.finish_loop()
    }

    fn finish_loop(&mut self) -> CompileResult<()> {
        let exits = self.unit_mut().loops.pop().expect("loop just pushed").exit_jumps;
        for label in exits {
            self.patch_jump(label)?;
        }
        Ok(())
    }

    /// `for name (sequence) body` desugars to a `while` loop over the
    /// sequence's `iterate`/`iteratorValue` protocol, holding the sequence
    /// and the iterator in hidden locals. Their names carry a trailing
    /// space so no source identifier can collide with them.
    fn for_statement(&mut self) -> CompileResult<()> {
        let variable = self.expect_id_text("expect loop variable name after 'for'")?;
        self.enter_scope();
        self.consume(TokenKind::LeftParen, "expect '(' before the loop sequence")?;
        self.expression(bp::LOWEST)?;
        let seq_slot = self.declare_local("seq ")?;
        self.emit(Opcode::PushNull);
        let iter_slot = self.declare_local("iter ")?;
        self.consume(TokenKind::RightParen, "expect ')' after the loop sequence")?;

        let cond_start = self.unit().builder.ip();
        let scope_depth = self.unit().scope_depth;
        self.unit_mut().loops.push(LoopInfo {
            cond_start,
            body_start: 0,
            scope_depth,
            exit_jumps: Vec::new(),
        });
        // iter = seq.iterate(iter) is the loop condition.
        self.emit_u8(Opcode::LoadLocalVar, seq_slot);
        self.emit_u8(Opcode::LoadLocalVar, iter_slot);
        self.emit_call_by_signature(&Signature::new(SignatureKind::Method, "iterate", 1))?;
        self.emit_u8(Opcode::StoreLocalVar, iter_slot);
        let exit = self.unit_mut().builder.emit_jump(Opcode::JumpIfFalse);
        {
            let body_start = self.unit().builder.ip();
            let current = self.unit_mut().loops.last_mut().expect("loop just pushed");
            current.exit_jumps.push(exit);
            current.body_start = body_start;
        }

        self.enter_scope();
        self.emit_u8(Opcode::LoadLocalVar, seq_slot);
        self.emit_u8(Opcode::LoadLocalVar, iter_slot);
        self.emit_call_by_signature(&Signature::new(SignatureKind::Method, "iteratorValue", 1))?;
        // The produced element sits in place as the loop variable's slot.
        self.declare_local(&variable)?;
        self.compile_statement()?;
        self.leave_scope();

        self.emit_loop_to(cond_start)?;
        self.finish_loop()?;
        self.leave_scope();
        Ok(())
    }

    fn break_statement(&mut self) -> CompileResult<()> {
        let Some(scope_depth) = self.unit().loops.last().map(|l| l.scope_depth) else {
            return Err(self.error_pre(ErrorKind::Compile, "'break' outside a loop"));
        };
        self.discard_locals_above(scope_depth);
        let label = self.unit_mut().builder.emit_jump(Opcode::Jump);
        self.unit_mut()
            .loops
            .last_mut()
            .expect("loop checked above")
            .exit_jumps
            .push(label);
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    fn continue_statement(&mut self) -> CompileResult<()> {
        let Some((scope_depth, cond_start)) = self.unit().loops.last().map(|l| (l.scope_depth, l.cond_start)) else {
            return Err(self.error_pre(ErrorKind::Compile, "'continue' outside a loop"));
        };
        self.discard_locals_above(scope_depth);
        self.emit_loop_to(cond_start)?;
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult<()> {
        if self.units.len() == 1 {
            return Err(self.error_pre(ErrorKind::Compile, "'return' outside a function"));
        }
        let is_constructor = self.unit().is_constructor;
        if matches!(self.cur_kind(), TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof) {
            if is_constructor {
                self.emit(Opcode::LoadThis);
            } else {
                self.emit(Opcode::PushNull);
            }
        } else {
            if is_constructor {
                return Err(self.error_cur(ErrorKind::Compile, "a constructor cannot return a value"));
            }
            self.expression(bp::LOWEST)?;
        }
        self.emit(Opcode::Return);
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    fn var_definition(&mut self) -> CompileResult<()> {
        let name = self.expect_id_text("expect variable name after 'var'")?;
        // The initializer compiles first, so `var a = a` sees the outer `a`.
        if self.match_token(TokenKind::Assign)? {
            self.expression(bp::LOWEST)?;
        } else {
            self.emit(Opcode::PushNull);
        }
        match self.declare_variable(&name)? {
            Declared::ModuleVar(index) => {
                self.emit_u16(Opcode::StoreModuleVar, index);
                self.emit(Opcode::Pop);
            }
            Declared::Local(_) => {
                // The value on the stack is the local's slot.
            }
        }
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    fn fun_definition(&mut self) -> CompileResult<()> {
        let name = self.expect_id_text("expect function name after 'fun'")?;
        // Declared before the body compiles so the function can recurse.
        let declared = self.declare_variable(&name)?;
        self.push_unit(Some(name), false);
        self.consume(TokenKind::LeftParen, "expect '(' after the function name")?;
        let mut signature = Signature::new(SignatureKind::Method, "", 0);
        if !self.match_token(TokenKind::RightParen)? {
            self.process_para_list(&mut signature)?;
            self.consume(TokenKind::RightParen, "expect ')' after parameters")?;
        }
        self.unit_mut().builder.set_arg_num(signature.arg_num);
        self.consume(TokenKind::LeftBrace, "expect '{' before the function body")?;
        self.block_body()?;
        self.end_unit()?;
        match declared {
            Declared::ModuleVar(index) => {
                self.emit_u16(Opcode::StoreModuleVar, index);
                self.emit(Opcode::Pop);
            }
            Declared::Local(_) => {}
        }
        Ok(())
    }

    fn class_definition(&mut self) -> CompileResult<()> {
        if self.units.len() > 1 || self.unit().scope_depth != -1 {
            return Err(self.error_pre(ErrorKind::Compile, "classes can only be defined at the module scope"));
        }
        let name = self.expect_id_text("expect class name after 'class'")?;
        let class_index = match self.declare_variable(&name)? {
            Declared::ModuleVar(index) => index,
            Declared::Local(_) => unreachable!("module scope was checked above"),
        };

        // Superclass (default Object), then the name string, then the
        // class itself; the field count is patched after the body.
        if self.match_token(TokenKind::Is)? {
            self.expression(bp::CONDITION)?;
        } else {
            let line = self.lexer.pre().line;
            let object_index = self.module_var_index("Object", line)?;
            self.emit_u16(Opcode::LoadModuleVar, object_index);
        }
        let name_value = self.vm.str_value(&name);
        let name_constant = self.add_constant(name_value)?;
        self.emit_u16(Opcode::LoadConstant, name_constant);
        self.emit_u8(Opcode::CreateClass, 0);
        let field_operand_at = self.unit().builder.ip() - 1;
        self.emit_u16(Opcode::StoreModuleVar, class_index);
        self.emit(Opcode::Pop);

        self.unit_mut().class_bk = Some(ClassBookKeep::new(name));
        // Static fields live as locals of this scope; leaving it closes
        // the upvalues the methods captured.
        self.enter_scope();
        self.consume(TokenKind::LeftBrace, "expect '{' before the class body")?;
        while !matches!(self.cur_kind(), TokenKind::RightBrace | TokenKind::Eof) {
            self.compile_class_member(class_index)?;
        }
        self.consume(TokenKind::RightBrace, "expect '}' at the end of the class body")?;

        let field_num = {
            let bk = self.unit().class_bk.as_ref().expect("class bookkeeping active");
            bk.fields.len()
        };
        if field_num > MAX_FIELD_NUM {
            return Err(self.error_pre(
                ErrorKind::Compile,
                format!("the number of instance fields exceeds {MAX_FIELD_NUM}"),
            ));
        }
        self.unit_mut().builder.patch_u8(field_operand_at, field_num as u8);
        self.leave_scope();
        self.unit_mut().class_bk = None;
        Ok(())
    }

    fn compile_class_member(&mut self, class_index: u16) -> CompileResult<()> {
        let is_static = self.match_token(TokenKind::Static)?;
        {
            let bk = self.unit_mut().class_bk.as_mut().expect("class bookkeeping active");
            bk.in_static = is_static;
        }
        if self.match_token(TokenKind::Var)? {
            return self.class_field_definition(is_static);
        }

        let Some(sign_fn) = rule_of(self.cur_kind()).method_sign else {
            return Err(self.error_cur(
                ErrorKind::Parse,
                format!("expect a method definition, found {}", self.token_desc()),
            ));
        };
        self.advance()?;
        let raw_name = self.lexer.text(self.lexer.pre()).to_owned();

        // The class is reloaded for each binding; the method closure lands
        // on top of it.
        self.emit_u16(Opcode::LoadModuleVar, class_index);

        self.push_unit(Some(raw_name), true);
        let mut signature = Signature::new(SignatureKind::Getter, "", 0);
        sign_fn(self, &mut signature)?;
        if signature.kind == SignatureKind::Construct && is_static {
            return Err(self.error_pre(ErrorKind::Compile, "a constructor cannot be static"));
        }
        self.unit_mut().is_constructor = signature.kind == SignatureKind::Construct;
        self.unit_mut().builder.set_arg_num(signature.arg_num);
        let canonical = signature.canonical();
        let symbol = self.ensure_symbol(&canonical)?;

        let duplicate = {
            let bk = self.units[0].class_bk.as_ref().expect("class bookkeeping active");
            let bound = if is_static { &bk.static_methods } else { &bk.instance_methods };
            bound.contains(&symbol)
        };
        if duplicate {
            return Err(self.error_pre(ErrorKind::Compile, format!("repeat definition of method '{canonical}'")));
        }
        {
            let bk = self.units[0].class_bk.as_mut().expect("class bookkeeping active");
            if is_static {
                bk.static_methods.push(symbol);
            } else {
                bk.instance_methods.push(symbol);
            }
            bk.signature = Some(signature.clone());
        }

        self.consume(TokenKind::LeftBrace, "expect '{' before the method body")?;
        self.block_body()?;
        self.end_unit()?;
        let bind = if is_static { Opcode::StaticMethod } else { Opcode::InstanceMethod };
        self.emit_u16(bind, symbol);
        Ok(())
    }

    /// `static var name [= expr]` in a class body: the value lives in a
    /// synthetic local of the class-defining scope, reachable from methods
    /// by upvalue capture. Non-static `var` is rejected; instance fields
    /// are created by `_field` references in methods.
    fn class_field_definition(&mut self, is_static: bool) -> CompileResult<()> {
        if !is_static {
            return Err(self.error_pre(
                ErrorKind::Compile,
                "instance fields are created by assigning '_field' inside methods; use 'static var' for class fields",
            ));
        }
        let field = self.expect_id_text("expect field name after 'var'")?;
        let class_name = {
            let bk = self.unit().class_bk.as_ref().expect("class bookkeeping active");
            bk.name.clone()
        };
        // The embedded space keeps the synthetic name out of the source
        // identifier namespace.
        let synthetic = format!("{class_name} {field}");
        if self.match_token(TokenKind::Assign)? {
            self.expression(bp::LOWEST)?;
        } else {
            self.emit(Opcode::PushNull);
        }
        self.declare_local(&synthetic)?;
        self.match_token(TokenKind::Semicolon)?;
        Ok(())
    }

    fn import_statement(&mut self) -> CompileResult<()> {
        if self.units.len() > 1 || self.unit().scope_depth != -1 {
            return Err(self.error_pre(ErrorKind::Compile, "'import' is only allowed at the module scope"));
        }
        let name = self.expect_id_text("expect module name after 'import'")?;
        self.match_token(TokenKind::Semicolon)?;
        if self.vm.get_module(&name).is_some() {
            return Ok(());
        }
        let Some(source) = self.vm.module_source(&name).map(str::to_owned) else {
            return Err(self.error_pre(ErrorKind::Compile, format!("module '{name}' not found")));
        };
        load_module(self.vm, &name, &source, &mut *self.tracer)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Expression handlers (`nud`/`led`), invoked through the rule table with
// the handled token already consumed (`lexer.pre()`).

fn literal(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    match c.lexer.pre().kind {
        TokenKind::Num => {
            let Some(Literal::Num(n)) = c.lexer.pre().value else {
                unreachable!("number tokens carry a numeric literal")
            };
            let constant = c.add_constant(Value::Num(n))?;
            c.emit_u16(Opcode::LoadConstant, constant);
        }
        TokenKind::Str => {
            let Some(Literal::Str(s)) = c.lexer.pre().value.clone() else {
                unreachable!("string tokens carry a string literal")
            };
            let value = c.vm.str_value(&s);
            let constant = c.add_constant(value)?;
            c.emit_u16(Opcode::LoadConstant, constant);
        }
        TokenKind::True => c.emit(Opcode::PushTrue),
        TokenKind::False => c.emit(Opcode::PushFalse),
        TokenKind::Null => c.emit(Opcode::PushNull),
        _ => unreachable!("literal handler bound to literal tokens only"),
    }
    Ok(())
}

/// `"a${expr}b"`: build a list of the parts and join it.
fn string_interpolation(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    c.emit(Opcode::CreateList);
    loop {
        append_literal_part(c)?;
        c.expression(bp::LOWEST)?;
        c.emit(Opcode::AppendElement);
        if !c.match_token(TokenKind::Interpolation)? {
            break;
        }
    }
    if c.cur_kind() != TokenKind::Str {
        return Err(c.error_cur(ErrorKind::Parse, "expect the tail of the interpolated string"));
    }
    c.advance()?;
    append_literal_part(c)?;
    c.emit_call_by_signature(&Signature::new(SignatureKind::Method, "join", 0))
}

fn append_literal_part(c: &mut Compiler<'_>) -> CompileResult<()> {
    let Some(Literal::Str(part)) = c.lexer.pre().value.clone() else {
        unreachable!("interpolation segments carry a string literal")
    };
    let value = c.vm.str_value(&part);
    let constant = c.add_constant(value)?;
    c.emit_u16(Opcode::LoadConstant, constant);
    c.emit(Opcode::AppendElement);
    Ok(())
}

fn id(c: &mut Compiler<'_>, can_assign: bool) -> CompileResult<()> {
    let name = c.lexer.text(c.lexer.pre()).to_owned();
    if name.starts_with('_') {
        return c.compile_field(&name, can_assign);
    }
    if let Some(scope) = c.resolve_local_or_upvalue(&name, false)? {
        return c.compile_var_access(scope, can_assign);
    }
    // Static fields of the enclosing class resolve through their
    // synthesized names.
    if let Some(bk_idx) = c.class_bk_unit_index() {
        let class_name = {
            let bk = c.units[bk_idx].class_bk.as_ref().expect("class bookkeeping active");
            bk.name.clone()
        };
        let synthetic = format!("{class_name} {name}");
        if let Some(scope) = c.resolve_local_or_upvalue(&synthetic, true)? {
            return c.compile_var_access(scope, can_assign);
        }
    }
    // Module variable; unseen names become forward declarations carrying
    // the referencing line.
    let line = c.lexer.pre().line;
    let index = c.module_var_index(&name, line)?;
    c.compile_var_access(VarScope::Module(index), can_assign)
}

fn this_expr(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    c.emit_load_this()
}

fn super_expr(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let Some(bk_idx) = c.class_bk_unit_index() else {
        return Err(c.error_pre(ErrorKind::Compile, "'super' can only be used inside a method"));
    };
    let current = {
        let bk = c.units[bk_idx].class_bk.as_ref().expect("class bookkeeping active");
        bk.signature.clone()
    };
    let Some(current) = current else {
        return Err(c.error_pre(ErrorKind::Compile, "'super' can only be used inside a method"));
    };
    c.emit_load_this()?;
    if c.match_token(TokenKind::Dot)? {
        let name = c.expect_id_text("expect method name after 'super.'")?;
        let mut signature = Signature::new(SignatureKind::Getter, &name, 0);
        if c.match_token(TokenKind::LeftParen)? {
            signature.kind = SignatureKind::Method;
            if !c.match_token(TokenKind::RightParen)? {
                c.process_arg_list(&mut signature)?;
                c.consume(TokenKind::RightParen, "expect ')' after arguments")?;
            }
        }
        c.emit_super_by_signature(&signature)
    } else if c.match_token(TokenKind::LeftParen)? {
        // Same method name on the superclass, with explicit arguments.
        let kind = if current.kind == SignatureKind::Construct {
            SignatureKind::Construct
        } else {
            SignatureKind::Method
        };
        let mut signature = Signature::new(kind, &current.name, 0);
        if !c.match_token(TokenKind::RightParen)? {
            c.process_arg_list(&mut signature)?;
            c.consume(TokenKind::RightParen, "expect ')' after arguments")?;
        }
        c.emit_super_by_signature(&signature)
    } else {
        // Bare `super`: the same signature on the superclass.
        c.emit_super_by_signature(&current)
    }
}

fn grouping(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    c.expression(bp::LOWEST)?;
    c.consume(TokenKind::RightParen, "expect ')' after the expression")
}

fn list_literal(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    c.emit(Opcode::CreateList);
    if c.match_token(TokenKind::RightBracket)? {
        return Ok(());
    }
    loop {
        c.expression(bp::LOWEST)?;
        c.emit(Opcode::AppendElement);
        if !c.match_token(TokenKind::Comma)? {
            break;
        }
    }
    c.consume(TokenKind::RightBracket, "expect ']' at the end of the list literal")
}

fn map_literal(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    c.emit(Opcode::CreateMap);
    if c.match_token(TokenKind::RightBrace)? {
        return Ok(());
    }
    loop {
        // Keys bind tightly so the ':' separator stays unambiguous.
        c.expression(bp::UNARY)?;
        c.consume(TokenKind::Colon, "expect ':' between key and value")?;
        c.expression(bp::LOWEST)?;
        c.emit(Opcode::MapInsert);
        if !c.match_token(TokenKind::Comma)? {
            break;
        }
    }
    c.consume(TokenKind::RightBrace, "expect '}' at the end of the map literal")
}

fn unary_op(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let name = operator_text(c.lexer.pre().kind);
    c.expression(bp::UNARY)?;
    c.emit_call_by_signature(&Signature::new(SignatureKind::Getter, name, 0))
}

fn infix_op(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let kind = c.lexer.pre().kind;
    let name = operator_text(kind);
    // Left associativity: the right operand binds at this operator's own
    // power, so an equal-power operator ends it.
    c.expression(rule_of(kind).lbp)?;
    c.emit_call_by_signature(&Signature::new(SignatureKind::Method, name, 1))
}

fn logic_and(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let short_circuit = c.unit_mut().builder.emit_jump(Opcode::And);
    c.expression(bp::LOGIC_AND)?;
    c.patch_jump(short_circuit)
}

fn logic_or(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let short_circuit = c.unit_mut().builder.emit_jump(Opcode::Or);
    c.expression(bp::LOGIC_OR)?;
    c.patch_jump(short_circuit)
}

fn condition(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let false_jump = c.unit_mut().builder.emit_jump(Opcode::JumpIfFalse);
    c.expression(bp::LOWEST)?;
    let end_jump = c.unit_mut().builder.emit_jump(Opcode::Jump);
    c.consume(TokenKind::Colon, "expect ':' in the conditional expression")?;
    c.patch_jump(false_jump)?;
    c.expression(bp::LOWEST)?;
    c.patch_jump(end_jump)
}

/// `expr(args…)`: calling a value invokes its `call` method.
fn call_led(c: &mut Compiler<'_>, _can_assign: bool) -> CompileResult<()> {
    let mut signature = Signature::new(SignatureKind::Method, "call", 0);
    if !c.match_token(TokenKind::RightParen)? {
        c.process_arg_list(&mut signature)?;
        c.consume(TokenKind::RightParen, "expect ')' after arguments")?;
    }
    c.emit_call_by_signature(&signature)
}

fn subscript_led(c: &mut Compiler<'_>, can_assign: bool) -> CompileResult<()> {
    if c.cur_kind() == TokenKind::RightBracket {
        return Err(c.error_cur(ErrorKind::Parse, "expect a subscript index"));
    }
    let mut signature = Signature::new(SignatureKind::Subscript, "", 0);
    c.process_arg_list(&mut signature)?;
    c.consume(TokenKind::RightBracket, "expect ']' after the subscript")?;
    if can_assign && c.match_token(TokenKind::Assign)? {
        signature.kind = SignatureKind::SubscriptSetter;
        // The assigned value is the final argument.
        if signature.arg_num == MAX_ARG_NUM {
            return Err(c.error_cur(
                ErrorKind::Compile,
                format!("the number of arguments exceeds {MAX_ARG_NUM}"),
            ));
        }
        signature.arg_num += 1;
        c.expression(bp::LOWEST)?;
    }
    c.emit_call_by_signature(&signature)
}

fn dot_led(c: &mut Compiler<'_>, can_assign: bool) -> CompileResult<()> {
    let name = c.expect_id_text("expect property or method name after '.'")?;
    if name.len() > MAX_METHOD_NAME_LEN {
        return Err(c.error_pre(
            ErrorKind::Compile,
            format!("length of method name \"{name}\" should be no more than {MAX_METHOD_NAME_LEN}"),
        ));
    }
    if can_assign && c.match_token(TokenKind::Assign)? {
        c.expression(bp::LOWEST)?;
        return c.emit_call_by_signature(&Signature::new(SignatureKind::Setter, &name, 1));
    }
    if c.match_token(TokenKind::LeftParen)? {
        let mut signature = Signature::new(SignatureKind::Method, &name, 0);
        if !c.match_token(TokenKind::RightParen)? {
            c.process_arg_list(&mut signature)?;
            c.consume(TokenKind::RightParen, "expect ')' after arguments")?;
        }
        return c.emit_call_by_signature(&signature);
    }
    c.emit_call_by_signature(&Signature::new(SignatureKind::Getter, &name, 0))
}

// ----------------------------------------------------------------------
// Method-signature handlers for class bodies, invoked with the method-name
// token already consumed.

fn id_signature(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    let name = c.lexer.text(c.lexer.pre()).to_owned();
    if name.len() > MAX_METHOD_NAME_LEN {
        return Err(c.error_pre(
            ErrorKind::Compile,
            format!("length of method name \"{name}\" should be no more than {MAX_METHOD_NAME_LEN}"),
        ));
    }
    signature.kind = SignatureKind::Getter;
    signature.name = name;
    signature.arg_num = 0;

    if signature.name == "new" {
        if c.cur_kind() == TokenKind::Assign {
            return Err(c.error_cur(ErrorKind::Compile, "a constructor cannot be a setter"));
        }
        signature.kind = SignatureKind::Construct;
        if !c.match_token(TokenKind::LeftParen)? {
            return Err(c.error_cur(ErrorKind::Parse, "a constructor must have a parameter list"));
        }
        if c.match_token(TokenKind::RightParen)? {
            return Ok(());
        }
        c.process_para_list(signature)?;
        return c.consume(TokenKind::RightParen, "expect ')' after parameters");
    }

    if c.match_token(TokenKind::Assign)? {
        signature.kind = SignatureKind::Setter;
        signature.arg_num = 1;
        c.consume(TokenKind::LeftParen, "expect '(' after '='")?;
        let parameter = c.expect_id_text("expect parameter name")?;
        c.declare_local(&parameter)?;
        return c.consume(TokenKind::RightParen, "expect ')' after the parameter");
    }
    if c.match_token(TokenKind::LeftParen)? {
        signature.kind = SignatureKind::Method;
        if c.match_token(TokenKind::RightParen)? {
            return Ok(());
        }
        c.process_para_list(signature)?;
        return c.consume(TokenKind::RightParen, "expect ')' after parameters");
    }
    Ok(())
}

/// Binary-only operators define methods of one parameter.
fn infix_signature(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    signature.kind = SignatureKind::Method;
    signature.name = operator_text(c.lexer.pre().kind).to_owned();
    signature.arg_num = 1;
    c.consume(TokenKind::LeftParen, "expect '(' after the operator")?;
    let parameter = c.expect_id_text("expect parameter name")?;
    c.declare_local(&parameter)?;
    c.consume(TokenKind::RightParen, "expect ')' after the parameter")
}

/// Unary-only operators define getters.
fn unary_signature(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    signature.kind = SignatureKind::Getter;
    signature.name = operator_text(c.lexer.pre().kind).to_owned();
    signature.arg_num = 0;
    Ok(())
}

/// `-` defines either the unary getter or the one-parameter method.
fn mix_signature(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    signature.name = operator_text(c.lexer.pre().kind).to_owned();
    if c.cur_kind() == TokenKind::LeftParen {
        return infix_signature_with_name(c, signature);
    }
    signature.kind = SignatureKind::Getter;
    signature.arg_num = 0;
    Ok(())
}

fn infix_signature_with_name(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    signature.kind = SignatureKind::Method;
    signature.arg_num = 1;
    c.consume(TokenKind::LeftParen, "expect '(' after the operator")?;
    let parameter = c.expect_id_text("expect parameter name")?;
    c.declare_local(&parameter)?;
    c.consume(TokenKind::RightParen, "expect ')' after the parameter")
}

/// `[params]` and `[params]=(value)` subscript definitions; the name is
/// empty, the brackets shape the canonical form.
fn subscript_signature(c: &mut Compiler<'_>, signature: &mut Signature) -> CompileResult<()> {
    signature.kind = SignatureKind::Subscript;
    signature.name = String::new();
    signature.arg_num = 0;
    if c.cur_kind() == TokenKind::RightBracket {
        return Err(c.error_cur(ErrorKind::Parse, "a subscript needs at least one parameter"));
    }
    c.process_para_list(signature)?;
    c.consume(TokenKind::RightBracket, "expect ']' after subscript parameters")?;
    if c.match_token(TokenKind::Assign)? {
        signature.kind = SignatureKind::SubscriptSetter;
        c.consume(TokenKind::LeftParen, "expect '(' after '='")?;
        let parameter = c.expect_id_text("expect parameter name")?;
        c.declare_local(&parameter)?;
        c.consume(TokenKind::RightParen, "expect ')' after the parameter")?;
        signature.arg_num += 1;
    }
    Ok(())
}
