//! End-to-end compile checks: source in, instruction-level expectations out.

mod common;

use common::{decode, inner_functions, ops};
use krill::{HeapId, ModuleVar, Opcode, Value, Vm};
use pretty_assertions::assert_eq;

fn compile(source: &str) -> (Vm, HeapId) {
    let mut vm = Vm::new();
    let entry = vm.load_module("test", source).expect("source compiles");
    let function = vm.heap.closure(entry).function;
    (vm, function)
}

fn symbol(vm: &Vm, canonical: &str) -> u16 {
    u16::try_from(
        vm.method_names
            .index_of(canonical)
            .unwrap_or_else(|| panic!("signature '{canonical}' is interned")),
    )
    .unwrap()
}

/// The function among `function_id`'s constants whose debug name is `name`.
fn function_named(vm: &Vm, function_id: HeapId, name: &str) -> HeapId {
    inner_functions(vm, function_id)
        .into_iter()
        .find(|id| vm.heap.function(*id).debug.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no inner function named '{name}'"))
}

#[test]
fn arithmetic_module_var_definition() {
    let (vm, module_fn) = compile("var x = 1 + 2 * 3;");

    let module = vm.get_module("test").unwrap();
    assert_eq!(vm.heap.module(module).index_of("x"), Some(0));

    let constants = &vm.heap.function(module_fn).constants;
    for expected in [1.0, 2.0, 3.0] {
        assert!(
            constants.contains(&Value::Num(expected)),
            "constant table should hold {expected}"
        );
    }

    // Operators are method calls: 2 * 3 first, then 1 + _.
    let instrs = decode(&vm, module_fn);
    let calls: Vec<u16> = instrs
        .iter()
        .filter(|i| i.op == Opcode::Call1)
        .map(common::Instr::u16_operand)
        .collect();
    assert_eq!(calls, vec![symbol(&vm, "*(_)"), symbol(&vm, "+(_)")]);

    assert!(vm.heap.function(module_fn).max_stack_slots >= 2);
    assert_eq!(
        ops(&vm, module_fn),
        vec![
            Opcode::LoadConstant,
            Opcode::LoadConstant,
            Opcode::LoadConstant,
            Opcode::Call1,
            Opcode::Call1,
            Opcode::StoreModuleVar,
            Opcode::Pop,
            Opcode::PushNull,
            Opcode::Return,
            Opcode::End,
        ]
    );
}

#[test]
fn function_definition_compiles_to_a_closure() {
    let (vm, module_fn) = compile("fun f(a, b) { return a + b; }");

    let module = vm.get_module("test").unwrap();
    assert_eq!(vm.heap.module(module).index_of("f"), Some(0));

    let module_ops = ops(&vm, module_fn);
    assert!(module_ops.contains(&Opcode::CreateClosure));
    assert!(module_ops.contains(&Opcode::StoreModuleVar));

    let f = function_named(&vm, module_fn, "f");
    let f_fn = vm.heap.function(f);
    assert_eq!(f_fn.arg_num, 2);
    assert_eq!(f_fn.upvalue_num, 0);

    // Parameters occupy slots 1 and 2; slot 0 is reserved.
    let instrs = decode(&vm, f);
    assert_eq!(instrs[0].op, Opcode::LoadLocalVar);
    assert_eq!(instrs[0].operands, vec![1]);
    assert_eq!(instrs[1].op, Opcode::LoadLocalVar);
    assert_eq!(instrs[1].operands, vec![2]);
    assert_eq!(instrs[2].op, Opcode::Call1);
    assert_eq!(instrs[2].u16_operand(), symbol(&vm, "+(_)"));
    assert_eq!(instrs[3].op, Opcode::Return);
}

#[test]
fn closure_capture_produces_an_upvalue_descriptor() {
    let (vm, module_fn) = compile("fun mk() { var x = 0; fun g() { return x; } return g; }");

    let mk = function_named(&vm, module_fn, "mk");
    let g = function_named(&vm, mk, "g");
    assert_eq!(vm.heap.function(g).upvalue_num, 1);

    // g reads its single upvalue.
    let g_instrs = decode(&vm, g);
    assert_eq!(g_instrs[0].op, Opcode::LoadUpvalue);
    assert_eq!(g_instrs[0].operands, vec![0]);

    // mk's CreateClosure for g carries the descriptor: a local of the
    // enclosing function, at slot 1 (slot 0 is reserved).
    let create = decode(&vm, mk)
        .into_iter()
        .find(|i| i.op == Opcode::CreateClosure)
        .expect("mk creates the closure for g");
    let descriptor = create.operands[2..].to_vec();
    assert_eq!(descriptor, vec![1, 1]);
}

#[test]
fn upvalue_descriptors_are_deduplicated() {
    let (vm, module_fn) = compile("fun mk() { var x = 0; fun g() { return x + x; } return g; }");
    let mk = function_named(&vm, module_fn, "mk");
    let g = function_named(&vm, mk, "g");
    // Two references, one descriptor.
    assert_eq!(vm.heap.function(g).upvalue_num, 1);
}

#[test]
fn class_with_constructor_fields_and_methods() {
    let (vm, module_fn) = compile("class A { new(x) { _x = x; } val() { return _x; } }");

    let module = vm.get_module("test").unwrap();
    assert_eq!(vm.heap.module(module).index_of("A"), Some(0));

    for canonical in ["new(_)", "val()"] {
        assert!(
            vm.method_names.index_of(canonical).is_some(),
            "'{canonical}' should be interned"
        );
    }

    // One instance field, patched into CreateClass after the body.
    let create_class = decode(&vm, module_fn)
        .into_iter()
        .find(|i| i.op == Opcode::CreateClass)
        .expect("class statement emits CreateClass");
    assert_eq!(create_class.operands, vec![1]);

    let val = function_named(&vm, module_fn, "val");
    let val_instrs = decode(&vm, val);
    assert_eq!(val_instrs[0].op, Opcode::LoadFieldThis);
    assert_eq!(val_instrs[0].operands, vec![0]);

    let new = function_named(&vm, module_fn, "new");
    let new_instrs = decode(&vm, new);
    assert!(new_instrs.iter().any(|i| i.op == Opcode::StoreFieldThis && i.operands == vec![0]));
    // A constructor returns the receiver.
    assert!(new_instrs.iter().any(|i| i.op == Opcode::LoadThis));

    // Both bindings reload the class and attach the compiled method.
    let module_ops = ops(&vm, module_fn);
    assert_eq!(module_ops.iter().filter(|op| **op == Opcode::InstanceMethod).count(), 2);
}

#[test]
fn string_interpolation_builds_and_joins_a_list() {
    let (vm, module_fn) = compile(r#"var s = "n=${1+2}";"#);

    let module_ops = ops(&vm, module_fn);
    assert!(module_ops.contains(&Opcode::CreateList));
    // Three parts: "n=", the expression value, and the empty tail.
    assert_eq!(module_ops.iter().filter(|op| **op == Opcode::AppendElement).count(), 3);

    let join = decode(&vm, module_fn)
        .into_iter()
        .find(|i| i.op == Opcode::Call0)
        .expect("interpolation joins its parts");
    assert_eq!(join.u16_operand(), symbol(&vm, "join()"));

    // The literal segments became string constants.
    let constants = &vm.heap.function(module_fn).constants;
    let strings: Vec<&str> = constants
        .iter()
        .filter_map(|v| match v {
            Value::Obj(id) => match vm.heap.data(*id) {
                krill::HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert!(strings.contains(&"n="));
    assert!(strings.contains(&""));
}

#[test]
fn forward_reference_resolves_without_error() {
    let (vm, module_fn) = compile("fun use() { return x; } var x = 10;");

    let module = vm.get_module("test").unwrap();
    let module_obj = vm.heap.module(module);
    // 'use' was declared first, then 'x' was forward-declared by the body
    // and resolved by the definition.
    assert_eq!(module_obj.index_of("use"), Some(0));
    assert_eq!(module_obj.index_of("x"), Some(1));
    assert!(matches!(module_obj.var_value(1), ModuleVar::Defined(_)));

    // The body references x's final slot.
    let use_fn = function_named(&vm, module_fn, "use");
    let load = decode(&vm, use_fn)
        .into_iter()
        .find(|i| i.op == Opcode::LoadModuleVar)
        .expect("use loads the module variable");
    assert_eq!(load.u16_operand(), 1);
}

#[test]
fn operators_compile_as_method_calls() {
    let (vm, _) = compile("var a = 1; var b = -a; var c = !b; var d = a .. 5; var e = a is b;");
    for canonical in ["-", "!", "..(_)", "is(_)"] {
        assert!(
            vm.method_names.index_of(canonical).is_some(),
            "'{canonical}' should be interned"
        );
    }
}

#[test]
fn subscript_and_setter_signatures() {
    let (vm, _) = compile("var m = {}; m[1] = 2; var x = m[1]; m.field = 3; var y = m.field;");
    for canonical in ["[_]=(_)", "[_]", "field=(_)", "field"] {
        assert!(
            vm.method_names.index_of(canonical).is_some(),
            "'{canonical}' should be interned"
        );
    }
}

#[test]
fn super_call_reserves_a_constant_slot() {
    let (vm, module_fn) = compile(
        "class A { greet() { return 1; } }\n\
         class B is A { greet() { return super.greet(); } }",
    );
    let greet_b = inner_functions(&vm, module_fn)
        .into_iter()
        .filter(|id| vm.heap.function(*id).debug.name.as_deref() == Some("greet"))
        .find(|id| decode(&vm, *id).iter().any(|i| i.op == Opcode::Super0))
        .expect("B.greet dispatches through super");

    let instr = decode(&vm, greet_b)
        .into_iter()
        .find(|i| i.op == Opcode::Super0)
        .unwrap();
    assert_eq!(instr.u16_operand(), symbol(&vm, "greet()"));
    // The second operand names a constant slot reserved with Null for the
    // superclass to be filled in at class-binding time.
    let slot = u16::from_be_bytes([instr.operands[2], instr.operands[3]]) as usize;
    assert_eq!(vm.heap.function(greet_b).constants[slot], Value::Null);
}

#[test]
fn static_fields_capture_across_the_method_boundary() {
    let (vm, module_fn) = compile(
        "class Counter {\n\
             static var count = 0\n\
             bump() { count = count + 1 }\n\
         }",
    );
    let bump = function_named(&vm, module_fn, "bump");
    let bump_fn = vm.heap.function(bump);
    // The static field reaches the method as an upvalue on the
    // class-defining scope.
    assert_eq!(bump_fn.upvalue_num, 1);
    let instrs = decode(&vm, bump);
    assert!(instrs.iter().any(|i| i.op == Opcode::LoadUpvalue));
    assert!(instrs.iter().any(|i| i.op == Opcode::StoreUpvalue));

    // Leaving the class scope closes the captured slot.
    assert!(ops(&vm, module_fn).contains(&Opcode::CloseUpvalue));
}

#[test]
fn loops_emit_backward_jumps_and_patched_exits() {
    let (vm, module_fn) = compile("var i = 0; while (i < 3) { i = i + 1; }");
    let module_ops = ops(&vm, module_fn);
    assert!(module_ops.contains(&Opcode::Loop));
    assert!(module_ops.contains(&Opcode::JumpIfFalse));

    // The backward displacement lands exactly on the condition start.
    let instrs = decode(&vm, module_fn);
    let cond_start = instrs
        .iter()
        .find(|i| i.op == Opcode::LoadModuleVar)
        .map(|i| i.offset)
        .unwrap();
    let loop_instr = instrs.iter().find(|i| i.op == Opcode::Loop).unwrap();
    let after_operand = loop_instr.offset + 3;
    assert_eq!(after_operand - loop_instr.u16_operand() as usize, cond_start);
}

#[test]
fn for_loop_desugars_to_the_iterator_protocol() {
    let (vm, _) = compile("for i (1..3) { var x = i; }");
    for canonical in ["iterate(_)", "iteratorValue(_)", "..(_)"] {
        assert!(
            vm.method_names.index_of(canonical).is_some(),
            "'{canonical}' should be interned"
        );
    }
}

#[test]
fn calling_a_value_uses_the_call_signature() {
    let (vm, _) = compile("fun f() { return 1; } var x = f();");
    assert!(vm.method_names.index_of("call()").is_some());
}
