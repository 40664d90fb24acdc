//! Soundness of the statically computed frame requirements: walking every
//! execution path of every emitted function, the running stack depth never
//! goes negative and never exceeds the precomputed `max_stack_slots`.

mod common;

use std::collections::HashMap;

use common::{decode, inner_functions, ops};
use krill::{HeapId, Opcode, Vm};

fn compile(source: &str) -> (Vm, HeapId) {
    let mut vm = Vm::new();
    let entry = vm.load_module("test", source).expect("source compiles");
    let function = vm.heap.closure(entry).function;
    (vm, function)
}

/// Walks every path through the instruction stream, tracking depth from 0.
fn verify_stack_budget(vm: &Vm, function_id: HeapId) {
    let function = vm.heap.function(function_id);
    let name = function.debug.name.as_deref().unwrap_or("<module>");
    let max = i64::from(function.max_stack_slots);
    let instrs = decode(vm, function_id);
    let by_offset: HashMap<usize, &common::Instr> = instrs.iter().map(|i| (i.offset, i)).collect();

    assert_eq!(*ops(vm, function_id).last().unwrap(), Opcode::End, "{name}: stream must end with End");
    assert_eq!(function.code.len(), function.debug.line_at.len(), "{name}: one line entry per byte");

    let mut visited: HashMap<usize, i64> = HashMap::new();
    let mut work = vec![(0usize, 0i64)];
    while let Some((offset, depth)) = work.pop() {
        if visited.contains_key(&offset) {
            continue;
        }
        visited.insert(offset, depth);
        let instr = by_offset
            .get(&offset)
            .unwrap_or_else(|| panic!("{name}: jump target {offset} is not an instruction boundary"));
        let next = offset + 1 + instr.operands.len();
        let check = |d: i64| {
            assert!(d >= 0, "{name}: stack depth negative at offset {offset}");
            assert!(d <= max, "{name}: depth {d} exceeds max_stack_slots {max} at offset {offset}");
            d
        };
        match instr.op {
            Opcode::Jump => {
                work.push((next + instr.u16_operand() as usize, depth));
            }
            Opcode::JumpIfFalse => {
                let d = check(depth - 1);
                work.push((next + instr.u16_operand() as usize, d));
                work.push((next, d));
            }
            Opcode::And | Opcode::Or => {
                // Short-circuit: the jumping path keeps the value, the
                // fall-through pops it before evaluating the right side.
                work.push((next + instr.u16_operand() as usize, depth));
                work.push((next, check(depth - 1)));
            }
            Opcode::Loop => {
                let target = next - instr.u16_operand() as usize;
                work.push((target, depth));
            }
            Opcode::Return => {
                check(depth - 1);
            }
            Opcode::End => {}
            op => {
                let d = check(depth + i64::from(op.stack_effect()));
                work.push((next, d));
            }
        }
    }

    // Constant indices and slot operands stay inside their tables.
    for instr in &instrs {
        match instr.op {
            Opcode::LoadConstant | Opcode::CreateClosure => {
                assert!(
                    (instr.u16_operand() as usize) < function.constants.len(),
                    "{name}: constant index out of range"
                );
            }
            Opcode::LoadLocalVar | Opcode::StoreLocalVar => {
                assert!(
                    i64::from(instr.operands[0]) < max,
                    "{name}: local slot {} not covered by max_stack_slots {max}",
                    instr.operands[0]
                );
            }
            _ => {}
        }
    }
}

/// Verifies the whole closure tree reachable from the module function.
fn verify_all(vm: &Vm, module_fn: HeapId) {
    let mut work = vec![module_fn];
    while let Some(function) = work.pop() {
        verify_stack_budget(vm, function);
        work.extend(inner_functions(vm, function));
    }
}

#[test]
fn straight_line_arithmetic() {
    let (vm, module_fn) = compile("var x = 1 + 2 * 3;");
    verify_all(&vm, module_fn);
}

#[test]
fn functions_and_closures() {
    let (vm, module_fn) = compile(
        "fun mk() { var x = 0; fun g() { return x; } return g; }\n\
         fun add(a, b, c) { return a + b + c; }\n\
         var s = add(1, 2, 3);",
    );
    verify_all(&vm, module_fn);
}

#[test]
fn control_flow_and_loops() {
    let (vm, module_fn) = compile(
        "var i = 0;\n\
         while (i < 10) {\n\
             var doubled = i * 2;\n\
             if (doubled > 10) { break; } else { i = i + 1; }\n\
             if (doubled == 4) continue;\n\
             var tail = doubled - 1;\n\
         }\n\
         for j (1..3) { var k = j; }",
    );
    verify_all(&vm, module_fn);
}

#[test]
fn short_circuits_and_conditionals() {
    let (vm, module_fn) = compile(
        "var a = true && false || true;\n\
         var b = a ? 1 : 2;\n\
         var c = [1, 2, 3];\n\
         var d = {1: \"one\", 2: \"two\"};",
    );
    verify_all(&vm, module_fn);
}

#[test]
fn classes_methods_and_interpolation() {
    let (vm, module_fn) = compile(
        "class Point {\n\
             static var made = 0\n\
             new(x, y) { _x = x; _y = y; }\n\
             x { return _x }\n\
             +(other) { return Point.new(_x + other.x, _y + other.y) }\n\
             describe() { return \"(${_x}, ${_y})\" }\n\
         }\n\
         class Origin is Point {\n\
             new() { super(0, 0) }\n\
         }",
    );
    verify_all(&vm, module_fn);
}

#[test]
fn break_with_captured_locals_closes_upvalues() {
    let (vm, module_fn) = compile(
        "fun run() {\n\
             var fns = [];\n\
             var i = 0;\n\
             while (i < 3) {\n\
                 var captured = i;\n\
                 fun get() { return captured; }\n\
                 if (i == 2) { break; }\n\
                 i = i + 1;\n\
             }\n\
             return fns;\n\
         }",
    );
    verify_all(&vm, module_fn);
}

#[test]
fn two_byte_operands_read_back_big_endian() {
    // Enough constants to push an index past one byte.
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("var v{i} = {i};\n"));
    }
    let (vm, module_fn) = compile(&source);
    let function = vm.heap.function(module_fn);
    assert!(function.constants.len() >= 300);
    // The 300th LoadConstant names a constant index above 255; decoding
    // big-endian reproduces every written index in order.
    let indices: Vec<u16> = decode(&vm, module_fn)
        .into_iter()
        .filter(|i| i.op == Opcode::LoadConstant)
        .map(|i| i.u16_operand())
        .collect();
    let expected: Vec<u16> = (0..300).collect();
    assert_eq!(indices, expected);
    verify_all(&vm, module_fn);
}
