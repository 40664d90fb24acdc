//! Shared instruction-stream decoding for bytecode-level assertions.

use krill::{HeapId, Opcode, Value, Vm};

/// One decoded instruction: its offset, opcode, and raw operand bytes
/// (including `CreateClosure`'s trailing upvalue descriptor pairs).
#[derive(Debug, Clone)]
pub struct Instr {
    pub offset: usize,
    pub op: Opcode,
    pub operands: Vec<u8>,
}

impl Instr {
    /// The instruction's big-endian u16 operand.
    pub fn u16_operand(&self) -> u16 {
        u16::from_be_bytes([self.operands[0], self.operands[1]])
    }
}

/// Decodes a compiled function's instruction stream.
pub fn decode(vm: &Vm, function_id: HeapId) -> Vec<Instr> {
    let function = vm.heap.function(function_id);
    let code = &function.code;
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let op = Opcode::from_repr(code[offset]).expect("stream contains only valid opcodes");
        let mut operand_len = op.operand_bytes();
        if op == Opcode::CreateClosure {
            let constant = u16::from_be_bytes([code[offset + 1], code[offset + 2]]) as usize;
            let Value::Obj(inner) = function.constants[constant] else {
                panic!("CreateClosure must reference a function constant");
            };
            operand_len += 2 * vm.heap.function(inner).upvalue_num as usize;
        }
        let operands = code[offset + 1..offset + 1 + operand_len].to_vec();
        out.push(Instr { offset, op, operands });
        offset += 1 + operand_len;
    }
    out
}

/// Just the opcodes, in order.
pub fn ops(vm: &Vm, function_id: HeapId) -> Vec<Opcode> {
    decode(vm, function_id).into_iter().map(|i| i.op).collect()
}

/// The functions referenced from `function_id`'s constant table, in slot
/// order.
pub fn inner_functions(vm: &Vm, function_id: HeapId) -> Vec<HeapId> {
    vm.heap
        .function(function_id)
        .constants
        .iter()
        .filter_map(|value| match value {
            Value::Obj(id) => matches!(vm.heap.data(*id), krill::HeapData::Fn(_)).then_some(*id),
            _ => None,
        })
        .collect()
}
