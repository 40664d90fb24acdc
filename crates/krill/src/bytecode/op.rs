//! The opcode set.
//!
//! Opcodes are single bytes. Two-byte operands are big-endian. Method
//! dispatch bakes the arity into the opcode itself (`Call0` through
//! `Call16`, likewise `Super0..Super16`), so the interpreter knows the
//! callee's argument window without decoding the signature.

/// One opcode. Discriminants are the wire encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum Opcode {
    /// Push `constants[idx16]`.
    LoadConstant,
    PushNull,
    PushFalse,
    PushTrue,
    /// Discard the top of the stack.
    Pop,

    /// Push local slot `idx8`.
    LoadLocalVar,
    /// Store the top of the stack into local slot `idx8` (value stays).
    StoreLocalVar,
    LoadUpvalue,
    StoreUpvalue,
    /// Push module variable `idx16`.
    LoadModuleVar,
    StoreModuleVar,

    // Method dispatch: `CallN` pops the receiver plus N arguments and
    // pushes the result. The u16 operand is the method-name symbol.
    Call0,
    Call1,
    Call2,
    Call3,
    Call4,
    Call5,
    Call6,
    Call7,
    Call8,
    Call9,
    Call10,
    Call11,
    Call12,
    Call13,
    Call14,
    Call15,
    Call16,

    // Super dispatch: as `CallN`, with a second u16 operand naming the
    // constant slot that receives the resolved superclass at class-binding
    // time.
    Super0,
    Super1,
    Super2,
    Super3,
    Super4,
    Super5,
    Super6,
    Super7,
    Super8,
    Super9,
    Super10,
    Super11,
    Super12,
    Super13,
    Super14,
    Super15,
    Super16,

    /// Unconditional forward jump by `disp16`.
    Jump,
    /// Pop the condition; jump forward by `disp16` when falsey.
    JumpIfFalse,
    /// Unconditional backward jump by `disp16`.
    Loop,
    /// Short-circuit `&&`: jump keeping the value when falsey, else pop.
    And,
    /// Short-circuit `||`: jump keeping the value when truthy, else pop.
    Or,

    /// Push a closure over `constants[idx16]`; followed in the stream by
    /// one `(is_enclosing_local, index)` byte pair per upvalue.
    CreateClosure,
    /// Close the upvalue aliasing the top stack slot and pop it.
    CloseUpvalue,

    /// Pop the return value and unwind the frame.
    Return,
    /// Stream terminator; unreachable when `Return` is emitted correctly.
    End,

    /// Push the receiver (method slot 0).
    LoadThis,
    /// Push field `idx8` of the receiver.
    LoadFieldThis,
    /// Store the top of the stack into field `idx8` of the receiver
    /// (value stays).
    StoreFieldThis,
    /// Pop an instance, push its field `idx8`.
    LoadField,
    /// Pop an instance, store the value below it into field `idx8`
    /// (value stays).
    StoreField,

    /// Pop superclass and name, push a new class with `fieldNum8` fields.
    CreateClass,
    /// Pop a method closure and the class below it; bind the method at
    /// symbol `sym16` in the class's method table.
    InstanceMethod,
    /// As `InstanceMethod`, binding into the class's static table.
    StaticMethod,

    /// Push an empty list.
    CreateList,
    /// Pop a value, append it to the list below.
    AppendElement,
    /// Push an empty map.
    CreateMap,
    /// Pop a value and a key, insert into the map below.
    MapInsert,
}

impl Opcode {
    /// The `CallN` opcode for an arity.
    ///
    /// # Panics
    ///
    /// Panics if `arg_num` exceeds 16; the compiler enforces the argument
    /// cap before emission.
    #[must_use]
    pub fn call(arg_num: u8) -> Self {
        assert!(arg_num <= 16, "call arity exceeds 16");
        Self::from_repr(Self::Call0 as u8 + arg_num).expect("call opcodes are contiguous")
    }

    /// The `SuperN` opcode for an arity.
    #[must_use]
    pub fn super_call(arg_num: u8) -> Self {
        assert!(arg_num <= 16, "super call arity exceeds 16");
        Self::from_repr(Self::Super0 as u8 + arg_num).expect("super opcodes are contiguous")
    }

    /// The arity baked into a `CallN`/`SuperN` opcode, if this is one.
    #[must_use]
    pub fn dispatch_arity(self) -> Option<u8> {
        let discriminant = self as u8;
        if (Self::Call0 as u8..=Self::Call16 as u8).contains(&discriminant) {
            Some(discriminant - Self::Call0 as u8)
        } else if (Self::Super0 as u8..=Self::Super16 as u8).contains(&discriminant) {
            Some(discriminant - Self::Super0 as u8)
        } else {
            None
        }
    }

    /// Net change this opcode applies to the operand stack. Statically
    /// known for every opcode; dispatch opcodes derive it from their arity
    /// (receiver and arguments popped, result pushed).
    #[must_use]
    pub fn stack_effect(self) -> i32 {
        if let Some(arity) = self.dispatch_arity() {
            return -i32::from(arity);
        }
        match self {
            Self::LoadConstant
            | Self::PushNull
            | Self::PushFalse
            | Self::PushTrue
            | Self::LoadLocalVar
            | Self::LoadUpvalue
            | Self::LoadModuleVar
            | Self::CreateClosure
            | Self::LoadThis
            | Self::LoadFieldThis
            | Self::CreateList
            | Self::CreateMap => 1,
            Self::StoreLocalVar
            | Self::StoreUpvalue
            | Self::StoreModuleVar
            | Self::Jump
            | Self::Loop
            | Self::End
            | Self::StoreFieldThis
            | Self::LoadField => 0,
            Self::Pop
            | Self::JumpIfFalse
            | Self::And
            | Self::Or
            | Self::CloseUpvalue
            | Self::Return
            | Self::StoreField
            | Self::CreateClass
            | Self::AppendElement => -1,
            Self::InstanceMethod | Self::StaticMethod | Self::MapInsert => -2,
            _ => unreachable!("dispatch opcodes handled above"),
        }
    }

    /// Fixed operand width in bytes. `CreateClosure` additionally trails one
    /// byte pair per upvalue of the function it closes over; stream walkers
    /// account for those from the function's `upvalue_num`.
    #[must_use]
    pub fn operand_bytes(self) -> usize {
        if self.dispatch_arity().is_some() {
            return if (self as u8) >= Self::Super0 as u8 { 4 } else { 2 };
        }
        match self {
            Self::LoadConstant
            | Self::LoadModuleVar
            | Self::StoreModuleVar
            | Self::Jump
            | Self::JumpIfFalse
            | Self::Loop
            | Self::And
            | Self::Or
            | Self::CreateClosure
            | Self::InstanceMethod
            | Self::StaticMethod => 2,
            Self::LoadLocalVar
            | Self::StoreLocalVar
            | Self::LoadUpvalue
            | Self::StoreUpvalue
            | Self::LoadFieldThis
            | Self::StoreFieldThis
            | Self::LoadField
            | Self::StoreField
            | Self::CreateClass => 1,
            _ => 0,
        }
    }
}
