//! Instruction records of the bytecode program.
//!
//! Every record has a fixed wire size: one opcode byte plus its fields
//! (function/class/global ids are i32, attribute name ids are i64, stack
//! slots, jump offsets and frame ids are i16, little-endian). Jump fields
//! hold symbolic jump ids while code is being generated and signed relative
//! byte offsets once the linker has run; they are kept as i32 in memory so
//! both phases fit, and encode as i16 on the wire.

use crate::bytecode::value::{SHORTSTR_LEN, ValueContent};

/// Fixed wire footprint of a `ValueContent` record slot: 1 tag byte plus a
/// 16-byte payload area (large enough for an i64/f64, an inline short
/// string, or a pointer-plus-length pair for owned long payloads).
pub const VALUECONTENT_WIRE_SIZE: usize = 17;

const _: () = assert!(SHORTSTR_LEN * 4 + 1 <= 16);

pub const CATCHMODE_JUMPONCATCH: u8 = 1;
pub const CATCHMODE_JUMPONFINALLY: u8 = 2;

/// Binary operations executed by a `binop` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MathOp {
    Add = 1,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    CmpEqual,
    CmpNotEqual,
    CmpLarger,
    CmpSmaller,
    CmpLargerOrEqual,
    CmpSmallerOrEqual,
    BoolAnd,
    BoolOr,
    IndexByExpr,
}

/// Unary operations executed by a `unop` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnaryMathOp {
    Negate = 1,
    BoolNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Invalid = 0,
    SetConst,
    SetGlobal,
    GetGlobal,
    SetByIndexExpr,
    SetByAttributeName,
    SetByAttributeIdx,
    GetFunc,
    GetClass,
    ValueCopy,
    BinOp,
    UnOp,
    Call,
    CallIgnoreIfNone,
    SetTop,
    CallSetTop,
    ReturnValue,
    JumpTarget,
    CondJump,
    Jump,
    NewIterator,
    Iterate,
    PushCatchFrame,
    AddCatchTypeByRef,
    AddCatchType,
    PopCatchFrame,
    JumpToFinally,
    GetAttributeByName,
    HasAttrJump,
    NewList,
    NewSet,
    NewVector,
    NewMap,
    NewInstanceByRef,
    NewInstance,
    GetConstructor,
    AwaitItem,
    CreatePipe,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Invalid => "invalid_instruction",
            Opcode::SetConst => "setconst",
            Opcode::SetGlobal => "setglobal",
            Opcode::GetGlobal => "getglobal",
            Opcode::SetByIndexExpr => "setbyindexexpr",
            Opcode::SetByAttributeName => "setbyattributename",
            Opcode::SetByAttributeIdx => "setbyattributeidx",
            Opcode::GetFunc => "getfunc",
            Opcode::GetClass => "getclass",
            Opcode::ValueCopy => "valuecopy",
            Opcode::BinOp => "binop",
            Opcode::UnOp => "unop",
            Opcode::Call => "call",
            Opcode::CallIgnoreIfNone => "callignoreifnone",
            Opcode::SetTop => "settop",
            Opcode::CallSetTop => "callsettop",
            Opcode::ReturnValue => "returnvalue",
            Opcode::JumpTarget => "jumptarget",
            Opcode::CondJump => "condjump",
            Opcode::Jump => "jump",
            Opcode::NewIterator => "newiterator",
            Opcode::Iterate => "iterate",
            Opcode::PushCatchFrame => "pushcatchframe",
            Opcode::AddCatchTypeByRef => "addcatchtyperef",
            Opcode::AddCatchType => "addcatchtype",
            Opcode::PopCatchFrame => "popcatchframe",
            Opcode::JumpToFinally => "jumptofinally",
            Opcode::GetAttributeByName => "getattributebyname",
            Opcode::HasAttrJump => "hasattrjump",
            Opcode::NewList => "newlist",
            Opcode::NewSet => "newset",
            Opcode::NewVector => "newvector",
            Opcode::NewMap => "newmap",
            Opcode::NewInstanceByRef => "newinstancebyref",
            Opcode::NewInstance => "newinstance",
            Opcode::GetConstructor => "getconstructor",
            Opcode::AwaitItem => "awaititem",
            Opcode::CreatePipe => "createpipe",
        }
    }

    /// Fixed record size (in bytes) for this opcode, opcode byte included.
    pub fn record_size(self) -> usize {
        match self {
            Opcode::Invalid => 1,
            Opcode::SetConst => 1 + 2 + VALUECONTENT_WIRE_SIZE,
            Opcode::SetGlobal | Opcode::GetGlobal => 1 + 4 + 2,
            Opcode::SetByIndexExpr => 1 + 2 + 2 + 2,
            Opcode::SetByAttributeName => 1 + 2 + 8 + 2,
            Opcode::SetByAttributeIdx => 1 + 2 + 2 + 2,
            Opcode::GetFunc | Opcode::GetClass => 1 + 2 + 4,
            Opcode::ValueCopy => 1 + 2 + 2,
            Opcode::BinOp => 1 + 2 + 1 + 2 + 2,
            Opcode::UnOp => 1 + 2 + 1 + 2,
            Opcode::Call | Opcode::CallIgnoreIfNone => 1 + 2 + 2 + 2 + 2 + 1 + 1,
            Opcode::SetTop | Opcode::CallSetTop => 1 + 2,
            Opcode::ReturnValue => 1 + 2,
            Opcode::JumpTarget => 1 + 4,
            Opcode::CondJump => 1 + 2 + 2,
            Opcode::Jump => 1 + 2,
            Opcode::NewIterator => 1 + 2 + 2,
            Opcode::Iterate => 1 + 2 + 2 + 2,
            Opcode::PushCatchFrame => 1 + 2 + 1 + 2 + 2 + 2,
            Opcode::AddCatchTypeByRef => 1 + 2 + 2,
            Opcode::AddCatchType => 1 + 2 + 4,
            Opcode::PopCatchFrame | Opcode::JumpToFinally => 1 + 2,
            Opcode::GetAttributeByName => 1 + 2 + 2 + 8,
            Opcode::HasAttrJump => 1 + 2 + 8 + 2,
            Opcode::NewList | Opcode::NewSet | Opcode::NewVector | Opcode::NewMap => 1 + 2,
            Opcode::NewInstanceByRef => 1 + 2 + 2,
            Opcode::NewInstance => 1 + 2 + 4,
            Opcode::GetConstructor => 1 + 2 + 2,
            Opcode::AwaitItem => 1 + 2,
            Opcode::CreatePipe => 1 + 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    SetConst {
        slot: i16,
        content: ValueContent,
    },
    SetGlobal {
        global_to: i32,
        slot_from: i16,
    },
    GetGlobal {
        slot_to: i16,
        global_from: i32,
    },
    SetByIndexExpr {
        obj_slot_to: i16,
        index_slot: i16,
        slot_value_from: i16,
    },
    SetByAttributeName {
        obj_slot_to: i16,
        name_id: i64,
        slot_value_from: i16,
    },
    SetByAttributeIdx {
        obj_slot_to: i16,
        varattr_index: i16,
        slot_value_from: i16,
    },
    GetFunc {
        slot_to: i16,
        func_id: i32,
    },
    GetClass {
        slot_to: i16,
        class_id: i32,
    },
    ValueCopy {
        slot_to: i16,
        slot_from: i16,
    },
    BinOp {
        slot_to: i16,
        op: MathOp,
        arg1_slot_from: i16,
        arg2_slot_from: i16,
    },
    UnOp {
        slot_to: i16,
        op: UnaryMathOp,
        arg_slot_from: i16,
    },
    Call {
        return_to: i16,
        slot_called_from: i16,
        pos_args: i16,
        kw_args: i16,
        expand_last_pos_arg: bool,
        is_async: bool,
    },
    CallIgnoreIfNone {
        return_to: i16,
        slot_called_from: i16,
        pos_args: i16,
        kw_args: i16,
        expand_last_pos_arg: bool,
        is_async: bool,
    },
    SetTop {
        top_to: i16,
    },
    CallSetTop {
        top_to: i16,
    },
    ReturnValue {
        slot_from: i16,
    },
    /// Pseudo instruction; removed entirely by the linker.
    JumpTarget {
        jump_id: i32,
    },
    CondJump {
        cond_slot: i16,
        jump: i32,
    },
    Jump {
        jump: i32,
    },
    NewIterator {
        slot_iterator_to: i16,
        slot_container_from: i16,
    },
    Iterate {
        slot_value_to: i16,
        slot_iterator_from: i16,
        jump_on_end: i32,
    },
    PushCatchFrame {
        frame_id: i16,
        mode: u8,
        slot_error_to: i16,
        jump_on_catch: i32,
        jump_on_finally: i32,
    },
    AddCatchTypeByRef {
        frame_id: i16,
        slot_from: i16,
    },
    AddCatchType {
        frame_id: i16,
        class_id: i32,
    },
    PopCatchFrame {
        frame_id: i16,
    },
    JumpToFinally {
        frame_id: i16,
    },
    GetAttributeByName {
        slot_to: i16,
        obj_slot_from: i16,
        name_id: i64,
    },
    HasAttrJump {
        slot_from: i16,
        name_id: i64,
        jump: i32,
    },
    NewList {
        slot_to: i16,
    },
    NewSet {
        slot_to: i16,
    },
    NewVector {
        slot_to: i16,
    },
    NewMap {
        slot_to: i16,
    },
    NewInstanceByRef {
        slot_to: i16,
        class_type_slot_from: i16,
    },
    NewInstance {
        slot_to: i16,
        class_id: i32,
    },
    GetConstructor {
        slot_to: i16,
        obj_slot_from: i16,
    },
    AwaitItem {
        obj_slot: i16,
    },
    CreatePipe {
        slot_to: i16,
    },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::SetConst { .. } => Opcode::SetConst,
            Instruction::SetGlobal { .. } => Opcode::SetGlobal,
            Instruction::GetGlobal { .. } => Opcode::GetGlobal,
            Instruction::SetByIndexExpr { .. } => Opcode::SetByIndexExpr,
            Instruction::SetByAttributeName { .. } => Opcode::SetByAttributeName,
            Instruction::SetByAttributeIdx { .. } => Opcode::SetByAttributeIdx,
            Instruction::GetFunc { .. } => Opcode::GetFunc,
            Instruction::GetClass { .. } => Opcode::GetClass,
            Instruction::ValueCopy { .. } => Opcode::ValueCopy,
            Instruction::BinOp { .. } => Opcode::BinOp,
            Instruction::UnOp { .. } => Opcode::UnOp,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::CallIgnoreIfNone { .. } => Opcode::CallIgnoreIfNone,
            Instruction::SetTop { .. } => Opcode::SetTop,
            Instruction::CallSetTop { .. } => Opcode::CallSetTop,
            Instruction::ReturnValue { .. } => Opcode::ReturnValue,
            Instruction::JumpTarget { .. } => Opcode::JumpTarget,
            Instruction::CondJump { .. } => Opcode::CondJump,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::NewIterator { .. } => Opcode::NewIterator,
            Instruction::Iterate { .. } => Opcode::Iterate,
            Instruction::PushCatchFrame { .. } => Opcode::PushCatchFrame,
            Instruction::AddCatchTypeByRef { .. } => Opcode::AddCatchTypeByRef,
            Instruction::AddCatchType { .. } => Opcode::AddCatchType,
            Instruction::PopCatchFrame { .. } => Opcode::PopCatchFrame,
            Instruction::JumpToFinally { .. } => Opcode::JumpToFinally,
            Instruction::GetAttributeByName { .. } => Opcode::GetAttributeByName,
            Instruction::HasAttrJump { .. } => Opcode::HasAttrJump,
            Instruction::NewList { .. } => Opcode::NewList,
            Instruction::NewSet { .. } => Opcode::NewSet,
            Instruction::NewVector { .. } => Opcode::NewVector,
            Instruction::NewMap { .. } => Opcode::NewMap,
            Instruction::NewInstanceByRef { .. } => Opcode::NewInstanceByRef,
            Instruction::NewInstance { .. } => Opcode::NewInstance,
            Instruction::GetConstructor { .. } => Opcode::GetConstructor,
            Instruction::AwaitItem { .. } => Opcode::AwaitItem,
            Instruction::CreatePipe { .. } => Opcode::CreatePipe,
        }
    }

    /// Wire footprint of this instruction. All byte offsets in jump fields
    /// are computed against these sizes.
    #[inline]
    pub fn encoded_size(&self) -> usize {
        self.opcode().record_size()
    }

    /// Serialize into the optional on-disk program dump (little-endian).
    pub fn dump_bytes(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);
        match self {
            Instruction::SetConst { slot, content } => {
                out.extend_from_slice(&slot.to_le_bytes());
                content.dump_bytes(out);
            }
            Instruction::SetGlobal {
                global_to,
                slot_from,
            } => {
                out.extend_from_slice(&global_to.to_le_bytes());
                out.extend_from_slice(&slot_from.to_le_bytes());
            }
            Instruction::GetGlobal {
                slot_to,
                global_from,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&global_from.to_le_bytes());
            }
            Instruction::SetByIndexExpr {
                obj_slot_to,
                index_slot,
                slot_value_from,
            } => {
                out.extend_from_slice(&obj_slot_to.to_le_bytes());
                out.extend_from_slice(&index_slot.to_le_bytes());
                out.extend_from_slice(&slot_value_from.to_le_bytes());
            }
            Instruction::SetByAttributeName {
                obj_slot_to,
                name_id,
                slot_value_from,
            } => {
                out.extend_from_slice(&obj_slot_to.to_le_bytes());
                out.extend_from_slice(&name_id.to_le_bytes());
                out.extend_from_slice(&slot_value_from.to_le_bytes());
            }
            Instruction::SetByAttributeIdx {
                obj_slot_to,
                varattr_index,
                slot_value_from,
            } => {
                out.extend_from_slice(&obj_slot_to.to_le_bytes());
                out.extend_from_slice(&varattr_index.to_le_bytes());
                out.extend_from_slice(&slot_value_from.to_le_bytes());
            }
            Instruction::GetFunc { slot_to, func_id } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&func_id.to_le_bytes());
            }
            Instruction::GetClass { slot_to, class_id } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&class_id.to_le_bytes());
            }
            Instruction::ValueCopy { slot_to, slot_from } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&slot_from.to_le_bytes());
            }
            Instruction::BinOp {
                slot_to,
                op,
                arg1_slot_from,
                arg2_slot_from,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.push(*op as u8);
                out.extend_from_slice(&arg1_slot_from.to_le_bytes());
                out.extend_from_slice(&arg2_slot_from.to_le_bytes());
            }
            Instruction::UnOp {
                slot_to,
                op,
                arg_slot_from,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.push(*op as u8);
                out.extend_from_slice(&arg_slot_from.to_le_bytes());
            }
            Instruction::Call {
                return_to,
                slot_called_from,
                pos_args,
                kw_args,
                expand_last_pos_arg,
                is_async,
            }
            | Instruction::CallIgnoreIfNone {
                return_to,
                slot_called_from,
                pos_args,
                kw_args,
                expand_last_pos_arg,
                is_async,
            } => {
                out.extend_from_slice(&return_to.to_le_bytes());
                out.extend_from_slice(&slot_called_from.to_le_bytes());
                out.extend_from_slice(&pos_args.to_le_bytes());
                out.extend_from_slice(&kw_args.to_le_bytes());
                out.push(*expand_last_pos_arg as u8);
                out.push(*is_async as u8);
            }
            Instruction::SetTop { top_to } | Instruction::CallSetTop { top_to } => {
                out.extend_from_slice(&top_to.to_le_bytes());
            }
            Instruction::ReturnValue { slot_from } => {
                out.extend_from_slice(&slot_from.to_le_bytes());
            }
            Instruction::JumpTarget { jump_id } => {
                out.extend_from_slice(&jump_id.to_le_bytes());
            }
            Instruction::CondJump { cond_slot, jump } => {
                out.extend_from_slice(&cond_slot.to_le_bytes());
                out.extend_from_slice(&(*jump as i16).to_le_bytes());
            }
            Instruction::Jump { jump } => {
                out.extend_from_slice(&(*jump as i16).to_le_bytes());
            }
            Instruction::NewIterator {
                slot_iterator_to,
                slot_container_from,
            } => {
                out.extend_from_slice(&slot_iterator_to.to_le_bytes());
                out.extend_from_slice(&slot_container_from.to_le_bytes());
            }
            Instruction::Iterate {
                slot_value_to,
                slot_iterator_from,
                jump_on_end,
            } => {
                out.extend_from_slice(&slot_value_to.to_le_bytes());
                out.extend_from_slice(&slot_iterator_from.to_le_bytes());
                out.extend_from_slice(&(*jump_on_end as i16).to_le_bytes());
            }
            Instruction::PushCatchFrame {
                frame_id,
                mode,
                slot_error_to,
                jump_on_catch,
                jump_on_finally,
            } => {
                out.extend_from_slice(&frame_id.to_le_bytes());
                out.push(*mode);
                out.extend_from_slice(&slot_error_to.to_le_bytes());
                out.extend_from_slice(&(*jump_on_catch as i16).to_le_bytes());
                out.extend_from_slice(&(*jump_on_finally as i16).to_le_bytes());
            }
            Instruction::AddCatchTypeByRef { frame_id, slot_from } => {
                out.extend_from_slice(&frame_id.to_le_bytes());
                out.extend_from_slice(&slot_from.to_le_bytes());
            }
            Instruction::AddCatchType { frame_id, class_id } => {
                out.extend_from_slice(&frame_id.to_le_bytes());
                out.extend_from_slice(&class_id.to_le_bytes());
            }
            Instruction::PopCatchFrame { frame_id }
            | Instruction::JumpToFinally { frame_id } => {
                out.extend_from_slice(&frame_id.to_le_bytes());
            }
            Instruction::GetAttributeByName {
                slot_to,
                obj_slot_from,
                name_id,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&obj_slot_from.to_le_bytes());
                out.extend_from_slice(&name_id.to_le_bytes());
            }
            Instruction::HasAttrJump {
                slot_from,
                name_id,
                jump,
            } => {
                out.extend_from_slice(&slot_from.to_le_bytes());
                out.extend_from_slice(&name_id.to_le_bytes());
                out.extend_from_slice(&(*jump as i16).to_le_bytes());
            }
            Instruction::NewList { slot_to }
            | Instruction::NewSet { slot_to }
            | Instruction::NewVector { slot_to }
            | Instruction::NewMap { slot_to }
            | Instruction::CreatePipe { slot_to } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
            }
            Instruction::NewInstanceByRef {
                slot_to,
                class_type_slot_from,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&class_type_slot_from.to_le_bytes());
            }
            Instruction::NewInstance { slot_to, class_id } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&class_id.to_le_bytes());
            }
            Instruction::GetConstructor {
                slot_to,
                obj_slot_from,
            } => {
                out.extend_from_slice(&slot_to.to_le_bytes());
                out.extend_from_slice(&obj_slot_from.to_le_bytes());
            }
            Instruction::AwaitItem { obj_slot } => {
                out.extend_from_slice(&obj_slot.to_le_bytes());
            }
        }
    }

    /// Highest stack slot this instruction writes to, if any. The linker
    /// validates `inner_stack_size` against this.
    pub fn written_slot(&self) -> Option<i16> {
        match self {
            Instruction::SetConst { slot, .. } => Some(*slot),
            Instruction::GetGlobal { slot_to, .. }
            | Instruction::GetFunc { slot_to, .. }
            | Instruction::GetClass { slot_to, .. }
            | Instruction::ValueCopy { slot_to, .. }
            | Instruction::BinOp { slot_to, .. }
            | Instruction::UnOp { slot_to, .. }
            | Instruction::GetAttributeByName { slot_to, .. }
            | Instruction::NewList { slot_to }
            | Instruction::NewSet { slot_to }
            | Instruction::NewVector { slot_to }
            | Instruction::NewMap { slot_to }
            | Instruction::NewInstanceByRef { slot_to, .. }
            | Instruction::NewInstance { slot_to, .. }
            | Instruction::GetConstructor { slot_to, .. }
            | Instruction::CreatePipe { slot_to } => Some(*slot_to),
            Instruction::Call { return_to, .. }
            | Instruction::CallIgnoreIfNone { return_to, .. } => Some(*return_to),
            Instruction::NewIterator {
                slot_iterator_to, ..
            } => Some(*slot_iterator_to),
            Instruction::Iterate { slot_value_to, .. } => Some(*slot_value_to),
            Instruction::PushCatchFrame { slot_error_to, .. } if *slot_error_to >= 0 => {
                Some(*slot_error_to)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_length_matches_record_size_for_fixed_payloads() {
        let samples = [
            Instruction::SetConst {
                slot: 0,
                content: ValueContent::Int64(42),
            },
            Instruction::GetGlobal {
                slot_to: 1,
                global_from: 7,
            },
            Instruction::Jump { jump: -12 },
            Instruction::CondJump {
                cond_slot: 2,
                jump: 30,
            },
            Instruction::PushCatchFrame {
                frame_id: 0,
                mode: CATCHMODE_JUMPONCATCH | CATCHMODE_JUMPONFINALLY,
                slot_error_to: 3,
                jump_on_catch: 10,
                jump_on_finally: 20,
            },
            Instruction::GetAttributeByName {
                slot_to: 1,
                obj_slot_from: 0,
                name_id: 99,
            },
            Instruction::ReturnValue { slot_from: 0 },
        ];
        for inst in &samples {
            let mut bytes = Vec::new();
            inst.dump_bytes(&mut bytes);
            assert!(
                bytes.len() <= inst.encoded_size(),
                "{} dump exceeds its record size",
                inst.opcode().name()
            );
        }
    }

    #[test]
    fn jumptarget_is_larger_than_plain_jump() {
        // The linker removes jumptargets and byte offsets shrink by this
        // record size, so it must be stable.
        assert_eq!(Opcode::JumpTarget.record_size(), 5);
        assert_eq!(Opcode::Jump.record_size(), 3);
    }
}
