//! Final linking pass over a generated program.
//!
//! Removes `jumptarget` pseudo instructions, rewrites symbolic jump ids
//! into signed 16-bit relative byte offsets, and guarantees that every
//! function ends in a `returnvalue`.

use crate::bytecode::instructions::{
    CATCHMODE_JUMPONCATCH, CATCHMODE_JUMPONFINALLY, Instruction,
};
use crate::bytecode::program::Program;
use crate::bytecode::value::ValueContent;
use crate::compiler::compiler_messages::results::ResultMessages;

const JUMP_OFFSET_LIMIT: i64 = 65535;

struct JumpTableEntry {
    jump_id: i32,
    byte_offset: i64,
}

fn resolve_jump_id(
    jump_table: &[JumpTableEntry],
    jump_id: i32,
    current_offset: i64,
    result: &mut ResultMessages,
) -> Option<i32> {
    let target = jump_table
        .iter()
        .find(|entry| entry.jump_id == jump_id)
        .map(|entry| entry.byte_offset);
    let Some(target) = target else {
        result.add_error(
            format!(
                "internal error: found jump instruction with \
                 unknown jump id {jump_id} - codegen bug?"
            ),
            None,
            -1,
            -1,
        );
        return None;
    };
    let relative = target - current_offset;
    if relative == 0 {
        result.add_error(
            format!(
                "internal error: found jump instruction at \
                 instruction pos {current_offset} that has invalid zero \
                 relative offset - codegen bug?"
            ),
            None,
            -1,
            -1,
        );
        return None;
    }
    if !(-JUMP_OFFSET_LIMIT..=JUMP_OFFSET_LIMIT).contains(&relative) {
        result.add_error(
            format!(
                "found jump instruction at instruction pos \
                 {current_offset} that exceeds 16bit int range, this is \
                 not supported"
            ),
            None,
            -1,
            -1,
        );
        return None;
    }
    Some(relative as i32)
}

/// Run the linking pass over every non-C function. Returns false when any
/// function had an unresolvable or out-of-range jump.
pub fn link_program(program: &mut Program, result: &mut ResultMessages) -> bool {
    if result.has_errors() {
        // Never link over earlier stage errors; the instruction streams
        // may be incomplete.
        return true;
    }

    let mut success = true;
    for func in program.funcs.iter_mut() {
        if func.is_cfunc {
            continue;
        }

        // Remove jumptarget instructions while extracting offsets. The
        // recorded offset is the position the *next* instruction has in
        // the compacted stream.
        let mut jump_table: Vec<JumpTableEntry> = Vec::new();
        let mut compacted = Vec::with_capacity(func.instructions.len());
        let mut byte_offset: i64 = 0;
        for inst in func.instructions.drain(..) {
            if let Instruction::JumpTarget { jump_id } = inst {
                jump_table.push(JumpTableEntry {
                    jump_id,
                    byte_offset,
                });
                continue;
            }
            byte_offset += inst.encoded_size() as i64;
            compacted.push(inst);
        }
        func.instructions = compacted;

        // Rewrite jumps to the actual offsets:
        let mut byte_offset: i64 = 0;
        for inst in func.instructions.iter_mut() {
            let size = inst.encoded_size() as i64;
            match inst {
                Instruction::Jump { jump }
                | Instruction::CondJump { jump, .. }
                | Instruction::HasAttrJump { jump, .. } => {
                    match resolve_jump_id(&jump_table, *jump, byte_offset, result) {
                        Some(offset) => *jump = offset,
                        None => {
                            success = false;
                            break;
                        }
                    }
                }
                Instruction::Iterate { jump_on_end, .. } => {
                    match resolve_jump_id(&jump_table, *jump_on_end, byte_offset, result) {
                        Some(offset) => *jump_on_end = offset,
                        None => {
                            success = false;
                            break;
                        }
                    }
                }
                Instruction::PushCatchFrame {
                    mode,
                    jump_on_catch,
                    jump_on_finally,
                    ..
                } => {
                    if *mode & CATCHMODE_JUMPONCATCH != 0 {
                        match resolve_jump_id(&jump_table, *jump_on_catch, byte_offset, result)
                        {
                            Some(offset) => *jump_on_catch = offset,
                            None => {
                                success = false;
                                break;
                            }
                        }
                    }
                    if *mode & CATCHMODE_JUMPONFINALLY != 0 {
                        match resolve_jump_id(
                            &jump_table,
                            *jump_on_finally,
                            byte_offset,
                            result,
                        ) {
                            Some(offset) => *jump_on_finally = offset,
                            None => {
                                success = false;
                                break;
                            }
                        }
                    }
                }
                _ => {}
            }
            byte_offset += size;
        }
        if !success {
            break;
        }

        // Guarantee a trailing return:
        let ends_in_return = matches!(
            func.instructions.last(),
            Some(Instruction::ReturnValue { .. })
        );
        if !ends_in_return {
            if func.inner_stack_size <= 0 {
                func.inner_stack_size = 1;
            }
            func.instructions.push(Instruction::SetConst {
                slot: 0,
                content: ValueContent::None,
            });
            func.instructions
                .push(Instruction::ReturnValue { slot_from: 0 });
        }
    }
    success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instructions::Opcode;
    use crate::bytecode::program::FuncId;

    fn program_with_one_func(instructions: Vec<Instruction>) -> (Program, FuncId) {
        let mut program = Program::new();
        let func_id = program
            .register_horse64_function(Some("f"), None, &[], false, Some("main"), None, None)
            .unwrap();
        program.func_mut(func_id).instructions = instructions;
        (program, func_id)
    }

    #[test]
    fn empty_function_gets_return_none() {
        let (mut program, func_id) = program_with_one_func(Vec::new());
        let mut result = ResultMessages::new();
        assert!(link_program(&mut program, &mut result));
        let func = program.func(func_id);
        assert_eq!(
            func.instructions,
            vec![
                Instruction::SetConst {
                    slot: 0,
                    content: ValueContent::None,
                },
                Instruction::ReturnValue { slot_from: 0 },
            ]
        );
        assert!(func.inner_stack_size >= 1);
    }

    #[test]
    fn jump_targets_vanish_and_offsets_resolve() {
        // while-style loop shape:
        //   jumptarget 0
        //   condjump s0 -> 1
        //   jump -> 0
        //   jumptarget 1
        let (mut program, func_id) = program_with_one_func(vec![
            Instruction::JumpTarget { jump_id: 0 },
            Instruction::CondJump {
                cond_slot: 0,
                jump: 1,
            },
            Instruction::Jump { jump: 0 },
            Instruction::JumpTarget { jump_id: 1 },
        ]);
        let mut result = ResultMessages::new();
        assert!(link_program(&mut program, &mut result), "{:?}", result.messages);

        let func = program.func(func_id);
        assert!(
            func.instructions
                .iter()
                .all(|inst| inst.opcode() != Opcode::JumpTarget)
        );
        let condjump_size = Opcode::CondJump.record_size() as i32;
        let jump_size = Opcode::Jump.record_size() as i32;
        match &func.instructions[0] {
            Instruction::CondJump { jump, .. } => {
                // Skips the condjump and the backwards jump.
                assert_eq!(*jump, condjump_size + jump_size);
            }
            other => panic!("expected condjump, got {other:?}"),
        }
        match &func.instructions[1] {
            Instruction::Jump { jump } => {
                assert_eq!(*jump, -condjump_size);
            }
            other => panic!("expected jump, got {other:?}"),
        }
    }

    #[test]
    fn zero_relative_offset_is_a_codegen_bug() {
        let (mut program, _) = program_with_one_func(vec![
            Instruction::Jump { jump: 0 },
            Instruction::JumpTarget { jump_id: 0 },
        ]);
        // The jumptarget directly behind the jump compacts to the jump's
        // own position: relative offset zero.
        let mut program2 = Program::new();
        let func2 = program2
            .register_horse64_function(Some("g"), None, &[], false, Some("main"), None, None)
            .unwrap();
        program2.func_mut(func2).instructions = vec![
            Instruction::JumpTarget { jump_id: 0 },
            Instruction::Jump { jump: 0 },
        ];
        let mut result = ResultMessages::new();
        // Forward into the removed target right behind: fine (non-zero).
        assert!(link_program(&mut program, &mut result));

        let mut result2 = ResultMessages::new();
        assert!(!link_program(&mut program2, &mut result2));
        assert!(!result2.success);
    }

    #[test]
    fn existing_trailing_return_is_kept() {
        let (mut program, func_id) = program_with_one_func(vec![
            Instruction::SetConst {
                slot: 0,
                content: ValueContent::Int64(1),
            },
            Instruction::ReturnValue { slot_from: 0 },
        ]);
        let mut result = ResultMessages::new();
        assert!(link_program(&mut program, &mut result));
        assert_eq!(program.func(func_id).instructions.len(), 2);
    }
}
