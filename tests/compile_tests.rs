//! End-to-end compiles over small on-disk projects: source in, linked
//! bytecode program out.

use horsec::CompileProject;
use horsec::bytecode::class_attrs::METHOD_OFFSET;
use horsec::bytecode::instructions::{Instruction, Opcode};
use horsec::bytecode::program::{FuncId, Program};
use horsec::bytecode::value::ValueContent;
use horsec::compiler::project::uri;
use std::fs;
use std::path::Path;

/// Build a throwaway project folder from (path, source) pairs and compile
/// the first file as the main one.
fn compile_files(files: &[(&str, &str)]) -> (CompileProject, Result<(), ()>) {
    let dir = tempfile::tempdir().expect("tempdir");
    for (rel_path, source) in files {
        let full = dir.path().join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        fs::write(&full, source).expect("write source");
    }
    let mut project = CompileProject::new(dir.path()).expect("project");
    let main_path = dir.path().join(files[0].0);
    let main_uri = uri::to_file_uri(&main_path.to_string_lossy()).expect("uri");
    let compiled = project.compile(&main_uri);
    (project, compiled)
}

fn compile_main(source: &str) -> (CompileProject, Result<(), ()>) {
    compile_files(&[("main.h64", source)])
}

fn compile_main_ok(source: &str) -> CompileProject {
    let (project, compiled) = compile_main(source);
    assert!(
        compiled.is_ok(),
        "compile failed: {:?}",
        project.result.messages
    );
    project
}

fn func_by_name(project: &CompileProject, name: &str) -> FuncId {
    let module = project
        .program
        .symbols
        .module_by_key(Some("main"), None)
        .expect("main module symbols");
    let entry = module.func_name_to_entry[name];
    module.func_symbols[entry].global_id
}

fn opcodes(program: &Program, func: FuncId) -> Vec<Opcode> {
    program.func(func).instructions.iter().map(|i| i.opcode()).collect()
}

/// Program-wide invariants: all non-C functions end in returnvalue, and
/// every jump lands non-zero and on an instruction boundary.
fn assert_linked_invariants(program: &Program) {
    for (index, func) in program.funcs.iter().enumerate() {
        if func.is_cfunc {
            continue;
        }
        assert!(
            matches!(func.instructions.last(), Some(Instruction::ReturnValue { .. })),
            "func {index} does not end in returnvalue"
        );
        assert!(
            func.instructions
                .iter()
                .all(|inst| inst.opcode() != Opcode::JumpTarget),
            "func {index} still contains jumptarget pseudo instructions"
        );

        // Instruction boundaries by byte offset:
        let mut boundaries = vec![0i64];
        let mut offset = 0i64;
        for inst in &func.instructions {
            offset += inst.encoded_size() as i64;
            boundaries.push(offset);
        }

        let mut offset = 0i64;
        for inst in &func.instructions {
            let mut check_jump = |rel: i32| {
                assert_ne!(rel, 0, "zero relative jump in func {index}");
                assert!(rel.abs() <= 65535);
                let target = offset + rel as i64;
                assert!(
                    boundaries.contains(&target),
                    "jump target {target} in func {index} misses instruction boundaries"
                );
            };
            match inst {
                Instruction::Jump { jump } => check_jump(*jump),
                Instruction::CondJump { jump, .. } => check_jump(*jump),
                Instruction::HasAttrJump { jump, .. } => check_jump(*jump),
                Instruction::Iterate { jump_on_end, .. } => check_jump(*jump_on_end),
                Instruction::PushCatchFrame {
                    mode,
                    jump_on_catch,
                    jump_on_finally,
                    ..
                } => {
                    if mode & 1 != 0 {
                        check_jump(*jump_on_catch);
                    }
                    if mode & 2 != 0 {
                        check_jump(*jump_on_finally);
                    }
                }
                _ => {}
            }
            offset += inst.encoded_size() as i64;
        }

        // Stack accounting: no instruction writes beyond the declared
        // stack.
        let total_stack = func.input_stack_size + func.inner_stack_size;
        for inst in &func.instructions {
            if let Some(slot) = inst.written_slot() {
                assert!(
                    (slot as i32) < total_stack,
                    "func {index} writes slot {slot} beyond stack size {total_stack}"
                );
            }
        }
    }
}

// ------------------------------
// End-to-end scenarios
// ------------------------------

#[test]
fn globalinit_stores_toplevel_var_and_main_reads_it() {
    let project = compile_main_ok("var x = 1\nfunc main {\n    print(x)\n}\n");
    assert_linked_invariants(&project.program);

    let globalinit = project
        .program
        .globalinit_func
        .expect("globalinit func exists");
    let init_ops = opcodes(&project.program, globalinit);
    assert_eq!(
        init_ops[..2],
        [Opcode::SetConst, Opcode::SetGlobal],
        "globalinit stores the literal into the global"
    );
    assert!(matches!(
        project.program.func(globalinit).instructions[0],
        Instruction::SetConst {
            content: ValueContent::Int64(1),
            ..
        }
    ));
    assert_eq!(*init_ops.last().unwrap(), Opcode::ReturnValue);

    let main_func = project.program.main_func.expect("main func set");
    let main_ops = opcodes(&project.program, main_func);
    assert!(main_ops.contains(&Opcode::GetGlobal));
    assert!(main_ops.contains(&Opcode::GetFunc));
    assert!(main_ops.contains(&Opcode::Call));
    assert_eq!(*main_ops.last().unwrap(), Opcode::ReturnValue);
}

#[test]
fn kwarg_defaults_emit_sentinel_check_prologue() {
    let project = compile_main_ok(
        "func f(a, b = 2) {\n    return a + b\n}\nfunc main {\n    f(1)\n}\n",
    );
    assert_linked_invariants(&project.program);

    let f = func_by_name(&project, "f");
    let func = project.program.func(f);
    assert_eq!(func.arg_count, 2);
    assert_eq!(func.kwarg_count(), 1);
    let b_name_id = project.program.symbols.get_attr_name_id("b").unwrap();
    assert_eq!(func.kwarg_name_ids, vec![b_name_id]);

    let ops = opcodes(&project.program, f);
    assert_eq!(
        ops[..3],
        [Opcode::SetConst, Opcode::BinOp, Opcode::CondJump],
        "prologue compares the kwarg slot against the sentinel"
    );
    assert!(matches!(
        func.instructions[0],
        Instruction::SetConst {
            content: ValueContent::UnspecifiedKwarg,
            ..
        }
    ));
    // Default value lands in slot 1 (after positional a in slot 0):
    assert!(func.instructions.iter().any(|inst| matches!(
        inst,
        Instruction::ValueCopy { slot_to: 1, .. }
    )));
    // Body: a + b then return it.
    assert!(ops.contains(&Opcode::BinOp));
    assert_eq!(*ops.last().unwrap(), Opcode::ReturnValue);
}

#[test]
fn inherited_varattrs_keep_base_prefix_and_varinit_chains() {
    let project = compile_main_ok(
        "class A {\n    var x = 1\n}\nclass B extends A {\n    var y = 2\n}\nfunc main {\n}\n",
    );
    assert_linked_invariants(&project.program);

    let symbols = &project.program.symbols;
    let module = symbols.module_by_key(Some("main"), None).unwrap();
    let a_id = module.class_symbols[module.class_name_to_entry["A"]].global_id;
    let b_id = module.class_symbols[module.class_name_to_entry["B"]].global_id;

    let x_name = symbols.get_attr_name_id("x").unwrap();
    let y_name = symbols.get_attr_name_id("y").unwrap();
    let class_a = project.program.class(a_id);
    let class_b = project.program.class(b_id);
    assert_eq!(class_b.base_class, Some(a_id));
    assert_eq!(class_b.varattr_name_ids, vec![x_name, y_name]);
    assert!(
        class_b.varattr_name_ids[..class_a.varattr_name_ids.len()]
            == class_a.varattr_name_ids[..],
        "derived varattr list starts with the base prefix"
    );
    // The attribute map agrees with a linear scan:
    assert_eq!(project.program.lookup_class_attribute(b_id, x_name), Some(0));
    assert_eq!(project.program.lookup_class_attribute(b_id, y_name), Some(1));

    // B's own $$varinit runs A's first, then stores 2 into y:
    let a_varinit = class_a.varinit_func.expect("A has varinit");
    let b_varinit = class_b.varinit_func.expect("B has varinit");
    assert_ne!(a_varinit, b_varinit);
    let b_init = project.program.func(b_varinit);
    assert!(b_init.instructions.iter().any(|inst| matches!(
        inst,
        Instruction::GetFunc { func_id, .. } if *func_id == a_varinit.0 as i32
    )));
    assert!(b_init.instructions.iter().any(|inst| matches!(
        inst,
        Instruction::SetByAttributeIdx {
            obj_slot_to: 0,
            varattr_index: 1,
            ..
        }
    )));
    // A's own initializer stores into slot 0:
    assert!(project.program.func(a_varinit).instructions.iter().any(|inst| matches!(
        inst,
        Instruction::SetByAttributeIdx {
            obj_slot_to: 0,
            varattr_index: 0,
            ..
        }
    )));
}

#[test]
fn do_rescue_finally_emits_one_frame_with_both_modes() {
    let project = compile_main_ok(
        "func risky {\n}\nfunc handle(e) {\n}\nfunc cleanup {\n}\nfunc main {\n    do {\n        risky()\n    } rescue Exception as e {\n        handle(e)\n    } finally {\n        cleanup()\n    }\n}\n",
    );
    assert_linked_invariants(&project.program);

    let main_func = project.program.main_func.unwrap();
    let instructions = &project.program.func(main_func).instructions;

    let frames: Vec<&Instruction> = instructions
        .iter()
        .filter(|inst| inst.opcode() == Opcode::PushCatchFrame)
        .collect();
    assert_eq!(frames.len(), 1);
    let Instruction::PushCatchFrame { mode, .. } = frames[0] else {
        unreachable!()
    };
    assert_eq!(*mode, 3, "both jumponcatch and jumponfinally set");

    let ops = opcodes(&project.program, main_func);
    assert!(ops.contains(&Opcode::AddCatchType));
    assert!(ops.contains(&Opcode::JumpToFinally));
    assert!(ops.contains(&Opcode::PopCatchFrame));
    // Frame setup comes first, catch type registration right after:
    let push_at = ops.iter().position(|o| *o == Opcode::PushCatchFrame).unwrap();
    let addtype_at = ops.iter().position(|o| *o == Opcode::AddCatchType).unwrap();
    let tofinally_at = ops.iter().position(|o| *o == Opcode::JumpToFinally).unwrap();
    let pop_at = ops.iter().position(|o| *o == Opcode::PopCatchFrame).unwrap();
    assert!(push_at < addtype_at);
    assert!(addtype_at < tofinally_at);
    assert!(tofinally_at < pop_at);
    // The registered type is the builtin Exception class (id 0):
    assert!(instructions.iter().any(|inst| matches!(
        inst,
        Instruction::AddCatchType { class_id: 0, .. }
    )));
}

#[test]
fn with_statement_closes_through_hasattrjump() {
    let project = compile_main_ok(
        "func open(path) {\n    return none\n}\nvar p = 1\nfunc main {\n    with open(p) as f {\n        f.read()\n    }\n}\n",
    );
    assert_linked_invariants(&project.program);

    let main_func = project.program.main_func.unwrap();
    let instructions = &project.program.func(main_func).instructions;
    let close_id = project.program.symbols.get_attr_name_id("close").unwrap();

    // Clause slot initialized to none before anything else:
    assert!(matches!(
        instructions[0],
        Instruction::SetConst {
            content: ValueContent::None,
            ..
        }
    ));
    // Outer frame is finally-only, guarding with class Exception:
    let Some(Instruction::PushCatchFrame { mode, .. }) = instructions
        .iter()
        .find(|inst| inst.opcode() == Opcode::PushCatchFrame)
    else {
        panic!("missing pushcatchframe");
    };
    assert_eq!(*mode, 2);

    // The finally part: hasattrjump over the close call.
    let hasattr_at = instructions
        .iter()
        .position(|inst| matches!(inst, Instruction::HasAttrJump { name_id, .. } if *name_id == close_id))
        .expect("hasattrjump on close");
    assert!(matches!(
        instructions[hasattr_at + 1],
        Instruction::GetAttributeByName { name_id, .. } if name_id == close_id
    ));
    let ops_after: Vec<Opcode> = instructions[hasattr_at + 2..]
        .iter()
        .map(|i| i.opcode())
        .collect();
    assert!(ops_after.contains(&Opcode::Call));
    assert!(ops_after.contains(&Opcode::PopCatchFrame));
}

#[test]
fn new_without_init_uses_callignoreifnone() {
    let project = compile_main_ok(
        "class MissingInit {\n}\nfunc main {\n    var obj = new MissingInit()\n}\n",
    );
    assert_linked_invariants(&project.program);

    let main_func = project.program.main_func.unwrap();
    let ops = opcodes(&project.program, main_func);
    let newinstance_at = ops.iter().position(|o| *o == Opcode::NewInstance).unwrap();
    let getconstructor_at = ops.iter().position(|o| *o == Opcode::GetConstructor).unwrap();
    let call_at = ops
        .iter()
        .position(|o| *o == Opcode::CallIgnoreIfNone)
        .expect("constructor call tolerates a missing init");
    assert!(newinstance_at < getconstructor_at);
    assert!(getconstructor_at < call_at);
}

// ------------------------------
// Boundary behaviors
// ------------------------------

#[test]
fn empty_function_still_returns_none() {
    let project = compile_main_ok("func noop {\n}\nfunc main {\n}\n");
    let noop = func_by_name(&project, "noop");
    let instructions = &project.program.func(noop).instructions;
    assert_eq!(instructions.len(), 2);
    assert!(matches!(
        instructions[0],
        Instruction::SetConst {
            slot: 0,
            content: ValueContent::None,
        }
    ));
    assert!(matches!(instructions[1], Instruction::ReturnValue { slot_from: 0 }));
    assert!(project.program.func(noop).inner_stack_size >= 1);
}

#[test]
fn single_clause_if_emits_one_condjump() {
    let project = compile_main_ok("func main {\n    if 1 == 2 {\n        print(1)\n    }\n}\n");
    assert_linked_invariants(&project.program);
    let main_func = project.program.main_func.unwrap();
    let ops = opcodes(&project.program, main_func);
    let condjumps = ops.iter().filter(|o| **o == Opcode::CondJump).count();
    assert_eq!(condjumps, 1);
    // The condjump skips forward over the body:
    let Some(Instruction::CondJump { jump, .. }) = project
        .program
        .func(main_func)
        .instructions
        .iter()
        .find(|inst| inst.opcode() == Opcode::CondJump)
    else {
        panic!("missing condjump");
    };
    assert!(*jump > 0);
}

#[test]
fn for_loop_iterate_can_exit_before_the_body() {
    let project = compile_main_ok("func main {\n    for x in [] {\n        print(x)\n    }\n}\n");
    assert_linked_invariants(&project.program);
    let main_func = project.program.main_func.unwrap();
    let ops = opcodes(&project.program, main_func);
    assert!(ops.contains(&Opcode::NewIterator));
    let Some(Instruction::Iterate { jump_on_end, .. }) = project
        .program
        .func(main_func)
        .instructions
        .iter()
        .find(|inst| inst.opcode() == Opcode::Iterate)
    else {
        panic!("missing iterate");
    };
    // Forward exit over the whole body, so an empty container runs it
    // zero times:
    assert!(*jump_on_end > 0);
    // The loop jumps backwards to re-iterate:
    assert!(project.program.func(main_func).instructions.iter().any(
        |inst| matches!(inst, Instruction::Jump { jump } if *jump < 0)
    ));
}

#[test]
fn input_stack_sizes_count_self_and_args() {
    let project = compile_main_ok(
        "class Greeter {\n    func greet(name, suffix = 1) {\n        return name\n    }\n}\nfunc free_func(a, b) {\n    return a\n}\nfunc main {\n}\n",
    );
    let free_func = func_by_name(&project, "free_func");
    assert_eq!(project.program.func(free_func).input_stack_size, 2);

    let module = project
        .program
        .symbols
        .module_by_key(Some("main"), None)
        .unwrap();
    let greeter = module.class_symbols[module.class_name_to_entry["Greeter"]].global_id;
    let greet_idx = project
        .program
        .lookup_class_attribute_by_name(greeter, "greet")
        .unwrap();
    let greet_func =
        project.program.class(greeter).funcattr_func_ids[(greet_idx - METHOD_OFFSET) as usize];
    // self + two declared args:
    assert_eq!(project.program.func(greet_func).input_stack_size, 3);
}

// ------------------------------
// Imports
// ------------------------------

#[test]
fn project_local_import_resolves_and_binds_symbols() {
    let (project, compiled) = compile_files(&[
        (
            "main.h64",
            "import helpers.texts\nfunc main {\n    print(helpers.texts.greeting)\n}\n",
        ),
        ("helpers/texts.h64", "var greeting = \"hi\"\n"),
    ]);
    assert!(
        compiled.is_ok(),
        "compile failed: {:?}",
        project.result.messages
    );
    assert_linked_invariants(&project.program);

    // The imported module registered its global under its module path:
    let module = project
        .program
        .symbols
        .module_by_key(Some("helpers.texts"), None)
        .expect("imported module symbols");
    assert!(module.globalvar_name_to_entry.contains_key("greeting"));

    // main reads that global:
    let main_func = project.program.main_func.unwrap();
    let global_id =
        module.globalvar_symbols[module.globalvar_name_to_entry["greeting"]].global_id;
    assert!(project.program.func(main_func).instructions.iter().any(
        |inst| matches!(inst, Instruction::GetGlobal { global_from, .. }
            if *global_from == global_id.0 as i32)
    ));
}

#[test]
fn library_imports_resolve_through_horse_modules() {
    let (project, compiled) = compile_files(&[
        (
            "main.h64",
            "import textutil from coollib\nfunc main {\n    textutil.shout()\n}\n",
        ),
        ("horse_modules/coollib/textutil.h64", "func shout {\n}\n"),
    ]);
    assert!(
        compiled.is_ok(),
        "compile failed: {:?}",
        project.result.messages
    );
    let module = project
        .program
        .symbols
        .module_by_key(Some("textutil"), Some("coollib"))
        .expect("library module registered under its library");
    assert!(module.func_name_to_entry.contains_key("shout"));
}

#[test]
fn import_resolution_is_deterministic() {
    let (project, _) = compile_files(&[
        ("main.h64", "import helpers.texts\nfunc main {\n}\n"),
        ("helpers/texts.h64", ""),
    ]);
    let main_uri = project.ast(horsec::compiler::parser::ast::AstId(0)).file_uri.clone();
    let elements = vec!["helpers".to_owned(), "texts".to_owned()];
    let first = project.resolve_import_to_file(&main_uri, &elements, None);
    let second = project.resolve_import_to_file(&main_uri, &elements, None);
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn cyclic_imports_terminate_and_compile() {
    let (project, compiled) = compile_files(&[
        (
            "main.h64",
            "import alpha\nfunc main {\n    alpha.ping()\n}\n",
        ),
        ("alpha.h64", "import beta\nfunc ping {\n}\n"),
        ("beta.h64", "import alpha\nfunc pong {\n}\n"),
    ]);
    assert!(
        compiled.is_ok(),
        "cyclic import graph failed: {:?}",
        project.result.messages
    );
}

#[test]
fn missing_import_is_an_error() {
    let (project, compiled) = compile_main("import does.not.exist\nfunc main {\n}\n");
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("not found for import")));
}

// ------------------------------
// Error cases
// ------------------------------

#[test]
fn unknown_identifier_fails_the_file() {
    let (project, compiled) = compile_main("func main {\n    print(missing_thing)\n}\n");
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("unknown identifier \"missing_thing\"")));
}

#[test]
fn base_class_cycle_is_detected() {
    let (project, compiled) = compile_main(
        "class A extends B {\n}\nclass B extends A {\n}\nfunc main {\n}\n",
    );
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("cycle in base classes")));
}

#[test]
fn varattr_override_is_rejected() {
    let (project, compiled) = compile_main(
        "class A {\n    var x = 1\n}\nclass B extends A {\n    var x = 2\n}\nfunc main {\n}\n",
    );
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("must not be overriding")));
}

#[test]
fn calling_a_class_without_new_is_an_error() {
    let (project, compiled) = compile_main(
        "class Thing {\n}\nfunc main {\n    Thing()\n}\n",
    );
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("use \"new Thing(...)\"")));
}

#[test]
fn async_func_calling_noasync_func_is_an_error() {
    let (project, compiled) = compile_main(
        "func slow noasync {\n}\nfunc fast async {\n    slow()\n}\nfunc main {\n}\n",
    );
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("cannot access func")));
}

#[test]
fn async_func_reading_mutable_global_is_an_error() {
    let (project, compiled) = compile_main(
        "var counter = 1\nfunc fast async {\n    print(counter)\n}\nfunc main {\n}\n",
    );
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("simple constant")));
}

#[test]
fn async_func_reading_simple_const_is_fine() {
    let project = compile_main_ok(
        "const limit = 10\nfunc fast async {\n    print(limit)\n}\nfunc main {\n}\n",
    );
    let fast = func_by_name(&project, "fast");
    assert!(project.program.func(fast).is_threadable);
    assert!(project.program.func(fast).user_set_parallel);
}

#[test]
fn missing_main_func_is_an_error() {
    let (project, compiled) = compile_main("var x = 1\n");
    assert!(compiled.is_err());
    assert!(project
        .result
        .messages
        .iter()
        .any(|m| m.message.contains("missing \"main\" func")));
}

#[test]
fn async_calls_pipe_their_result_and_await_emits_awaititem() {
    let project = compile_main_ok(
        "func job {\n    return 1\n}\nfunc main {\n    async job()\n    var handle = none\n    var got = await handle\n}\n",
    );
    assert_linked_invariants(&project.program);
    let main_func = project.program.main_func.unwrap();
    let instructions = &project.program.func(main_func).instructions;

    let pipe_at = instructions
        .iter()
        .position(|inst| inst.opcode() == Opcode::CreatePipe)
        .expect("async call prepares a pipe");
    let call_at = instructions
        .iter()
        .position(|inst| matches!(inst, Instruction::Call { is_async: true, .. }))
        .expect("async call carries the async bit");
    assert!(pipe_at < call_at);
    assert!(
        instructions
            .iter()
            .any(|inst| inst.opcode() == Opcode::AwaitItem)
    );
}

// ------------------------------
// Program dump
// ------------------------------

#[test]
fn program_dump_has_header_and_is_stable() {
    let project = compile_main_ok("var x = 1\nfunc main {\n    print(x)\n}\n");
    let first = project.program.dump_bytes();
    let second = project.program.dump_bytes();
    assert_eq!(first, second);
    assert!(first.starts_with(b"H64PROG\0"));
}
