//! AST -> linear instruction streams, with symbolic jump targets.
//!
//! The walk has a pre-order side that takes over emission for control
//! flow (while, for, if, do/rescue/finally, with, nested funcdefs, unary
//! new) and descends into children itself in the right order, and a
//! post-order side for straight-line constructs (literals, operators,
//! calls, constructors, returns, assignments).
//!
//! Two kinds of functions get synthesized without an AST node: one
//! project-wide `$$globalinit` collecting all top-level statements, and
//! one `$$varinit` per class with variable-attribute initializers.

use crate::bytecode::instructions::{
    CATCHMODE_JUMPONCATCH, CATCHMODE_JUMPONFINALLY, Instruction, MathOp,
};
use crate::bytecode::program::{ClassId, EXCEPTION_CLASS_ID, FuncId};
use crate::bytecode::value::ValueContent;
use crate::codegen_log;
use crate::compiler::parser::ast::{
    Ast, AstId, CallArgs, ExprKind, LiteralValue, NodeId, StorageKind, StorageRef,
};
use crate::compiler::parser::ast_helpers::{funcdef_is_method, is_in_extends_arg};
use crate::compiler::parser::operators::{AssignOpKind, BinOpKind, UnaryOpKind};
use crate::compiler::project::compile_project::CompileProject;
use crate::compiler::scope_resolver::GLOBALINIT_FUNC_NAME;
use crate::compiler::var_storage::{
    FuncStorageInfo, free_1_line_temps, free_multiline_temp, func_current_stack_top,
    new_1_line_temp, new_multiline_temp,
};
use crate::settings::MAX_DO_STMTS_PER_FUNC;

type CResult = Result<(), ()>;

/// The function instructions are currently emitted into: either a real
/// funcdef node, or one of the synthesized initializer functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitFunc {
    AstFunc(NodeId),
    Fake(FuncId),
}

fn func_id_of(ast: &Ast, func: EmitFunc) -> FuncId {
    match func {
        EmitFunc::Fake(id) => id,
        EmitFunc::AstFunc(node) => match &ast.node(node).kind {
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => funcdef
                .bytecode_func_id
                .expect("funcdefs are registered before codegen"),
            _ => unreachable!("EmitFunc::AstFunc always wraps a funcdef"),
        },
    }
}

fn with_einfo<R>(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    operation: impl FnOnce(&mut FuncStorageInfo) -> R,
) -> R {
    match func {
        EmitFunc::AstFunc(node) => {
            let einfo = ast.func_storage.entry(node).or_default();
            operation(einfo)
        }
        EmitFunc::Fake(id) => {
            let einfo = pr.fake_func_storage.entry(id.0).or_default();
            operation(einfo)
        }
    }
}

fn emit(pr: &mut CompileProject, ast: &Ast, func: EmitFunc, inst: Instruction) {
    let func_id = func_id_of(ast, func);
    pr.program.func_mut(func_id).instructions.push(inst);
}

fn alloc_jump_id(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc) -> i32 {
    with_einfo(pr, ast, func, |einfo| {
        let id = einfo.jump_targets_used;
        einfo.jump_targets_used += 1;
        id
    })
}

fn alloc_frame_id(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    at: NodeId,
) -> Result<i16, ()> {
    let frame_id = with_einfo(pr, ast, func, |einfo| {
        if einfo.dostmts_used >= MAX_DO_STMTS_PER_FUNC {
            return None;
        }
        let id = einfo.dostmts_used;
        einfo.dostmts_used += 1;
        Some(id as i16)
    });
    match frame_id {
        Some(id) => Ok(id),
        None => {
            let (line, column) = (ast.node(at).line, ast.node(at).column);
            ast.result.add_error(
                format!("exceeded maximum of {MAX_DO_STMTS_PER_FUNC} do statements in one func"),
                Some(&ast.file_uri.clone()),
                line,
                column,
            );
            Err(())
        }
    }
}

fn eval_temp(ast: &Ast, node: NodeId) -> i16 {
    ast.node(node).eval_temp_id as i16
}

/// Storage slot an assignment writes into, when it maps to one directly:
/// plain identifiers, and attribute accesses the resolver pre-flattened
/// (module member access).
fn assign_lvalue_storage(ast: &Ast, lvalue: NodeId) -> Option<StorageRef> {
    if let Some(storage) = ast.node(lvalue).storage {
        return Some(storage);
    }
    match &ast.node(lvalue).kind {
        ExprKind::IdentifierRef(_) => ast.node(lvalue).storage,
        ExprKind::BinaryOp {
            op: BinOpKind::Attribute,
            rhs,
            ..
        } => ast.node(*rhs).storage,
        _ => None,
    }
}

/// A one-line temporary for this expression's result. Reuses the slot
/// 'mandated' by a parent vardef or plain assignment, or a child operand
/// temporary, before allocating a fresh one.
fn result_temp_for(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    expr: NodeId,
) -> i32 {
    let lowest = with_einfo(pr, ast, func, |einfo| einfo.lowest_guaranteed_free_temp);

    if let Some(parent) = ast.node(expr).parent {
        match &ast.node(parent).kind {
            ExprKind::Assign {
                rvalue,
                op: AssignOpKind::Assign,
                lvalue,
            } if *rvalue == expr => {
                if let Some(storage) = assign_lvalue_storage(ast, *lvalue)
                    && storage.kind == StorageKind::StackSlot
                {
                    return storage.id as i32;
                }
            }
            ExprKind::VarDef(vardef) if vardef.value == Some(expr) => {
                if let Some(storage) = ast.node(parent).storage
                    && storage.kind == StorageKind::StackSlot
                {
                    return storage.id as i32;
                }
            }
            _ => {}
        }
    }

    // A binary or unary operator may overwrite one of its operand
    // temporaries:
    match &ast.node(expr).kind {
        ExprKind::BinaryOp { lhs, rhs, .. } => {
            if ast.node(*lhs).eval_temp_id >= lowest {
                return ast.node(*lhs).eval_temp_id;
            }
            if ast.node(*rhs).eval_temp_id >= lowest {
                return ast.node(*rhs).eval_temp_id;
            }
        }
        ExprKind::UnaryOp { operand, .. } => {
            if ast.node(*operand).eval_temp_id >= lowest {
                return ast.node(*operand).eval_temp_id;
            }
        }
        _ => {}
    }

    with_einfo(pr, ast, func, new_1_line_temp)
}

fn internal_error(ast: &mut Ast, node: NodeId, message: String) {
    let (line, column) = (ast.node(node).line, ast.node(node).column);
    ast.result.add_error(
        format!("internal error: {message}"),
        Some(&ast.file_uri.clone()),
        line,
        column,
    );
}

// ------------------------------
// Entry points
// ------------------------------

fn ensure_globalinit_func(pr: &mut CompileProject) -> FuncId {
    if let Some(func_id) = pr.program.globalinit_func {
        return func_id;
    }
    let func_id = pr
        .program
        .register_horse64_function(Some(GLOBALINIT_FUNC_NAME), None, &[], false, None, None, None)
        .expect("registering the global init func cannot collide");
    pr.program.globalinit_func = Some(func_id);
    pr.fake_func_storage
        .insert(func_id.0, FuncStorageInfo::default());
    func_id
}

/// Generate instruction streams for everything defined in one AST.
/// Top-level statements that sit in no function land in `$$globalinit`.
pub fn generate_bytecode_for_file(pr: &mut CompileProject, ast_id: AstId) -> Result<(), ()> {
    if !pr.result.success {
        return Ok(());
    }
    let mut ast = pr.take_ast(ast_id);
    codegen_log!({ format!("horsec: debug: codegen: {}", ast.file_uri) });

    let roots = ast.root_stmts.clone();
    let mut walk_result = Ok(());
    for root in roots {
        walk_result = match &ast.node(root).kind {
            ExprKind::FuncDef(_) => codegen_function(pr, &mut ast, root),
            ExprKind::ClassDef(_) => codegen_class(pr, &mut ast, root),
            ExprKind::Import(_) => Ok(()),
            _ => {
                let globalinit = ensure_globalinit_func(pr);
                codegen_expr(pr, &mut ast, EmitFunc::Fake(globalinit), root)
            }
        };
        if walk_result.is_err() {
            break;
        }
    }

    pr.result.transfer_from(&ast.result);
    pr.put_back_ast(ast_id, ast);
    walk_result
}

/// Compute the final stack sizes of the synthesized functions. Runs once
/// after every AST went through codegen.
pub fn finalize_fake_funcs(pr: &mut CompileProject) {
    let func_ids: Vec<u32> = pr.fake_func_storage.keys().copied().collect();
    for raw_id in func_ids {
        let func_id = FuncId(raw_id);
        let (lowest, max_extra) = {
            let einfo = &pr.fake_func_storage[&raw_id];
            (einfo.lowest_guaranteed_free_temp, einfo.max_extra_stack)
        };
        let func = pr.program.func_mut(func_id);
        let input = i32::from(func.associated_class.is_some()) + func.arg_count as i32;
        func.input_stack_size = input;
        func.inner_stack_size = (lowest + max_extra - input).max(0);
    }
}

/// One function body: keyword-argument default prologue, then the body
/// statements, then the final stack accounting.
fn codegen_function(pr: &mut CompileProject, ast: &mut Ast, func_node: NodeId) -> CResult {
    let func = EmitFunc::AstFunc(func_node);
    let func_id = func_id_of(ast, func);
    let (args, body) = match &ast.node(func_node).kind {
        ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
            (funcdef.arguments.clone(), funcdef.body.clone())
        }
        _ => return Ok(()),
    };

    let has_self = funcdef_is_method(ast, func_node);
    let closure_count = with_einfo(pr, ast, func, |einfo| einfo.closure_bound_vars.len());
    let arg_slot_base = i32::from(has_self) + closure_count as i32;

    // Keyword parameters default to the unspecified-kwarg sentinel on
    // entry; the prologue overwrites them with their default expression
    // when the caller left them unset.
    for (index, default) in args.arg_values.iter().enumerate() {
        let Some(default) = *default else {
            continue;
        };
        let arg_slot = (arg_slot_base + index as i32) as i16;
        let jump_past = alloc_jump_id(pr, ast, func);

        let check_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
        emit(
            pr,
            ast,
            func,
            Instruction::SetConst {
                slot: check_temp,
                content: ValueContent::UnspecifiedKwarg,
            },
        );
        emit(
            pr,
            ast,
            func,
            Instruction::BinOp {
                slot_to: check_temp,
                op: MathOp::CmpEqual,
                arg1_slot_from: arg_slot,
                arg2_slot_from: check_temp,
            },
        );
        emit(
            pr,
            ast,
            func,
            Instruction::CondJump {
                cond_slot: check_temp,
                jump: jump_past,
            },
        );
        with_einfo(pr, ast, func, free_1_line_temps);

        codegen_expr(pr, ast, func, default)?;
        emit(
            pr,
            ast,
            func,
            Instruction::ValueCopy {
                slot_to: arg_slot,
                slot_from: eval_temp(ast, default),
            },
        );
        emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_past });
        with_einfo(pr, ast, func, free_1_line_temps);
    }

    for stmt in body {
        codegen_expr(pr, ast, func, stmt)?;
    }

    // Final stack accounting:
    let (final_lowest, _) = with_einfo(pr, ast, func, |einfo| {
        einfo.lowest_guaranteed_free_temp += einfo.max_extra_stack;
        (einfo.lowest_guaranteed_free_temp, ())
    });
    let input = arg_slot_base + args.arg_count() as i32;
    let program_func = pr.program.func_mut(func_id);
    program_func.input_stack_size = input;
    program_func.inner_stack_size = (final_lowest - input).max(0);
    Ok(())
}

/// Class codegen: emit the `$$varinit` initializer when this class
/// declared one, then every method body.
fn codegen_class(pr: &mut CompileProject, ast: &mut Ast, class_node: NodeId) -> CResult {
    let (class_id, vardefs, funcdefs) = match &ast.node(class_node).kind {
        ExprKind::ClassDef(classdef) => match classdef.bytecode_class_id {
            Some(class_id) => (class_id, classdef.vardefs.clone(), classdef.funcdefs.clone()),
            None => return Ok(()),
        },
        _ => return Ok(()),
    };

    let varinit = pr.program.class(class_id).varinit_func;
    let owns_varinit = varinit
        .is_some_and(|func_id| pr.program.func(func_id).associated_class == Some(class_id));
    if owns_varinit {
        let varinit = varinit.expect("checked above");
        let func = EmitFunc::Fake(varinit);

        // A derived class's initializer first runs the base class's
        // initializer on the same instance.
        let parent_varinit = pr
            .program
            .class(class_id)
            .base_class
            .and_then(|parent| pr.program.class(parent).varinit_func);
        if let Some(parent_varinit) = parent_varinit {
            let func_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
            emit(
                pr,
                ast,
                func,
                Instruction::GetFunc {
                    slot_to: func_temp,
                    func_id: parent_varinit.0 as i32,
                },
            );
            let arg_floor = with_einfo(pr, ast, func, |einfo| func_current_stack_top(einfo));
            emit(
                pr,
                ast,
                func,
                Instruction::CallSetTop {
                    top_to: (arg_floor + 1) as i16,
                },
            );
            emit(
                pr,
                ast,
                func,
                Instruction::ValueCopy {
                    slot_to: arg_floor as i16,
                    slot_from: 0,
                },
            );
            with_einfo(pr, ast, func, |einfo| {
                let used = arg_floor + 1 - einfo.lowest_guaranteed_free_temp;
                if used > einfo.max_extra_stack {
                    einfo.max_extra_stack = used;
                }
            });
            emit(
                pr,
                ast,
                func,
                Instruction::Call {
                    return_to: func_temp,
                    slot_called_from: func_temp,
                    pos_args: 1,
                    kw_args: 0,
                    expand_last_pos_arg: false,
                    is_async: false,
                },
            );
            with_einfo(pr, ast, func, free_1_line_temps);
        }

        for vardef in vardefs {
            codegen_expr(pr, ast, func, vardef)?;
        }
    }

    for funcdef in funcdefs {
        codegen_function(pr, ast, funcdef)?;
    }
    Ok(())
}

// ------------------------------
// The main expression walk
// ------------------------------

fn codegen_expr(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let is_stmt = ast.node(node).kind.is_stmt();
    if is_stmt {
        with_einfo(pr, ast, func, free_1_line_temps);
    }

    // Pre-order interceptions that drive their own descent:
    match &ast.node(node).kind {
        ExprKind::While { .. } => return emit_while(pr, ast, func, node),
        ExprKind::If { .. } => return emit_if(pr, ast, func, node),
        ExprKind::For { .. } => return emit_for(pr, ast, func, node),
        ExprKind::Do(_) => return emit_do(pr, ast, func, node),
        ExprKind::With { .. } => return emit_with(pr, ast, func, node),
        ExprKind::FuncDef(_) => return emit_local_funcdef(pr, ast, func, node),
        ExprKind::InlineFuncDef(_) => return emit_inline_funcdef(pr, ast, func, node),
        ExprKind::UnaryOp {
            op: UnaryOpKind::New,
            ..
        } => return emit_new(pr, ast, func, node),
        _ => {}
    }

    for child in ast.children(node) {
        codegen_expr(pr, ast, func, child)?;
    }
    emit_straight_line(pr, ast, func, node)?;

    if is_stmt {
        with_einfo(pr, ast, func, free_1_line_temps);
    }
    Ok(())
}

fn emit_straight_line(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
) -> CResult {
    match &ast.node(node).kind {
        ExprKind::Literal(literal) => {
            let content = match literal {
                LiteralValue::Int(v) => ValueContent::Int64(*v),
                LiteralValue::Float(v) => ValueContent::Float64(*v),
                LiteralValue::Bool(v) => ValueContent::Bool(*v),
                LiteralValue::None => ValueContent::None,
                LiteralValue::Str(codepoints) => ValueContent::from_codepoints(codepoints),
                LiteralValue::Bytes(bytes) => ValueContent::from_bytes(bytes),
            };
            let temp = result_temp_for(pr, ast, func, node);
            emit(
                pr,
                ast,
                func,
                Instruction::SetConst {
                    slot: temp as i16,
                    content,
                },
            );
            ast.node_mut(node).eval_temp_id = temp;
        }

        ExprKind::IdentifierRef(identifier) => {
            // The right-hand side of a true runtime attribute access has
            // no storage and emits nothing itself.
            let parent_attr_rhs = ast.node(node).parent.is_some_and(|parent| {
                matches!(
                    &ast.node(parent).kind,
                    ExprKind::BinaryOp { op: BinOpKind::Attribute, rhs, .. } if *rhs == node
                )
            });
            if parent_attr_rhs && ast.node(node).storage.is_none() {
                return Ok(());
            }
            if is_in_extends_arg(ast, node) {
                return Ok(());
            }

            // Closure-captured definitions live in this function's own
            // assignment table rather than the slot of the declaring
            // function.
            if let Some(def) = identifier.resolved_to_def {
                let captured_slot = with_einfo(pr, ast, func, |einfo| {
                    einfo
                        .assignments
                        .iter()
                        .find(|assignment| assignment.def == def)
                        .map(|assignment| assignment.value_temp_id)
                });
                if let (Some(slot), EmitFunc::AstFunc(_)) = (captured_slot, func) {
                    ast.node_mut(node).eval_temp_id = slot;
                    return Ok(());
                }
            }

            let Some(storage) = ast.node(node).storage else {
                internal_error(ast, node, "missing storage on resolved identifier".to_owned());
                return Ok(());
            };
            match storage.kind {
                StorageKind::StackSlot => {
                    ast.node_mut(node).eval_temp_id = storage.id as i32;
                }
                StorageKind::GlobalVarSlot => {
                    let temp = result_temp_for(pr, ast, func, node);
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::GetGlobal {
                            slot_to: temp as i16,
                            global_from: storage.id as i32,
                        },
                    );
                    ast.node_mut(node).eval_temp_id = temp;
                }
                StorageKind::GlobalFuncSlot => {
                    let temp = result_temp_for(pr, ast, func, node);
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::GetFunc {
                            slot_to: temp as i16,
                            func_id: storage.id as i32,
                        },
                    );
                    ast.node_mut(node).eval_temp_id = temp;
                }
                StorageKind::GlobalClassSlot => {
                    let temp = result_temp_for(pr, ast, func, node);
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::GetClass {
                            slot_to: temp as i16,
                            class_id: storage.id as i32,
                        },
                    );
                    ast.node_mut(node).eval_temp_id = temp;
                }
                StorageKind::VarAttrSlot => {
                    internal_error(
                        ast,
                        node,
                        "variable attribute read outside of member access".to_owned(),
                    );
                }
            }
        }

        ExprKind::UnaryOp { op, operand } => {
            let operand = *operand;
            match op {
                UnaryOpKind::New => unreachable!("handled in the pre-order side"),
                UnaryOpKind::Await => {
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::AwaitItem {
                            obj_slot: eval_temp(ast, operand),
                        },
                    );
                    ast.node_mut(node).eval_temp_id = ast.node(operand).eval_temp_id;
                }
                UnaryOpKind::Negate | UnaryOpKind::Not => {
                    let math_op = op
                        .to_math_op()
                        .expect("negate/not always map to a unop");
                    let temp = result_temp_for(pr, ast, func, node);
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::UnOp {
                            slot_to: temp as i16,
                            op: math_op,
                            arg_slot_from: eval_temp(ast, operand),
                        },
                    );
                    ast.node_mut(node).eval_temp_id = temp;
                }
            }
        }

        ExprKind::BinaryOp { op, lhs, rhs } => {
            let (op, lhs, rhs) = (*op, *lhs, *rhs);
            if is_in_extends_arg(ast, node) {
                return Ok(());
            }
            let is_assign_lvalue = ast.node(node).parent.is_some_and(|parent| {
                matches!(
                    &ast.node(parent).kind,
                    ExprKind::Assign { lvalue, .. } if *lvalue == node
                )
            });

            if op == BinOpKind::Attribute {
                if is_assign_lvalue {
                    return Ok(()); // the assign statement handles the store
                }
                if let Some(storage) = ast.node(rhs).storage {
                    // Pre-resolved module access: the right-hand
                    // identifier emitted the global load already.
                    let _ = storage;
                    ast.node_mut(node).eval_temp_id = ast.node(rhs).eval_temp_id;
                    return Ok(());
                }
                let name = match &ast.node(rhs).kind {
                    ExprKind::IdentifierRef(identifier) => {
                        identifier.name.resolve(&pr.string_table).to_owned()
                    }
                    _ => {
                        internal_error(
                            ast,
                            node,
                            "attribute access without identifier name".to_owned(),
                        );
                        return Ok(());
                    }
                };
                let Some(name_id) = pr.program.symbols.get_attr_name_id(&name) else {
                    internal_error(ast, node, format!("cannot map attribute name: {name}"));
                    return Ok(());
                };
                let temp = result_temp_for(pr, ast, func, node);
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::GetAttributeByName {
                        slot_to: temp as i16,
                        obj_slot_from: eval_temp(ast, lhs),
                        name_id,
                    },
                );
                ast.node_mut(node).eval_temp_id = temp;
                return Ok(());
            }

            if op == BinOpKind::Index && is_assign_lvalue {
                return Ok(()); // handled by the assign statement
            }
            let math_op = op.to_math_op().expect("attribute handled above");
            let temp = result_temp_for(pr, ast, func, node);
            emit(
                pr,
                ast,
                func,
                Instruction::BinOp {
                    slot_to: temp as i16,
                    op: math_op,
                    arg1_slot_from: eval_temp(ast, lhs),
                    arg2_slot_from: eval_temp(ast, rhs),
                },
            );
            ast.node_mut(node).eval_temp_id = temp;
        }

        ExprKind::Call(_) => {
            let (callee, args, is_async) = match &ast.node(node).kind {
                ExprKind::Call(call) => {
                    (call.callee, call.args.clone(), call.is_async)
                }
                _ => unreachable!(),
            };
            let result_temp = result_temp_for(pr, ast, func, node);
            if is_async {
                // Async calls hand their result back through a pipe.
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::CreatePipe {
                        slot_to: result_temp as i16,
                    },
                );
            }
            emit_call_to(
                pr,
                ast,
                func,
                node,
                &args,
                eval_temp(ast, callee),
                result_temp as i16,
                is_async,
                false,
            )?;
            ast.node_mut(node).eval_temp_id = result_temp;
        }

        ExprKind::CallStmt { call } => {
            let call_temp = ast.node(*call).eval_temp_id;
            ast.node_mut(node).eval_temp_id = call_temp;
        }

        ExprKind::Return { value } => {
            let return_temp = match value {
                Some(value) => eval_temp(ast, *value),
                None => {
                    let temp = result_temp_for(pr, ast, func, node) as i16;
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::SetConst {
                            slot: temp,
                            content: ValueContent::None,
                        },
                    );
                    temp
                }
            };
            emit(
                pr,
                ast,
                func,
                Instruction::ReturnValue {
                    slot_from: return_temp,
                },
            );
        }

        ExprKind::ListLiteral { entries } | ExprKind::SetLiteral { entries } => {
            let entries = entries.clone();
            let is_list = matches!(ast.node(node).kind, ExprKind::ListLiteral { .. });
            let container_temp = result_temp_for(pr, ast, func, node) as i16;
            emit(
                pr,
                ast,
                func,
                if is_list {
                    Instruction::NewList {
                        slot_to: container_temp,
                    }
                } else {
                    Instruction::NewSet {
                        slot_to: container_temp,
                    }
                },
            );
            let Some(add_name_id) = pr.program.symbols.known_names.add else {
                internal_error(ast, node, "cannot map attribute name: add".to_owned());
                return Ok(());
            };
            for entry in entries {
                let method_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::GetAttributeByName {
                        slot_to: method_temp,
                        obj_slot_from: container_temp,
                        name_id: add_name_id,
                    },
                );
                let args = CallArgs {
                    pos_args: vec![entry],
                    ..CallArgs::default()
                };
                emit_call_to(pr, ast, func, node, &args, method_temp, method_temp, false, false)?;
            }
            ast.node_mut(node).eval_temp_id = container_temp as i32;
        }

        ExprKind::VectorLiteral { entries } => {
            let entries = entries.clone();
            let container_temp = result_temp_for(pr, ast, func, node) as i16;
            emit(
                pr,
                ast,
                func,
                Instruction::NewVector {
                    slot_to: container_temp,
                },
            );
            // One reused integer key temporary for all components:
            let key_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
            for (index, entry) in entries.iter().enumerate() {
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::SetConst {
                        slot: key_temp,
                        content: ValueContent::Int64(index as i64 + 1),
                    },
                );
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::SetByIndexExpr {
                        obj_slot_to: container_temp,
                        index_slot: key_temp,
                        slot_value_from: eval_temp(ast, *entry),
                    },
                );
            }
            ast.node_mut(node).eval_temp_id = container_temp as i32;
        }

        ExprKind::MapLiteral { keys, values } => {
            let pairs: Vec<(NodeId, NodeId)> = keys
                .iter()
                .copied()
                .zip(values.iter().copied())
                .collect();
            let container_temp = result_temp_for(pr, ast, func, node) as i16;
            emit(
                pr,
                ast,
                func,
                Instruction::NewMap {
                    slot_to: container_temp,
                },
            );
            for (key, value) in pairs {
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::SetByIndexExpr {
                        obj_slot_to: container_temp,
                        index_slot: eval_temp(ast, key),
                        slot_value_from: eval_temp(ast, value),
                    },
                );
            }
            ast.node_mut(node).eval_temp_id = container_temp as i32;
        }

        ExprKind::VarDef(vardef) => {
            let value = vardef.value;
            let Some(storage) = ast.node(node).storage else {
                // An unresolved definition in failed code, or a global
                // that errored during registration.
                return Ok(());
            };
            let from_temp = match value {
                Some(value) => eval_temp(ast, value),
                None => {
                    if storage.kind != StorageKind::StackSlot {
                        // Globals and members default to none anyway.
                        return Ok(());
                    }
                    let temp = result_temp_for(pr, ast, func, node) as i16;
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::SetConst {
                            slot: temp,
                            content: ValueContent::None,
                        },
                    );
                    temp
                }
            };
            emit_store_to_storage(pr, ast, func, node, storage, from_temp)?;
        }

        ExprKind::Assign { .. } => {
            emit_assign(pr, ast, func, node)?;
        }

        ExprKind::WithClause { .. } | ExprKind::Import(_) => {}

        ExprKind::FuncDef(_)
        | ExprKind::InlineFuncDef(_)
        | ExprKind::ClassDef(_)
        | ExprKind::If { .. }
        | ExprKind::While { .. }
        | ExprKind::For { .. }
        | ExprKind::Do(_)
        | ExprKind::With { .. } => {
            // Handled in the pre-order side.
        }
    }
    Ok(())
}

/// Store a value into a storage target: stack slot, global, or (from
/// within methods and initializers) a variable attribute of self.
fn emit_store_to_storage(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
    storage: StorageRef,
    from_temp: i16,
) -> CResult {
    match storage.kind {
        StorageKind::GlobalVarSlot => {
            emit(
                pr,
                ast,
                func,
                Instruction::SetGlobal {
                    global_to: storage.id as i32,
                    slot_from: from_temp,
                },
            );
        }
        StorageKind::VarAttrSlot => {
            // Slot 0 is always self here.
            emit(
                pr,
                ast,
                func,
                Instruction::SetByAttributeIdx {
                    obj_slot_to: 0,
                    varattr_index: storage.id as i16,
                    slot_value_from: from_temp,
                },
            );
        }
        StorageKind::StackSlot => {
            if storage.id as i16 != from_temp {
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::ValueCopy {
                        slot_to: storage.id as i16,
                        slot_from: from_temp,
                    },
                );
            }
        }
        StorageKind::GlobalFuncSlot | StorageKind::GlobalClassSlot => {
            internal_error(
                ast,
                node,
                "assignment target is a func or class and cannot be stored to".to_owned(),
            );
        }
    }
    Ok(())
}

fn emit_assign(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let (lvalue, rvalue, assign_op) = match &ast.node(node).kind {
        ExprKind::Assign {
            lvalue,
            rvalue,
            op,
        } => (*lvalue, *rvalue, *op),
        _ => unreachable!(),
    };

    let direct_storage = assign_lvalue_storage(ast, lvalue);
    let mut assign_from = eval_temp(ast, rvalue);

    // a.b = v and a[b] = v with no pre-resolved storage go through the
    // dedicated setter instructions:
    let complex_target: Option<(BinOpKind, NodeId, NodeId)> = match &ast.node(lvalue).kind {
        ExprKind::BinaryOp { op, lhs, rhs }
            if direct_storage.is_none()
                && matches!(op, BinOpKind::Attribute | BinOpKind::Index) =>
        {
            Some((*op, *lhs, *rhs))
        }
        _ => None,
    };

    if assign_op != AssignOpKind::Assign {
        // Compound assignment: read the old value, apply the math op,
        // store the result.
        let math_op = assign_op
            .to_math_op()
            .expect("compound ops always map to math ops");
        let old_value_temp = match (&complex_target, direct_storage) {
            (None, Some(storage)) if storage.kind == StorageKind::GlobalVarSlot => {
                let temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::GetGlobal {
                        slot_to: temp,
                        global_from: storage.id as i32,
                    },
                );
                temp
            }
            (None, Some(storage)) if storage.kind == StorageKind::StackSlot => {
                storage.id as i16
            }
            (Some((BinOpKind::Attribute, lhs, rhs)), _) => {
                let name = match &ast.node(*rhs).kind {
                    ExprKind::IdentifierRef(identifier) => {
                        identifier.name.resolve(&pr.string_table).to_owned()
                    }
                    _ => String::new(),
                };
                let Some(name_id) = pr.program.symbols.get_attr_name_id(&name) else {
                    internal_error(ast, node, format!("cannot map attribute name: {name}"));
                    return Ok(());
                };
                let temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::GetAttributeByName {
                        slot_to: temp,
                        obj_slot_from: eval_temp(ast, *lhs),
                        name_id,
                    },
                );
                temp
            }
            (Some((BinOpKind::Index, lhs, rhs)), _) => {
                let temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::BinOp {
                        slot_to: temp,
                        op: MathOp::IndexByExpr,
                        arg1_slot_from: eval_temp(ast, *lhs),
                        arg2_slot_from: eval_temp(ast, *rhs),
                    },
                );
                temp
            }
            _ => {
                internal_error(
                    ast,
                    node,
                    "compound assignment to unsupported target".to_owned(),
                );
                return Ok(());
            }
        };
        emit(
            pr,
            ast,
            func,
            Instruction::BinOp {
                slot_to: old_value_temp,
                op: math_op,
                arg1_slot_from: old_value_temp,
                arg2_slot_from: assign_from,
            },
        );
        assign_from = old_value_temp;
    }

    match complex_target {
        Some((BinOpKind::Attribute, lhs, rhs)) => {
            let name = match &ast.node(rhs).kind {
                ExprKind::IdentifierRef(identifier) => {
                    identifier.name.resolve(&pr.string_table).to_owned()
                }
                _ => {
                    internal_error(
                        ast,
                        node,
                        "attribute assignment without identifier name".to_owned(),
                    );
                    return Ok(());
                }
            };
            let Some(name_id) = pr.program.symbols.get_attr_name_id(&name) else {
                internal_error(ast, node, format!("cannot map attribute name: {name}"));
                return Ok(());
            };
            emit(
                pr,
                ast,
                func,
                Instruction::SetByAttributeName {
                    obj_slot_to: eval_temp(ast, lhs),
                    name_id,
                    slot_value_from: assign_from,
                },
            );
        }
        Some((BinOpKind::Index, lhs, rhs)) => {
            emit(
                pr,
                ast,
                func,
                Instruction::SetByIndexExpr {
                    obj_slot_to: eval_temp(ast, lhs),
                    index_slot: eval_temp(ast, rhs),
                    slot_value_from: assign_from,
                },
            );
        }
        Some(_) => unreachable!(),
        None => {
            let Some(storage) = direct_storage else {
                internal_error(ast, node, "assignment target without storage".to_owned());
                return Ok(());
            };
            emit_store_to_storage(pr, ast, func, node, storage, assign_from)?;
        }
    }
    Ok(())
}

/// Argument area setup plus the call instruction itself. The
/// `callsettop` emitted up front is patched in place as arguments grow
/// the needed stack top.
#[allow(clippy::too_many_arguments)]
fn emit_call_to(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    call_node: NodeId,
    args: &CallArgs,
    called_from_temp: i16,
    result_temp: i16,
    is_async: bool,
    ignore_if_none: bool,
) -> CResult {
    let func_id = func_id_of(ast, func);
    let arg_floor = with_einfo(pr, ast, func, |einfo| func_current_stack_top(einfo));
    emit(
        pr,
        ast,
        func,
        Instruction::CallSetTop {
            top_to: arg_floor as i16,
        },
    );
    let settop_index = pr.program.func(func_id).instructions.len() - 1;
    let mut arg_temp = arg_floor;

    let mut patch_settop = |pr: &mut CompileProject, new_top: i32| {
        if let Instruction::CallSetTop { top_to } =
            &mut pr.program.func_mut(func_id).instructions[settop_index]
        {
            *top_to = new_top as i16;
        }
    };

    let pos_count = args.pos_args.len() as i16;
    for pos_arg in &args.pos_args {
        emit(
            pr,
            ast,
            func,
            Instruction::ValueCopy {
                slot_to: arg_temp as i16,
                slot_from: eval_temp(ast, *pos_arg),
            },
        );
        arg_temp += 1;
        patch_settop(pr, arg_temp);
    }

    let kw_count = args.kw_names.len() as i16;
    for (kw_name, kw_value) in args.kw_names.iter().zip(&args.kw_values) {
        let name = kw_name.resolve(&pr.string_table).to_owned();
        let Some(kw_name_id) = pr.program.symbols.get_attr_name_id(&name) else {
            internal_error(ast, call_node, format!("cannot map kw arg name: {name}"));
            return Ok(());
        };
        emit(
            pr,
            ast,
            func,
            Instruction::SetConst {
                slot: arg_temp as i16,
                content: ValueContent::Int64(kw_name_id),
            },
        );
        arg_temp += 1;
        patch_settop(pr, arg_temp);
        emit(
            pr,
            ast,
            func,
            Instruction::ValueCopy {
                slot_to: arg_temp as i16,
                slot_from: eval_temp(ast, *kw_value),
            },
        );
        arg_temp += 1;
        patch_settop(pr, arg_temp);
    }

    with_einfo(pr, ast, func, |einfo| {
        let used = arg_temp - einfo.lowest_guaranteed_free_temp;
        if used > einfo.max_extra_stack {
            einfo.max_extra_stack = used;
        }
    });

    let call_inst = if ignore_if_none {
        Instruction::CallIgnoreIfNone {
            return_to: result_temp,
            slot_called_from: called_from_temp,
            pos_args: pos_count,
            kw_args: kw_count,
            expand_last_pos_arg: args.expand_last_posarg,
            is_async,
        }
    } else {
        Instruction::Call {
            return_to: result_temp,
            slot_called_from: called_from_temp,
            pos_args: pos_count,
            kw_args: kw_count,
            expand_last_pos_arg: args.expand_last_posarg,
            is_async,
        }
    };
    emit(pr, ast, func, call_inst);
    Ok(())
}

// ------------------------------
// Control flow
// ------------------------------

fn emit_while(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let (cond, body) = match &ast.node(node).kind {
        ExprKind::While { cond, body, .. } => (*cond, body.clone()),
        _ => unreachable!(),
    };
    let jump_start = alloc_jump_id(pr, ast, func);
    let jump_end = alloc_jump_id(pr, ast, func);

    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_start });
    codegen_expr(pr, ast, func, cond)?;
    emit(
        pr,
        ast,
        func,
        Instruction::CondJump {
            cond_slot: eval_temp(ast, cond),
            jump: jump_end,
        },
    );
    for stmt in body {
        codegen_expr(pr, ast, func, stmt)?;
    }
    emit(pr, ast, func, Instruction::Jump { jump: jump_start });
    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_end });
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

fn emit_if(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let clauses = match &ast.node(node).kind {
        ExprKind::If { clauses } => clauses.clone(),
        _ => unreachable!(),
    };
    let jump_end = alloc_jump_id(pr, ast, func);

    let clause_count = clauses.len();
    for (index, clause) in clauses.iter().enumerate() {
        let is_last = index + 1 == clause_count;
        match clause.cond {
            Some(cond) => {
                codegen_expr(pr, ast, func, cond)?;
                let next_target = if is_last {
                    jump_end
                } else {
                    alloc_jump_id(pr, ast, func)
                };
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::CondJump {
                        cond_slot: eval_temp(ast, cond),
                        jump: next_target,
                    },
                );
                for stmt in &clause.body {
                    codegen_expr(pr, ast, func, *stmt)?;
                }
                if !is_last {
                    emit(pr, ast, func, Instruction::Jump { jump: jump_end });
                    emit(
                        pr,
                        ast,
                        func,
                        Instruction::JumpTarget {
                            jump_id: next_target,
                        },
                    );
                }
            }
            None => {
                for stmt in &clause.body {
                    codegen_expr(pr, ast, func, *stmt)?;
                }
            }
        }
    }
    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_end });
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

fn emit_for(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let (container, body) = match &ast.node(node).kind {
        ExprKind::For {
            container, body, ..
        } => (*container, body.clone()),
        _ => unreachable!(),
    };
    let jump_start = alloc_jump_id(pr, ast, func);
    let jump_end = alloc_jump_id(pr, ast, func);
    let iterator_temp = with_einfo(pr, ast, func, new_multiline_temp);

    codegen_expr(pr, ast, func, container)?;
    emit(
        pr,
        ast,
        func,
        Instruction::NewIterator {
            slot_iterator_to: iterator_temp as i16,
            slot_container_from: eval_temp(ast, container),
        },
    );
    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_start });

    let Some(value_storage) = ast.node(node).storage else {
        internal_error(ast, node, "for iterator without assigned storage".to_owned());
        return Err(());
    };
    emit(
        pr,
        ast,
        func,
        Instruction::Iterate {
            slot_value_to: value_storage.id as i16,
            slot_iterator_from: iterator_temp as i16,
            jump_on_end: jump_end,
        },
    );
    for stmt in body {
        codegen_expr(pr, ast, func, stmt)?;
    }
    emit(pr, ast, func, Instruction::Jump { jump: jump_start });
    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_end });
    with_einfo(pr, ast, func, |einfo| {
        free_multiline_temp(einfo, iterator_temp)
    });
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

fn emit_do(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let dostmt = match &ast.node(node).kind {
        ExprKind::Do(dostmt) => dostmt.clone(),
        _ => unreachable!(),
    };
    let frame_id = alloc_frame_id(pr, ast, func, node)?;
    let jump_end = alloc_jump_id(pr, ast, func);

    let mut mode: u8 = 0;
    let mut jump_catch = -1;
    let mut jump_finally = -1;
    // The catch variable's slot, when one is bound and used:
    let error_slot: i16 = match ast.node(node).storage {
        Some(storage) if storage.kind == StorageKind::StackSlot => storage.id as i16,
        _ => -1,
    };
    if dostmt.has_rescue {
        mode |= CATCHMODE_JUMPONCATCH;
        jump_catch = alloc_jump_id(pr, ast, func);
    }
    if dostmt.has_finally {
        mode |= CATCHMODE_JUMPONFINALLY;
        jump_finally = alloc_jump_id(pr, ast, func);
    }
    emit(
        pr,
        ast,
        func,
        Instruction::PushCatchFrame {
            frame_id,
            mode,
            slot_error_to: error_slot,
            jump_on_catch: jump_catch,
            jump_on_finally: jump_finally,
        },
    );

    // Register the caught error types: compile-time known classes
    // directly, everything else through a runtime slot.
    let mut error_reuse_temp: i16 = -1;
    for error_ref in &dostmt.errors {
        let storage = ast.node(*error_ref).storage;
        match storage {
            Some(storage) if storage.kind == StorageKind::GlobalClassSlot => {
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::AddCatchType {
                        frame_id,
                        class_id: storage.id as i32,
                    },
                );
            }
            Some(storage) if storage.kind == StorageKind::GlobalVarSlot => {
                if error_reuse_temp < 0 {
                    error_reuse_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
                }
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::GetGlobal {
                        slot_to: error_reuse_temp,
                        global_from: storage.id as i32,
                    },
                );
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::AddCatchTypeByRef {
                        frame_id,
                        slot_from: error_reuse_temp,
                    },
                );
            }
            Some(storage) if storage.kind == StorageKind::StackSlot => {
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::AddCatchTypeByRef {
                        frame_id,
                        slot_from: storage.id as i16,
                    },
                );
            }
            _ => {
                // A runtime-evaluated error type expression:
                codegen_expr(pr, ast, func, *error_ref)?;
                emit(
                    pr,
                    ast,
                    func,
                    Instruction::AddCatchTypeByRef {
                        frame_id,
                        slot_from: eval_temp(ast, *error_ref),
                    },
                );
            }
        }
    }

    for stmt in &dostmt.body {
        codegen_expr(pr, ast, func, *stmt)?;
        with_einfo(pr, ast, func, free_1_line_temps);
    }
    if mode & CATCHMODE_JUMPONFINALLY == 0 {
        emit(pr, ast, func, Instruction::PopCatchFrame { frame_id });
        if mode & CATCHMODE_JUMPONCATCH != 0 {
            emit(pr, ast, func, Instruction::Jump { jump: jump_end });
        }
    } else {
        // Even when the finally block follows immediately, the VM needs
        // the explicit transition so it knows the finally was entered.
        emit(pr, ast, func, Instruction::JumpToFinally { frame_id });
    }

    if mode & CATCHMODE_JUMPONCATCH != 0 {
        emit(
            pr,
            ast,
            func,
            Instruction::JumpTarget {
                jump_id: jump_catch,
            },
        );
        for stmt in &dostmt.rescue_body {
            codegen_expr(pr, ast, func, *stmt)?;
            with_einfo(pr, ast, func, free_1_line_temps);
        }
        if mode & CATCHMODE_JUMPONFINALLY == 0 {
            emit(pr, ast, func, Instruction::PopCatchFrame { frame_id });
        }
        // With a finally block, execution simply rolls into it below.
    }

    if mode & CATCHMODE_JUMPONFINALLY != 0 {
        emit(
            pr,
            ast,
            func,
            Instruction::JumpTarget {
                jump_id: jump_finally,
            },
        );
        for stmt in &dostmt.finally_body {
            codegen_expr(pr, ast, func, *stmt)?;
            with_einfo(pr, ast, func, free_1_line_temps);
        }
        emit(pr, ast, func, Instruction::PopCatchFrame { frame_id });
    }

    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_end });
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

fn emit_with(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let (clauses, body) = match &ast.node(node).kind {
        ExprKind::With { clauses, body, .. } => (clauses.clone(), body.clone()),
        _ => unreachable!(),
    };
    let outer_frame = alloc_frame_id(pr, ast, func, node)?;
    let jump_finally = alloc_jump_id(pr, ast, func);

    // Initialize every clause slot to none up front, so the finally can
    // safely inspect slots whose clause never ran.
    let mut clause_slots: Vec<i16> = Vec::with_capacity(clauses.len());
    for clause in &clauses {
        let Some(storage) = ast.node(*clause).storage else {
            internal_error(ast, *clause, "with clause without assigned storage".to_owned());
            return Err(());
        };
        clause_slots.push(storage.id as i16);
        emit(
            pr,
            ast,
            func,
            Instruction::SetConst {
                slot: storage.id as i16,
                content: ValueContent::None,
            },
        );
    }

    emit(
        pr,
        ast,
        func,
        Instruction::PushCatchFrame {
            frame_id: outer_frame,
            mode: CATCHMODE_JUMPONFINALLY,
            slot_error_to: -1,
            jump_on_catch: -1,
            jump_on_finally: jump_finally,
        },
    );
    emit(
        pr,
        ast,
        func,
        Instruction::AddCatchType {
            frame_id: outer_frame,
            class_id: EXCEPTION_CLASS_ID.0 as i32,
        },
    );

    // Evaluate the clause values into their slots:
    for (clause, slot) in clauses.iter().zip(&clause_slots) {
        let value = match &ast.node(*clause).kind {
            ExprKind::WithClause { value, .. } => *value,
            _ => unreachable!(),
        };
        codegen_expr(pr, ast, func, value)?;
        emit(
            pr,
            ast,
            func,
            Instruction::ValueCopy {
                slot_to: *slot,
                slot_from: eval_temp(ast, value),
            },
        );
        with_einfo(pr, ast, func, free_1_line_temps);
    }

    for stmt in body {
        codegen_expr(pr, ast, func, stmt)?;
    }
    emit(
        pr,
        ast,
        func,
        Instruction::JumpToFinally {
            frame_id: outer_frame,
        },
    );
    emit(
        pr,
        ast,
        func,
        Instruction::JumpTarget {
            jump_id: jump_finally,
        },
    );

    // Close every clause value that has a close attribute, in declaration
    // order. With several clauses, nested finally-frames make sure one
    // failing close() cannot skip the remaining ones.
    emit_with_closes(pr, ast, func, node, &clause_slots)?;

    emit(
        pr,
        ast,
        func,
        Instruction::PopCatchFrame {
            frame_id: outer_frame,
        },
    );
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

fn emit_with_closes(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
    clause_slots: &[i16],
) -> CResult {
    let Some((&slot, remaining)) = clause_slots.split_first() else {
        return Ok(());
    };

    if remaining.is_empty() {
        return emit_one_close(pr, ast, func, node, slot);
    }

    let inner_frame = alloc_frame_id(pr, ast, func, node)?;
    let jump_inner_finally = alloc_jump_id(pr, ast, func);
    emit(
        pr,
        ast,
        func,
        Instruction::PushCatchFrame {
            frame_id: inner_frame,
            mode: CATCHMODE_JUMPONFINALLY,
            slot_error_to: -1,
            jump_on_catch: -1,
            jump_on_finally: jump_inner_finally,
        },
    );
    emit_one_close(pr, ast, func, node, slot)?;
    emit(
        pr,
        ast,
        func,
        Instruction::JumpToFinally {
            frame_id: inner_frame,
        },
    );
    emit(
        pr,
        ast,
        func,
        Instruction::JumpTarget {
            jump_id: jump_inner_finally,
        },
    );
    emit_with_closes(pr, ast, func, node, remaining)?;
    emit(
        pr,
        ast,
        func,
        Instruction::PopCatchFrame {
            frame_id: inner_frame,
        },
    );
    Ok(())
}

fn emit_one_close(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
    slot: i16,
) -> CResult {
    let close_name_id = match pr.program.symbols.attr_name_id("close", true) {
        Some(id) => id,
        None => {
            internal_error(ast, node, "cannot map attribute name: close".to_owned());
            return Ok(());
        }
    };
    let jump_past = alloc_jump_id(pr, ast, func);
    emit(
        pr,
        ast,
        func,
        Instruction::HasAttrJump {
            slot_from: slot,
            name_id: close_name_id,
            jump: jump_past,
        },
    );
    let method_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
    emit(
        pr,
        ast,
        func,
        Instruction::GetAttributeByName {
            slot_to: method_temp,
            obj_slot_from: slot,
            name_id: close_name_id,
        },
    );
    emit_call_to(
        pr,
        ast,
        func,
        node,
        &CallArgs::default(),
        method_temp,
        method_temp,
        false,
        false,
    )?;
    emit(pr, ast, func, Instruction::JumpTarget { jump_id: jump_past });
    with_einfo(pr, ast, func, free_1_line_temps);
    Ok(())
}

/// A funcdef statement inside another function: compile its body into its
/// own function, then load the function object into the local slot.
fn emit_local_funcdef(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
) -> CResult {
    codegen_function(pr, ast, node)?;
    if let Some(storage) = ast.node(node).storage
        && storage.kind == StorageKind::StackSlot
    {
        let inner_id = func_id_of(ast, EmitFunc::AstFunc(node));
        emit(
            pr,
            ast,
            func,
            Instruction::GetFunc {
                slot_to: storage.id as i16,
                func_id: inner_id.0 as i32,
            },
        );
    }
    Ok(())
}

fn emit_inline_funcdef(
    pr: &mut CompileProject,
    ast: &mut Ast,
    func: EmitFunc,
    node: NodeId,
) -> CResult {
    codegen_function(pr, ast, node)?;
    let inner_id = func_id_of(ast, EmitFunc::AstFunc(node));
    let temp = result_temp_for(pr, ast, func, node);
    emit(
        pr,
        ast,
        func,
        Instruction::GetFunc {
            slot_to: temp as i16,
            func_id: inner_id.0 as i32,
        },
    );
    ast.node_mut(node).eval_temp_id = temp;
    Ok(())
}

/// `new X(args)`: instantiate (directly when the class id is known at
/// compile time), fetch the constructor, call it with
/// `callignoreifnone` since constructors may be absent, then move the
/// instance into the result slot. The instance must never sit in a
/// persistent variable while under construction.
fn emit_new(pr: &mut CompileProject, ast: &mut Ast, func: EmitFunc, node: NodeId) -> CResult {
    let call_node = match &ast.node(node).kind {
        ExprKind::UnaryOp { operand, .. } => *operand,
        _ => unreachable!(),
    };
    let (callee, args) = match &ast.node(call_node).kind {
        ExprKind::Call(call) => (call.callee, call.args.clone()),
        _ => {
            internal_error(ast, node, "new without a call expression".to_owned());
            return Err(());
        }
    };

    // Constructor arguments first:
    for pos_arg in &args.pos_args {
        codegen_expr(pr, ast, func, *pos_arg)?;
    }
    for kw_value in &args.kw_values {
        codegen_expr(pr, ast, func, *kw_value)?;
    }

    let known_class: Option<ClassId> = match ast.node(callee).storage {
        Some(storage) if storage.kind == StorageKind::GlobalClassSlot => {
            Some(ClassId(storage.id as u32))
        }
        _ => None,
    };

    let lowest = with_einfo(pr, ast, func, |einfo| einfo.lowest_guaranteed_free_temp);
    let obj_slot: i16 = match known_class {
        Some(class_id) => {
            let slot = with_einfo(pr, ast, func, new_1_line_temp) as i16;
            emit(
                pr,
                ast,
                func,
                Instruction::NewInstance {
                    slot_to: slot,
                    class_id: class_id.0 as i32,
                },
            );
            slot
        }
        None => {
            // The constructed type is only known at runtime:
            codegen_expr(pr, ast, func, callee)?;
            let mut slot = eval_temp(ast, callee);
            if (slot as i32) < lowest {
                // Never clobber a persistent variable with a partially
                // constructed object.
                slot = with_einfo(pr, ast, func, new_1_line_temp) as i16;
            }
            emit(
                pr,
                ast,
                func,
                Instruction::NewInstanceByRef {
                    slot_to: slot,
                    class_type_slot_from: eval_temp(ast, callee),
                },
            );
            slot
        }
    };

    let constructor_temp = with_einfo(pr, ast, func, new_1_line_temp) as i16;
    emit(
        pr,
        ast,
        func,
        Instruction::GetConstructor {
            slot_to: constructor_temp,
            obj_slot_from: obj_slot,
        },
    );
    emit_call_to(
        pr,
        ast,
        func,
        call_node,
        &args,
        constructor_temp,
        constructor_temp,
        false,
        true,
    )?;

    let result_temp = result_temp_for(pr, ast, func, node) as i16;
    if result_temp != obj_slot {
        emit(
            pr,
            ast,
            func,
            Instruction::ValueCopy {
                slot_to: result_temp,
                slot_from: obj_slot,
            },
        );
    }
    with_einfo(pr, ast, func, free_1_line_temps);
    ast.node_mut(node).eval_temp_id = result_temp as i32;
    Ok(())
}
