//! Async-propagation analysis ("threadable" checking).
//!
//! Every function starts out assumed threadable. Registration walks each
//! AST collecting the call/class-reference graph plus global variable
//! accesses. The final iteration demotes functions and classes to a fixed
//! point; any demotion of something the user explicitly marked `async` is
//! an error.

use crate::bytecode::program::{ClassId, FuncId};
use crate::compiler::parser::ast::{AstId, ExprKind, NodeId, StorageKind};
use crate::compiler::parser::ast_helpers::surrounding_func;
use crate::compiler::project::compile_project::CompileProject;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy)]
pub struct CalledFuncInfo {
    pub func: FuncId,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CalledClassInfo {
    pub class: ClassId,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub called_funcs: Vec<CalledFuncInfo>,
    pub called_classes: Vec<CalledClassInfo>,
}

#[derive(Debug, Default)]
pub struct ThreadableGraph {
    pub func_id_to_nodeinfo: FxHashMap<u32, NodeInfo>,
}

impl ThreadableGraph {
    pub fn new() -> ThreadableGraph {
        ThreadableGraph::default()
    }

    fn nodeinfo_mut(&mut self, func: FuncId) -> &mut NodeInfo {
        self.func_id_to_nodeinfo.entry(func.0).or_default()
    }
}

/// Method names whose behavior the runtime invokes implicitly; a class
/// cannot stay threadable when one of these is not.
fn is_essential_override(name: &str) -> bool {
    matches!(name, "init" | "on_destroy" | "to_str" | "to_hash" | "equals")
}

/// Record one AST's functions and the edges out of them.
pub fn register_ast_for_check(pr: &mut CompileProject, ast_id: AstId) -> Result<(), ()> {
    if pr.ast(ast_id).threadable_map_done {
        return Ok(());
    }
    let ast = pr.take_ast(ast_id);

    for node_index in 0..ast.nodes.len() {
        let node = NodeId(node_index as u32);
        match &ast.node(node).kind {
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                if let Some(func_id) = funcdef.bytecode_func_id {
                    pr.threadable_graph.nodeinfo_mut(func_id);
                }
            }
            ExprKind::IdentifierRef(_) => {
                let Some(storage) = ast.node(node).storage else {
                    continue;
                };
                let Some(func_node) = surrounding_func(&ast, node) else {
                    continue;
                };
                let func_id = match &ast.node(func_node).kind {
                    ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                        funcdef.bytecode_func_id
                    }
                    _ => None,
                };
                let Some(func_id) = func_id else {
                    continue;
                };
                let (line, column) = (ast.node(node).line, ast.node(node).column);
                match storage.kind {
                    StorageKind::GlobalFuncSlot => {
                        pr.threadable_graph
                            .nodeinfo_mut(func_id)
                            .called_funcs
                            .push(CalledFuncInfo {
                                func: FuncId(storage.id as u32),
                                line,
                                column,
                            });
                    }
                    StorageKind::GlobalClassSlot => {
                        pr.threadable_graph
                            .nodeinfo_mut(func_id)
                            .called_classes
                            .push(CalledClassInfo {
                                class: ClassId(storage.id as u32),
                                line,
                                column,
                            });
                    }
                    StorageKind::GlobalVarSlot => {
                        let global = pr.program.global(
                            crate::bytecode::program::GlobalId(storage.id as u32),
                        );
                        let simple = global.is_const && global.is_simple_const;
                        if !simple {
                            if pr.program.func(func_id).user_set_parallel {
                                pr.result.add_error(
                                    "func marked as \"async\" cannot access global \
                                     variable that isn't a simple constant",
                                    Some(&ast.file_uri),
                                    line,
                                    column,
                                );
                            }
                            pr.program.func_mut(func_id).is_threadable = false;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    pr.put_back_ast(ast_id, ast);
    pr.ast_mut(ast_id).threadable_map_done = true;
    Ok(())
}

fn func_position(pr: &CompileProject, func: FuncId) -> (Option<String>, i64, i64) {
    let Some(symbol) = pr.program.symbols.func_symbol(func) else {
        return (None, -1, -1);
    };
    let file_uri = symbol
        .fileuri_index
        .and_then(|idx| pr.program.symbols.file_uri(idx))
        .map(|uri| uri.to_owned());
    (file_uri, symbol.header_symbol_line, symbol.header_symbol_column)
}

/// Run the three demotion rules until nothing changes. Every transition
/// strictly demotes, so the loop terminates. Returns false when any
/// `async` contract was violated.
pub fn iterate_final_graph(pr: &mut CompileProject) -> bool {
    let mut success = true;
    let mut got_change = true;
    while got_change {
        got_change = false;
        for func_index in 0..pr.program.funcs.len() {
            let func_id = FuncId(func_index as u32);

            // A non-threadable essential override drags its class down:
            let func = pr.program.func(func_id);
            if !func.is_threadable
                && let Some(class_id) = func.associated_class
            {
                let essential = pr
                    .program
                    .symbols
                    .func_symbol(func_id)
                    .and_then(|s| s.name.as_deref())
                    .is_some_and(is_essential_override);
                if essential && pr.program.class(class_id).is_threadable {
                    pr.program.class_mut(class_id).is_threadable = false;
                    got_change = true;
                    if pr.program.class(class_id).user_set_parallel {
                        let name = pr
                            .program
                            .symbols
                            .func_symbol(func_id)
                            .and_then(|s| s.name.clone())
                            .unwrap_or_default();
                        let (file_uri, line, column) = func_position(pr, func_id);
                        pr.result.add_error(
                            format!(
                                "class marked as \"async\" cannot have \"{name}\" func \
                                 attribute that is not \"async\" itself"
                            ),
                            file_uri.as_deref(),
                            line,
                            column,
                        );
                        success = false;
                        continue;
                    }
                }
            }

            if !pr.program.func(func_id).is_threadable {
                continue;
            }

            // A method on a non-threadable class is not threadable:
            if let Some(class_id) = pr.program.func(func_id).associated_class
                && !pr.program.class(class_id).is_threadable
            {
                pr.program.func_mut(func_id).is_threadable = false;
                got_change = true;
                if pr.program.func(func_id).user_set_parallel {
                    let (file_uri, line, column) = func_position(pr, func_id);
                    pr.result.add_error(
                        "func marked as \"async\" cannot be func attr of class that \
                         is not \"async\"",
                        file_uri.as_deref(),
                        line,
                        column,
                    );
                    success = false;
                }
                continue;
            }

            // A non-threadable callee demotes the caller:
            let called_funcs = pr
                .threadable_graph
                .func_id_to_nodeinfo
                .get(&func_id.0)
                .map(|info| info.called_funcs.clone())
                .unwrap_or_default();
            for callee in called_funcs {
                if callee.func != func_id && !pr.program.func(callee.func).is_threadable {
                    pr.program.func_mut(func_id).is_threadable = false;
                    got_change = true;
                    if pr.program.func(func_id).user_set_parallel {
                        let (file_uri, _, _) = func_position(pr, func_id);
                        pr.result.add_error(
                            "func marked as \"async\" cannot access func that is not \
                             \"async\" itself",
                            file_uri.as_deref(),
                            callee.line,
                            callee.column,
                        );
                        success = false;
                    }
                    break;
                }
            }
            if !pr.program.func(func_id).is_threadable {
                continue;
            }

            // So does a non-threadable referenced class:
            let called_classes = pr
                .threadable_graph
                .func_id_to_nodeinfo
                .get(&func_id.0)
                .map(|info| info.called_classes.clone())
                .unwrap_or_default();
            for referenced in called_classes {
                if !pr.program.class(referenced.class).is_threadable {
                    pr.program.func_mut(func_id).is_threadable = false;
                    got_change = true;
                    if pr.program.func(func_id).user_set_parallel {
                        let (file_uri, _, _) = func_position(pr, func_id);
                        pr.result.add_error(
                            "func marked as \"async\" cannot access class that is not \
                             \"async\" itself",
                            file_uri.as_deref(),
                            referenced.line,
                            referenced.column,
                        );
                        success = false;
                    }
                    break;
                }
            }
        }
    }
    if !success {
        pr.result.success = false;
    }
    success
}
