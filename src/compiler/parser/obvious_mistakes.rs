//! A late sanity pass over fully resolved ASTs for mistakes that are
//! cheap to detect and always wrong. One rule today; the list is meant to
//! grow.

use crate::bytecode::program::Program;
use crate::compiler::parser::ast::{Ast, ExprKind, NodeId, StorageKind};
use crate::compiler::parser::operators::UnaryOpKind;
use crate::compiler::string_interning::StringTable;

type Rule = fn(&mut Ast, NodeId, &Program, &StringTable);

const RULES: &[Rule] = &[check_class_called_without_new];

/// Calling a class type directly creates nothing; only `new C(...)`
/// instantiates.
fn check_class_called_without_new(
    ast: &mut Ast,
    node: NodeId,
    _program: &Program,
    string_table: &StringTable,
) {
    let ExprKind::Call(call) = &ast.node(node).kind else {
        return;
    };
    let callee = call.callee;
    let callee_node = ast.node(callee);
    let is_class_ref = matches!(
        callee_node.storage,
        Some(storage) if storage.kind == StorageKind::GlobalClassSlot
    );
    if !is_class_ref {
        return;
    }
    let called_via_new = ast.node(node).parent.is_some_and(|parent| {
        matches!(
            ast.node(parent).kind,
            ExprKind::UnaryOp {
                op: UnaryOpKind::New,
                ..
            }
        )
    });
    if called_via_new {
        return;
    }
    let name = match &callee_node.kind {
        ExprKind::IdentifierRef(identifier) => identifier.name.resolve(string_table).to_owned(),
        _ => "?".to_owned(),
    };
    let (line, column) = (ast.node(node).line, ast.node(node).column);
    ast.result.add_error(
        format!("cannot call class type \"{name}\" directly, use \"new {name}(...)\""),
        Some(&ast.file_uri.clone()),
        line,
        column,
    );
}

/// Run every rule over every node of the AST.
pub fn check_ast(ast: &mut Ast, program: &Program, string_table: &StringTable) {
    for node_index in 0..ast.nodes.len() {
        let node = NodeId(node_index as u32);
        for rule in RULES {
            rule(ast, node, program, string_table);
        }
    }
}
