//! Shared queries over the AST arena: enclosing function/class lookups,
//! token-index ranges for the storage lifetime analysis, and the canonical
//! previous/next-statement query.

use crate::compiler::parser::ast::{Ast, ExprKind, NodeId, ScopeId};
use crate::compiler::string_interning::StringId;

/// The function an expression sits inside, if any. The expression itself
/// never counts as its own surrounding function.
pub fn surrounding_func(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let mut current = ast.node(node).parent;
    while let Some(parent) = current {
        if matches!(
            ast.node(parent).kind,
            ExprKind::FuncDef(_) | ExprKind::InlineFuncDef(_)
        ) {
            return Some(parent);
        }
        current = ast.node(parent).parent;
    }
    None
}

/// The class an expression sits inside. With `include_self`, a classdef
/// expression returns itself.
pub fn surrounding_class(ast: &Ast, node: NodeId, include_self: bool) -> Option<NodeId> {
    if include_self && matches!(ast.node(node).kind, ExprKind::ClassDef(_)) {
        return Some(node);
    }
    let mut current = ast.node(node).parent;
    while let Some(parent) = current {
        if matches!(ast.node(parent).kind, ExprKind::ClassDef(_)) {
            return Some(parent);
        }
        current = ast.node(parent).parent;
    }
    None
}

/// The scope an expression resolves names in. Walks up through the node's
/// ancestors; the child's position inside a statement decides which of the
/// statement's scopes applies (an if clause body vs. its condition, a do
/// body vs. its rescue block, and so on).
pub fn scope_of(ast: &Ast, node: NodeId) -> ScopeId {
    let mut child = node;
    let mut current = ast.node(node).parent;
    while let Some(parent) = current {
        match &ast.node(parent).kind {
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                // Both the body and the argument default values resolve
                // within the function scope.
                return funcdef.scope;
            }
            ExprKind::ClassDef(classdef) => {
                if classdef.base_class_ref == Some(child) {
                    // The extends reference resolves outside the class.
                } else {
                    return classdef.scope;
                }
            }
            ExprKind::If { clauses } => {
                for clause in clauses {
                    if clause.body.contains(&child) {
                        return clause.scope;
                    }
                }
                // Conditions resolve in the enclosing scope.
            }
            ExprKind::While { scope, body, .. } => {
                if body.contains(&child) {
                    return *scope;
                }
            }
            ExprKind::For { scope, body, .. } => {
                if body.contains(&child) {
                    return *scope;
                }
            }
            ExprKind::With { scope, body, clauses } => {
                if body.contains(&child) || clauses.contains(&child) {
                    return *scope;
                }
            }
            ExprKind::Do(dostmt) => {
                if dostmt.body.contains(&child) {
                    return dostmt.scope;
                }
                if dostmt.rescue_body.contains(&child) {
                    return dostmt.rescue_scope;
                }
                if dostmt.finally_body.contains(&child) {
                    return dostmt.finally_scope;
                }
            }
            _ => {}
        }
        child = parent;
        current = ast.node(parent).parent;
    }
    ast.global_scope
}

/// Whether the expression sits inside a classdef's `extends` reference.
pub fn is_in_extends_arg(ast: &Ast, node: NodeId) -> bool {
    let mut child = node;
    let mut current = ast.node(node).parent;
    while let Some(parent) = current {
        if let ExprKind::ClassDef(classdef) = &ast.node(parent).kind {
            return classdef.base_class_ref == Some(child);
        }
        child = parent;
        current = ast.node(parent).parent;
    }
    false
}

/// Find the expression carrying an exact token index within a subtree.
pub fn find_expr_by_token_index(ast: &Ast, root: NodeId, token_index: usize) -> Option<NodeId> {
    if ast.node(root).token_index == token_index {
        return Some(root);
    }
    for child in ast.children(root) {
        if let Some(found) = find_expr_by_token_index(ast, child, token_index) {
            return Some(found);
        }
    }
    None
}

/// The lowest and highest token index reachable inside a subtree.
pub fn token_index_range(ast: &Ast, node: NodeId) -> (usize, usize) {
    let own = ast.node(node).token_index;
    let mut lowest = own;
    let mut highest = own;
    for child in ast.children(node) {
        let (child_low, child_high) = token_index_range(ast, child);
        lowest = lowest.min(child_low);
        highest = highest.max(child_high);
    }
    (lowest, highest)
}

/// The statement list a statement sits in: its parent's body (or clause
/// body), or the AST's top-level statements.
fn sibling_statements(ast: &Ast, stmt: NodeId) -> Option<Vec<NodeId>> {
    let Some(parent) = ast.node(stmt).parent else {
        return Some(ast.root_stmts.clone());
    };
    let lists: Vec<&Vec<NodeId>> = match &ast.node(parent).kind {
        ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => vec![&funcdef.body],
        ExprKind::ClassDef(classdef) => vec![&classdef.vardefs, &classdef.funcdefs],
        ExprKind::If { clauses } => clauses.iter().map(|clause| &clause.body).collect(),
        ExprKind::While { body, .. }
        | ExprKind::For { body, .. } => vec![body],
        ExprKind::With { body, .. } => vec![body],
        ExprKind::Do(dostmt) => {
            vec![&dostmt.body, &dostmt.rescue_body, &dostmt.finally_body]
        }
        _ => return None,
    };
    lists
        .into_iter()
        .find(|list| list.contains(&stmt))
        .cloned()
}

/// The statement before this one within the same block, if any.
pub fn prev_statement(ast: &Ast, stmt: NodeId) -> Option<NodeId> {
    let siblings = sibling_statements(ast, stmt)?;
    let position = siblings.iter().position(|&s| s == stmt)?;
    if position == 0 {
        return None;
    }
    Some(siblings[position - 1])
}

/// The statement after this one within the same block, if any.
pub fn next_statement(ast: &Ast, stmt: NodeId) -> Option<NodeId> {
    let siblings = sibling_statements(ast, stmt)?;
    let position = siblings.iter().position(|&s| s == stmt)?;
    siblings.get(position + 1).copied()
}

/// Whether a funcdef is a method: declared directly in a class body. A
/// function nested inside a method body is not one, even though a class
/// surrounds it.
pub fn funcdef_is_method(ast: &Ast, func: NodeId) -> bool {
    match &ast.node(func).kind {
        ExprKind::FuncDef(funcdef) => ast.scope(funcdef.found_in_scope).is_class_scope,
        _ => false,
    }
}

/// Whether a funcdef declares a parameter with this name; returns its
/// declared position.
pub fn funcdef_param_index(ast: &Ast, func: NodeId, name: StringId) -> Option<usize> {
    match &ast.node(func).kind {
        ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => funcdef
            .arguments
            .arg_names
            .iter()
            .position(|&arg| arg == name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compiler_messages::results::ResultMessages;
    use crate::compiler::compiler_messages::warning_config::WarningConfig;
    use crate::compiler::parser::parser::parse_tokens;
    use crate::compiler::string_interning::StringTable;
    use crate::compiler::tokenizer::lexer::tokenize;

    fn parse(source: &str) -> (Ast, StringTable) {
        let mut string_table = StringTable::new();
        let config = WarningConfig::default();
        let mut lex_result = ResultMessages::new();
        let tokens = tokenize(
            source.as_bytes(),
            &config,
            &mut string_table,
            &mut lex_result,
        )
        .unwrap();
        let ast = parse_tokens(&tokens, "file:///test.h64", &mut string_table, &config);
        assert!(ast.result.success, "{:?}", ast.result.messages);
        (ast, string_table)
    }

    #[test]
    fn surrounding_lookups() {
        let (ast, _) = parse("class A {\n    func m {\n        var x = 1\n    }\n}");
        let ExprKind::ClassDef(classdef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected classdef");
        };
        let method = classdef.funcdefs[0];
        let ExprKind::FuncDef(funcdef) = &ast.node(method).kind else {
            panic!("expected funcdef");
        };
        let vardef = funcdef.body[0];

        assert_eq!(surrounding_func(&ast, vardef), Some(method));
        assert_eq!(surrounding_class(&ast, vardef, false), Some(ast.root_stmts[0]));
        assert_eq!(surrounding_func(&ast, method), None);
        assert_eq!(
            surrounding_class(&ast, ast.root_stmts[0], true),
            Some(ast.root_stmts[0])
        );
        assert_eq!(surrounding_class(&ast, ast.root_stmts[0], false), None);
    }

    #[test]
    fn prev_next_statement_walks_blocks() {
        let (ast, _) = parse("func f {\n    var a = 1\n    var b = 2\n    var c = 3\n}");
        let ExprKind::FuncDef(funcdef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected funcdef");
        };
        let [a, b, c] = funcdef.body[..] else {
            panic!("expected three statements");
        };
        assert_eq!(prev_statement(&ast, a), None);
        assert_eq!(prev_statement(&ast, b), Some(a));
        assert_eq!(next_statement(&ast, b), Some(c));
        assert_eq!(next_statement(&ast, c), None);
    }

    #[test]
    fn token_ranges_cover_subtrees() {
        let (ast, _) = parse("var x = 1 + 2");
        let stmt = ast.root_stmts[0];
        let (low, high) = token_index_range(&ast, stmt);
        assert_eq!(low, ast.node(stmt).token_index);
        assert!(high > low);
        let found = find_expr_by_token_index(&ast, stmt, high).unwrap();
        assert_eq!(ast.node(found).token_index, high);
    }

    #[test]
    fn param_lookup() {
        let (ast, table) = parse("func f(a, b) { return a }");
        let func = ast.root_stmts[0];
        let a = table.get_existing("a").unwrap();
        let b = table.get_existing("b").unwrap();
        let missing = table.get_existing("f").unwrap();
        assert_eq!(funcdef_param_index(&ast, func, a), Some(0));
        assert_eq!(funcdef_param_index(&ast, func, b), Some(1));
        assert_eq!(funcdef_param_index(&ast, func, missing), None);
    }
}
