//! Stack-slot assignment for parameters, closure captures, locals and
//! compiler temporaries.
//!
//! Slot numbering per function: slot 0 is `self` for methods, then one
//! slot per closure-captured value box, then the declared arguments, then
//! reusable local/temporary slots. Locals reuse slots whose usage token
//! ranges are disjoint; ranges are expanded (once, lazily) to cover
//! enclosing loop bodies so loop locals survive back edges.

use crate::compiler::parser::ast::{
    Ast, AstVisitor, DefRef, ExprKind, NodeId, StorageKind, StorageRef, VisitStep, visit_ast,
};
use crate::compiler::parser::ast_helpers::{
    find_expr_by_token_index, funcdef_is_method, funcdef_param_index, surrounding_func,
    token_index_range,
};
use crate::compiler::string_interning::StringId;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraTemp {
    pub used: bool,
    pub delete_past_line: bool,
}

#[derive(Debug, Clone)]
pub struct LocalStorageAssign {
    pub value_temp_id: i32,
    /// Slot of the value box when the definition is closure bound, -1
    /// otherwise.
    pub value_box_temp_id: i32,
    pub def: DefRef,
    pub use_start_token_index: usize,
    pub use_end_token_index: usize,
}

/// Per-function storage bookkeeping, shared between local storage
/// allocation and the code generator's temporary management.
#[derive(Debug, Clone, Default)]
pub struct FuncStorageInfo {
    /// First slot above self + closure captures + args + assigned locals.
    pub lowest_guaranteed_free_temp: i32,
    /// Outer-scope definitions this function captures, deduplicated.
    pub closure_bound_vars: Vec<DefRef>,
    pub assignments: Vec<LocalStorageAssign>,
    /// Set when a nested inline function needs the enclosing class
    /// context captured.
    pub closure_with_self: bool,

    // Codegen-side state:
    pub max_extra_stack: i32,
    pub extra_temps: Vec<ExtraTemp>,
    pub jump_targets_used: i32,
    pub dostmts_used: i32,
}

impl FuncStorageInfo {
    pub fn register_closure_bound(&mut self, def: DefRef) {
        if !self.closure_bound_vars.contains(&def) {
            self.closure_bound_vars.push(def);
        }
    }
}

/// A definition's initializer has no side effects when it is missing, a
/// literal, or a plain identifier read.
fn no_side_effects_value(ast: &Ast, value: NodeId) -> bool {
    matches!(
        ast.node(value).kind,
        ExprKind::Literal(_) | ExprKind::IdentifierRef(_)
    )
}

fn no_side_effects_def(ast: &Ast, def_node: NodeId) -> bool {
    match &ast.node(def_node).kind {
        ExprKind::VarDef(vardef) => match vardef.value {
            None => true,
            Some(value) => no_side_effects_value(ast, value),
        },
        _ => false,
    }
}

/// Expand a usage token range so it covers any enclosing for/while body,
/// keeping loop locals alive across back edges.
fn expand_to_real_usage(
    ast: &Ast,
    func: NodeId,
    token_start: &mut usize,
    token_end: &mut usize,
) {
    let body: Vec<NodeId> = match &ast.node(func).kind {
        ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => funcdef.body.clone(),
        _ => return,
    };
    for &boundary in &[*token_start, *token_end] {
        let Some(stmt) = body.iter().find(|&&stmt| {
            let (low, high) = token_index_range(ast, stmt);
            (low..=high).contains(&boundary)
        }) else {
            continue;
        };
        let Some(mut expr) = find_expr_by_token_index(ast, *stmt, boundary) else {
            continue;
        };
        while let Some(parent) = ast.node(expr).parent {
            if matches!(
                ast.node(parent).kind,
                ExprKind::For { .. } | ExprKind::While { .. }
            ) {
                let (low, high) = token_index_range(ast, parent);
                if low < *token_start {
                    *token_start = low;
                }
                if high > *token_end {
                    *token_end = high;
                }
            }
            expr = parent;
        }
    }
}

struct StorageAssignVisitor;

/// What a local-storage-relevant definition node declares.
struct LocalDefInfo {
    def: DefRef,
    /// Token index the range must at least reach back to, when the
    /// definition itself runs code.
    definition_token_index: Option<usize>,
    /// True for a catch binding with an empty rescue body.
    unused_catch_exception: bool,
}

fn local_def_info(ast: &Ast, node: NodeId) -> Option<LocalDefInfo> {
    let (scope, name): (_, StringId) = match &ast.node(node).kind {
        ExprKind::VarDef(vardef) => (vardef.found_in_scope, vardef.identifier),
        ExprKind::FuncDef(funcdef) => (funcdef.found_in_scope, funcdef.name?),
        ExprKind::For { scope, iterator, .. } => (*scope, *iterator),
        ExprKind::Do(dostmt) => (dostmt.rescue_scope, dostmt.error_name?),
        ExprKind::WithClause {
            found_in_scope,
            identifier,
            ..
        } => (*found_in_scope, *identifier),
        _ => return None,
    };
    let def = ast.scope_query_item(scope, name, false)?;
    if ast.def(def).declaration != node {
        return None;
    }

    let mut definition_token_index = None;
    let mut unused_catch_exception = false;
    match &ast.node(node).kind {
        // The runtime writes the iterator and with-clause slots, used or
        // not.
        ExprKind::For { .. } | ExprKind::WithClause { .. } => {
            definition_token_index = Some(ast.node(node).token_index);
        }
        ExprKind::Do(dostmt) => {
            if dostmt.rescue_body.is_empty() {
                unused_catch_exception = true;
            } else {
                definition_token_index =
                    Some(ast.node(dostmt.rescue_body[0]).token_index);
            }
        }
        _ => {
            if !no_side_effects_def(ast, node) {
                definition_token_index = Some(ast.node(node).token_index);
            }
        }
    }
    Some(LocalDefInfo {
        def,
        definition_token_index,
        unused_catch_exception,
    })
}

/// Assign a stack slot to one local definition, reusing a slot whose
/// existing ranges stay disjoint from the new usage range.
fn ensure_local_def_storage(ast: &mut Ast, node: NodeId) -> Result<(), ()> {
    if ast.node(node).storage.is_some() {
        return Ok(());
    }
    let Some(info) = local_def_info(ast, node) else {
        return Ok(());
    };
    let Some(func) = surrounding_func(ast, node) else {
        // Global definitions got their storage in the scope resolver.
        return Ok(());
    };
    if !ast.func_storage.contains_key(&func) {
        ast.result.add_error(
            "internal error: missing function storage info for local definition"
                .to_owned(),
            Some(&ast.file_uri.clone()),
            ast.node(node).line,
            ast.node(node).column,
        );
        return Err(());
    }

    if info.unused_catch_exception {
        return Ok(());
    }

    // Figure out the usage range:
    let def_data = ast.def(info.def).clone();
    let mut token_start = def_data
        .first_use_token_index
        .unwrap_or(ast.node(node).token_index);
    let mut token_end = def_data
        .last_use_token_index
        .unwrap_or(ast.node(node).token_index);
    if !def_data.expanded_to_real_use_range {
        expand_to_real_usage(ast, func, &mut token_start, &mut token_end);
        let def = ast.def_mut(info.def);
        def.first_use_token_index = Some(token_start);
        def.last_use_token_index = Some(token_end);
        def.expanded_to_real_use_range = true;
    }
    if let Some(definition_index) = info.definition_token_index
        && definition_index < token_start
    {
        token_start = definition_index;
    }

    // Find the best-fitting existing slot:
    let einfo = ast.func_storage.get_mut(&func).expect("checked above");
    let mut best_temp: i32 = -1;
    let mut best_score: i64 = -1;
    for candidate in &einfo.assignments {
        let score = if candidate.use_end_token_index < token_start {
            i64::MAX - (token_start - candidate.use_end_token_index) as i64
        } else if candidate.use_start_token_index > token_end {
            i64::MAX - (candidate.use_start_token_index - token_end) as i64
        } else {
            continue;
        };
        // The slot may carry several earlier assignments; all of them
        // must stay disjoint from the new range.
        let slot = candidate.value_temp_id;
        let fully_disjoint = einfo.assignments.iter().all(|other| {
            other.value_temp_id != slot
                || other.use_end_token_index < token_start
                || other.use_start_token_index > token_end
        });
        if !fully_disjoint {
            continue;
        }
        if score > best_score {
            best_score = score;
            best_temp = slot;
        }
    }
    if best_temp < 0 {
        best_temp = einfo.lowest_guaranteed_free_temp;
        einfo.lowest_guaranteed_free_temp += 1;
    }
    let mut value_box_temp_id = -1;
    if def_data.closure_bound {
        value_box_temp_id = einfo.lowest_guaranteed_free_temp;
        einfo.lowest_guaranteed_free_temp += 1;
    }

    einfo.assignments.push(LocalStorageAssign {
        value_temp_id: best_temp,
        value_box_temp_id,
        def: info.def,
        use_start_token_index: token_start,
        use_end_token_index: token_end,
    });
    ast.node_mut(node).storage = Some(StorageRef::stack_slot(best_temp as i64));
    Ok(())
}

impl AstVisitor for StorageAssignVisitor {
    fn visit_in(&mut self, ast: &mut Ast, node: NodeId) -> Result<VisitStep, ()> {
        if !matches!(
            ast.node(node).kind,
            ExprKind::FuncDef(_) | ExprKind::InlineFuncDef(_)
        ) {
            return Ok(VisitStep::Descend);
        }
        let has_self = funcdef_is_method(ast, node);
        let arg_count = match &ast.node(node).kind {
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                funcdef.arguments.arg_count()
            }
            _ => unreachable!(),
        };
        let einfo = ast.func_storage.entry(node).or_default();
        let self_offset = i32::from(has_self);
        let closure_count = einfo.closure_bound_vars.len() as i32;
        let param_slots = self_offset + closure_count + arg_count as i32;

        if closure_count > 0 {
            // A closure: the parameter-area slots hold the value boxes,
            // the actual values get fresh temporaries above the args.
            let mut free_temp = param_slots;
            let captured = einfo.closure_bound_vars.clone();
            for (i, def) in captured.into_iter().enumerate() {
                let assignment = LocalStorageAssign {
                    value_temp_id: free_temp,
                    value_box_temp_id: self_offset + i as i32,
                    def,
                    use_start_token_index: 0,
                    use_end_token_index: usize::MAX,
                };
                let einfo = ast.func_storage.get_mut(&node).expect("just inserted");
                einfo.assignments.push(assignment);
                free_temp += 1;
            }
            let einfo = ast.func_storage.get_mut(&node).expect("just inserted");
            einfo.lowest_guaranteed_free_temp = free_temp;
        } else {
            einfo.lowest_guaranteed_free_temp = param_slots;
        }
        Ok(VisitStep::Descend)
    }

    fn visit_out(&mut self, ast: &mut Ast, node: NodeId) -> Result<(), ()> {
        ensure_local_def_storage(ast, node)?;

        // Make sure identifiers referring to local definitions carry
        // storage:
        let ExprKind::IdentifierRef(identifier) = &ast.node(node).kind else {
            return Ok(());
        };
        if ast.node(node).storage.is_some() {
            return Ok(());
        }
        let name = identifier.name;
        let Some(maps_to) = identifier.resolved_to_expr else {
            return Ok(());
        };
        if matches!(ast.node(maps_to).kind, ExprKind::Import(_)) {
            return Ok(());
        }

        let is_param_ref = matches!(
            ast.node(maps_to).kind,
            ExprKind::FuncDef(_) | ExprKind::InlineFuncDef(_)
        ) && funcdef_param_index(ast, maps_to, name).is_some();

        if is_param_ref {
            // Bind directly to the parameter slot of the declaring
            // function.
            let param_index = funcdef_param_index(ast, maps_to, name).expect("checked");
            let has_self = funcdef_is_method(ast, maps_to);
            let closure_count = ast
                .func_storage
                .get(&maps_to)
                .map(|einfo| einfo.closure_bound_vars.len())
                .unwrap_or(0);
            let slot = i64::from(has_self) + closure_count as i64 + param_index as i64;
            ast.node_mut(node).storage = Some(StorageRef::stack_slot(slot));
            return Ok(());
        }

        if ast.node(maps_to).storage.is_none() {
            ensure_local_def_storage(ast, maps_to)?;
        }
        match ast.node(maps_to).storage {
            Some(storage) => ast.node_mut(node).storage = Some(storage),
            None => {
                if ast.result.success {
                    ast.result.add_error(
                        "internal error: unexpectedly no storage on resolved-to \
                         expression"
                            .to_owned(),
                        Some(&ast.file_uri.clone()),
                        ast.node(node).line,
                        ast.node(node).column,
                    );
                }
            }
        }
        Ok(())
    }
}

/// Assign storage for all local variables and parameters of one AST.
pub fn assign_local_storage(ast: &mut Ast) -> Result<(), ()> {
    if ast.local_storage_done {
        return Ok(());
    }
    visit_ast(ast, &mut StorageAssignVisitor)?;
    ast.local_storage_done = true;
    Ok(())
}

/// Current top of a function's stack during codegen: everything below is
/// either parameter area, assigned locals, or a live temporary.
pub fn func_current_stack_top(einfo: &FuncStorageInfo) -> i32 {
    let mut top = einfo.lowest_guaranteed_free_temp;
    for (i, temp) in einfo.extra_temps.iter().enumerate() {
        if temp.used {
            top = einfo.lowest_guaranteed_free_temp + i as i32 + 1;
        }
    }
    top
}

fn new_temp(einfo: &mut FuncStorageInfo, delete_past_line: bool) -> i32 {
    for (i, temp) in einfo.extra_temps.iter_mut().enumerate() {
        if !temp.used {
            temp.used = true;
            temp.delete_past_line = delete_past_line;
            return einfo.lowest_guaranteed_free_temp + i as i32;
        }
    }
    einfo.extra_temps.push(ExtraTemp {
        used: true,
        delete_past_line,
    });
    if einfo.extra_temps.len() as i32 > einfo.max_extra_stack {
        einfo.max_extra_stack = einfo.extra_temps.len() as i32;
    }
    einfo.lowest_guaranteed_free_temp + einfo.extra_temps.len() as i32 - 1
}

/// A temporary that statement-boundary cleanup reclaims.
pub fn new_1_line_temp(einfo: &mut FuncStorageInfo) -> i32 {
    new_temp(einfo, true)
}

/// A temporary that stays live until explicitly released.
pub fn new_multiline_temp(einfo: &mut FuncStorageInfo) -> i32 {
    new_temp(einfo, false)
}

pub fn free_1_line_temps(einfo: &mut FuncStorageInfo) {
    for temp in einfo.extra_temps.iter_mut() {
        if temp.used && temp.delete_past_line {
            temp.used = false;
        }
    }
}

pub fn free_multiline_temp(einfo: &mut FuncStorageInfo, temp_id: i32) {
    let index = (temp_id - einfo.lowest_guaranteed_free_temp) as usize;
    if let Some(temp) = einfo.extra_temps.get_mut(index) {
        temp.used = false;
        temp.delete_past_line = false;
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

    #[test]
    fn temp_allocation_reuses_freed_slots() {
        let mut einfo = FuncStorageInfo {
            lowest_guaranteed_free_temp: 3,
            ..FuncStorageInfo::default()
        };
        let a = new_1_line_temp(&mut einfo);
        let b = new_1_line_temp(&mut einfo);
        assert_eq!((a, b), (3, 4));
        assert_eq!(func_current_stack_top(&einfo), 5);
        free_1_line_temps(&mut einfo);
        assert_eq!(func_current_stack_top(&einfo), 3);
        let c = new_1_line_temp(&mut einfo);
        assert_eq!(c, 3);
        assert_eq!(einfo.max_extra_stack, 2);
    }

    #[test]
    fn multiline_temps_survive_line_cleanup() {
        let mut einfo = FuncStorageInfo::default();
        let iterator = new_multiline_temp(&mut einfo);
        let scratch = new_1_line_temp(&mut einfo);
        free_1_line_temps(&mut einfo);
        assert_eq!(func_current_stack_top(&einfo), iterator + 1);
        free_multiline_temp(&mut einfo, iterator);
        assert_eq!(func_current_stack_top(&einfo), 0);
        let _ = scratch;
    }

    fn storage_for_source(source: &str) -> (Ast, StringTable) {
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
        let mut ast = parse_tokens(&tokens, "file:///test.h64", &mut string_table, &config);
        assert!(ast.result.success, "{:?}", ast.result.messages);
        // Mimic enough of the resolver: mark identifier uses so the
        // lifetime analysis has ranges to work with.
        mark_uses(&mut ast);
        assign_local_storage(&mut ast).unwrap();
        (ast, string_table)
    }

    fn mark_uses(ast: &mut Ast) {
        for node_index in 0..ast.nodes.len() {
            let node = NodeId(node_index as u32);
            let ExprKind::IdentifierRef(identifier) = &ast.node(node).kind else {
                continue;
            };
            let name = identifier.name;
            let scope = crate::compiler::parser::ast_helpers::scope_of(ast, node);
            if let Some(def) = ast.scope_query_item(scope, name, true) {
                let token_index = ast.node(node).token_index;
                let declaration = ast.def(def).declaration;
                ast.mark_def_used(def, token_index);
                if let ExprKind::IdentifierRef(identifier) =
                    &mut ast.node_mut(node).kind
                {
                    identifier.resolved_to_def = Some(def);
                    identifier.resolved_to_expr = Some(declaration);
                }
            }
        }
    }

    #[test]
    fn params_then_locals_layout() {
        let (ast, _) = storage_for_source(
            "func f(a, b) {\n    var c = a + b\n    return c\n}",
        );
        let func = ast.root_stmts[0];
        let einfo = &ast.func_storage[&func];
        // Two args, no self, no captures:
        assert_eq!(einfo.lowest_guaranteed_free_temp, 3);
        let ExprKind::FuncDef(funcdef) = &ast.node(func).kind else {
            panic!("expected funcdef");
        };
        let c_def = funcdef.body[0];
        assert_eq!(
            ast.node(c_def).storage,
            Some(StorageRef::stack_slot(2)),
            "first local lands right above the two parameter slots"
        );
    }

    #[test]
    fn disjoint_locals_share_a_slot() {
        // `a` is last used before `b` is declared, so b reuses a's slot.
        let (ast, _) = storage_for_source(
            "func f {\n    var a = compute()\n    use(a)\n    var b = compute()\n    use(b)\n}",
        );
        let func = ast.root_stmts[0];
        let ExprKind::FuncDef(funcdef) = &ast.node(func).kind else {
            panic!("expected funcdef");
        };
        let a_def = funcdef.body[0];
        let b_def = funcdef.body[2];
        assert_eq!(ast.node(a_def).storage, ast.node(b_def).storage);
    }

    #[test]
    fn loop_locals_do_not_share_across_back_edges() {
        // `x` is used late in the loop body, `y` declared after it; both
        // ranges expand over the while body, so they must not collide.
        let (ast, _) = storage_for_source(
            "func f {\n    while cond() {\n        var x = make()\n        var y = use(x)\n        combine(x, y)\n    }\n}",
        );
        let func = ast.root_stmts[0];
        let ExprKind::FuncDef(funcdef) = &ast.node(func).kind else {
            panic!("expected funcdef");
        };
        let ExprKind::While { body, .. } = &ast.node(funcdef.body[0]).kind else {
            panic!("expected while");
        };
        let x_def = body[0];
        let y_def = body[1];
        assert_ne!(ast.node(x_def).storage, ast.node(y_def).storage);
    }

    #[test]
    fn unused_catch_binding_skips_allocation() {
        let (ast, _) = storage_for_source(
            "func f {\n    do {\n        risky()\n    } rescue Exception as e {\n    }\n}",
        );
        let func = ast.root_stmts[0];
        let ExprKind::FuncDef(funcdef) = &ast.node(func).kind else {
            panic!("expected funcdef");
        };
        let do_stmt = funcdef.body[0];
        assert_eq!(ast.node(do_stmt).storage, None);
    }

    #[test]
    fn for_iterator_always_allocates() {
        let (ast, _) = storage_for_source(
            "func f {\n    for item in things() {\n    }\n}",
        );
        let func = ast.root_stmts[0];
        let ExprKind::FuncDef(funcdef) = &ast.node(func).kind else {
            panic!("expected funcdef");
        };
        let for_stmt = funcdef.body[0];
        assert!(ast.node(for_stmt).storage.is_some());
    }
}
