//! Name binding and global storage.
//!
//! Runs in two phases over every loaded AST: phase 1 registers all global
//! and class-level declarations with the program (loading imported files
//! recursively as it discovers them), phase 2 binds identifier references
//! to definitions, imports, built-ins or closure captures. Base-class
//! attribute propagation runs once per project after both phases.

use crate::bytecode::program::{ClassId, EXCEPTION_CLASS_ID, FuncId};
use crate::compiler::parser::ast::{
    Ast, AstId, DefRef, ExprKind, LiteralValue, NodeId, StorageKind, StorageRef,
};
use crate::compiler::parser::ast_helpers::{
    funcdef_is_method, funcdef_param_index, scope_of, surrounding_func,
};
use crate::compiler::parser::operators::BinOpKind;
use crate::compiler::project::compile_project::CompileProject;
use crate::settings::{IMPORT_CHAIN_LEN_MAX, MAX_CLASS_FUNCATTRS, MAX_CLASS_VARATTRS};

const VARINIT_FUNC_NAME: &str = "$$varinit";
pub(crate) const GLOBALINIT_FUNC_NAME: &str = "$$globalinit";

// ------------------------------
// Phase 1: global storage
// ------------------------------

/// Register all global-storage declarations of this AST with the program,
/// then resolve and recursively load its imports. Cyclic import graphs
/// terminate because the built flag is set before recursing.
pub fn build_ast_global_storage(pr: &mut CompileProject, ast_id: AstId) -> Result<(), ()> {
    if pr.ast(ast_id).global_storage_built {
        return Ok(());
    }

    let mut ast = pr.take_ast(ast_id);
    pr.program.symbols.file_uri_index(&ast.file_uri, true);
    let roots = ast.root_stmts.clone();
    for root in roots {
        build_storage_for_node(pr, &mut ast, ast_id, root, None, false);
    }
    ast.global_storage_built = true;
    pr.result.transfer_from(&ast.result);
    pr.put_back_ast(ast_id, ast);

    // Resolve imports now that this AST can be revisited safely:
    let import_nodes: Vec<NodeId> = pr
        .ast(ast_id)
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node.kind, ExprKind::Import(_)))
        .map(|(i, _)| NodeId(i as u32))
        .collect();
    let mut imported_asts = Vec::new();
    for import_node in import_nodes {
        if let Some(imported) = resolve_one_import(pr, ast_id, import_node) {
            imported_asts.push(imported);
        }
    }
    for imported in imported_asts {
        build_ast_global_storage(pr, imported)?;
    }
    Ok(())
}

fn resolve_one_import(
    pr: &mut CompileProject,
    ast_id: AstId,
    import_node: NodeId,
) -> Option<AstId> {
    let (elements, library, line, column) = {
        let ast = pr.ast(ast_id);
        let node = ast.node(import_node);
        let ExprKind::Import(import) = &node.kind else {
            return None;
        };
        let elements: Vec<String> = import
            .elements
            .iter()
            .map(|e| e.resolve(&pr.string_table).to_owned())
            .collect();
        let library = import
            .source_library
            .map(|l| l.resolve(&pr.string_table).to_owned());
        (elements, library, node.line, node.column)
    };
    let module_path = elements.join(".");

    // C-module probe: a fully registered C-function module needs no file.
    if pr.does_import_map_to_cfuncs(&module_path, library.as_deref()) {
        if let ExprKind::Import(import) = &mut pr.ast_mut(ast_id).node_mut(import_node).kind {
            import.maps_to_cfuncs = true;
        }
        return None;
    }

    let source_uri = pr.ast(ast_id).file_uri.clone();
    let resolved = pr.resolve_import_to_file(&source_uri, &elements, library.as_deref());
    let Some(resolved_path) = resolved else {
        let file_uri = pr.ast(ast_id).file_uri.clone();
        pr.ast_mut(ast_id).result.add_error(
            format!("module \"{module_path}\" not found for import"),
            Some(&file_uri),
            line,
            column,
        );
        let msgs = pr.ast(ast_id).result.clone();
        pr.result.transfer_from(&msgs);
        return None;
    };
    let imported = pr.get_ast(&resolved_path).ok()?;
    if let ExprKind::Import(import) = &mut pr.ast_mut(ast_id).node_mut(import_node).kind {
        import.referenced_ast = Some(imported);
    }
    Some(imported)
}

/// Walk one statement tree, registering declarations. `owning_class` is
/// set while inside a class body, `in_function` once inside any function.
fn build_storage_for_node(
    pr: &mut CompileProject,
    ast: &mut Ast,
    ast_id: AstId,
    node: NodeId,
    owning_class: Option<ClassId>,
    in_function: bool,
) {
    match &ast.node(node).kind {
        ExprKind::VarDef(_) => {
            if !in_function {
                compute_vardef_storage(pr, ast, ast_id, node, owning_class);
            }
            if let ExprKind::VarDef(vardef) = &ast.node(node).kind
                && let Some(value) = vardef.value
            {
                build_storage_for_node(pr, ast, ast_id, value, owning_class, in_function);
            }
        }
        ExprKind::FuncDef(_) | ExprKind::InlineFuncDef(_) => {
            compute_funcdef_storage(pr, ast, node, owning_class, in_function);
            let children = ast.children(node);
            for child in children {
                build_storage_for_node(pr, ast, ast_id, child, None, true);
            }
        }
        ExprKind::ClassDef(_) => {
            if in_function || owning_class.is_some() {
                let (line, column) = (ast.node(node).line, ast.node(node).column);
                ast.result.add_error(
                    "class definitions are only allowed at the top level of a module",
                    Some(&ast.file_uri.clone()),
                    line,
                    column,
                );
                return;
            }
            let class_id = compute_classdef_storage(pr, ast, ast_id, node);
            let children = ast.children(node);
            for child in children {
                build_storage_for_node(pr, ast, ast_id, child, class_id, false);
            }
        }
        ExprKind::Call(call) => {
            // Intern keyword argument names even at call sites, so the
            // emitted bytecode can refer to them by id.
            let kw_names = call.args.kw_names.clone();
            for kw_name in kw_names {
                pr.program
                    .symbols
                    .attr_name_id(kw_name.resolve(&pr.string_table), true);
            }
            let children = ast.children(node);
            for child in children {
                build_storage_for_node(pr, ast, ast_id, child, owning_class, in_function);
            }
        }
        ExprKind::BinaryOp {
            op: BinOpKind::Attribute,
            rhs,
            ..
        } => {
            // Attribute access names need ids before codegen runs.
            if let ExprKind::IdentifierRef(identifier) = &ast.node(*rhs).kind {
                pr.program
                    .symbols
                    .attr_name_id(identifier.name.resolve(&pr.string_table), true);
            }
            let children = ast.children(node);
            for child in children {
                build_storage_for_node(pr, ast, ast_id, child, owning_class, in_function);
            }
        }
        _ => {
            let children = ast.children(node);
            for child in children {
                build_storage_for_node(pr, ast, ast_id, child, owning_class, in_function);
            }
        }
    }
}

fn compute_vardef_storage(
    pr: &mut CompileProject,
    ast: &mut Ast,
    ast_id: AstId,
    node: NodeId,
    owning_class: Option<ClassId>,
) {
    let ExprKind::VarDef(vardef) = &ast.node(node).kind else {
        return;
    };
    let name = vardef.identifier.resolve(&pr.string_table).to_owned();
    let is_const = vardef.is_const;
    let value = vardef.value;
    let is_simple_const = match value {
        None => true,
        Some(value) => matches!(ast.node(value).kind, ExprKind::Literal(_)),
    };

    match owning_class {
        Some(class_id) => {
            match pr
                .program
                .register_class_attribute(class_id, &name, None)
            {
                Ok(_) => {
                    // The attribute index is provisional until base-class
                    // propagation shifts derived classes' own attributes
                    // behind the inherited prefix.
                    let own_index =
                        pr.program.class(class_id).varattr_name_ids.len() as i64 - 1;
                    ast.node_mut(node).storage = Some(StorageRef {
                        kind: StorageKind::VarAttrSlot,
                        id: own_index,
                    });
                    let inits = pr
                        .class_varattr_inits
                        .entry(class_id.0)
                        .or_default();
                    inits.push(value.map(|v| (ast_id, v)));
                    if value.is_some()
                        && pr.program.class(class_id).varinit_func.is_none()
                    {
                        ensure_varinit_func(pr, ast, class_id);
                    }
                }
                Err(e) => {
                    let (line, column) = (ast.node(node).line, ast.node(node).column);
                    ast.result
                        .add_error(e.to_string(), Some(&ast.file_uri.clone()), line, column);
                }
            }
        }
        None => {
            match pr.program.add_globalvar(
                &name,
                is_const,
                Some(&ast.file_uri),
                ast.module_path.as_deref(),
                ast.library_name.as_deref(),
            ) {
                Ok(global_id) => {
                    let global = pr.program.global_mut(global_id);
                    global.is_simple_const = is_simple_const;
                    if let Some(value) = value
                        && let ExprKind::Literal(literal) = &ast.node(value).kind
                    {
                        global.content = literal_to_value_content(literal);
                    }
                    ast.node_mut(node).storage = Some(StorageRef {
                        kind: StorageKind::GlobalVarSlot,
                        id: global_id.0 as i64,
                    });
                }
                Err(e) => {
                    let (line, column) = (ast.node(node).line, ast.node(node).column);
                    ast.result
                        .add_error(e.to_string(), Some(&ast.file_uri.clone()), line, column);
                }
            }
        }
    }
}

fn ensure_varinit_func(pr: &mut CompileProject, ast: &Ast, class_id: ClassId) {
    let registered = pr.program.register_horse64_function(
        Some(VARINIT_FUNC_NAME),
        Some(&ast.file_uri),
        &[],
        false,
        ast.module_path.as_deref(),
        ast.library_name.as_deref(),
        Some(class_id),
    );
    match registered {
        Ok(func_id) => {
            pr.program.class_mut(class_id).varinit_func = Some(func_id);
            pr.fake_func_storage
                .insert(func_id.0, crate::compiler::var_storage::FuncStorageInfo {
                    // Slot 0 is self.
                    lowest_guaranteed_free_temp: 1,
                    ..Default::default()
                });
        }
        Err(_) => {
            // Only reachable when a member is literally named $$varinit,
            // which the lexer cannot produce.
        }
    }
}

fn compute_funcdef_storage(
    pr: &mut CompileProject,
    ast: &mut Ast,
    node: NodeId,
    owning_class: Option<ClassId>,
    in_function: bool,
) {
    let (name, args, user_set_parallel, user_set_noasync) = {
        let (ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef)) =
            &ast.node(node).kind
        else {
            return;
        };
        if funcdef.bytecode_func_id.is_some() {
            return;
        }
        (
            funcdef.name,
            funcdef.arguments.clone(),
            funcdef.user_set_parallel,
            funcdef.user_set_noasync,
        )
    };

    // Nested and inline functions stay anonymous in the symbol tables so
    // they never collide with module-level names.
    let symbol_name = if in_function {
        None
    } else {
        name.map(|n| n.resolve(&pr.string_table).to_owned())
    };
    let kwarg_names: Vec<Option<String>> = args
        .arg_names
        .iter()
        .zip(&args.arg_values)
        .map(|(arg_name, default)| {
            default.map(|_| arg_name.resolve(&pr.string_table).to_owned())
        })
        .collect();
    let kwarg_refs: Vec<Option<&str>> = kwarg_names
        .iter()
        .map(|n| n.as_deref())
        .collect();

    let registered = pr.program.register_horse64_function(
        symbol_name.as_deref(),
        Some(&ast.file_uri),
        &kwarg_refs,
        args.last_posarg_is_multiarg,
        ast.module_path.as_deref(),
        ast.library_name.as_deref(),
        owning_class,
    );
    let func_id = match registered {
        Ok(func_id) => func_id,
        Err(e) => {
            let (line, column) = (ast.node(node).line, ast.node(node).column);
            ast.result
                .add_error(e.to_string(), Some(&ast.file_uri.clone()), line, column);
            return;
        }
    };

    {
        let func = pr.program.func_mut(func_id);
        func.user_set_parallel = user_set_parallel;
        if user_set_noasync {
            func.is_threadable = false;
        }
    }
    {
        let (line, column) = (ast.node(node).line, ast.node(node).column);
        if let Some(symbol) = pr.program.symbols.func_symbol_mut(func_id) {
            symbol.header_symbol_line = line;
            symbol.header_symbol_column = column;
        }
    }

    if let (ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef)) =
        &mut ast.node_mut(node).kind
    {
        funcdef.bytecode_func_id = Some(func_id);
    }
    if !in_function {
        // Module-level functions and methods are addressed by global id;
        // local function statements get a stack slot later instead.
        ast.node_mut(node).storage = Some(StorageRef {
            kind: StorageKind::GlobalFuncSlot,
            id: func_id.0 as i64,
        });
    }
}

fn compute_classdef_storage(
    pr: &mut CompileProject,
    ast: &mut Ast,
    ast_id: AstId,
    node: NodeId,
) -> Option<ClassId> {
    let ExprKind::ClassDef(classdef) = &ast.node(node).kind else {
        return None;
    };
    let name = classdef.name.resolve(&pr.string_table).to_owned();
    let user_set_parallel = classdef.user_set_parallel;
    let user_set_noasync = classdef.user_set_noasync;

    let registered = pr.program.add_class(
        &name,
        Some(&ast.file_uri),
        ast.module_path.as_deref(),
        ast.library_name.as_deref(),
    );
    let class_id = match registered {
        Ok(class_id) => class_id,
        Err(e) => {
            let (line, column) = (ast.node(node).line, ast.node(node).column);
            ast.result
                .add_error(e.to_string(), Some(&ast.file_uri.clone()), line, column);
            return None;
        }
    };
    {
        let class = pr.program.class_mut(class_id);
        class.user_set_parallel = user_set_parallel;
        if user_set_noasync {
            class.is_threadable = false;
        }
    }
    if let ExprKind::ClassDef(classdef) = &mut ast.node_mut(node).kind {
        classdef.bytecode_class_id = Some(class_id);
    }
    ast.node_mut(node).storage = Some(StorageRef {
        kind: StorageKind::GlobalClassSlot,
        id: class_id.0 as i64,
    });
    pr.class_def_nodes.insert(class_id.0, (ast_id, node));
    Some(class_id)
}

// ------------------------------
// Phase 2: identifier resolution
// ------------------------------

pub fn resolve_ast(pr: &mut CompileProject, ast_id: AstId) -> Result<(), ()> {
    if pr.ast(ast_id).identifiers_resolved {
        return Ok(());
    }
    if !pr.ast(ast_id).global_storage_built {
        pr.result.add_error(
            "internal error: identifier resolution before global storage",
            Some(&pr.ast(ast_id).file_uri.clone()),
            -1,
            -1,
        );
        return Err(());
    }

    let mut ast = pr.take_ast(ast_id);
    for node_index in 0..ast.nodes.len() {
        let node = NodeId(node_index as u32);
        if matches!(ast.node(node).kind, ExprKind::IdentifierRef(_)) {
            resolve_identifier(pr, &mut ast, ast_id, node);
        }
    }

    // Evaluate derived-class parents now that extends refs have storage:
    for node_index in 0..ast.nodes.len() {
        let node = NodeId(node_index as u32);
        evaluate_derived_class_parent(pr, &mut ast, node);
    }

    ast.identifiers_resolved = true;
    pr.result.transfer_from(&ast.result);
    pr.put_back_ast(ast_id, ast);
    Ok(())
}

/// Whether this identifier is the right-hand side of an attribute access
/// (`x.name`); those resolve at runtime by attribute name id.
fn is_attribute_rhs(ast: &Ast, node: NodeId) -> bool {
    let Some(parent) = ast.node(node).parent else {
        return false;
    };
    matches!(
        &ast.node(parent).kind,
        ExprKind::BinaryOp {
            op: BinOpKind::Attribute,
            rhs,
            ..
        } if *rhs == node
    )
}

fn resolve_identifier(pr: &mut CompileProject, ast: &mut Ast, ast_id: AstId, node: NodeId) {
    if ast.node(node).storage.is_some() {
        return;
    }
    if is_attribute_rhs(ast, node) {
        return;
    }
    let ExprKind::IdentifierRef(identifier) = &ast.node(node).kind else {
        return;
    };
    if identifier.resolved_to_def.is_some() || identifier.resolved_to_expr.is_some() {
        return;
    }
    let name_id = identifier.name;
    let name = name_id.resolve(&pr.string_table).to_owned();
    let (line, column) = (ast.node(node).line, ast.node(node).column);

    if name == "self" || name == "base" {
        resolve_self_reference(pr, ast, node, &name);
        return;
    }

    let scope = scope_of(ast, node);
    if let Some(def) = ast.scope_query_item_ex(scope, name_id, true, false) {
        let declaration = ast.def(def).declaration;
        if matches!(ast.node(declaration).kind, ExprKind::Import(_)) {
            resolve_import_chain(pr, ast, ast_id, node, def);
            return;
        }
        ast.mark_def_used(def, ast.node(node).token_index);
        if let ExprKind::IdentifierRef(identifier) = &mut ast.node_mut(node).kind {
            identifier.resolved_to_def = Some(def);
            identifier.resolved_to_expr = Some(declaration);
        }
        register_closure_use(ast, node, def, declaration, name_id);
        return;
    }

    // Not in any scope: try the built-in module's globals.
    let builtin = pr
        .program
        .symbols
        .module(pr.program.symbols.builtin_module_index());
    let builtin_storage = if let Some(&entry) = builtin.func_name_to_entry.get(&name) {
        Some(StorageRef {
            kind: StorageKind::GlobalFuncSlot,
            id: builtin.func_symbols[entry].global_id.0 as i64,
        })
    } else if let Some(&entry) = builtin.class_name_to_entry.get(&name) {
        Some(StorageRef {
            kind: StorageKind::GlobalClassSlot,
            id: builtin.class_symbols[entry].global_id.0 as i64,
        })
    } else {
        builtin.globalvar_name_to_entry.get(&name).map(|&entry| StorageRef {
            kind: StorageKind::GlobalVarSlot,
            id: builtin.globalvar_symbols[entry].global_id.0 as i64,
        })
    };
    match builtin_storage {
        Some(storage) => {
            ast.node_mut(node).storage = Some(storage);
            if let ExprKind::IdentifierRef(identifier) = &mut ast.node_mut(node).kind {
                identifier.resolved_to_builtin = true;
            }
        }
        None => {
            ast.result.add_error(
                format!("unknown identifier \"{name}\""),
                Some(&ast.file_uri.clone()),
                line,
                column,
            );
        }
    }
}

/// `self`/`base` bind to stack slot 0 of the enclosing method. From a
/// nested inline function the class context must be captured, which the
/// intervening functions record as `closure_with_self`.
fn resolve_self_reference(
    _pr: &mut CompileProject,
    ast: &mut Ast,
    node: NodeId,
    name: &str,
) {
    let mut func = surrounding_func(ast, node);
    let mut crossed_inline_funcs = Vec::new();
    let mut found_method = false;
    while let Some(func_node) = func {
        if funcdef_is_method(ast, func_node) {
            found_method = true;
            break;
        }
        crossed_inline_funcs.push(func_node);
        func = surrounding_func(ast, func_node);
    }
    if !found_method {
        let (line, column) = (ast.node(node).line, ast.node(node).column);
        ast.result.add_error(
            format!("\"{name}\" is only allowed inside a class func attribute"),
            Some(&ast.file_uri.clone()),
            line,
            column,
        );
        return;
    }
    for inline_func in crossed_inline_funcs {
        ast.func_storage
            .entry(inline_func)
            .or_default()
            .closure_with_self = true;
    }
    ast.node_mut(node).storage = Some(StorageRef::stack_slot(0));
}

/// A name defined in an outer function: mark it closure bound and record
/// it on every function between the use and the definition.
fn register_closure_use(
    ast: &mut Ast,
    node: NodeId,
    def: DefRef,
    declaration: NodeId,
    name: crate::compiler::string_interning::StringId,
) {
    // A parameter's owning function is the funcdef carrying it, not the
    // function the funcdef sits in.
    let declaring_func = if funcdef_param_index(ast, declaration, name).is_some() {
        Some(declaration)
    } else {
        surrounding_func(ast, declaration)
    };
    let Some(declaring_func) = declaring_func else {
        return; // a global, no capture needed
    };
    let Some(mut use_func) = surrounding_func(ast, node) else {
        return;
    };
    if use_func == declaring_func {
        return;
    }
    ast.def_mut(def).closure_bound = true;
    loop {
        ast.func_storage
            .entry(use_func)
            .or_default()
            .register_closure_bound(def);
        match surrounding_func(ast, use_func) {
            Some(parent_func) if parent_func != declaring_func => use_func = parent_func,
            _ => break,
        }
    }
}

/// Walk up through chained `.name` accesses to reconstruct the dotted
/// module path, match it against the import's elements, resolve the
/// terminal symbol, and propagate the storage onto every node along the
/// chain.
fn resolve_import_chain(
    pr: &mut CompileProject,
    ast: &mut Ast,
    ast_id: AstId,
    node: NodeId,
    def: DefRef,
) {
    let (line, column) = (ast.node(node).line, ast.node(node).column);

    // Collect the chain of identifiers: base name plus .attr names, and
    // the nodes they live on.
    let mut chain_names: Vec<String> = Vec::new();
    let mut chain_nodes: Vec<NodeId> = vec![node];
    if let ExprKind::IdentifierRef(identifier) = &ast.node(node).kind {
        chain_names.push(identifier.name.resolve(&pr.string_table).to_owned());
    }
    let mut current = node;
    while chain_names.len() <= IMPORT_CHAIN_LEN_MAX {
        let Some(parent) = ast.node(current).parent else {
            break;
        };
        let ExprKind::BinaryOp {
            op: BinOpKind::Attribute,
            lhs,
            rhs,
        } = &ast.node(parent).kind
        else {
            break;
        };
        if *lhs != current {
            break;
        }
        let ExprKind::IdentifierRef(identifier) = &ast.node(*rhs).kind else {
            break;
        };
        chain_names.push(identifier.name.resolve(&pr.string_table).to_owned());
        chain_nodes.push(*rhs);
        chain_nodes.push(parent);
        current = parent;
    }

    // All imports bound to this name:
    let mut candidates: Vec<NodeId> = vec![ast.def(def).declaration];
    candidates.extend(ast.def(def).additional_decls.iter().copied());

    // Find the import whose (aliased) path is a prefix of the chain:
    let mut matched: Option<(NodeId, usize)> = None;
    for candidate in candidates {
        let ExprKind::Import(import) = &ast.node(candidate).kind else {
            continue;
        };
        let path: Vec<String> = match import.import_as {
            Some(alias) => vec![alias.resolve(&pr.string_table).to_owned()],
            None => import
                .elements
                .iter()
                .map(|e| e.resolve(&pr.string_table).to_owned())
                .collect(),
        };
        if path.len() < chain_names.len()
            && chain_names[..path.len()] == path[..]
            && matched.is_none_or(|(_, len)| path.len() > len)
        {
            matched = Some((candidate, path.len()));
        }
    }
    let Some((import_node, path_len)) = matched else {
        ast.result.add_error(
            "imported module used as a standalone value, but modules may only \
             be accessed as module.name",
            Some(&ast.file_uri.clone()),
            line,
            column,
        );
        return;
    };
    let symbol_name = chain_names[path_len].clone();

    let (maps_to_cfuncs, referenced_ast, module_path, library) = {
        let ExprKind::Import(import) = &ast.node(import_node).kind else {
            unreachable!()
        };
        (
            import.maps_to_cfuncs,
            import.referenced_ast,
            import
                .elements
                .iter()
                .map(|e| e.resolve(&pr.string_table).to_owned())
                .collect::<Vec<_>>()
                .join("."),
            import
                .source_library
                .map(|l| l.resolve(&pr.string_table).to_owned()),
        )
    };

    let storage = if maps_to_cfuncs {
        let module = pr
            .program
            .symbols
            .module_by_key(Some(&module_path), library.as_deref());
        module.and_then(|module| {
            module
                .func_name_to_entry
                .get(&symbol_name)
                .map(|&entry| StorageRef {
                    kind: StorageKind::GlobalFuncSlot,
                    id: module.func_symbols[entry].global_id.0 as i64,
                })
        })
    } else if let Some(referenced) = referenced_ast {
        let lookup_in = |target: &Ast| -> Option<StorageRef> {
            let symbol_id = pr.string_table.get_existing(&symbol_name)?;
            let def = target.scope_query_item(target.global_scope, symbol_id, false)?;
            target.node(target.def(def).declaration).storage
        };
        if referenced == ast_id {
            lookup_in(ast)
        } else {
            lookup_in(pr.ast(referenced))
        }
    } else {
        None
    };

    let Some(storage) = storage else {
        ast.result.add_error(
            format!("unknown symbol \"{symbol_name}\" in module \"{module_path}\""),
            Some(&ast.file_uri.clone()),
            line,
            column,
        );
        return;
    };

    // The chain nodes up to and including the symbol access all carry the
    // resolved storage: [base ident, .a ident, .a binop, .b ident, ...]
    let covered = 1 + (path_len - 1) * 2 + 2;
    for chain_node in chain_nodes.iter().take(covered.min(chain_nodes.len())) {
        ast.node_mut(*chain_node).storage = Some(storage);
    }
    ast.mark_def_used(def, ast.node(node).token_index);
    if let ExprKind::IdentifierRef(identifier) = &mut ast.node_mut(node).kind {
        identifier.resolved_to_def = Some(def);
        identifier.resolved_to_expr = Some(import_node);
    }
}

/// Once an extends reference has storage, wire the base-class id into the
/// program's class table.
fn evaluate_derived_class_parent(pr: &mut CompileProject, ast: &mut Ast, node: NodeId) {
    let ExprKind::ClassDef(classdef) = &ast.node(node).kind else {
        return;
    };
    let Some(base_ref) = classdef.base_class_ref else {
        return;
    };
    let Some(class_id) = classdef.bytecode_class_id else {
        return;
    };
    match ast.node(base_ref).storage {
        Some(StorageRef {
            kind: StorageKind::GlobalClassSlot,
            id,
        }) => {
            pr.program.class_mut(class_id).base_class = Some(ClassId(id as u32));
        }
        Some(_) | None => {
            if ast.result.success && pr.result.success {
                let (line, column) = (ast.node(base_ref).line, ast.node(base_ref).column);
                ast.result.add_error(
                    "unexpected derived from expression, must refer to another class",
                    Some(&ast.file_uri.clone()),
                    line,
                    column,
                );
            }
        }
    }
}

// ------------------------------
// Base-class attribute propagation
// ------------------------------

/// Propagate base-class attributes down the inheritance chains, mark
/// error classes, and rebuild the per-class attribute maps. Runs once per
/// project after identifier resolution.
pub fn resolve_class_inheritance(pr: &mut CompileProject) -> Result<(), ()> {
    let class_count = pr.program.classes.len();
    let mut propagated = vec![false; class_count];
    for class_index in 0..class_count {
        let mut visiting = Vec::new();
        propagate_class(pr, ClassId(class_index as u32), &mut propagated, &mut visiting);
        if !pr.result.success {
            break;
        }
    }
    Ok(())
}

fn class_error_position(pr: &CompileProject, class_id: ClassId) -> (Option<String>, i64, i64) {
    match pr.class_def_nodes.get(&class_id.0) {
        Some(&(ast_id, node)) => {
            let ast = pr.ast(ast_id);
            (
                Some(ast.file_uri.clone()),
                ast.node(node).line,
                ast.node(node).column,
            )
        }
        None => (None, -1, -1),
    }
}

fn propagate_class(
    pr: &mut CompileProject,
    class_id: ClassId,
    propagated: &mut [bool],
    visiting: &mut Vec<ClassId>,
) {
    if propagated[class_id.0 as usize] {
        return;
    }
    if visiting.contains(&class_id) {
        let (file_uri, line, column) = class_error_position(pr, class_id);
        pr.result.add_error(
            "unexpected cycle in base classes, a class must not derive from itself",
            file_uri.as_deref(),
            line,
            column,
        );
        propagated[class_id.0 as usize] = true;
        return;
    }
    let Some(parent_id) = pr.program.class(class_id).base_class else {
        propagated[class_id.0 as usize] = true;
        return;
    };

    visiting.push(class_id);
    propagate_class(pr, parent_id, propagated, visiting);
    visiting.pop();
    if !pr.result.success {
        return;
    }

    // Error classes: any chain reaching the built-in Exception.
    if parent_id == EXCEPTION_CLASS_ID || pr.program.class(parent_id).is_error {
        pr.program.class_mut(class_id).is_error = true;
    }

    // Var attributes must not override the base's:
    let parent_varattrs = pr.program.class(parent_id).varattr_name_ids.clone();
    let own_varattrs = pr.program.class(class_id).varattr_name_ids.clone();
    for own_name_id in &own_varattrs {
        if pr.program.class(parent_id).attr_map.lookup(*own_name_id).is_some() {
            let name = pr
                .program
                .symbols
                .attr_name(*own_name_id)
                .unwrap_or("?")
                .to_owned();
            let (file_uri, line, column) = class_error_position(pr, class_id);
            pr.result.add_error(
                format!(
                    "blocked name \"{name}\", variable attributes must not be \
                     overriding base class attributes"
                ),
                file_uri.as_deref(),
                line,
                column,
            );
            propagated[class_id.0 as usize] = true;
            return;
        }
    }

    // Pull in the parent's var attributes as a prefix:
    if own_varattrs.len() + parent_varattrs.len() > MAX_CLASS_VARATTRS {
        let (file_uri, line, column) = class_error_position(pr, class_id);
        pr.result.add_error(
            format!(
                "exceeded maximum of {MAX_CLASS_VARATTRS} variable attributes on \
                 this class"
            ),
            file_uri.as_deref(),
            line,
            column,
        );
        propagated[class_id.0 as usize] = true;
        return;
    }
    let parent_count = parent_varattrs.len();
    if parent_count > 0 {
        let mut merged = parent_varattrs;
        merged.extend(own_varattrs.iter().copied());
        pr.program.class_mut(class_id).varattr_name_ids = merged;

        // Own initializers shift behind the inherited prefix; the
        // inherited slots run through the parent's own $$varinit.
        let own_inits = pr
            .class_varattr_inits
            .remove(&class_id.0)
            .unwrap_or_default();
        let mut merged_inits: Vec<Option<(AstId, NodeId)>> = vec![None; parent_count];
        merged_inits.extend(own_inits);
        pr.class_varattr_inits.insert(class_id.0, merged_inits);

        // Fix the declared member nodes' storage indices:
        if let Some(&(ast_id, class_node)) = pr.class_def_nodes.get(&class_id.0) {
            let vardefs: Vec<NodeId> = match &pr.ast(ast_id).node(class_node).kind {
                ExprKind::ClassDef(classdef) => classdef.vardefs.clone(),
                _ => Vec::new(),
            };
            for vardef in vardefs {
                let ast = pr.ast_mut(ast_id);
                if let Some(storage) = &mut ast.node_mut(vardef).storage
                    && storage.kind == StorageKind::VarAttrSlot
                {
                    storage.id += parent_count as i64;
                }
            }
        }
    }

    // Pull in the parent's func attributes the child did not override:
    let parent_funcattrs: Vec<(i64, FuncId)> = {
        let parent = pr.program.class(parent_id);
        parent
            .funcattr_name_ids
            .iter()
            .copied()
            .zip(parent.funcattr_func_ids.iter().copied())
            .collect()
    };
    for (name_id, func_id) in parent_funcattrs {
        if pr.program.class(class_id).attr_map.lookup(name_id).is_some() {
            continue;
        }
        if pr.program.class(class_id).funcattr_name_ids.len() + 1 > MAX_CLASS_FUNCATTRS {
            let (file_uri, line, column) = class_error_position(pr, class_id);
            pr.result.add_error(
                format!(
                    "exceeded maximum of {MAX_CLASS_FUNCATTRS} func attributes on \
                     this class"
                ),
                file_uri.as_deref(),
                line,
                column,
            );
            propagated[class_id.0 as usize] = true;
            return;
        }
        let is_varinit_name =
            pr.program.symbols.attr_name(name_id) == Some(VARINIT_FUNC_NAME);
        let class = pr.program.class_mut(class_id);
        class.funcattr_name_ids.push(name_id);
        class.funcattr_func_ids.push(func_id);
        // Inheriting the parent's variable initializer as well:
        if is_varinit_name && class.varinit_func.is_none() {
            class.varinit_func = Some(func_id);
        }
    }

    pr.program.rebuild_class_attr_map(class_id);
    propagated[class_id.0 as usize] = true;
}

/// The constant a simple-const global starts out with.
fn literal_to_value_content(value: &LiteralValue) -> crate::bytecode::value::ValueContent {
    use crate::bytecode::value::ValueContent;
    match value {
        LiteralValue::Int(v) => ValueContent::Int64(*v),
        LiteralValue::Float(v) => ValueContent::Float64(*v),
        LiteralValue::Bool(v) => ValueContent::Bool(*v),
        LiteralValue::None => ValueContent::None,
        LiteralValue::Str(codepoints) => ValueContent::from_codepoints(codepoints),
        LiteralValue::Bytes(bytes) => ValueContent::from_bytes(bytes),
    }
}
