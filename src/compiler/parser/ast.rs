//! AST arena and scope model.
//!
//! All cross-references are stable indices into the arenas owned by [`Ast`]
//! (nodes, scopes), never pointers: `parent`, scope definitions and
//! resolved-to references are `NodeId`/`ScopeId`/`DefRef` values. One `Ast`
//! owns everything parsed from one source file.

use crate::bytecode::program::{ClassId, FuncId};
use crate::compiler::compiler_messages::results::ResultMessages;
use crate::compiler::parser::operators::{AssignOpKind, BinOpKind, UnaryOpKind};
use crate::compiler::string_interning::{StringId, StringTable};
use crate::compiler::var_storage::FuncStorageInfo;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Index of a loaded AST within the compile project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AstId(pub u32);

/// A definition within a scope: (scope, index into its def list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefRef {
    pub scope: ScopeId,
    pub def: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    StackSlot,
    GlobalVarSlot,
    GlobalFuncSlot,
    GlobalClassSlot,
    VarAttrSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRef {
    pub kind: StorageKind,
    pub id: i64,
}

impl StorageRef {
    pub fn stack_slot(id: i64) -> StorageRef {
        StorageRef {
            kind: StorageKind::StackSlot,
            id,
        }
    }
}

// ------------------------------
// Expression payloads
// ------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Str(Vec<u32>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct VarDefData {
    pub identifier: StringId,
    pub is_const: bool,
    pub value: Option<NodeId>,
    pub found_in_scope: ScopeId,
}

#[derive(Debug, Clone, Default)]
pub struct FuncArgs {
    pub arg_names: Vec<StringId>,
    /// Default value per argument; None marks a positional argument.
    pub arg_values: Vec<Option<NodeId>>,
    pub last_posarg_is_multiarg: bool,
}

impl FuncArgs {
    pub fn arg_count(&self) -> usize {
        self.arg_names.len()
    }
}

#[derive(Debug, Clone)]
pub struct FuncDefData {
    pub name: Option<StringId>,
    pub user_set_parallel: bool,
    pub user_set_noasync: bool,
    pub arguments: FuncArgs,
    pub body: Vec<NodeId>,
    pub scope: ScopeId,
    pub found_in_scope: ScopeId,
    pub bytecode_func_id: Option<FuncId>,
}

#[derive(Debug, Clone)]
pub struct ClassDefData {
    pub name: StringId,
    pub user_set_parallel: bool,
    pub user_set_noasync: bool,
    pub base_class_ref: Option<NodeId>,
    pub scope: ScopeId,
    pub vardefs: Vec<NodeId>,
    pub funcdefs: Vec<NodeId>,
    pub found_in_scope: ScopeId,
    pub bytecode_class_id: Option<ClassId>,
}

#[derive(Debug, Clone)]
pub struct IfClause {
    pub scope: ScopeId,
    /// None only on the final `else` clause.
    pub cond: Option<NodeId>,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ImportData {
    pub elements: Vec<StringId>,
    pub source_library: Option<StringId>,
    pub import_as: Option<StringId>,
    pub found_in_scope: ScopeId,
    /// Filled by the import resolver; non-owning reference, cycles are
    /// fine.
    pub referenced_ast: Option<AstId>,
    pub maps_to_cfuncs: bool,
}

impl ImportData {
    /// The name this import binds in its scope.
    pub fn bound_name(&self) -> StringId {
        self.import_as.unwrap_or(self.elements[0])
    }
}

#[derive(Debug, Clone)]
pub struct DoData {
    pub scope: ScopeId,
    pub body: Vec<NodeId>,
    /// Caught error type expressions (class references).
    pub errors: Vec<NodeId>,
    pub error_name: Option<StringId>,
    pub has_rescue: bool,
    pub rescue_scope: ScopeId,
    pub rescue_body: Vec<NodeId>,
    pub has_finally: bool,
    pub finally_scope: ScopeId,
    pub finally_body: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub pos_args: Vec<NodeId>,
    pub kw_names: Vec<StringId>,
    pub kw_values: Vec<NodeId>,
    pub expand_last_posarg: bool,
}

#[derive(Debug, Clone)]
pub struct CallData {
    pub callee: NodeId,
    pub args: CallArgs,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct IdentifierRefData {
    pub name: StringId,
    pub resolved_to_def: Option<DefRef>,
    pub resolved_to_expr: Option<NodeId>,
    pub resolved_to_builtin: bool,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    VarDef(VarDefData),
    FuncDef(FuncDefData),
    CallStmt { call: NodeId },
    ClassDef(ClassDefData),
    If { clauses: Vec<IfClause> },
    While {
        scope: ScopeId,
        cond: NodeId,
        body: Vec<NodeId>,
    },
    For {
        iterator: StringId,
        scope: ScopeId,
        container: NodeId,
        body: Vec<NodeId>,
    },
    Import(ImportData),
    Return { value: Option<NodeId> },
    Do(DoData),
    With {
        scope: ScopeId,
        clauses: Vec<NodeId>,
        body: Vec<NodeId>,
    },
    Assign {
        lvalue: NodeId,
        rvalue: NodeId,
        op: AssignOpKind,
    },
    Literal(LiteralValue),
    IdentifierRef(IdentifierRefData),
    InlineFuncDef(FuncDefData),
    UnaryOp { op: UnaryOpKind, operand: NodeId },
    BinaryOp {
        op: BinOpKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    Call(CallData),
    ListLiteral { entries: Vec<NodeId> },
    SetLiteral { entries: Vec<NodeId> },
    MapLiteral {
        keys: Vec<NodeId>,
        values: Vec<NodeId>,
    },
    VectorLiteral { entries: Vec<NodeId> },
    WithClause {
        value: NodeId,
        identifier: StringId,
        found_in_scope: ScopeId,
    },
}

impl ExprKind {
    pub fn is_stmt(&self) -> bool {
        matches!(
            self,
            ExprKind::VarDef(_)
                | ExprKind::FuncDef(_)
                | ExprKind::CallStmt { .. }
                | ExprKind::ClassDef(_)
                | ExprKind::If { .. }
                | ExprKind::While { .. }
                | ExprKind::For { .. }
                | ExprKind::Import(_)
                | ExprKind::Return { .. }
                | ExprKind::Do(_)
                | ExprKind::With { .. }
                | ExprKind::Assign { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ExprKind::VarDef(_) => "vardef",
            ExprKind::FuncDef(_) => "funcdef",
            ExprKind::CallStmt { .. } => "callstmt",
            ExprKind::ClassDef(_) => "classdef",
            ExprKind::If { .. } => "if",
            ExprKind::While { .. } => "while",
            ExprKind::For { .. } => "for",
            ExprKind::Import(_) => "import",
            ExprKind::Return { .. } => "return",
            ExprKind::Do(_) => "do",
            ExprKind::With { .. } => "with",
            ExprKind::Assign { .. } => "assign",
            ExprKind::Literal(_) => "literal",
            ExprKind::IdentifierRef(_) => "identifierref",
            ExprKind::InlineFuncDef(_) => "inlinefuncdef",
            ExprKind::UnaryOp { .. } => "unaryop",
            ExprKind::BinaryOp { .. } => "binaryop",
            ExprKind::Call(_) => "call",
            ExprKind::ListLiteral { .. } => "list",
            ExprKind::SetLiteral { .. } => "set",
            ExprKind::MapLiteral { .. } => "map",
            ExprKind::VectorLiteral { .. } => "vector",
            ExprKind::WithClause { .. } => "withclause",
        }
    }
}

/// One AST node. `eval_temp_id` is the stack slot its value lands in at
/// runtime; it stays -1 until codegen assigns it.
#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub line: i64,
    pub column: i64,
    pub token_index: usize,
    pub parent: Option<NodeId>,
    pub storage: Option<StorageRef>,
    pub eval_temp_id: i32,
}

impl Expression {
    pub fn new(kind: ExprKind, line: i64, column: i64, token_index: usize) -> Expression {
        Expression {
            kind,
            line,
            column,
            token_index,
            parent: None,
            storage: None,
            eval_temp_id: -1,
        }
    }
}

// ------------------------------
// Scopes
// ------------------------------

#[derive(Debug, Clone)]
pub struct ScopeDef {
    pub identifier: StringId,
    pub declaration: NodeId,
    /// Further declarations mapping onto the same name, e.g. repeated
    /// `import` statements for the same module prefix.
    pub additional_decls: Vec<NodeId>,
    pub ever_used: bool,
    pub closure_bound: bool,
    pub first_use_token_index: Option<usize>,
    pub last_use_token_index: Option<usize>,
    pub expanded_to_real_use_range: bool,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub defs: Vec<ScopeDef>,
    pub name_to_def: FxHashMap<StringId, usize>,
    pub parent: Option<ScopeId>,
    pub is_global: bool,
    /// Class body scopes hold member definitions; name lookups from
    /// method bodies skip them unless class items are queried explicitly.
    pub is_class_scope: bool,
    pub class_and_func_nesting_level: i32,
}

pub enum ScopeAddResult {
    Added(usize),
    AlreadyExists(usize),
}

// ------------------------------
// The per-file AST
// ------------------------------

#[derive(Debug)]
pub struct Ast {
    pub nodes: Vec<Expression>,
    pub scopes: Vec<Scope>,
    pub root_stmts: Vec<NodeId>,
    pub global_scope: ScopeId,
    pub result: ResultMessages,
    pub file_uri: String,
    pub module_path: Option<String>,
    pub library_name: Option<String>,
    pub token_count: usize,

    pub global_storage_built: bool,
    pub identifiers_resolved: bool,
    pub local_storage_done: bool,
    pub threadable_map_done: bool,

    /// Per-function storage allocation state, keyed by the funcdef node.
    pub func_storage: FxHashMap<NodeId, FuncStorageInfo>,
}

impl Ast {
    /// An AST shell with no statements; also what a fatally failed lex
    /// leaves behind so the rest of the project can continue.
    pub fn new_shell(file_uri: &str) -> Ast {
        let global_scope = Scope {
            defs: Vec::new(),
            name_to_def: FxHashMap::default(),
            parent: None,
            is_global: true,
            is_class_scope: false,
            class_and_func_nesting_level: 0,
        };
        Ast {
            nodes: Vec::new(),
            scopes: vec![global_scope],
            root_stmts: Vec::new(),
            global_scope: ScopeId(0),
            result: ResultMessages::new(),
            file_uri: file_uri.to_owned(),
            module_path: None,
            library_name: None,
            token_count: 0,
            global_storage_built: false,
            identifiers_resolved: false,
            local_storage_done: false,
            threadable_map_done: false,
            func_storage: FxHashMap::default(),
        }
    }

    /// Placeholder value used when an AST is temporarily moved out of the
    /// project's table for a mutable pass.
    pub fn placeholder() -> Ast {
        Ast::new_shell("")
    }

    pub fn add_node(&mut self, expr: Expression) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(expr);
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Expression {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Expression {
        &mut self.nodes[id.0 as usize]
    }

    pub fn add_scope(&mut self, parent: ScopeId, nesting_increases: bool) -> ScopeId {
        let level = self.scope(parent).class_and_func_nesting_level
            + if nesting_increases { 1 } else { 0 };
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            defs: Vec::new(),
            name_to_def: FxHashMap::default(),
            parent: Some(parent),
            is_global: false,
            is_class_scope: false,
            class_and_func_nesting_level: level,
        });
        id
    }

    #[inline]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    #[inline]
    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn def(&self, def_ref: DefRef) -> &ScopeDef {
        &self.scopes[def_ref.scope.0 as usize].defs[def_ref.def]
    }

    pub fn def_mut(&mut self, def_ref: DefRef) -> &mut ScopeDef {
        &mut self.scopes[def_ref.scope.0 as usize].defs[def_ref.def]
    }

    /// Add a name to a scope. Existing names are not replaced; the caller
    /// decides whether that is an additional declaration or an error.
    pub fn scope_add_item(
        &mut self,
        scope_id: ScopeId,
        identifier: StringId,
        declaration: NodeId,
    ) -> ScopeAddResult {
        let scope = self.scope_mut(scope_id);
        if let Some(&existing) = scope.name_to_def.get(&identifier) {
            return ScopeAddResult::AlreadyExists(existing);
        }
        let def_index = scope.defs.len();
        scope.defs.push(ScopeDef {
            identifier,
            declaration,
            additional_decls: Vec::new(),
            ever_used: false,
            closure_bound: false,
            first_use_token_index: None,
            last_use_token_index: None,
            expanded_to_real_use_range: false,
        });
        scope.name_to_def.insert(identifier, def_index);
        ScopeAddResult::Added(def_index)
    }

    /// Find a name in a scope, optionally bubbling up through parents.
    /// Bubbling skips class body scopes; members are only found when
    /// `query_class_items` is set.
    pub fn scope_query_item_ex(
        &self,
        scope_id: ScopeId,
        identifier: StringId,
        bubble_up: bool,
        query_class_items: bool,
    ) -> Option<DefRef> {
        let mut current = Some(scope_id);
        let mut first = true;
        while let Some(scope_id) = current {
            let scope = self.scope(scope_id);
            let skip = scope.is_class_scope && !query_class_items && !first;
            if !skip
                && let Some(&def) = scope.name_to_def.get(&identifier)
            {
                return Some(DefRef {
                    scope: scope_id,
                    def,
                });
            }
            if !bubble_up {
                return None;
            }
            first = false;
            current = scope.parent;
        }
        None
    }

    pub fn scope_query_item(
        &self,
        scope_id: ScopeId,
        identifier: StringId,
        bubble_up: bool,
    ) -> Option<DefRef> {
        self.scope_query_item_ex(scope_id, identifier, bubble_up, true)
    }

    /// Record a use of a definition at a token index, widening its usage
    /// range for the lifetime analysis of local storage.
    pub fn mark_def_used(&mut self, def_ref: DefRef, token_index: usize) {
        let def = self.def_mut(def_ref);
        def.ever_used = true;
        def.first_use_token_index = Some(match def.first_use_token_index {
            Some(first) => first.min(token_index),
            None => token_index,
        });
        def.last_use_token_index = Some(match def.last_use_token_index {
            Some(last) => last.max(token_index),
            None => token_index,
        });
    }

    /// Children in source/evaluation order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        match &self.node(id).kind {
            ExprKind::VarDef(vardef) => out.extend(vardef.value),
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                out.extend(funcdef.arguments.arg_values.iter().flatten().copied());
                out.extend(&funcdef.body);
            }
            ExprKind::CallStmt { call } => out.push(*call),
            ExprKind::ClassDef(classdef) => {
                out.extend(classdef.base_class_ref);
                out.extend(&classdef.vardefs);
                out.extend(&classdef.funcdefs);
            }
            ExprKind::If { clauses } => {
                for clause in clauses {
                    out.extend(clause.cond);
                    out.extend(&clause.body);
                }
            }
            ExprKind::While { cond, body, .. } => {
                out.push(*cond);
                out.extend(body);
            }
            ExprKind::For {
                container, body, ..
            } => {
                out.push(*container);
                out.extend(body);
            }
            ExprKind::Import(_) => {}
            ExprKind::Return { value } => out.extend(*value),
            ExprKind::Do(dostmt) => {
                out.extend(&dostmt.body);
                out.extend(&dostmt.errors);
                out.extend(&dostmt.rescue_body);
                out.extend(&dostmt.finally_body);
            }
            ExprKind::With { clauses, body, .. } => {
                out.extend(clauses);
                out.extend(body);
            }
            ExprKind::Assign { lvalue, rvalue, .. } => {
                out.push(*lvalue);
                out.push(*rvalue);
            }
            ExprKind::Literal(_) | ExprKind::IdentifierRef(_) => {}
            ExprKind::UnaryOp { operand, .. } => out.push(*operand),
            ExprKind::BinaryOp { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            ExprKind::Call(call) => {
                out.push(call.callee);
                out.extend(&call.args.pos_args);
                out.extend(&call.args.kw_values);
            }
            ExprKind::ListLiteral { entries }
            | ExprKind::SetLiteral { entries }
            | ExprKind::VectorLiteral { entries } => out.extend(entries),
            ExprKind::MapLiteral { keys, values } => {
                for (key, value) in keys.iter().zip(values) {
                    out.push(*key);
                    out.push(*value);
                }
            }
            ExprKind::WithClause { value, .. } => out.push(*value),
        }
        out
    }

    /// Fix up all parent links; run once after parsing.
    pub fn link_parents(&mut self) {
        let roots = self.root_stmts.clone();
        for root in roots {
            self.node_mut(root).parent = None;
            self.link_parents_below(root);
        }
    }

    fn link_parents_below(&mut self, node: NodeId) {
        for child in self.children(node) {
            self.node_mut(child).parent = Some(node);
            self.link_parents_below(child);
        }
    }

    /// JSON debug dump of one node, used by `--compiler-stage-debug`.
    pub fn node_to_json(&self, id: NodeId, string_table: &StringTable) -> serde_json::Value {
        let node = self.node(id);
        let mut object = serde_json::Map::new();
        object.insert("type".into(), node.kind.type_name().into());
        object.insert("line".into(), node.line.into());
        object.insert("column".into(), node.column.into());
        if let Some(storage) = &node.storage {
            object.insert(
                "storage".into(),
                serde_json::json!({
                    "kind": format!("{:?}", storage.kind),
                    "id": storage.id,
                }),
            );
        }
        match &node.kind {
            ExprKind::VarDef(vardef) => {
                object.insert(
                    "identifier".into(),
                    vardef.identifier.resolve(string_table).into(),
                );
            }
            ExprKind::FuncDef(funcdef) | ExprKind::InlineFuncDef(funcdef) => {
                if let Some(name) = funcdef.name {
                    object.insert("name".into(), name.resolve(string_table).into());
                }
            }
            ExprKind::ClassDef(classdef) => {
                object.insert("name".into(), classdef.name.resolve(string_table).into());
            }
            ExprKind::IdentifierRef(identifier) => {
                object.insert(
                    "identifier".into(),
                    identifier.name.resolve(string_table).into(),
                );
            }
            ExprKind::Literal(value) => {
                object.insert("value".into(), format!("{value:?}").into());
            }
            _ => {}
        }
        let children: Vec<serde_json::Value> = self
            .children(id)
            .into_iter()
            .map(|child| self.node_to_json(child, string_table))
            .collect();
        if !children.is_empty() {
            object.insert("children".into(), children.into());
        }
        serde_json::Value::Object(object)
    }
}

// ------------------------------
// Visitation
// ------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitStep {
    Descend,
    SkipChildren,
}

/// Pre/post-order AST walk. Implementations may return
/// `VisitStep::SkipChildren` from `visit_in` and descend into specific
/// children themselves via [`visit_expression`].
pub trait AstVisitor {
    fn visit_in(&mut self, _ast: &mut Ast, _node: NodeId) -> Result<VisitStep, ()> {
        Ok(VisitStep::Descend)
    }
    fn visit_out(&mut self, _ast: &mut Ast, _node: NodeId) -> Result<(), ()> {
        Ok(())
    }
}

pub fn visit_expression<V: AstVisitor>(
    ast: &mut Ast,
    node: NodeId,
    visitor: &mut V,
) -> Result<(), ()> {
    if visitor.visit_in(ast, node)? == VisitStep::Descend {
        for child in ast.children(node) {
            visit_expression(ast, child, visitor)?;
        }
    }
    visitor.visit_out(ast, node)
}

/// Walk all top-level statements of an AST.
pub fn visit_ast<V: AstVisitor>(ast: &mut Ast, visitor: &mut V) -> Result<(), ()> {
    let roots = ast.root_stmts.clone();
    for root in roots {
        visit_expression(ast, root, visitor)?;
    }
    Ok(())
}
