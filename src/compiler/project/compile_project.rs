//! The compile project: per-file AST cache, import resolution against the
//! VFS overlay and the on-disk `horse_modules` convention, and the driver
//! that runs every stage front to back.

use crate::bytecode::linker::link_program;
use crate::bytecode::program::{FuncId, Program};
use crate::compiler::codegen;
use crate::compiler::compiler_messages::results::ResultMessages;
use crate::compiler::compiler_messages::warning_config::WarningConfig;
use crate::compiler::parser::ast::{Ast, AstId, ExprKind, NodeId, StorageKind};
use crate::compiler::parser::obvious_mistakes;
use crate::compiler::parser::parser::parse_tokens;
use crate::compiler::project::project_config::ProjectConfig;
use crate::compiler::project::uri;
use crate::compiler::project::vfs::Vfs;
use crate::compiler::scope_resolver;
use crate::compiler::string_interning::StringTable;
use crate::compiler::threadable::{self, ThreadableGraph};
use crate::compiler::tokenizer::lexer::tokenize;
use crate::compiler::var_storage::{FuncStorageInfo, assign_local_storage};
use crate::import_log;
use crate::settings::{
    BUILTIN_MODULES_PREFIX, H64_FILE_EXTENSION, MODULES_FOLDER_NAME, SOURCE_FILE_SIZE_MAX,
};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

pub struct CompileProject {
    /// Absolute, normalized project base folder.
    pub base_folder: PathBuf,
    pub vfs: Vfs,
    pub program: Program,
    pub result: ResultMessages,
    pub string_table: StringTable,
    pub warning_config: WarningConfig,
    pub config: ProjectConfig,
    pub stage_debug: bool,
    pub import_debug: bool,

    pub asts: Vec<Ast>,
    path_to_ast: FxHashMap<String, AstId>,

    pub threadable_graph: ThreadableGraph,
    /// Per class: the var-attr initializer expressions, parallel to the
    /// class's varattr array. Compiler-side bookkeeping the bytecode
    /// layer never sees.
    pub class_varattr_inits: FxHashMap<u32, Vec<Option<(AstId, NodeId)>>>,
    /// Where each class was declared, for later passes and error
    /// positions.
    pub class_def_nodes: FxHashMap<u32, (AstId, NodeId)>,
    /// Storage bookkeeping for the synthesized functions ($$globalinit
    /// and the per-class $$varinit initializers), which have no AST node.
    pub fake_func_storage: FxHashMap<u32, FuncStorageInfo>,
}

impl CompileProject {
    pub fn new(base_folder: &Path) -> Result<CompileProject, String> {
        let base_folder = uri::normalize_path(base_folder);
        if !base_folder.is_absolute() {
            return Err(format!(
                "project base folder must be absolute, got \"{}\"",
                base_folder.display()
            ));
        }
        let config = ProjectConfig::load(&base_folder)?;
        Ok(CompileProject {
            base_folder,
            vfs: Vfs::new(),
            program: Program::new(),
            result: ResultMessages::new(),
            string_table: StringTable::new(),
            warning_config: WarningConfig::default(),
            config,
            stage_debug: false,
            import_debug: false,
            asts: Vec::new(),
            path_to_ast: FxHashMap::default(),
            threadable_graph: ThreadableGraph::new(),
            class_varattr_inits: FxHashMap::default(),
            class_def_nodes: FxHashMap::default(),
            fake_func_storage: FxHashMap::default(),
        })
    }

    /// Walk up from a file to find the project root: the first ancestor
    /// containing `.git` or `horse_modules`. Falls back to the current
    /// working directory when it contains the file.
    pub fn guess_project_root(file: &Path) -> Result<PathBuf, String> {
        let absolute = if file.is_absolute() {
            uri::normalize_path(file)
        } else {
            let cwd = std::env::current_dir()
                .map_err(|e| format!("cannot determine working directory: {e}"))?;
            uri::normalize_path(&cwd.join(file))
        };
        let mut current = absolute.parent();
        while let Some(dir) = current {
            if dir.join(".git").exists() || dir.join(MODULES_FOLDER_NAME).exists() {
                return Ok(dir.to_path_buf());
            }
            current = dir.parent();
        }
        let cwd = std::env::current_dir()
            .map_err(|e| format!("cannot determine working directory: {e}"))?;
        if absolute.starts_with(&cwd) {
            return Ok(uri::normalize_path(&cwd));
        }
        Err(format!(
            "cannot guess project folder for \"{}\"",
            file.display()
        ))
    }

    pub fn ast(&self, id: AstId) -> &Ast {
        &self.asts[id.0 as usize]
    }

    pub fn ast_mut(&mut self, id: AstId) -> &mut Ast {
        &mut self.asts[id.0 as usize]
    }

    /// Temporarily move an AST out for a mutable pass; pair with
    /// [`CompileProject::put_back_ast`].
    pub fn take_ast(&mut self, id: AstId) -> Ast {
        std::mem::replace(&mut self.asts[id.0 as usize], Ast::placeholder())
    }

    pub fn put_back_ast(&mut self, id: AstId, ast: Ast) {
        self.asts[id.0 as usize] = ast;
    }

    pub fn ast_ids(&self) -> Vec<AstId> {
        (0..self.asts.len() as u32).map(AstId).collect()
    }

    /// Whether the given path names a file in the VFS overlay rather than
    /// on disk.
    fn is_vfs_path(path: &str) -> bool {
        !path.contains("://") && !path.starts_with('/') && !path.contains(':')
    }

    /// Map a file URI (or VFS-relative path) onto the project-relative
    /// normalized path used as AST cache key.
    pub fn to_project_rel_path(&self, file_uri: &str) -> Result<String, String> {
        if CompileProject::is_vfs_path(file_uri) {
            return Ok(uri::normalize_path(Path::new(&file_uri.replace('\\', "/")))
                .to_string_lossy()
                .replace('\\', "/"));
        }
        let path = uri::to_file_path(file_uri).map_err(|e| e.to_string())?;
        let normalized = uri::normalize_path(&path);
        match normalized.strip_prefix(&self.base_folder) {
            Ok(relative) => Ok(relative.to_string_lossy().replace('\\', "/")),
            Err(_) => Err(format!(
                "file \"{}\" is outside of the project folder \"{}\"",
                normalized.display(),
                self.base_folder.display()
            )),
        }
    }

    fn validate_module_component(component: &str) -> bool {
        let mut chars = component.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Derive (module path, library name) from a project-relative path.
    /// Directory separators become dots, the `.h64` suffix is stripped,
    /// and any other dot in the path is rejected.
    pub fn module_path_for_rel_path(rel_path: &str) -> Result<(String, Option<String>), String> {
        let Some(stem) = rel_path.strip_suffix(&format!(".{H64_FILE_EXTENSION}")) else {
            return Err(format!(
                "source file \"{rel_path}\" does not have the .{H64_FILE_EXTENSION} extension"
            ));
        };
        if stem.contains('.') {
            return Err(format!(
                "module path \"{rel_path}\" must not contain dotted components"
            ));
        }
        let mut components: Vec<&str> = stem.split('/').filter(|c| !c.is_empty()).collect();
        let mut library = None;
        if components.len() >= 3
            && (components[0] == BUILTIN_MODULES_PREFIX || components[0] == MODULES_FOLDER_NAME)
        {
            library = Some(components[1].to_owned());
            components.drain(0..2);
        }
        if components.is_empty() {
            return Err(format!("empty module path for \"{rel_path}\""));
        }
        for component in &components {
            if !CompileProject::validate_module_component(component) {
                return Err(format!(
                    "invalid module path component \"{component}\" in \"{rel_path}\""
                ));
            }
        }
        Ok((components.join("."), library))
    }

    /// Return a cached AST or lex+parse the file and cache it. Lexer
    /// failures still produce an (empty) AST shell so the rest of the
    /// project can continue; the error lands in the buffers.
    pub fn get_ast(&mut self, file_uri: &str) -> Result<AstId, ()> {
        let rel_path = match self.to_project_rel_path(file_uri) {
            Ok(rel_path) => rel_path,
            Err(message) => {
                self.result.add_error(message, Some(file_uri), -1, -1);
                return Err(());
            }
        };
        if let Some(&id) = self.path_to_ast.get(&rel_path) {
            return Ok(id);
        }

        let source: Vec<u8> = if let Some(content) = self.vfs.read(&rel_path) {
            content.to_vec()
        } else {
            let disk_path = self.base_folder.join(&rel_path);
            match std::fs::read(&disk_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.result.add_error(
                        format!("cannot read \"{}\": {e}", disk_path.display()),
                        Some(file_uri),
                        -1,
                        -1,
                    );
                    return Err(());
                }
            }
        };

        let mut ast = if source.len() > SOURCE_FILE_SIZE_MAX {
            let mut shell = Ast::new_shell(file_uri);
            shell.result.add_error(
                format!(
                    "source file exceeds maximum size of {SOURCE_FILE_SIZE_MAX} bytes"
                ),
                Some(file_uri),
                -1,
                -1,
            );
            shell
        } else {
            let mut lex_result = ResultMessages::new();
            match tokenize(
                &source,
                &self.warning_config,
                &mut self.string_table,
                &mut lex_result,
            ) {
                Ok(tokens) => {
                    let mut ast = parse_tokens(
                        &tokens,
                        file_uri,
                        &mut self.string_table,
                        &self.warning_config,
                    );
                    ast.result.transfer_from(&lex_result);
                    ast
                }
                Err(fatal) => {
                    // Halt this file but keep the project going with an
                    // empty statement shell.
                    let mut shell = Ast::new_shell(file_uri);
                    shell.result.transfer_from(&lex_result);
                    shell.result.push(fatal.with_file_uri(file_uri));
                    shell
                }
            }
        };

        match CompileProject::module_path_for_rel_path(&rel_path) {
            Ok((module_path, library)) => {
                ast.module_path = Some(module_path);
                ast.library_name = library;
            }
            Err(message) => {
                ast.result
                    .add_error(message, Some(file_uri), -1, -1);
            }
        }

        if self.stage_debug {
            for root in ast.root_stmts.clone() {
                let json = ast.node_to_json(root, &self.string_table);
                eprintln!("horsec: debug: parsed: {json}");
            }
        }

        self.result.transfer_from(&ast.result);
        let id = AstId(self.asts.len() as u32);
        self.asts.push(ast);
        self.path_to_ast.insert(rel_path, id);
        Ok(id)
    }

    /// Whether an import already maps onto a registered module consisting
    /// purely of C functions; such imports load no file at all.
    pub fn does_import_map_to_cfuncs(
        &self,
        module_path: &str,
        library: Option<&str>,
    ) -> bool {
        self.program
            .symbols
            .module_by_key(Some(module_path), library)
            .is_some_and(|module| module.is_pure_cfunc_module())
    }

    /// Resolve `import a.b.c [from LIB]` to a loadable path, per the
    /// lookup order: builtin-overlay library, on-disk/overlay library
    /// folder, then project-local walking up from the importing file.
    /// Returns None when nothing matches.
    pub fn resolve_import_to_file(
        &self,
        source_file_uri: &str,
        import_elements: &[String],
        library: Option<&str>,
    ) -> Option<String> {
        let import_rel_path = format!(
            "{}.{H64_FILE_EXTENSION}",
            import_elements.join("/")
        );
        if self.import_debug {
            println!(
                "horsec: debug: import: finding module: {} (relpath: {import_rel_path}, library: {library:?})",
                import_elements.join(".")
            );
        }
        import_log!({
            format!(
                "horsec: debug: import: finding module: {} (relpath: {import_rel_path}, library: {library:?})",
                import_elements.join(".")
            )
        });

        if let Some(library) = library {
            // Builtin overlay first:
            let builtin_path =
                format!("{BUILTIN_MODULES_PREFIX}/{library}/{import_rel_path}");
            if self.vfs.exists_in_overlay(&builtin_path) {
                import_log!({
                    format!("horsec: debug: import: success, found at {builtin_path} (VFS)")
                });
                return Some(builtin_path);
            }
            // Then horse_modules, overlay before disk:
            let module_path = format!("{MODULES_FOLDER_NAME}/{library}/{import_rel_path}");
            if self.vfs.exists_in_overlay(&module_path) {
                return Some(module_path);
            }
            if self.base_folder.join(&module_path).is_file() {
                return uri::to_file_uri(
                    &self.base_folder.join(&module_path).to_string_lossy(),
                )
                .ok();
            }
            import_log!({
                format!("horsec: debug: import: module not found in library: {library}")
            });
            return None;
        }

        // Project-local: start at the importing file's folder and walk up
        // toward the project root, preferring deeper matches.
        let source_dir: PathBuf = match self.to_project_rel_path(source_file_uri) {
            Ok(rel) => {
                let rel_path = Path::new(&rel);
                self.base_folder
                    .join(rel_path.parent().unwrap_or(Path::new("")))
            }
            Err(_) => self.base_folder.clone(),
        };
        let mut current = Some(source_dir.as_path());
        while let Some(dir) = current {
            let candidate = dir.join(&import_rel_path);
            let candidate_rel = candidate
                .strip_prefix(&self.base_folder)
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            if let Ok(rel) = &candidate_rel
                && self.vfs.exists_in_overlay(rel)
            {
                return Some(rel.clone());
            }
            if candidate.is_file() {
                return uri::to_file_uri(&candidate.to_string_lossy()).ok();
            }
            if dir == self.base_folder {
                break;
            }
            current = dir.parent();
        }
        None
    }

    /// The full compile pipeline for a project rooted at `base_folder`:
    /// load + parse everything reachable from the main file, resolve,
    /// allocate storage, check threadability, generate code, link.
    /// Returns the program only when no stage reported an error.
    pub fn compile(&mut self, main_file_uri: &str) -> Result<(), ()> {
        let main_ast = self.get_ast(main_file_uri)?;
        let main_uri = self.ast(main_ast).file_uri.clone();
        self.program.symbols.main_fileuri_index =
            self.program.symbols.file_uri_index(&main_uri, true);
        self.program.symbols.main_module_path = self.ast(main_ast).module_path.clone();

        // Phase 1: global storage across all reachable ASTs. Imports are
        // resolved and loaded recursively in here.
        scope_resolver::build_ast_global_storage(self, main_ast)?;

        // Phase 2: identifier resolution on every loaded AST.
        for id in self.ast_ids() {
            scope_resolver::resolve_ast(self, id)?;
        }

        // Base-class attribute propagation over the whole class table.
        scope_resolver::resolve_class_inheritance(self)?;

        // Local storage, the obvious-mistakes check and threadable
        // registration run per AST once everything is named.
        for id in self.ast_ids() {
            if !self.result.success {
                break;
            }
            let mut ast = self.take_ast(id);
            let storage_result = assign_local_storage(&mut ast);
            if storage_result.is_ok() && ast.result.success {
                obvious_mistakes::check_ast(&mut ast, &self.program, &self.string_table);
            }
            self.result.transfer_from(&ast.result);
            self.put_back_ast(id, ast);
            storage_result?;
            if self.result.success {
                threadable::register_ast_for_check(self, id)?;
            }
        }

        if self.result.success {
            threadable::iterate_final_graph(self);
        }

        // Find the main function before codegen so the entry point is
        // validated even when codegen gets skipped.
        self.find_main_func(main_ast);

        if self.result.success {
            for id in self.ast_ids() {
                codegen::generate_bytecode_for_file(self, id)?;
            }
            codegen::finalize_fake_funcs(self);
        }

        if self.result.success {
            link_program(&mut self.program, &mut self.result);
        }

        if self.stage_debug {
            self.program.print_stats();
        }

        if self.result.success { Ok(()) } else { Err(()) }
    }

    fn find_main_func(&mut self, main_ast: AstId) {
        let file_uri = self.ast(main_ast).file_uri.clone();
        let main_func = self.string_table.get_existing("main").and_then(|main_name| {
            let ast = self.ast(main_ast);
            let def = ast.scope_query_item(ast.global_scope, main_name, false)?;
            let node = ast.node(ast.def(def).declaration);
            match (&node.kind, node.storage) {
                (ExprKind::FuncDef(_), Some(storage))
                    if storage.kind == StorageKind::GlobalFuncSlot =>
                {
                    Some(FuncId(storage.id as u32))
                }
                _ => None,
            }
        });
        match main_func {
            Some(func_id) => self.program.main_func = Some(func_id),
            None => {
                self.result.add_error(
                    "missing \"main\" func in main file",
                    Some(&file_uri),
                    -1,
                    -1,
                );
            }
        }
    }
}
