//! Symbol tables attached to a program: attribute-name interning, source
//! file URIs, and per-module name maps for functions, classes and globals.

use crate::bytecode::program::{ClassId, FuncId, GlobalId};
use rustc_hash::FxHashMap;

/// Interned attribute name. i64 because instruction records carry it
/// directly (`getattributebyname`, `setbyattributename`, `hasattrjump`).
pub type AttrNameId = i64;

/// Cached ids of names the compiler and VM look up constantly.
/// Each field is populated exactly once, the first time its name is
/// interned.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownNameIds {
    pub to_str: Option<AttrNameId>,
    pub len: Option<AttrNameId>,
    pub init: Option<AttrNameId>,
    pub on_destroy: Option<AttrNameId>,
    pub equals: Option<AttrNameId>,
    pub to_hash: Option<AttrNameId>,
    pub add: Option<AttrNameId>,
    pub del: Option<AttrNameId>,
    pub is_a: Option<AttrNameId>,
    pub as_str: Option<AttrNameId>,
}

#[derive(Debug, Clone, Default)]
pub struct FuncSymbol {
    pub name: Option<String>,
    pub has_self_arg: bool,
    pub arg_count: usize,
    pub last_arg_is_multiarg: bool,
    /// Per argument: None for positional args, the name for keyword args.
    pub arg_kwarg_name: Vec<Option<String>>,
    pub fileuri_index: Option<usize>,
    pub header_symbol_line: i64,
    pub header_symbol_column: i64,
    pub global_id: FuncId,
}

#[derive(Debug, Clone)]
pub struct ClassSymbol {
    pub name: String,
    pub fileuri_index: Option<usize>,
    pub global_id: ClassId,
}

#[derive(Debug, Clone)]
pub struct GlobalVarSymbol {
    pub name: String,
    pub fileuri_index: Option<usize>,
    pub global_id: GlobalId,
}

/// Name maps of one module (one source file, or the built-in module).
#[derive(Debug, Clone, Default)]
pub struct ModuleSymbols {
    pub module_path: String,
    pub library_name: Option<String>,

    pub func_name_to_entry: FxHashMap<String, usize>,
    pub func_symbols: Vec<FuncSymbol>,
    /// How many of this module's funcs are C functions.
    pub cfunc_count: usize,

    pub class_name_to_entry: FxHashMap<String, usize>,
    pub class_symbols: Vec<ClassSymbol>,

    pub globalvar_name_to_entry: FxHashMap<String, usize>,
    pub globalvar_symbols: Vec<GlobalVarSymbol>,
}

impl ModuleSymbols {
    /// True when every registered symbol is a C function, which lets an
    /// import map straight to this module without loading a file.
    pub fn is_pure_cfunc_module(&self) -> bool {
        !self.func_symbols.is_empty()
            && self.cfunc_count == self.func_symbols.len()
            && self.class_symbols.is_empty()
            && self.globalvar_symbols.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DebugSymbols {
    pub file_uris: Vec<String>,
    fileuri_to_index: FxHashMap<String, usize>,
    pub main_fileuri_index: Option<usize>,
    pub main_module_path: Option<String>,

    module_key_to_index: FxHashMap<String, usize>,
    pub modules: Vec<ModuleSymbols>,

    attr_name_to_id: FxHashMap<String, AttrNameId>,
    pub attr_names: Vec<String>,
    pub known_names: KnownNameIds,

    func_to_module: FxHashMap<u32, (usize, usize)>,
    class_to_module: FxHashMap<u32, (usize, usize)>,
    globalvar_to_module: FxHashMap<u32, (usize, usize)>,
}

impl Default for DebugSymbols {
    fn default() -> DebugSymbols {
        DebugSymbols::new()
    }
}

impl DebugSymbols {
    pub fn new() -> DebugSymbols {
        let mut symbols = DebugSymbols {
            file_uris: Vec::new(),
            fileuri_to_index: FxHashMap::default(),
            main_fileuri_index: None,
            main_module_path: None,
            module_key_to_index: FxHashMap::default(),
            modules: Vec::new(),
            attr_name_to_id: FxHashMap::default(),
            attr_names: Vec::new(),
            known_names: KnownNameIds::default(),
            func_to_module: FxHashMap::default(),
            class_to_module: FxHashMap::default(),
            globalvar_to_module: FxHashMap::default(),
        };
        // The built-in module always exists and always has index 0.
        symbols.module_key_to_index.insert("@".to_owned(), 0);
        symbols.modules.push(ModuleSymbols::default());
        symbols
    }

    pub fn module_key(module_path: Option<&str>, library_name: Option<&str>) -> String {
        match module_path {
            None => "@".to_owned(),
            Some(path) => format!("@{}/{}", library_name.unwrap_or(""), path),
        }
    }

    // ------------------------------
    // Attribute name interning
    // ------------------------------

    pub fn attr_name_id(&mut self, name: &str, add_if_missing: bool) -> Option<AttrNameId> {
        if let Some(&id) = self.attr_name_to_id.get(name) {
            return Some(id);
        }
        if !add_if_missing {
            return None;
        }
        let id = self.attr_names.len() as AttrNameId;
        self.attr_names.push(name.to_owned());
        self.attr_name_to_id.insert(name.to_owned(), id);
        self.remember_known_name(name, id);
        Some(id)
    }

    fn remember_known_name(&mut self, name: &str, id: AttrNameId) {
        let slot = match name {
            "to_str" => &mut self.known_names.to_str,
            "len" => &mut self.known_names.len,
            "init" => &mut self.known_names.init,
            "on_destroy" => &mut self.known_names.on_destroy,
            "equals" => &mut self.known_names.equals,
            "to_hash" => &mut self.known_names.to_hash,
            "add" => &mut self.known_names.add,
            "del" => &mut self.known_names.del,
            "is_a" => &mut self.known_names.is_a,
            "as_str" => &mut self.known_names.as_str,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(id);
        }
    }

    /// Lookup without interning; usable from read-only contexts.
    pub fn get_attr_name_id(&self, name: &str) -> Option<AttrNameId> {
        self.attr_name_to_id.get(name).copied()
    }

    pub fn attr_name(&self, id: AttrNameId) -> Option<&str> {
        self.attr_names.get(id as usize).map(|s| s.as_str())
    }

    // ------------------------------
    // File URIs
    // ------------------------------

    pub fn file_uri_index(&mut self, file_uri: &str, add_if_missing: bool) -> Option<usize> {
        if let Some(&idx) = self.fileuri_to_index.get(file_uri) {
            return Some(idx);
        }
        if !add_if_missing {
            return None;
        }
        let idx = self.file_uris.len();
        self.file_uris.push(file_uri.to_owned());
        self.fileuri_to_index.insert(file_uri.to_owned(), idx);
        Some(idx)
    }

    pub fn file_uri(&self, index: usize) -> Option<&str> {
        self.file_uris.get(index).map(|s| s.as_str())
    }

    // ------------------------------
    // Modules
    // ------------------------------

    pub fn module_index(
        &mut self,
        module_path: Option<&str>,
        library_name: Option<&str>,
        add_if_missing: bool,
    ) -> Option<usize> {
        let key = DebugSymbols::module_key(module_path, library_name);
        if let Some(&idx) = self.module_key_to_index.get(&key) {
            return Some(idx);
        }
        if !add_if_missing {
            return None;
        }
        let idx = self.modules.len();
        self.modules.push(ModuleSymbols {
            module_path: module_path.unwrap_or("").to_owned(),
            library_name: library_name.map(|s| s.to_owned()),
            ..ModuleSymbols::default()
        });
        self.module_key_to_index.insert(key, idx);
        Some(idx)
    }

    pub fn builtin_module_index(&self) -> usize {
        0
    }

    pub fn module(&self, index: usize) -> &ModuleSymbols {
        &self.modules[index]
    }

    pub fn module_mut(&mut self, index: usize) -> &mut ModuleSymbols {
        &mut self.modules[index]
    }

    pub fn module_by_key(
        &self,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> Option<&ModuleSymbols> {
        let key = DebugSymbols::module_key(module_path, library_name);
        self.module_key_to_index
            .get(&key)
            .map(|&idx| &self.modules[idx])
    }

    // ------------------------------
    // Global id -> symbol lookups
    // ------------------------------

    pub fn link_func_symbol(&mut self, func: FuncId, module_index: usize, sub_index: usize) {
        self.func_to_module.insert(func.0, (module_index, sub_index));
    }

    pub fn link_class_symbol(&mut self, class: ClassId, module_index: usize, sub_index: usize) {
        self.class_to_module.insert(class.0, (module_index, sub_index));
    }

    pub fn link_globalvar_symbol(
        &mut self,
        global: GlobalId,
        module_index: usize,
        sub_index: usize,
    ) {
        self.globalvar_to_module
            .insert(global.0, (module_index, sub_index));
    }

    pub fn func_symbol(&self, func: FuncId) -> Option<&FuncSymbol> {
        let (module_index, sub_index) = *self.func_to_module.get(&func.0)?;
        self.modules[module_index].func_symbols.get(sub_index)
    }

    pub fn func_symbol_mut(&mut self, func: FuncId) -> Option<&mut FuncSymbol> {
        let (module_index, sub_index) = *self.func_to_module.get(&func.0)?;
        self.modules[module_index].func_symbols.get_mut(sub_index)
    }

    pub fn class_symbol(&self, class: ClassId) -> Option<&ClassSymbol> {
        let (module_index, sub_index) = *self.class_to_module.get(&class.0)?;
        self.modules[module_index].class_symbols.get(sub_index)
    }

    pub fn globalvar_symbol(&self, global: GlobalId) -> Option<&GlobalVarSymbol> {
        let (module_index, sub_index) = *self.globalvar_to_module.get(&global.0)?;
        self.modules[module_index].globalvar_symbols.get(sub_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_names_populate_once() {
        let mut symbols = DebugSymbols::new();
        assert!(symbols.known_names.init.is_none());
        let id = symbols.attr_name_id("init", true).unwrap();
        assert_eq!(symbols.known_names.init, Some(id));
        // Interning again keeps id and pointer stable.
        assert_eq!(symbols.attr_name_id("init", true), Some(id));
        assert_eq!(symbols.known_names.init, Some(id));
    }

    #[test]
    fn missing_names_are_not_added_without_flag() {
        let mut symbols = DebugSymbols::new();
        assert_eq!(symbols.attr_name_id("close", false), None);
        assert!(symbols.attr_name_id("close", true).is_some());
        assert!(symbols.attr_name_id("close", false).is_some());
    }

    #[test]
    fn module_keys_distinguish_libraries() {
        let mut symbols = DebugSymbols::new();
        let a = symbols.module_index(Some("net.fetch"), None, true).unwrap();
        let b = symbols
            .module_index(Some("net.fetch"), Some("mylib"), true)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(symbols.module_index(Some("net.fetch"), None, false), Some(a));
        assert_eq!(symbols.builtin_module_index(), 0);
    }

    proptest! {
        #[test]
        fn intern_reverse_round_trip(names in proptest::collection::vec("[a-z_][a-z0-9_]{0,12}", 1..20)) {
            let mut symbols = DebugSymbols::new();
            for name in &names {
                let id = symbols.attr_name_id(name, true).unwrap();
                prop_assert_eq!(symbols.attr_name(id), Some(name.as_str()));
                prop_assert_eq!(symbols.attr_name_id(name, false), Some(id));
            }
        }
    }
}
