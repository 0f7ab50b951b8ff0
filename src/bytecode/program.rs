//! The in-memory bytecode program: functions, classes, globals and their
//! symbol tables. This is the artifact the compiler produces and the VM
//! consumes.

use crate::bytecode::class_attrs::{CLASS_ATTR_HASH_SIZE, ClassAttrMap, METHOD_OFFSET};
use crate::bytecode::debug_symbols::{
    AttrNameId, ClassSymbol, DebugSymbols, FuncSymbol, GlobalVarSymbol,
};
use crate::bytecode::instructions::Instruction;
use crate::bytecode::value::ValueContent;
use crate::settings::{MAX_CLASS_FUNCATTRS, MAX_CLASS_VARATTRS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// The built-in `Exception` base class registered by [`Program::new`].
pub const EXCEPTION_CLASS_ID: ClassId = ClassId(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    TooManyVarAttrs,
    TooManyFuncAttrs,
    DuplicateAttribute(String),
    UnknownAttributeName(String),
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramError::TooManyVarAttrs => write!(
                f,
                "exceeded maximum of {MAX_CLASS_VARATTRS} variable attributes on this class"
            ),
            ProgramError::TooManyFuncAttrs => write!(
                f,
                "exceeded maximum of {MAX_CLASS_FUNCATTRS} func attributes on this class"
            ),
            ProgramError::DuplicateAttribute(name) => {
                write!(f, "attribute \"{name}\" registered twice on this class")
            }
            ProgramError::UnknownAttributeName(name) => {
                write!(f, "cannot map attribute name: {name}")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub is_cfunc: bool,
    /// VM registry key, `"<module>.<name>[@lib:<lib>]"`. Built-ins use the
    /// `$$builtin` module path. Only C functions carry one.
    pub cfunc_lookup: Option<String>,
    pub arg_count: usize,
    pub last_posarg_is_multiarg: bool,
    /// Interned kwarg name ids, sorted ascending.
    pub kwarg_name_ids: Vec<AttrNameId>,
    pub associated_class: Option<ClassId>,
    /// self (if a method) + closure captures + declared args.
    pub input_stack_size: i32,
    pub inner_stack_size: i32,
    /// Default-yes; demoted by the async-propagation checker.
    pub is_threadable: bool,
    /// Whether the user asserted "async" on this function themselves.
    pub user_set_parallel: bool,
    pub instructions: Vec<Instruction>,
}

impl Function {
    pub fn kwarg_count(&self) -> usize {
        self.kwarg_name_ids.len()
    }

    /// Byte length of the encoded instruction stream; jump offsets are
    /// relative to these positions.
    pub fn instructions_byte_len(&self) -> usize {
        self.instructions.iter().map(|i| i.encoded_size()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub base_class: Option<ClassId>,
    /// Variable attribute name ids; a derived class's list starts with a
    /// prefix equal to its base's list.
    pub varattr_name_ids: Vec<AttrNameId>,
    pub funcattr_name_ids: Vec<AttrNameId>,
    pub funcattr_func_ids: Vec<FuncId>,
    pub attr_map: ClassAttrMap,
    /// Whether the inheritance chain reaches the built-in `Exception`.
    pub is_error: bool,
    pub varinit_func: Option<FuncId>,
    pub is_threadable: bool,
    pub user_set_parallel: bool,
}

impl Class {
    fn new() -> Class {
        Class {
            base_class: None,
            varattr_name_ids: Vec::new(),
            funcattr_name_ids: Vec::new(),
            funcattr_func_ids: Vec::new(),
            attr_map: ClassAttrMap::new(),
            is_error: false,
            varinit_func: None,
            is_threadable: true,
            user_set_parallel: false,
        }
    }

    pub fn has_varinit_func(&self) -> bool {
        self.varinit_func.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub content: ValueContent,
    pub is_const: bool,
    /// Initialized by a literal or left unset, so `async` functions may
    /// read it.
    pub is_simple_const: bool,
}

#[derive(Debug)]
pub struct Program {
    pub funcs: Vec<Function>,
    pub classes: Vec<Class>,
    pub globals: Vec<GlobalVar>,
    pub symbols: DebugSymbols,
    pub main_func: Option<FuncId>,
    pub globalinit_func: Option<FuncId>,
    pub print_func: Option<FuncId>,
}

impl Default for Program {
    fn default() -> Program {
        Program::new()
    }
}

impl Program {
    /// Create a program with the built-in module registered: the
    /// `Exception` base class and the core C function surface.
    pub fn new() -> Program {
        let mut program = Program {
            funcs: Vec::new(),
            classes: Vec::new(),
            globals: Vec::new(),
            symbols: DebugSymbols::new(),
            main_func: None,
            globalinit_func: None,
            print_func: None,
        };

        let exception_id = program
            .add_class("Exception", None, None, None)
            .expect("registering the builtin Exception class cannot collide");
        debug_assert_eq!(exception_id, EXCEPTION_CLASS_ID);
        program.classes[exception_id.0 as usize].is_error = true;

        let print_id = program
            .register_cfunction("print", None, &[None], true, None, None, None)
            .expect("registering builtin print cannot collide");
        program.print_func = Some(print_id);

        program
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVar {
        &self.globals[id.0 as usize]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut GlobalVar {
        &mut self.globals[id.0 as usize]
    }

    fn cfunc_lookup_key(
        name: &str,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> String {
        let module = match module_path {
            Some(path) if !path.is_empty() => path,
            _ => "$$builtin",
        };
        match library_name {
            Some(lib) if !lib.is_empty() => format!("{module}.{name}@lib:{lib}"),
            _ => format!("{module}.{name}"),
        }
    }

    /// Register a C function. `arg_kwarg_names` has one entry per declared
    /// argument: None for positional, the name for keyword arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn register_cfunction(
        &mut self,
        name: &str,
        fileuri: Option<&str>,
        arg_kwarg_names: &[Option<&str>],
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class: Option<ClassId>,
    ) -> Result<FuncId, ProgramError> {
        let func_id = self.register_function_entry(
            Some(name),
            fileuri,
            arg_kwarg_names,
            last_is_multiarg,
            module_path,
            library_name,
            associated_class,
            true,
        )?;
        self.funcs[func_id.0 as usize].cfunc_lookup = Some(Program::cfunc_lookup_key(
            name,
            module_path,
            library_name,
        ));
        Ok(func_id)
    }

    /// Register a Horse64 function whose body will be emitted by codegen.
    #[allow(clippy::too_many_arguments)]
    pub fn register_horse64_function(
        &mut self,
        name: Option<&str>,
        fileuri: Option<&str>,
        arg_kwarg_names: &[Option<&str>],
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class: Option<ClassId>,
    ) -> Result<FuncId, ProgramError> {
        self.register_function_entry(
            name,
            fileuri,
            arg_kwarg_names,
            last_is_multiarg,
            module_path,
            library_name,
            associated_class,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn register_function_entry(
        &mut self,
        name: Option<&str>,
        fileuri: Option<&str>,
        arg_kwarg_names: &[Option<&str>],
        last_is_multiarg: bool,
        module_path: Option<&str>,
        library_name: Option<&str>,
        associated_class: Option<ClassId>,
        is_cfunc: bool,
    ) -> Result<FuncId, ProgramError> {
        let func_id = FuncId(self.funcs.len() as u32);
        let fileuri_index = fileuri.and_then(|uri| self.symbols.file_uri_index(uri, true));

        // Collect & sort the keyword argument name ids:
        let mut kwarg_name_ids: Vec<AttrNameId> = Vec::new();
        for kwarg_name in arg_kwarg_names.iter().flatten() {
            let name_id = self
                .symbols
                .attr_name_id(kwarg_name, true)
                .ok_or_else(|| ProgramError::UnknownAttributeName((*kwarg_name).to_owned()))?;
            let insert_at = kwarg_name_ids
                .iter()
                .position(|&existing| existing > name_id)
                .unwrap_or(kwarg_name_ids.len());
            kwarg_name_ids.insert(insert_at, name_id);
        }

        let module_index = self
            .symbols
            .module_index(module_path, library_name, true)
            .expect("module table insertions cannot fail");

        let module = self.symbols.module_mut(module_index);
        let sub_index = module.func_symbols.len();
        module.func_symbols.push(FuncSymbol {
            name: name.map(|n| n.to_owned()),
            has_self_arg: associated_class.is_some(),
            arg_count: arg_kwarg_names.len(),
            last_arg_is_multiarg: last_is_multiarg,
            arg_kwarg_name: arg_kwarg_names
                .iter()
                .map(|n| n.map(|n| n.to_owned()))
                .collect(),
            fileuri_index,
            header_symbol_line: -1,
            header_symbol_column: -1,
            global_id: func_id,
        });
        if is_cfunc {
            module.cfunc_count += 1;
        }
        if let Some(name) = name {
            module.func_name_to_entry.insert(name.to_owned(), sub_index);
        }
        self.symbols.link_func_symbol(func_id, module_index, sub_index);

        // Register as a class method where applicable:
        if let Some(class_id) = associated_class {
            let method_name =
                name.expect("class methods are always registered with a name");
            self.register_class_attribute(class_id, method_name, Some(func_id))?;
        }

        self.funcs.push(Function {
            is_cfunc,
            cfunc_lookup: None,
            arg_count: arg_kwarg_names.len(),
            last_posarg_is_multiarg: last_is_multiarg,
            kwarg_name_ids,
            associated_class,
            input_stack_size: (arg_kwarg_names.len()
                + usize::from(associated_class.is_some())) as i32,
            inner_stack_size: 0,
            is_threadable: true,
            user_set_parallel: false,
            instructions: Vec::new(),
        });
        Ok(func_id)
    }

    pub fn add_class(
        &mut self,
        name: &str,
        fileuri: Option<&str>,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> Result<ClassId, ProgramError> {
        let class_id = ClassId(self.classes.len() as u32);
        let fileuri_index = fileuri.and_then(|uri| self.symbols.file_uri_index(uri, true));
        let module_index = self
            .symbols
            .module_index(module_path, library_name, true)
            .expect("module table insertions cannot fail");

        let module = self.symbols.module_mut(module_index);
        let sub_index = module.class_symbols.len();
        module.class_symbols.push(ClassSymbol {
            name: name.to_owned(),
            fileuri_index,
            global_id: class_id,
        });
        module.class_name_to_entry.insert(name.to_owned(), sub_index);
        self.symbols.link_class_symbol(class_id, module_index, sub_index);

        self.classes.push(Class::new());
        Ok(class_id)
    }

    pub fn add_globalvar(
        &mut self,
        name: &str,
        is_const: bool,
        fileuri: Option<&str>,
        module_path: Option<&str>,
        library_name: Option<&str>,
    ) -> Result<GlobalId, ProgramError> {
        let global_id = GlobalId(self.globals.len() as u32);
        let fileuri_index = fileuri.and_then(|uri| self.symbols.file_uri_index(uri, true));
        let module_index = self
            .symbols
            .module_index(module_path, library_name, true)
            .expect("module table insertions cannot fail");

        let module = self.symbols.module_mut(module_index);
        let sub_index = module.globalvar_symbols.len();
        module.globalvar_symbols.push(GlobalVarSymbol {
            name: name.to_owned(),
            fileuri_index,
            global_id,
        });
        module
            .globalvar_name_to_entry
            .insert(name.to_owned(), sub_index);
        self.symbols
            .link_globalvar_symbol(global_id, module_index, sub_index);

        self.globals.push(GlobalVar {
            content: ValueContent::None,
            is_const,
            is_simple_const: false,
        });
        Ok(global_id)
    }

    /// Register one attribute on a class: a variable attribute when `func`
    /// is None, a method otherwise. Returns the new entry index within its
    /// kind's array.
    pub fn register_class_attribute(
        &mut self,
        class_id: ClassId,
        name: &str,
        func: Option<FuncId>,
    ) -> Result<i64, ProgramError> {
        let name_id = self
            .symbols
            .attr_name_id(name, true)
            .ok_or_else(|| ProgramError::UnknownAttributeName(name.to_owned()))?;
        let class = &mut self.classes[class_id.0 as usize];
        if class.attr_map.lookup(name_id).is_some() {
            return Err(ProgramError::DuplicateAttribute(name.to_owned()));
        }
        let entry_idx = match func {
            Some(func_id) => {
                if class.funcattr_name_ids.len() >= MAX_CLASS_FUNCATTRS {
                    return Err(ProgramError::TooManyFuncAttrs);
                }
                class.funcattr_name_ids.push(name_id);
                class.funcattr_func_ids.push(func_id);
                let idx = (class.funcattr_name_ids.len() - 1) as i64;
                class.attr_map.insert(name_id, METHOD_OFFSET + idx);
                idx
            }
            None => {
                if class.varattr_name_ids.len() >= MAX_CLASS_VARATTRS {
                    return Err(ProgramError::TooManyVarAttrs);
                }
                class.varattr_name_ids.push(name_id);
                let idx = (class.varattr_name_ids.len() - 1) as i64;
                class.attr_map.insert(name_id, idx);
                idx
            }
        };
        Ok(entry_idx)
    }

    /// O(1) name-id based attribute lookup; returns a var-attr index or
    /// `METHOD_OFFSET + funcattr index`.
    pub fn lookup_class_attribute(&self, class_id: ClassId, name_id: AttrNameId) -> Option<i64> {
        self.classes[class_id.0 as usize].attr_map.lookup(name_id)
    }

    pub fn lookup_class_attribute_by_name(&self, class_id: ClassId, name: &str) -> Option<i64> {
        let name_id = self.symbols.get_attr_name_id(name)?;
        self.lookup_class_attribute(class_id, name_id)
    }

    pub fn rebuild_class_attr_map(&mut self, class_id: ClassId) {
        let class = &mut self.classes[class_id.0 as usize];
        let varattrs = class.varattr_name_ids.clone();
        let funcattrs = class.funcattr_name_ids.clone();
        class.attr_map.rebuild(&varattrs, &funcattrs);
    }

    /// Per-function/class/global summary, printed with
    /// `--compiler-stage-debug` after linking.
    pub fn print_stats(&self) {
        println!("horsec: info: bytecode func count: {}", self.funcs.len());
        println!(
            "horsec: info: bytecode global vars count: {}",
            self.globals.len()
        );
        println!("horsec: info: bytecode class count: {}", self.classes.len());
        for (i, func) in self.funcs.iter().enumerate() {
            let name = self
                .symbols
                .func_symbol(FuncId(i as u32))
                .and_then(|s| s.name.as_deref())
                .unwrap_or("(unnamed)");
            let mut details = format!(
                "horsec: info: bytecode func id={i} name: \"{name}\" cfunction: {}",
                func.is_cfunc as u8
            );
            if !func.is_cfunc {
                details.push_str(&format!(" code: {}B", func.instructions_byte_len()));
            }
            if self.main_func == Some(FuncId(i as u32)) {
                details.push_str(" (PROGRAM START)");
            }
            if let Some(class_id) = func.associated_class {
                details.push_str(&format!(" (CLASS: {})", class_id.0));
            }
            println!("{details}");
        }
        for (i, _class) in self.classes.iter().enumerate() {
            let name = self
                .symbols
                .class_symbol(ClassId(i as u32))
                .map(|s| s.name.as_str())
                .unwrap_or("(no symbols)");
            println!("horsec: info: bytecode class id={i} name: \"{name}\"");
        }
    }

    /// Serialize the whole program for implementations that persist it.
    pub fn dump_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"H64PROG\0");

        // Header: entry points, well-known name ids, counts.
        let main = self.main_func.map(|f| f.0 as i32).unwrap_or(-1);
        let globalinit = self.globalinit_func.map(|f| f.0 as i32).unwrap_or(-1);
        out.extend_from_slice(&main.to_le_bytes());
        out.extend_from_slice(&globalinit.to_le_bytes());
        let known = &self.symbols.known_names;
        for id in [
            known.to_str,
            known.len,
            known.init,
            known.on_destroy,
            known.equals,
            known.to_hash,
            known.add,
            known.del,
            known.is_a,
            known.as_str,
        ] {
            out.extend_from_slice(&id.unwrap_or(-1).to_le_bytes());
        }
        out.extend_from_slice(&(self.symbols.attr_names.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.classes.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.funcs.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.globals.len() as u64).to_le_bytes());

        // Attribute name table:
        for (id, name) in self.symbols.attr_names.iter().enumerate() {
            out.extend_from_slice(&(id as i64).to_le_bytes());
            out.extend_from_slice(&(name.len() as u64).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }

        // Class table:
        for (id, class) in self.classes.iter().enumerate() {
            out.extend_from_slice(&(id as i32).to_le_bytes());
            let base = class.base_class.map(|c| c.0 as i32).unwrap_or(-1);
            out.extend_from_slice(&base.to_le_bytes());
            out.extend_from_slice(&(class.varattr_name_ids.len() as u64).to_le_bytes());
            for name_id in &class.varattr_name_ids {
                out.extend_from_slice(&name_id.to_le_bytes());
            }
            out.extend_from_slice(&(class.funcattr_name_ids.len() as u64).to_le_bytes());
            for (name_id, func_id) in class
                .funcattr_name_ids
                .iter()
                .zip(&class.funcattr_func_ids)
            {
                out.extend_from_slice(&name_id.to_le_bytes());
                out.extend_from_slice(&(func_id.0 as i32).to_le_bytes());
            }
            out.push(class.is_error as u8);
        }

        // Function table:
        for (id, func) in self.funcs.iter().enumerate() {
            out.extend_from_slice(&(id as i32).to_le_bytes());
            let flags: u8 = (func.is_cfunc as u8)
                | ((func.last_posarg_is_multiarg as u8) << 1)
                | ((func.is_threadable as u8) << 2)
                | ((func.user_set_parallel as u8) << 3);
            out.push(flags);
            out.extend_from_slice(&func.input_stack_size.to_le_bytes());
            out.extend_from_slice(&func.inner_stack_size.to_le_bytes());
            out.extend_from_slice(&(func.kwarg_name_ids.len() as u64).to_le_bytes());
            for name_id in &func.kwarg_name_ids {
                out.extend_from_slice(&name_id.to_le_bytes());
            }
            out.extend_from_slice(&(func.instructions_byte_len() as u64).to_le_bytes());
            for inst in &func.instructions {
                inst.dump_bytes(&mut out);
            }
        }

        // Globals table:
        for (id, global) in self.globals.iter().enumerate() {
            out.extend_from_slice(&(id as i32).to_le_bytes());
            let name = self
                .symbols
                .globalvar_symbol(GlobalId(id as u32))
                .map(|s| s.name.as_str())
                .unwrap_or("");
            out.extend_from_slice(&(name.len() as u64).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(global.is_const as u8);
            out.push(global.is_simple_const as u8);
        }

        // Debug symbols: file uris, per-module name maps.
        out.extend_from_slice(&(self.symbols.file_uris.len() as u64).to_le_bytes());
        for uri in &self.symbols.file_uris {
            out.extend_from_slice(&(uri.len() as u64).to_le_bytes());
            out.extend_from_slice(uri.as_bytes());
        }
        out.extend_from_slice(&(self.symbols.modules.len() as u64).to_le_bytes());
        for module in &self.symbols.modules {
            let key = DebugSymbols::module_key(
                if module.module_path.is_empty() {
                    None
                } else {
                    Some(module.module_path.as_str())
                },
                module.library_name.as_deref(),
            );
            out.extend_from_slice(&(key.len() as u64).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(module.func_symbols.len() as u64).to_le_bytes());
            for symbol in &module.func_symbols {
                let name = symbol.name.as_deref().unwrap_or("");
                out.extend_from_slice(&(name.len() as u64).to_le_bytes());
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&(symbol.global_id.0 as i32).to_le_bytes());
            }
            out.extend_from_slice(&(module.class_symbols.len() as u64).to_le_bytes());
            for symbol in &module.class_symbols {
                out.extend_from_slice(&(symbol.name.len() as u64).to_le_bytes());
                out.extend_from_slice(symbol.name.as_bytes());
                out.extend_from_slice(&(symbol.global_id.0 as i32).to_le_bytes());
            }
            out.extend_from_slice(&(module.globalvar_symbols.len() as u64).to_le_bytes());
            for symbol in &module.globalvar_symbols {
                out.extend_from_slice(&(symbol.name.len() as u64).to_le_bytes());
                out.extend_from_slice(symbol.name.as_bytes());
                out.extend_from_slice(&(symbol.global_id.0 as i32).to_le_bytes());
            }
        }
        out
    }
}

// Used by the class attr map module; kept here so the limit checks and the
// bucket count stay in one crate-visible spot.
pub const _CLASS_ATTR_BUCKETS: usize = CLASS_ATTR_HASH_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_program_has_builtin_exception_and_print() {
        let program = Program::new();
        assert!(program.classes[EXCEPTION_CLASS_ID.0 as usize].is_error);
        let builtin = program.symbols.module(program.symbols.builtin_module_index());
        assert!(builtin.class_name_to_entry.contains_key("Exception"));
        assert!(builtin.func_name_to_entry.contains_key("print"));

        let print_func = program.func(program.print_func.unwrap());
        assert!(print_func.is_cfunc);
        assert_eq!(print_func.cfunc_lookup.as_deref(), Some("$$builtin.print"));
        assert!(print_func.last_posarg_is_multiarg);
    }

    #[test]
    fn kwarg_name_ids_sort_ascending() {
        let mut program = Program::new();
        let func_id = program
            .register_horse64_function(
                Some("f"),
                None,
                &[None, Some("zeta"), Some("alpha"), Some("mid")],
                false,
                Some("main"),
                None,
                None,
            )
            .unwrap();
        let func = program.func(func_id);
        assert_eq!(func.arg_count, 4);
        assert_eq!(func.kwarg_count(), 3);
        let ids = &func.kwarg_name_ids;
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn method_registration_adds_class_attribute() {
        let mut program = Program::new();
        let class_id = program.add_class("Animal", None, Some("main"), None).unwrap();
        let func_id = program
            .register_horse64_function(
                Some("speak"),
                None,
                &[],
                false,
                Some("main"),
                None,
                Some(class_id),
            )
            .unwrap();
        let name_id = program.symbols.attr_name_id("speak", false).unwrap();
        assert_eq!(
            program.lookup_class_attribute(class_id, name_id),
            Some(METHOD_OFFSET)
        );
        assert_eq!(program.class(class_id).funcattr_func_ids, vec![func_id]);
        // Methods carry an implicit self slot.
        assert_eq!(program.func(func_id).input_stack_size, 1);
    }

    #[test]
    fn duplicate_attribute_registration_errors() {
        let mut program = Program::new();
        let class_id = program.add_class("Pair", None, Some("main"), None).unwrap();
        assert!(program.register_class_attribute(class_id, "first", None).is_ok());
        assert_eq!(
            program.register_class_attribute(class_id, "first", None),
            Err(ProgramError::DuplicateAttribute("first".to_owned()))
        );
    }
}
