pub mod class_attrs;
pub mod debug_symbols;
pub mod instructions;
pub mod linker;
pub mod program;
pub mod value;
