pub const H64_FILE_EXTENSION: &str = "h64";
pub const PROJECT_CONFIG_FILE_NAME: &str = "horse_project.toml";
pub const MODULES_FOLDER_NAME: &str = "horse_modules";
pub const BUILTIN_MODULES_PREFIX: &str = "horse_modules_builtin";

// Hard limits enforced by the front-end. Exceeding any of these is a
// regular compile error, never a panic.
pub const SOURCE_FILE_SIZE_MAX: usize = 10 * 1024 * 1024;
pub const IDENTIFIER_LEN_MAX: usize = 256;
pub const MAX_PARSE_RECURSION: usize = 64;
pub const IMPORT_CHAIN_LEN_MAX: usize = 32;
pub const MAX_CLASS_VARATTRS: usize = i16::MAX as usize;
pub const MAX_CLASS_FUNCATTRS: usize = i16::MAX as usize;
pub const MAX_DO_STMTS_PER_FUNC: i32 = (i16::MAX - 1) as i32;

// This is a guess about how much should be initially allocated for the
// token vec. A rough heuristic from small test files, not a measurement.
pub const SRC_TO_TOKEN_RATIO: usize = 5;
pub const MINIMUM_STRING_TABLE_CAPACITY: usize = 64;
