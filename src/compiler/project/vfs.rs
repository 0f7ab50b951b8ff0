//! In-memory overlay filesystem.
//!
//! Built-in modules live under the virtual `horse_modules_builtin/` prefix
//! and never exist on disk. Lookups can be restricted to the overlay or
//! fall through to the real filesystem.

use rustc_hash::FxHashMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct Vfs {
    entries: FxHashMap<String, Vec<u8>>,
}

fn normalize_key(path: &str) -> String {
    path.replace('\\', "/")
}

impl Vfs {
    pub fn new() -> Vfs {
        Vfs {
            entries: FxHashMap::default(),
        }
    }

    /// Mount one file into the overlay, replacing any previous content.
    pub fn add_entry(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.entries.insert(normalize_key(path), content.into());
    }

    /// Whether the path exists in the overlay only.
    pub fn exists_in_overlay(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_key(path))
    }

    /// Whether the path exists in the overlay or, failing that, on disk
    /// relative to `disk_base`.
    pub fn exists(&self, path: &str, disk_base: Option<&Path>) -> bool {
        if self.exists_in_overlay(path) {
            return true;
        }
        match disk_base {
            Some(base) => base.join(path).is_file(),
            None => Path::new(path).is_file(),
        }
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(&normalize_key(path)).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_lookup_prefers_memory() {
        let mut vfs = Vfs::new();
        assert!(!vfs.exists_in_overlay("horse_modules_builtin/core/async.h64"));
        vfs.add_entry("horse_modules_builtin/core/async.h64", "func noop { }\n");
        assert!(vfs.exists_in_overlay("horse_modules_builtin/core/async.h64"));
        assert_eq!(
            vfs.read("horse_modules_builtin/core/async.h64"),
            Some("func noop { }\n".as_bytes())
        );
    }

    #[test]
    fn separators_normalize() {
        let mut vfs = Vfs::new();
        vfs.add_entry("horse_modules\\mylib\\a.h64", "");
        assert!(vfs.exists_in_overlay("horse_modules/mylib/a.h64"));
    }
}
