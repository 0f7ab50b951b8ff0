use crate::settings::MINIMUM_STRING_TABLE_CAPACITY;
use rustc_hash::FxHashMap;

/// A unique identifier for an interned string, represented as a u32 for
/// memory efficiency. This provides type safety to prevent mixing string
/// IDs with other integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Compare this interned string with a string slice without interning
    /// the other side. Requires the StringTable that created this ID.
    #[inline]
    pub fn eq_str(self, table: &StringTable, other: &str) -> bool {
        table.resolve(self) == other
    }

    /// Convenience delegate to [`StringTable::resolve`].
    #[inline]
    pub fn resolve(self, table: &StringTable) -> &str {
        table.resolve(self)
    }
}

impl std::fmt::Display for StringId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StringId({})", self.0)
    }
}

/// Identifier interning shared by the whole compile project.
///
/// Every identifier, keyword-argument name and module path segment is
/// stored once; scopes and symbol maps key on the small [`StringId`]
/// instead of owned strings.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    /// ID -> string storage. Box<str> instead of String since entries
    /// never grow after interning.
    strings: Vec<Box<str>>,

    /// String -> ID lookup for interning.
    string_to_id: FxHashMap<Box<str>, StringId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            strings: Vec::with_capacity(MINIMUM_STRING_TABLE_CAPACITY),
            string_to_id: FxHashMap::default(),
        }
    }

    /// Intern a string slice, returning its unique ID.
    /// Returns the existing ID when the string was interned before.
    #[inline]
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&existing_id) = self.string_to_id.get(s) {
            return existing_id;
        }
        self.intern_new(s)
    }

    #[cold]
    #[inline(never)]
    fn intern_new(&mut self, s: &str) -> StringId {
        let new_id = StringId(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.string_to_id.insert(boxed.clone(), new_id);
        self.strings.push(boxed);
        new_id
    }

    /// Resolve an interned string ID back to its string content.
    #[inline]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }

    /// Check if a string is already interned without interning it.
    #[inline]
    pub fn get_existing(&self, s: &str) -> Option<StringId> {
        self.string_to_id.get(s).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn interning_same_string_returns_same_id() {
        let mut table = StringTable::new();
        let a = table.intern("iterator");
        let b = table.intern("iterator");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resolve_round_trips() {
        let mut table = StringTable::new();
        let id = table.intern("horse_modules");
        assert_eq!(table.resolve(id), "horse_modules");
        assert!(id.eq_str(&table, "horse_modules"));
        assert_eq!(table.get_existing("horse_modules"), Some(id));
        assert_eq!(table.get_existing("not_interned"), None);
    }

    proptest! {
        #[test]
        fn intern_resolve_law(strings in proptest::collection::vec(".*", 0..24)) {
            let mut table = StringTable::new();
            let ids: Vec<StringId> =
                strings.iter().map(|s| table.intern(s)).collect();
            for (s, id) in strings.iter().zip(&ids) {
                prop_assert_eq!(table.resolve(*id), s.as_str());
                prop_assert_eq!(table.intern(s), *id);
            }
        }
    }
}
