//! Per-class attribute lookup table.
//!
//! A fixed number of buckets keyed by attribute name id. Each entry maps
//! the name id to a single signed index: variable attributes use their
//! plain index, methods are offset by [`METHOD_OFFSET`] so both kinds fit
//! in one integer.

pub const CLASS_ATTR_HASH_SIZE: usize = 32;
pub const METHOD_OFFSET: i64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassAttrEntry {
    pub name_id: i64,
    pub method_or_var_idx: i64,
}

#[derive(Debug, Clone)]
pub struct ClassAttrMap {
    buckets: Vec<Vec<ClassAttrEntry>>,
}

impl Default for ClassAttrMap {
    fn default() -> ClassAttrMap {
        ClassAttrMap::new()
    }
}

impl ClassAttrMap {
    pub fn new() -> ClassAttrMap {
        ClassAttrMap {
            buckets: vec![Vec::new(); CLASS_ATTR_HASH_SIZE],
        }
    }

    #[inline]
    fn bucket_of(name_id: i64) -> usize {
        (name_id % CLASS_ATTR_HASH_SIZE as i64) as usize
    }

    /// Look up a name id, returning a var-attr index or
    /// `METHOD_OFFSET + funcattr index`.
    pub fn lookup(&self, name_id: i64) -> Option<i64> {
        self.buckets[Self::bucket_of(name_id)]
            .iter()
            .find(|entry| entry.name_id == name_id)
            .map(|entry| entry.method_or_var_idx)
    }

    /// Insert a new entry. Returns false when the name is already mapped.
    pub fn insert(&mut self, name_id: i64, method_or_var_idx: i64) -> bool {
        let bucket = &mut self.buckets[Self::bucket_of(name_id)];
        if bucket.iter().any(|entry| entry.name_id == name_id) {
            return false;
        }
        bucket.push(ClassAttrEntry {
            name_id,
            method_or_var_idx,
        });
        true
    }

    /// Regenerate the table from the class's current attribute arrays.
    /// Used after inheritance propagation rewrites them.
    pub fn rebuild(&mut self, varattr_name_ids: &[i64], funcattr_name_ids: &[i64]) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        for (idx, name_id) in varattr_name_ids.iter().enumerate() {
            self.insert(*name_id, idx as i64);
        }
        for (idx, name_id) in funcattr_name_ids.iter().enumerate() {
            self.insert(*name_id, METHOD_OFFSET + idx as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_matches_linear_scan() {
        let varattrs: Vec<i64> = vec![3, 35, 67, 4];
        let funcattrs: Vec<i64> = vec![99, 131];
        let mut map = ClassAttrMap::new();
        map.rebuild(&varattrs, &funcattrs);

        for (i, name_id) in varattrs.iter().enumerate() {
            assert_eq!(map.lookup(*name_id), Some(i as i64));
        }
        for (i, name_id) in funcattrs.iter().enumerate() {
            assert_eq!(map.lookup(*name_id), Some(METHOD_OFFSET + i as i64));
        }
        assert_eq!(map.lookup(1000), None);
    }

    #[test]
    fn colliding_name_ids_chain_in_one_bucket() {
        // 3, 35 and 67 all land in bucket 3.
        let mut map = ClassAttrMap::new();
        assert!(map.insert(3, 0));
        assert!(map.insert(35, 1));
        assert!(map.insert(67, METHOD_OFFSET));
        assert!(!map.insert(35, 2));
        assert_eq!(map.lookup(3), Some(0));
        assert_eq!(map.lookup(35), Some(1));
        assert_eq!(map.lookup(67), Some(METHOD_OFFSET));
    }
}
