//! Compiled entries keyed by code object and type signature

use std::collections::HashMap;

use crate::bytecode::CodeId;

use super::runtime::NativeEntry;
use super::types::{EntryKind, PackedValue, TypeSignature};

/// The outcome of one compile request
#[derive(Debug, Clone, Copy)]
pub enum CacheEntry {
    Compiled(NativeEntry),
    /// Compilation failed or the entry deoptimized; never retried
    Failed,
}

#[derive(Debug, Default)]
pub struct CodeCache {
    entries: HashMap<CodeId, Vec<(TypeSignature, CacheEntry)>>,
}

impl CodeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, code: CodeId, signature: &TypeSignature) -> Option<CacheEntry> {
        self.entries
            .get(&code)?
            .iter()
            .find(|(sig, _)| sig == signature)
            .map(|(_, entry)| *entry)
    }

    /// The compiled entry accepting `args`, without building a signature
    #[must_use]
    pub fn lookup(&self, code: CodeId, kind: EntryKind, args: &[PackedValue]) -> Option<NativeEntry> {
        self.entries.get(&code)?.iter().find_map(|(sig, entry)| match entry {
            CacheEntry::Compiled(native) if sig.accepts(kind, args) => Some(*native),
            _ => None,
        })
    }

    pub fn insert(&mut self, code: CodeId, signature: TypeSignature, entry: CacheEntry) {
        let entries = self.entries.entry(code).or_default();
        match entries.iter_mut().find(|(sig, _)| *sig == signature) {
            Some((_, existing)) => *existing = entry,
            None => entries.push((signature, entry)),
        }
    }

    /// Stop using an entry after it deoptimized
    pub fn blacklist(&mut self, code: CodeId, signature: &TypeSignature) {
        self.insert(code, signature.clone(), CacheEntry::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Value;
    use crate::jit::types::Ty;

    #[test]
    fn signatures_are_cached_separately() {
        let mut cache = CodeCache::new();
        let code = CodeId::fresh();
        let ints = TypeSignature::call(&[Ty::Int]);
        let floats = TypeSignature::call(&[Ty::Float]);

        assert!(cache.get(code, &ints).is_none());
        cache.insert(code, ints.clone(), CacheEntry::Compiled(NativeEntry::dangling()));
        cache.insert(code, floats.clone(), CacheEntry::Failed);

        assert!(matches!(cache.get(code, &ints), Some(CacheEntry::Compiled(_))));
        assert!(matches!(cache.get(code, &floats), Some(CacheEntry::Failed)));

        let int_arg = PackedValue::from_value(&Value::Int(3)).unwrap();
        let float_arg = PackedValue::from_value(&Value::Float(3.0)).unwrap();
        assert!(cache.lookup(code, EntryKind::Call, &[int_arg]).is_some());
        assert!(cache.lookup(code, EntryKind::Call, &[float_arg]).is_none());
    }

    #[test]
    fn blacklisted_entries_are_not_found() {
        let mut cache = CodeCache::new();
        let code = CodeId::fresh();
        let ints = TypeSignature::call(&[Ty::Int]);
        cache.insert(code, ints.clone(), CacheEntry::Compiled(NativeEntry::dangling()));
        cache.blacklist(code, &ints);

        let arg = PackedValue::from_value(&Value::Int(3)).unwrap();
        assert!(cache.lookup(code, EntryKind::Call, &[arg]).is_none());
        assert!(matches!(cache.get(code, &ints), Some(CacheEntry::Failed)));
    }
}
