use std::collections::BTreeMap;

/// Compiled code for the runtime's own modules, keyed by module id.
///
/// Filled from a startup snapshot at load time and consulted before compiling a built-in
/// module from source.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuiltinCodeCache {
    entries: BTreeMap<String, Vec<u8>>,
}

impl BuiltinCodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous payload for `id`, if any.
    pub fn insert(&mut self, id: impl Into<String>, data: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(id.into(), data)
    }

    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl Extend<(String, Vec<u8>)> for BuiltinCodeCache {
    fn extend<T: IntoIterator<Item = (String, Vec<u8>)>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}
