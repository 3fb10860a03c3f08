use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Address of a native function or static that serialized engine state may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalReference(usize);

impl ExternalReference {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// `f as *const ()` works for plain function items.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub const fn address(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("external reference registry is already finalized")]
    AlreadyFinalized,

    #[error("external reference group {0:?} is already registered")]
    DuplicateGroup(String),

    #[error("external reference group {0:?} contains a null address")]
    NullReference(String),
}

/// Append-only collection of every native address the runtime can hand to the engine.
///
/// References are registered in named groups (one per binding module) and flattened in
/// group-name order by [`ExternalReferenceRegistry::finalize`], so the resulting table is the
/// same for every process built from the same binary.
#[derive(Debug, Default)]
pub struct ExternalReferenceRegistry {
    groups: BTreeMap<String, Vec<ExternalReference>>,
    finalized: bool,
}

impl ExternalReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_group(
        &mut self,
        group: &str,
        references: impl IntoIterator<Item = ExternalReference>,
    ) -> Result<(), RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        if self.groups.contains_key(group) {
            return Err(RegistryError::DuplicateGroup(group.to_string()));
        }
        let references: Vec<_> = references.into_iter().collect();
        if references.iter().any(|r| r.address() == 0) {
            return Err(RegistryError::NullReference(group.to_string()));
        }
        debug!(group, count = references.len(), "registered external references");
        self.groups.insert(group.to_string(), references);
        Ok(())
    }

    /// Appends one reference to `group`, creating the group if needed.
    pub fn register(
        &mut self,
        group: &str,
        reference: ExternalReference,
    ) -> Result<(), RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        if reference.address() == 0 {
            return Err(RegistryError::NullReference(group.to_string()));
        }
        self.groups
            .entry(group.to_string())
            .or_default()
            .push(reference);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Flattens every group into a null-terminated table. Can only happen once.
    pub fn finalize(&mut self) -> Result<FinalizedReferences, RegistryError> {
        if self.finalized {
            return Err(RegistryError::AlreadyFinalized);
        }
        self.finalized = true;

        let mut table = Vec::with_capacity(self.len() + 1);
        let mut positions = HashMap::with_capacity(self.len());
        for reference in self.groups.values().flatten() {
            positions.entry(reference.address()).or_insert(table.len());
            table.push(reference.address());
        }
        table.push(0);
        debug!(
            groups = self.groups.len(),
            references = table.len() - 1,
            "finalized external reference table"
        );

        Ok(FinalizedReferences {
            table: table.into(),
            positions: Arc::new(positions),
        })
    }
}

/// The frozen reference table handed to the engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FinalizedReferences {
    table: Arc<[usize]>,
    positions: Arc<HashMap<usize, usize>>,
}

impl FinalizedReferences {
    /// The raw table, including the trailing `0` sentinel.
    pub fn as_slice(&self) -> &[usize] {
        &self.table
    }

    /// Number of references, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.table.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the first registration of `reference`.
    pub fn index_of(&self, reference: ExternalReference) -> Option<usize> {
        self.positions.get(&reference.address()).copied()
    }

    pub fn get(&self, index: usize) -> Option<ExternalReference> {
        self.table[..self.len()]
            .get(index)
            .copied()
            .map(ExternalReference::new)
    }
}
