//! Tensor registry: raw data pointer -> registered metadata.
//!
//! Populated entirely during model load, installed once, then read-only
//! for the rest of the run. Hook-path lookups are plain hash probes with
//! no synchronization; immutability after install is what makes that
//! sound.

use std::collections::HashMap;

use crate::classification::layer_for_record;
use crate::domain::TracerError;

/// Safety factor applied when sizing the registry from a tensor count.
pub const CAPACITY_SAFETY_FACTOR: usize = 2;

/// One registered tensor. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorEntry {
    /// Full logical name, unbounded (truncation happens at record time).
    pub name: String,
    /// Byte offset within the model file; 0 for tensors that are not
    /// disk-resident.
    pub file_offset: u64,
    pub size_bytes: u64,
    /// Block ordinal parsed from a `block.N.` name prefix at registration,
    /// or the `LAYER_NONE` sentinel.
    pub layer_id: u16,
}

/// Fixed-capacity pointer-keyed tensor table.
#[derive(Debug)]
pub struct TensorRegistry {
    entries: HashMap<u64, TensorEntry>,
    capacity: usize,
}

impl TensorRegistry {
    /// Create a registry sized for `n_tensors` model tensors, with the
    /// safety factor applied.
    #[must_use]
    pub fn for_model(n_tensors: usize) -> Self {
        Self::with_capacity(n_tensors.max(1) * CAPACITY_SAFETY_FACTOR)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: HashMap::with_capacity(capacity), capacity }
    }

    /// Install one immutable entry.
    ///
    /// # Errors
    /// `RegistryFull` once the fixed capacity is exhausted. Re-registering
    /// a pointer is a no-op; the first registration wins.
    pub fn register(
        &mut self,
        ptr: u64,
        name: &str,
        file_offset: u64,
        size_bytes: u64,
    ) -> Result<(), TracerError> {
        if self.entries.len() >= self.capacity {
            return Err(TracerError::RegistryFull { capacity: self.capacity });
        }
        self.entries.entry(ptr).or_insert_with(|| TensorEntry {
            name: name.to_string(),
            file_offset,
            size_bytes,
            layer_id: layer_for_record(name),
        });
        Ok(())
    }

    /// Look up a previously registered pointer.
    #[must_use]
    pub fn lookup(&self, ptr: u64) -> Option<&TensorEntry> {
        self.entries.get(&ptr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
