//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a thread id where
//! a token ordinal is expected, and make function signatures more expressive.

use std::fmt;

use tscope_common::{LAYER_NONE, MEM_BUFFER, MEM_DISK, PHASE_GENERATE, PHASE_PROMPT};

/// Token ordinal (0-based, counts prompt tokens too)
///
/// Identifies which token in the generation sequence a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u32);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Transformer block ordinal (0-based)
///
/// Extracted from tensor names of the form `block.N.…` or from a trailing
/// `-N` label suffix. The wire sentinel `LAYER_NONE` maps to [`LayerId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u16);

impl LayerId {
    /// Sentinel for "not a layer tensor".
    pub const NONE: LayerId = LayerId(LAYER_NONE);

    /// Returns true if this id refers to an actual transformer block.
    #[must_use]
    pub fn is_layer(self) -> bool {
        self.0 != LAYER_NONE
    }

    /// The value serialized into per-token JSON: the layer number, or None
    /// for the sentinel.
    #[must_use]
    pub fn as_option(self) -> Option<u16> {
        if self.is_layer() {
            Some(self.0)
        } else {
            None
        }
    }
}

impl From<Option<u16>> for LayerId {
    fn from(v: Option<u16>) -> Self {
        v.map_or(LayerId::NONE, LayerId)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_layer() {
            write!(f, "layer#{}", self.0)
        } else {
            write!(f, "layer#-")
        }
    }
}

/// Short thread identifier, stable within one run
///
/// Derived from the OS thread id truncated to 16 bits. This is NOT the
/// kernel TID; it only needs to distinguish threads within a single trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u16);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Runtime buffer identifier
///
/// Drawn from the buffer-event log's monotonic counter; 0 means no alloc
/// event is known for the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

impl BufferId {
    pub const UNKNOWN: BufferId = BufferId(0);

    #[must_use]
    pub fn is_known(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Coarse run state: ingesting the prompt vs. autoregressive generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Prompt,
    Generate,
}

impl Phase {
    /// Wire encoding used in the binary record.
    #[must_use]
    pub fn as_wire(self) -> u8 {
        match self {
            Phase::Prompt => PHASE_PROMPT,
            Phase::Generate => PHASE_GENERATE,
        }
    }

    /// Decode from the wire value. Anything non-zero reads as generate.
    #[must_use]
    pub fn from_wire(v: u8) -> Self {
        if v == PHASE_PROMPT {
            Phase::Prompt
        } else {
            Phase::Generate
        }
    }

    /// Label used in consumer-facing JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Prompt => "prompt",
            Phase::Generate => "generate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a source tensor's bytes live: the memory-mapped model file or a
/// runtime allocation (activations, KV cache, scratch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Inside the model file's mmap; carries the file offset.
    Disk { offset: u64 },
    /// Any other runtime allocation; carries the buffer-log id (0 unknown).
    Buffer { buffer_id: u64 },
}

impl MemoryClass {
    /// Wire encoding of the class tag.
    #[must_use]
    pub fn as_wire(self) -> (u8, u64) {
        match self {
            MemoryClass::Disk { offset } => (MEM_DISK, offset),
            MemoryClass::Buffer { buffer_id } => (MEM_BUFFER, buffer_id),
        }
    }

    /// Decode from the wire (tag, payload) pair.
    #[must_use]
    pub fn from_wire(tag: u8, payload: u64) -> Self {
        if tag == MEM_DISK {
            MemoryClass::Disk { offset: payload }
        } else {
            MemoryClass::Buffer { buffer_id: payload }
        }
    }

    #[must_use]
    pub fn is_disk(self) -> bool {
        matches!(self, MemoryClass::Disk { .. })
    }

    /// Label used in consumer-facing JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryClass::Disk { .. } => "DISK",
            MemoryClass::Buffer { .. } => "BUFFER",
        }
    }
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Disk { offset } => write!(f, "DISK@0x{offset:x}"),
            MemoryClass::Buffer { buffer_id } => write!(f, "BUFFER:{buffer_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_id_sentinel() {
        assert!(!LayerId::NONE.is_layer());
        assert_eq!(LayerId::NONE.as_option(), None);
        assert_eq!(LayerId(5).as_option(), Some(5));
        assert_eq!(LayerId::from(Some(7)), LayerId(7));
        assert_eq!(LayerId::from(None), LayerId::NONE);
    }

    #[test]
    fn test_phase_wire_roundtrip() {
        assert_eq!(Phase::from_wire(Phase::Prompt.as_wire()), Phase::Prompt);
        assert_eq!(Phase::from_wire(Phase::Generate.as_wire()), Phase::Generate);
        assert_eq!(Phase::Generate.as_str(), "generate");
    }

    #[test]
    fn test_memory_class_wire_roundtrip() {
        let disk = MemoryClass::Disk { offset: 0x4000 };
        let (tag, payload) = disk.as_wire();
        assert_eq!(MemoryClass::from_wire(tag, payload), disk);

        let buf = MemoryClass::Buffer { buffer_id: 9 };
        let (tag, payload) = buf.as_wire();
        assert_eq!(MemoryClass::from_wire(tag, payload), buf);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(TokenId(3).to_string(), "token#3");
        assert_eq!(LayerId(2).to_string(), "layer#2");
        assert_eq!(MemoryClass::Disk { offset: 16 }.to_string(), "DISK@0x10");
    }
}
