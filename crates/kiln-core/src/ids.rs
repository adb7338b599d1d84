//! Deterministic identifiers.
//!
//! [`SourceId`] names a compilation input independent of registration order,
//! computed with XXHash64 from the input's path. [`SymbolId`] is the opaque
//! handle the type checker gives each declaration.

use std::fmt;

use xxhash_rust::xxh64::xxh64;

/// Seed separating source identities from any other xxh64 use.
const SOURCE_SEED: u64 = 0x6b696c6e_736f7263;

/// Stable identity of one compilation input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl SourceId {
    /// Hash a source path into an identity.
    ///
    /// The same path always produces the same id, across runs and machines.
    pub fn from_path(path: &str) -> Self {
        Self(xxh64(path.as_bytes(), SOURCE_SEED))
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({:016x})", self.0)
    }
}

/// Declaration a name resolves to, as reported by the type checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_deterministic() {
        assert_eq!(SourceId::from_path("src/a.ts"), SourceId::from_path("src/a.ts"));
        assert_ne!(SourceId::from_path("src/a.ts"), SourceId::from_path("src/b.ts"));
    }

    #[test]
    fn source_id_debug_is_hex() {
        let id = SourceId(0xff);
        assert_eq!(format!("{id:?}"), "SourceId(00000000000000ff)");
    }
}
