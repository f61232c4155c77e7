/// Identifier of an AST node: the DJB2 hash of its textual name in the
/// model description. Collisions within one model are a user error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AstId(pub i64);

/// Index of a runtime node inside the graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub usize);

/// Index of a float buffer inside the graph's buffer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

impl AstId {
    /// Hashes a node name with DJB2 (`h = h * 33 + byte`, seeded at 5381).
    pub fn from_name(name: &str) -> Self {
        let mut hash: i64 = 5381;
        for byte in name.bytes() {
            hash = hash
                .wrapping_shl(5)
                .wrapping_add(hash)
                .wrapping_add(byte as i64);
        }
        AstId(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::AstId;

    #[test]
    fn djb2_matches_reference_values() {
        // djb2("a") = 5381 * 33 + 97
        assert_eq!(AstId::from_name("a"), AstId(5381 * 33 + 97));
        assert_eq!(AstId::from_name(""), AstId(5381));
        assert_ne!(AstId::from_name("in"), AstId::from_name("out"));
    }

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(AstId::from_name("hidden"), AstId::from_name("hidden"));
    }
}
