//! Strategy selectors for the engine's interchangeable subsystems.
//!
//! Each axis is a small, closed set (tagged variants, not
//! runtime reflection). The selection is made once, at `Core` construction.

/// Insert strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertType {
    /// Validate and commit on the live connection. Not atomic.
    Simple,
    /// Optimistic WATCH/MULTI/EXEC with unbounded retry on conflict.
    Transactional,
    /// Single atomic server-side Lua script.
    #[default]
    ServerScript,
}

/// Delete strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteType {
    /// Pipelined MULTI/EXEC block.
    Simple,
    /// Single atomic server-side Lua script.
    #[default]
    ServerScript,
}

/// Key-policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicyType {
    /// Canonical JSON encoding of the valuation.
    #[default]
    Json,
    /// SHA-256 hex digest of the JSON encoding.
    Hash,
}

/// Table-iteration strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListRecordsType {
    /// Cursor-based SCAN over a key pattern.
    Scan,
    /// One-shot blocking KEYS over a key pattern.
    Keys,
    /// SMEMBERS over the table-index set.
    #[default]
    Set,
}

/// Join-evaluation strategy. Currently a singleton set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoiningAlgorithm {
    /// Nested-loop join with a primary-key fast path.
    #[default]
    NestedLoops,
}

/// Strategy selectors for one `Core` instance, plus the KV server address.
#[derive(Debug, Clone)]
pub struct CoreConfiguration {
    /// Insert strategy.
    pub insert_type: InsertType,
    /// Delete strategy.
    pub delete_type: DeleteType,
    /// Key-policy for identifier derivation.
    pub key_policy: KeyPolicyType,
    /// Table-iteration strategy.
    pub list_records_type: ListRecordsType,
    /// Join-evaluation strategy.
    pub joining_algorithm: JoiningAlgorithm,
}

impl Default for CoreConfiguration {
    fn default() -> Self {
        CoreConfiguration {
            insert_type: InsertType::default(),
            delete_type: DeleteType::default(),
            key_policy: KeyPolicyType::default(),
            list_records_type: ListRecordsType::default(),
            joining_algorithm: JoiningAlgorithm::default(),
        }
    }
}
