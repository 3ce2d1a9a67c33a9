use thiserror::Error;

/// Errors that can arise while mutating or reading the score ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Student, score ledger, log entry or catalog item is missing.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Purchase or use preconditions failed.
    #[error("insufficient funds: need {needed} gold, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    /// Another buyer committed first on a unique seasonal item.
    #[error("item already sold: {0}")]
    ItemAlreadySold(String),

    /// A one-time change was already used.
    #[error("already locked: {0}")]
    AlreadyLocked(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("transaction conflicted {attempts} times, giving up")]
    TransientConflict { attempts: u32 },

    /// Inventory item has no power-up effect attached.
    #[error("item cannot be used: {0}")]
    NotConsumable(String),

    /// Request is well-formed but not valid against current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl LedgerError {
    /// Only exhausted optimistic retries are worth resubmitting as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientConflict { .. })
    }

    /// Text suitable for showing to the teacher who triggered the operation.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::TransientConflict { .. }
            | LedgerError::Sled(_)
            | LedgerError::Io(_) => "Something went wrong, please try again.".to_string(),
            LedgerError::InsufficientFunds { needed, available } => {
                format!("Not enough gold: needs {}, has {}.", needed, available)
            }
            LedgerError::ItemAlreadySold(_) => "Someone else just bought that item.".to_string(),
            LedgerError::AlreadyLocked(what) => format!("Already used: {}.", what),
            LedgerError::NotConsumable(name) => format!("{} can't be used.", name),
            LedgerError::NotFound(what) => format!("Not found: {}.", what),
            other => other.to_string(),
        }
    }
}
