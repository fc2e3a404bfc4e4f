//! Ledger error types.

/// Errors surfaced by ledger operations.
///
/// Validation failures are rejected before a unit of work opens; any
/// failure inside a unit of work rolls the whole unit back before the
/// error is returned.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Input rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Mutation conflicts with existing ledger state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying read/write failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Stored decimal text failed to parse.
    #[error("invalid decimal in storage: {0}")]
    Decimal(#[from] rust_decimal::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let e = LedgerError::Validation("sale amount must be greater than 0".into());
        assert_eq!(
            e.to_string(),
            "validation failed: sale amount must be greater than 0"
        );

        let e = LedgerError::NotFound("sale 42".into());
        assert_eq!(e.to_string(), "not found: sale 42");
    }
}
