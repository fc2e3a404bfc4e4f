//! Commission level administration.
//!
//! A level is locked once any commission row references its number:
//! the percentage becomes immutable, only the active flag may change.
//! Locked-ness is a live count query, never a cached or stored flag.

use rust_decimal::Decimal;
use tracing::info;

use crate::error::{LedgerError, Result};
use crate::model::{CommissionLevel, LevelId};
use crate::storage::SqliteLedger;

#[derive(Clone)]
pub struct LevelAdmin {
    ledger: SqliteLedger,
}

impl LevelAdmin {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }

    /// Add a new level, active on creation. Level numbers are unique
    /// and at least 1; percentages live in [0, 100].
    pub async fn add_level(&self, level: u32, percentage: Decimal) -> Result<LevelId> {
        if level < 1 {
            return Err(LedgerError::Validation(
                "level must be at least 1".to_string(),
            ));
        }
        validate_percentage(percentage)?;
        if self.ledger.level_by_number(level).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "level {level} already exists"
            )));
        }

        let id = self.ledger.insert_level(level, percentage).await?;
        info!(level, percentage = %percentage, "commission level added");
        Ok(id)
    }

    /// Update a level's percentage and active flag.
    ///
    /// Changing the percentage of a locked level is a conflict; the
    /// active flag may always change. The check only fires when the
    /// requested percentage actually differs from the stored one.
    pub async fn update_level(&self, level: u32, percentage: Decimal, active: bool) -> Result<()> {
        let existing = self
            .ledger
            .level_by_number(level)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("commission level {level}")))?;
        validate_percentage(percentage)?;

        if percentage != existing.percentage {
            let references = self.ledger.commission_count(level).await?;
            if references > 0 {
                return Err(LedgerError::Conflict(format!(
                    "cannot change percentage for level {level}: {references} commission(s) \
                     already exist; deactivate the level instead or create a new level"
                )));
            }
        }

        self.ledger.update_level_row(level, percentage, active).await?;
        info!(level, percentage = %percentage, active, "commission level updated");
        Ok(())
    }

    /// All configured levels, ascending by number.
    pub async fn list_levels(&self) -> Result<Vec<CommissionLevel>> {
        self.ledger.list_levels().await
    }
}

fn validate_percentage(percentage: Decimal) -> Result<()> {
    if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(LedgerError::Validation(
            "percentage must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}
