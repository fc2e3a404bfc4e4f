//! Ledger domain rows.
//!
//! Money and percentages are fixed-point decimals, persisted as TEXT at
//! scale 2 (SQLite has no decimal affinity).

use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::Result;

pub type UserId = i64;
pub type SaleId = i64;
pub type CommissionId = i64;
pub type LevelId = i64;

/// A member of the referral tree. Exactly one user (the root) has no
/// parent; deleting a user cascades to descendants, sales, commissions.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub parent_id: Option<UserId>,
    pub created_at: String,
}

/// A sale recorded against a seller. The amount mutates only through
/// recalculation; created_at is immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub id: SaleId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub created_at: String,
}

/// One commission payout row. Fully derived data: regenerated as a unit
/// from (sale amount, rate snapshot, ancestor chain), never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Commission {
    pub id: CommissionId,
    pub sale_id: SaleId,
    pub user_id: UserId,
    pub level: u32,
    pub percentage: Decimal,
    pub amount: Decimal,
}

/// Configured payout percentage for one ancestor level.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionLevel {
    pub id: LevelId,
    pub level: u32,
    pub percentage: Decimal,
    pub active: bool,
}

/// One active level→percentage entry of a rate snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    pub level: u32,
    pub percentage: Decimal,
}

/// Immutable snapshot of the active rate table, taken once at the start
/// of each distribution/recalculation unit of work. Concurrent rate
/// edits never affect an in-flight operation.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    rates: Vec<Rate>,
}

impl RateSnapshot {
    /// Build from active rates, ascending by level.
    pub fn new(rates: Vec<Rate>) -> Self {
        Self { rates }
    }

    /// Percentage configured for `level`, if that level is active.
    pub fn percentage_for(&self, level: u32) -> Option<Decimal> {
        self.rates
            .iter()
            .find(|r| r.level == level)
            .map(|r| r.percentage)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Result of a successful distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributeReceipt {
    pub sale_id: SaleId,
    pub levels_processed: u32,
}

/// Dashboard row: one user with their summed commission earnings.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTotal {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub parent_id: Option<UserId>,
    pub parent_name: Option<String>,
    pub total_commission: Decimal,
}

/// Decode a TEXT decimal column.
pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.get(column);
    Ok(text.parse::<Decimal>()?)
}

impl User {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            parent_id: row.get("parent_id"),
            created_at: row.get("created_at"),
        }
    }
}

impl Sale {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            amount: decimal_column(row, "amount")?,
            created_at: row.get("created_at"),
        })
    }
}

impl Commission {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let level: i64 = row.get("level");
        Ok(Self {
            id: row.get("id"),
            sale_id: row.get("sale_id"),
            user_id: row.get("user_id"),
            level: level as u32,
            percentage: decimal_column(row, "percentage")?,
            amount: decimal_column(row, "amount")?,
        })
    }
}

impl CommissionLevel {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let level: i64 = row.get("level");
        let active: i64 = row.get("active");
        Ok(Self {
            id: row.get("id"),
            level: level as u32,
            percentage: decimal_column(row, "percentage")?,
            active: active != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RateSnapshot {
        RateSnapshot::new(vec![
            Rate {
                level: 1,
                percentage: Decimal::new(1000, 2),
            },
            Rate {
                level: 3,
                percentage: Decimal::new(300, 2),
            },
        ])
    }

    #[test]
    fn test_percentage_for_active_level() {
        assert_eq!(
            snapshot().percentage_for(1),
            Some(Decimal::new(1000, 2))
        );
    }

    #[test]
    fn test_percentage_for_gap_level() {
        // Level 2 is not active; the walker stops at this gap.
        assert_eq!(snapshot().percentage_for(2), None);
    }

    #[test]
    fn test_empty_snapshot() {
        let empty = RateSnapshot::default();
        assert!(empty.is_empty());
        assert_eq!(empty.percentage_for(1), None);
    }
}
