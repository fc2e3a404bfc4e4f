//! Commission distribution and recalculation.
//!
//! Each operation is one atomic unit of work: BEGIN IMMEDIATE up front
//! (taking the SQLite write lock before any read the walk depends on),
//! COMMIT on success, ROLLBACK on any failure. Nothing partial ever
//! persists.

use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::SqliteConnection;
use tracing::{debug, error, info};

use crate::error::{LedgerError, Result};
use crate::model::{DistributeReceipt, RateSnapshot, SaleId, UserId};
use crate::storage::{NewCommission, SqliteLedger};

/// One hop of an ancestor walk: the recipient at `level` steps above
/// the seller, with the percentage active at walk time.
#[derive(Debug, Clone, PartialEq)]
struct AncestorLevel {
    level: u32,
    recipient: UserId,
    percentage: Decimal,
}

/// The commission distribution and recalculation engine.
#[derive(Clone)]
pub struct CommissionEngine {
    ledger: SqliteLedger,
}

impl CommissionEngine {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }

    /// Record a sale and pay commissions up the ancestor chain.
    ///
    /// Creates exactly `1 + levels_processed` rows on success, zero on
    /// failure. A non-positive amount is rejected before any write.
    pub async fn distribute(
        &self,
        seller_id: UserId,
        amount: Decimal,
    ) -> Result<DistributeReceipt> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "sale amount must be greater than 0".to_string(),
            ));
        }

        let mut conn = self.ledger.pool().acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::distribute_tx(&mut conn, seller_id, amount).await;

        match result {
            Ok(receipt) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!(
                    sale_id = receipt.sale_id,
                    seller_id,
                    levels = receipt.levels_processed,
                    amount = %amount,
                    "sale distributed"
                );
                Ok(receipt)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                error!(seller_id, error = %e, "distribution rolled back");
                Err(e)
            }
        }
    }

    /// Replace the commission set of an existing sale with one derived
    /// from `new_amount` and the current tree shape.
    ///
    /// A negative amount is rejected before the transaction opens. An
    /// amount of zero still deletes the old commissions. On failure the
    /// sale keeps its original amount and commission rows.
    pub async fn recalculate(&self, sale_id: SaleId, new_amount: Decimal) -> Result<()> {
        if new_amount < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "sale amount cannot be negative".to_string(),
            ));
        }

        let mut conn = self.ledger.pool().acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::recalculate_tx(&mut conn, sale_id, new_amount).await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!(sale_id, amount = %new_amount, "sale recalculated");
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                error!(sale_id, error = %e, "recalculation rolled back");
                Err(e)
            }
        }
    }

    /// Recalculation core, run on an already-started transaction. The
    /// batch user-edit path calls this per sale inside one outer unit
    /// of work; a failure here rolls back the whole batch.
    pub(crate) async fn recalculate_tx(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
        new_amount: Decimal,
    ) -> Result<()> {
        if new_amount < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "sale amount cannot be negative".to_string(),
            ));
        }

        let sale = SqliteLedger::sale_tx(conn, sale_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("sale {sale_id}")))?;

        // Deletion happens unconditionally, even for a zero amount.
        let deleted = SqliteLedger::delete_sale_commissions_tx(conn, sale_id).await?;
        debug!(sale_id, deleted, "cleared previous commissions");

        SqliteLedger::update_sale_amount_tx(conn, sale_id, new_amount).await?;

        if new_amount > Decimal::ZERO {
            // Fresh rate snapshot and a walk over the current tree:
            // commissions reflect the hierarchy as it is now, not as it
            // was when the sale was created.
            let rates = SqliteLedger::active_rates_tx(conn).await?;
            Self::pay_commissions_tx(conn, sale_id, sale.user_id, new_amount, &rates).await?;
        }

        Ok(())
    }

    /// Total commission earned by one recipient.
    pub async fn total_commission(&self, user_id: UserId) -> Result<Decimal> {
        self.ledger.total_commission(user_id).await
    }

    async fn distribute_tx(
        conn: &mut SqliteConnection,
        seller_id: UserId,
        amount: Decimal,
    ) -> Result<DistributeReceipt> {
        if SqliteLedger::user_tx(conn, seller_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("user {seller_id}")));
        }

        let sale_id = SqliteLedger::insert_sale_tx(conn, seller_id, amount).await?;
        let rates = SqliteLedger::active_rates_tx(conn).await?;
        let levels_processed =
            Self::pay_commissions_tx(conn, sale_id, seller_id, amount, &rates).await?;

        Ok(DistributeReceipt {
            sale_id,
            levels_processed,
        })
    }

    /// Walk ancestors and insert one commission row per (level,
    /// recipient) pair. Returns how many levels were paid.
    async fn pay_commissions_tx(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
        seller_id: UserId,
        sale_amount: Decimal,
        rates: &RateSnapshot,
    ) -> Result<u32> {
        let chain = walk_ancestors(conn, seller_id, rates).await?;

        for ancestor in &chain {
            let amount = commission_amount(sale_amount, ancestor.percentage);
            SqliteLedger::insert_commission_tx(
                conn,
                &NewCommission {
                    sale_id,
                    user_id: ancestor.recipient,
                    level: ancestor.level,
                    percentage: ancestor.percentage,
                    amount,
                },
            )
            .await?;
            debug!(
                sale_id,
                level = ancestor.level,
                recipient = ancestor.recipient,
                amount = %amount,
                "commission paid"
            );
        }

        Ok(chain.len() as u32)
    }
}

/// Produce the ordered ancestor chain above `start`: level 1 is the
/// direct parent, level 2 its parent, and so on. Stops at the first of:
/// no active rate for the next level, the current user has no parent,
/// or the parent lookup resolves nothing (defensive end-of-chain, not
/// an error).
async fn walk_ancestors(
    conn: &mut SqliteConnection,
    start: UserId,
    rates: &RateSnapshot,
) -> Result<Vec<AncestorLevel>> {
    let mut chain = Vec::new();

    let mut current = match SqliteLedger::user_tx(conn, start).await? {
        Some(user) => user,
        None => return Ok(chain),
    };

    let mut level = 1u32;
    while let Some(percentage) = rates.percentage_for(level) {
        let Some(parent_id) = current.parent_id else {
            break;
        };
        let Some(parent) = SqliteLedger::user_tx(conn, parent_id).await? else {
            break;
        };
        chain.push(AncestorLevel {
            level,
            recipient: parent.id,
            percentage,
        });
        current = parent;
        level += 1;
    }

    Ok(chain)
}

/// `sale_amount * percentage / 100` at the stored scale of 2, rounding
/// the midpoint away from zero as SQL decimal columns do.
fn commission_amount(sale_amount: Decimal, percentage: Decimal) -> Decimal {
    (sale_amount * percentage / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
