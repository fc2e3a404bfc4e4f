//! Referral tree administration.
//!
//! User edits may carry a batch of sale amount changes; the whole edit
//! (field update plus every recalculation) is one outer unit of work,
//! so a failure on sale #3 of 5 undoes sales #1-2 and the field edits.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{error, info};

use crate::error::{LedgerError, Result};
use crate::model::{SaleId, User, UserId, UserTotal};
use crate::services::commission::CommissionEngine;
use crate::storage::SqliteLedger;

/// A pending user edit: replacement field values plus any sale amount
/// changes to apply in the same unit of work.
#[derive(Debug, Clone)]
pub struct UserEdit {
    pub name: String,
    pub email: String,
    pub parent_id: Option<UserId>,
    pub sale_edits: Vec<(SaleId, Decimal)>,
}

#[derive(Clone)]
pub struct UserAdmin {
    ledger: SqliteLedger,
}

impl UserAdmin {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }

    /// Create a user under an existing parent. Single insert; an
    /// initial sale, if any, is a separate `distribute` call with its
    /// own unit of work, so a failing sale leaves the user in place.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        parent_id: UserId,
    ) -> Result<UserId> {
        validate_identity(name, email)?;
        if self.ledger.user_by_id(parent_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("user {parent_id}")));
        }
        if self.ledger.user_by_email(email).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "email {email} is already in use"
            )));
        }

        let id = self.ledger.insert_user(name, email, Some(parent_id)).await?;
        info!(user_id = id, parent_id, "user created");
        Ok(id)
    }

    /// Apply a user edit and its batch of sale recalculations as one
    /// atomic unit. Validations run before the transaction opens.
    pub async fn update_user(&self, id: UserId, edit: UserEdit) -> Result<()> {
        validate_identity(&edit.name, &edit.email)?;
        if edit.parent_id == Some(id) {
            return Err(LedgerError::Validation(
                "user cannot be their own parent".to_string(),
            ));
        }

        if self.ledger.user_by_id(id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("user {id}")));
        }
        if let Some(parent_id) = edit.parent_id {
            if self.ledger.user_by_id(parent_id).await?.is_none() {
                return Err(LedgerError::NotFound(format!("user {parent_id}")));
            }
        }
        if let Some(other) = self.ledger.user_by_email(&edit.email).await? {
            if other.id != id {
                return Err(LedgerError::Validation(format!(
                    "email {} is already in use",
                    edit.email
                )));
            }
        }
        for (_, amount) in &edit.sale_edits {
            if *amount < Decimal::ZERO {
                return Err(LedgerError::Validation(
                    "sale amount cannot be negative".to_string(),
                ));
            }
        }

        let mut conn = self.ledger.pool().acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::update_tx(&mut conn, id, &edit).await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!(user_id = id, sales = edit.sale_edits.len(), "user updated");
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                error!(user_id = id, error = %e, "user update rolled back");
                Err(e)
            }
        }
    }

    /// Delete a user. SQLite cascades the delete through descendant
    /// users, their sales, and every commission referencing any of
    /// them; no explicit transaction is needed for the single statement.
    pub async fn delete_user(&self, id: UserId) -> Result<()> {
        let affected = self.ledger.delete_user(id).await?;
        if affected == 0 {
            return Err(LedgerError::NotFound(format!("user {id}")));
        }
        info!(user_id = id, "user deleted");
        Ok(())
    }

    /// All users, root first.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.ledger.list_users().await
    }

    /// The dashboard aggregate: every user with their summed earnings.
    pub async fn commission_totals(&self) -> Result<Vec<UserTotal>> {
        self.ledger.commission_totals().await
    }

    async fn update_tx(conn: &mut SqliteConnection, id: UserId, edit: &UserEdit) -> Result<()> {
        SqliteLedger::update_user_tx(conn, id, &edit.name, &edit.email, edit.parent_id).await?;
        for (sale_id, amount) in &edit.sale_edits {
            CommissionEngine::recalculate_tx(conn, *sale_id, *amount).await?;
        }
        Ok(())
    }
}

fn validate_identity(name: &str, email: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation("name is required".to_string()));
    }
    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "name must be at most 100 characters".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(LedgerError::Validation(format!(
            "invalid email address: {email}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("Alice", "alice@example.com").is_ok());
        assert!(validate_identity("", "alice@example.com").is_err());
        assert!(validate_identity("  ", "alice@example.com").is_err());
        assert!(validate_identity("Alice", "not-an-email").is_err());
        assert!(validate_identity(&"x".repeat(101), "a@b").is_err());
    }
}
