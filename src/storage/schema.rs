//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query
//! building, plus the DDL executed by `SqliteLedger::init`.

use sea_query::Iden;

/// Users table schema (referral tree; parent_id is the tree edge).
#[derive(Iden)]
pub enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "email"]
    Email,
    #[iden = "parent_id"]
    ParentId,
    #[iden = "created_at"]
    CreatedAt,
}

/// Sales table schema.
#[derive(Iden)]
pub enum Sales {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "amount"]
    Amount,
    #[iden = "created_at"]
    CreatedAt,
}

/// Commissions table schema.
#[derive(Iden)]
pub enum Commissions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sale_id"]
    SaleId,
    #[iden = "user_id"]
    UserId,
    #[iden = "level"]
    Level,
    #[iden = "percentage"]
    Percentage,
    #[iden = "amount"]
    Amount,
}

/// Commission levels table schema (rate configuration).
#[derive(Iden)]
pub enum CommissionLevels {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "level"]
    Level,
    #[iden = "percentage"]
    Percentage,
    #[iden = "active"]
    Active,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the users table.
///
/// The self-referencing parent_id cascades so deleting a user removes
/// the whole subtree beneath them.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    parent_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_parent ON users(parent_id);
"#;

/// SQL for creating the sales table.
pub const CREATE_SALES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    amount TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sales_user ON sales(user_id);
"#;

/// SQL for creating the commissions table.
///
/// UNIQUE(sale_id, level) backs the at-most-one-row-per-level invariant.
pub const CREATE_COMMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sale_id INTEGER NOT NULL REFERENCES sales(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    level INTEGER NOT NULL,
    percentage TEXT NOT NULL,
    amount TEXT NOT NULL,
    UNIQUE (sale_id, level)
);

CREATE INDEX IF NOT EXISTS idx_commissions_sale_user ON commissions(sale_id, user_id);
CREATE INDEX IF NOT EXISTS idx_commissions_level ON commissions(level);
"#;

/// SQL for creating the commission levels table.
pub const CREATE_COMMISSION_LEVELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commission_levels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level INTEGER NOT NULL UNIQUE CHECK (level >= 1),
    percentage TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
