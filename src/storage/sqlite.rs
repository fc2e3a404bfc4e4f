//! SQLite ledger store.
//!
//! Pool-level methods serve single-statement reads and writes; the
//! `*_tx` associated functions run individual steps of a unit of work
//! on an already-started transaction connection. Query strings are
//! built with sea-query and executed through sqlx, and decimals travel
//! as TEXT at scale 2.

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::Result;
use crate::model::{
    decimal_column, Commission, CommissionLevel, LevelId, Rate, RateSnapshot, Sale, SaleId, User,
    UserId, UserTotal,
};
use crate::storage::schema::{
    CommissionLevels, Commissions, Sales, Users, CREATE_COMMISSIONS_TABLE,
    CREATE_COMMISSION_LEVELS_TABLE, CREATE_SALES_TABLE, CREATE_USERS_TABLE,
};

/// Default root user seeded at the top of the referral tree.
pub const ROOT_USER_NAME: &str = "Root Admin";
pub const ROOT_USER_EMAIL: &str = "root@system.com";

/// Default level→percentage seed: 10%, 5%, 3%, 2%, 1%.
pub const DEFAULT_LEVEL_PERCENTAGES: [(u32, &str); 5] = [
    (1, "10.00"),
    (2, "5.00"),
    (3, "3.00"),
    (4, "2.00"),
    (5, "1.00"),
];

/// SQLite implementation of the ledger store.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a new ledger over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that open their own unit of work.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if absent.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_USERS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_SALES_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_COMMISSIONS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_COMMISSION_LEVELS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Seed the root user (parent to all). Idempotent.
    pub async fn seed_root_user(&self) -> Result<()> {
        let query = Query::insert()
            .into_table(Users::Table)
            .columns([Users::Name, Users::Email, Users::ParentId, Users::CreatedAt])
            .values_panic([
                ROOT_USER_NAME.into(),
                ROOT_USER_EMAIL.into(),
                Option::<i64>::None.into(),
                Utc::now().to_rfc3339().into(),
            ])
            .on_conflict(OnConflict::column(Users::Email).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    /// Seed the default five commission levels. Idempotent.
    pub async fn seed_default_levels(&self) -> Result<()> {
        for (level, percentage) in DEFAULT_LEVEL_PERCENTAGES {
            let query = Query::insert()
                .into_table(CommissionLevels::Table)
                .columns([
                    CommissionLevels::Level,
                    CommissionLevels::Percentage,
                    CommissionLevels::Active,
                    CommissionLevels::CreatedAt,
                    CommissionLevels::UpdatedAt,
                ])
                .values_panic([
                    level.into(),
                    percentage.into(),
                    true.into(),
                    Utc::now().to_rfc3339().into(),
                    Utc::now().to_rfc3339().into(),
                ])
                .on_conflict(
                    OnConflict::column(CommissionLevels::Level)
                        .do_nothing()
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder);

            sqlx::query(&query).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ----- users -----

    /// Insert a user row, returning the new id.
    pub async fn insert_user(
        &self,
        name: &str,
        email: &str,
        parent_id: Option<UserId>,
    ) -> Result<UserId> {
        let query = Query::insert()
            .into_table(Users::Table)
            .columns([Users::Name, Users::Email, Users::ParentId, Users::CreatedAt])
            .values_panic([
                name.into(),
                email.into(),
                parent_id.into(),
                Utc::now().to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&user_query(id)).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| User::from_row(&r)))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = Query::select()
            .columns([
                Users::Id,
                Users::Name,
                Users::Email,
                Users::ParentId,
                Users::CreatedAt,
            ])
            .from(Users::Table)
            .and_where(Expr::col(Users::Email).eq(email))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| User::from_row(&r)))
    }

    /// All users, root first, then ascending by id (dashboard order).
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let query = Query::select()
            .columns([
                Users::Id,
                Users::Name,
                Users::Email,
                Users::ParentId,
                Users::CreatedAt,
            ])
            .from(Users::Table)
            .order_by(Users::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut users: Vec<User> = rows.iter().map(User::from_row).collect();
        users.sort_by_key(|u| (u.parent_id.is_some(), u.id));
        Ok(users)
    }

    /// Delete a user row; SQLite cascades to descendant users, their
    /// sales, and all commissions. Returns the direct rows affected.
    pub async fn delete_user(&self, id: UserId) -> Result<u64> {
        let query = Query::delete()
            .from_table(Users::Table)
            .and_where(Expr::col(Users::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ----- sales -----

    pub async fn sale(&self, id: SaleId) -> Result<Option<Sale>> {
        let row = sqlx::query(&sale_query(id)).fetch_optional(&self.pool).await?;
        row.map(|r| Sale::from_row(&r)).transpose()
    }

    /// Sales recorded by one seller, ascending by id.
    pub async fn sales_for_user(&self, user_id: UserId) -> Result<Vec<Sale>> {
        let query = Query::select()
            .columns([Sales::Id, Sales::UserId, Sales::Amount, Sales::CreatedAt])
            .from(Sales::Table)
            .and_where(Expr::col(Sales::UserId).eq(user_id))
            .order_by(Sales::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Sale::from_row).collect()
    }

    // ----- commissions -----

    /// Commission rows of one sale, ascending by level.
    pub async fn sale_commissions(&self, sale_id: SaleId) -> Result<Vec<Commission>> {
        let query = Query::select()
            .columns([
                Commissions::Id,
                Commissions::SaleId,
                Commissions::UserId,
                Commissions::Level,
                Commissions::Percentage,
                Commissions::Amount,
            ])
            .from(Commissions::Table)
            .and_where(Expr::col(Commissions::SaleId).eq(sale_id))
            .order_by(Commissions::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Commission::from_row).collect()
    }

    /// Number of commission rows referencing a level number. A level
    /// with a non-zero count is locked: its percentage is immutable.
    pub async fn commission_count(&self, level: u32) -> Result<i64> {
        let query = Query::select()
            .expr(Expr::col(Commissions::Id).count())
            .from(Commissions::Table)
            .and_where(Expr::col(Commissions::Level).eq(level))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.get(0))
    }

    /// Total commission earned by one user. Summed in Rust over decoded
    /// decimals; SQL SUM over the TEXT column would coerce to float.
    pub async fn total_commission(&self, user_id: UserId) -> Result<Decimal> {
        let query = Query::select()
            .column(Commissions::Amount)
            .from(Commissions::Table)
            .and_where(Expr::col(Commissions::UserId).eq(user_id))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut total = Decimal::ZERO;
        for row in &rows {
            total += decimal_column(row, "amount")?;
        }
        Ok(total)
    }

    /// Per-user commission totals for every user (the dashboard query):
    /// left join so users with no earnings show a zero total, root
    /// first, parent names resolved.
    pub async fn commission_totals(&self) -> Result<Vec<UserTotal>> {
        let query = Query::select()
            .columns([
                (Users::Table, Users::Id),
                (Users::Table, Users::Name),
                (Users::Table, Users::Email),
                (Users::Table, Users::ParentId),
            ])
            .column((Commissions::Table, Commissions::Amount))
            .from(Users::Table)
            .left_join(
                Commissions::Table,
                Expr::col((Users::Table, Users::Id))
                    .equals((Commissions::Table, Commissions::UserId)),
            )
            .order_by((Users::Table, Users::Id), Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut totals: BTreeMap<UserId, UserTotal> = BTreeMap::new();
        for row in &rows {
            let user_id: UserId = row.get("id");
            let entry = totals.entry(user_id).or_insert_with(|| UserTotal {
                user_id,
                name: row.get("name"),
                email: row.get("email"),
                parent_id: row.get("parent_id"),
                parent_name: None,
                total_commission: Decimal::ZERO,
            });
            let amount: Option<String> = row.get("amount");
            if let Some(text) = amount {
                entry.total_commission += text.parse::<Decimal>()?;
            }
        }

        let names: BTreeMap<UserId, String> = totals
            .values()
            .map(|t| (t.user_id, t.name.clone()))
            .collect();

        let mut totals: Vec<UserTotal> = totals.into_values().collect();
        for total in &mut totals {
            total.parent_name = total.parent_id.and_then(|p| names.get(&p).cloned());
        }
        totals.sort_by_key(|t| (t.parent_id.is_some(), t.user_id));
        Ok(totals)
    }

    // ----- commission levels -----

    /// Insert a level row (active on creation), returning the new id.
    pub async fn insert_level(&self, level: u32, percentage: Decimal) -> Result<LevelId> {
        let query = Query::insert()
            .into_table(CommissionLevels::Table)
            .columns([
                CommissionLevels::Level,
                CommissionLevels::Percentage,
                CommissionLevels::Active,
                CommissionLevels::CreatedAt,
                CommissionLevels::UpdatedAt,
            ])
            .values_panic([
                level.into(),
                percentage.to_string().into(),
                true.into(),
                Utc::now().to_rfc3339().into(),
                Utc::now().to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn level_by_number(&self, level: u32) -> Result<Option<CommissionLevel>> {
        let query = Query::select()
            .columns([
                CommissionLevels::Id,
                CommissionLevels::Level,
                CommissionLevels::Percentage,
                CommissionLevels::Active,
            ])
            .from(CommissionLevels::Table)
            .and_where(Expr::col(CommissionLevels::Level).eq(level))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| CommissionLevel::from_row(&r)).transpose()
    }

    /// All configured levels, ascending by level number.
    pub async fn list_levels(&self) -> Result<Vec<CommissionLevel>> {
        let query = Query::select()
            .columns([
                CommissionLevels::Id,
                CommissionLevels::Level,
                CommissionLevels::Percentage,
                CommissionLevels::Active,
            ])
            .from(CommissionLevels::Table)
            .order_by(CommissionLevels::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(CommissionLevel::from_row).collect()
    }

    /// Overwrite a level's percentage and active flag. Lock checks are
    /// the service's concern; this is a single-row update.
    pub async fn update_level_row(
        &self,
        level: u32,
        percentage: Decimal,
        active: bool,
    ) -> Result<()> {
        let query = Query::update()
            .table(CommissionLevels::Table)
            .values([
                (CommissionLevels::Percentage, percentage.to_string().into()),
                (CommissionLevels::Active, active.into()),
                (CommissionLevels::UpdatedAt, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(CommissionLevels::Level).eq(level))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    // ----- transactional steps -----
    //
    // These run on a connection that has already executed BEGIN
    // IMMEDIATE; the caller owns commit/rollback.

    pub(crate) async fn user_tx(conn: &mut SqliteConnection, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&user_query(id)).fetch_optional(conn).await?;
        Ok(row.map(|r| User::from_row(&r)))
    }

    pub(crate) async fn sale_tx(conn: &mut SqliteConnection, id: SaleId) -> Result<Option<Sale>> {
        let row = sqlx::query(&sale_query(id)).fetch_optional(conn).await?;
        row.map(|r| Sale::from_row(&r)).transpose()
    }

    pub(crate) async fn insert_sale_tx(
        conn: &mut SqliteConnection,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<SaleId> {
        let query = Query::insert()
            .into_table(Sales::Table)
            .columns([Sales::UserId, Sales::Amount, Sales::CreatedAt])
            .values_panic([
                user_id.into(),
                amount.to_string().into(),
                Utc::now().to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(conn).await?;
        Ok(result.last_insert_rowid())
    }

    pub(crate) async fn update_sale_amount_tx(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
        amount: Decimal,
    ) -> Result<()> {
        let query = Query::update()
            .table(Sales::Table)
            .values([(Sales::Amount, amount.to_string().into())])
            .and_where(Expr::col(Sales::Id).eq(sale_id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(conn).await?;
        Ok(())
    }

    /// Delete every commission row of a sale, returning how many went.
    pub(crate) async fn delete_sale_commissions_tx(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
    ) -> Result<u64> {
        let query = Query::delete()
            .from_table(Commissions::Table)
            .and_where(Expr::col(Commissions::SaleId).eq(sale_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(conn).await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn insert_commission_tx(
        conn: &mut SqliteConnection,
        commission: &NewCommission,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(Commissions::Table)
            .columns([
                Commissions::SaleId,
                Commissions::UserId,
                Commissions::Level,
                Commissions::Percentage,
                Commissions::Amount,
            ])
            .values_panic([
                commission.sale_id.into(),
                commission.user_id.into(),
                commission.level.into(),
                commission.percentage.to_string().into(),
                commission.amount.to_string().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(conn).await?;
        Ok(())
    }

    /// Snapshot the active rate table, ascending by level. Read inside
    /// the transaction so the snapshot is consistent with the walk.
    pub(crate) async fn active_rates_tx(conn: &mut SqliteConnection) -> Result<RateSnapshot> {
        let query = Query::select()
            .columns([CommissionLevels::Level, CommissionLevels::Percentage])
            .from(CommissionLevels::Table)
            .and_where(Expr::col(CommissionLevels::Active).eq(true))
            .order_by(CommissionLevels::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(conn).await?;
        let mut rates = Vec::with_capacity(rows.len());
        for row in &rows {
            let level: i64 = row.get("level");
            rates.push(Rate {
                level: level as u32,
                percentage: decimal_column(row, "percentage")?,
            });
        }
        Ok(RateSnapshot::new(rates))
    }

    pub(crate) async fn update_user_tx(
        conn: &mut SqliteConnection,
        id: UserId,
        name: &str,
        email: &str,
        parent_id: Option<UserId>,
    ) -> Result<()> {
        let query = Query::update()
            .table(Users::Table)
            .values([
                (Users::Name, name.into()),
                (Users::Email, email.into()),
                (Users::ParentId, parent_id.into()),
            ])
            .and_where(Expr::col(Users::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(conn).await?;
        Ok(())
    }
}

/// A commission row about to be written by a distribution walk.
#[derive(Debug, Clone)]
pub(crate) struct NewCommission {
    pub sale_id: SaleId,
    pub user_id: UserId,
    pub level: u32,
    pub percentage: Decimal,
    pub amount: Decimal,
}

fn user_query(id: UserId) -> String {
    Query::select()
        .columns([
            Users::Id,
            Users::Name,
            Users::Email,
            Users::ParentId,
            Users::CreatedAt,
        ])
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

fn sale_query(id: SaleId) -> String {
    Query::select()
        .columns([Sales::Id, Sales::UserId, Sales::Amount, Sales::CreatedAt])
        .from(Sales::Table)
        .and_where(Expr::col(Sales::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
