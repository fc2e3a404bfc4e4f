//! Commission ledger integration tests.
//!
//! Run with: cargo test --test ledger_sqlite
//!
//! Uses an in-memory database, no external dependencies required.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use downline::config::Config;
use downline::model::{SaleId, UserId};
use downline::services::{CommissionEngine, LevelAdmin, UserAdmin, UserEdit};
use downline::storage::SqliteLedger;
use downline::LedgerError;

async fn memory_ledger() -> SqliteLedger {
    downline::storage::connect(&Config::for_test().storage)
        .await
        .expect("Failed to open in-memory ledger")
}

struct Fixture {
    ledger: SqliteLedger,
    engine: CommissionEngine,
    users: UserAdmin,
    levels: LevelAdmin,
    root: UserId,
    a: UserId,
    b: UserId,
    c: UserId,
}

/// Default rates {1:10, 2:5, 3:3, 4:2, 5:1} and the chain Root←A←B←C.
async fn seeded() -> Fixture {
    let ledger = memory_ledger().await;
    ledger.seed_default_levels().await.unwrap();
    ledger.seed_root_user().await.unwrap();

    let root = ledger
        .user_by_email("root@system.com")
        .await
        .unwrap()
        .expect("seeded root")
        .id;

    let users = UserAdmin::new(ledger.clone());
    let a = users.create_user("A", "a@example.com", root).await.unwrap();
    let b = users.create_user("B", "b@example.com", a).await.unwrap();
    let c = users.create_user("C", "c@example.com", b).await.unwrap();

    Fixture {
        engine: CommissionEngine::new(ledger.clone()),
        users,
        levels: LevelAdmin::new(ledger.clone()),
        ledger,
        root,
        a,
        b,
        c,
    }
}

/// (recipient, level, percentage, amount) rows of a sale, by level.
async fn commission_rows(
    ledger: &SqliteLedger,
    sale_id: SaleId,
) -> Vec<(UserId, u32, Decimal, Decimal)> {
    ledger
        .sale_commissions(sale_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.user_id, c.level, c.percentage, c.amount))
        .collect()
}

#[tokio::test]
async fn test_distribute_pays_three_levels_up_the_chain() {
    let fx = seeded().await;

    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();
    assert_eq!(receipt.levels_processed, 3);

    let sale = fx.ledger.sale(receipt.sale_id).await.unwrap().unwrap();
    assert_eq!(sale.user_id, fx.c);
    assert_eq!(sale.amount, dec!(1000));

    let rows = commission_rows(&fx.ledger, receipt.sale_id).await;
    assert_eq!(
        rows,
        vec![
            (fx.b, 1, dec!(10.00), dec!(100.00)),
            (fx.a, 2, dec!(5.00), dec!(50.00)),
            (fx.root, 3, dec!(3.00), dec!(30.00)),
        ]
    );

    let total: Decimal = rows.iter().map(|r| r.3).sum();
    assert_eq!(total, dec!(180.00));
    assert!(total <= sale.amount);
}

#[tokio::test]
async fn test_distribute_stops_at_root() {
    let fx = seeded().await;

    // A is one level below the root; only one ancestor exists even
    // though five levels are active.
    let receipt = fx.engine.distribute(fx.a, dec!(200)).await.unwrap();
    assert_eq!(receipt.levels_processed, 1);

    let rows = commission_rows(&fx.ledger, receipt.sale_id).await;
    assert_eq!(rows, vec![(fx.root, 1, dec!(10.00), dec!(20.00))]);
}

#[tokio::test]
async fn test_distribute_with_no_active_levels_creates_only_the_sale() {
    let ledger = memory_ledger().await;
    ledger.seed_root_user().await.unwrap();
    let root = ledger
        .user_by_email("root@system.com")
        .await
        .unwrap()
        .unwrap()
        .id;
    let users = UserAdmin::new(ledger.clone());
    let seller = users.create_user("S", "s@example.com", root).await.unwrap();

    let engine = CommissionEngine::new(ledger.clone());
    let receipt = engine.distribute(seller, dec!(100)).await.unwrap();
    assert_eq!(receipt.levels_processed, 0);
    assert!(commission_rows(&ledger, receipt.sale_id).await.is_empty());
    assert!(ledger.sale(receipt.sale_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_distribute_rejects_non_positive_amount() {
    let fx = seeded().await;

    for amount in [dec!(0), dec!(-5)] {
        let err = fx.engine.distribute(fx.c, amount).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err}");
    }
    assert!(fx.ledger.sales_for_user(fx.c).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_distribute_unknown_seller_is_not_found() {
    let fx = seeded().await;

    let err = fx.engine.distribute(999_999, dec!(100)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn test_distribute_rolls_back_when_commission_insert_fails() {
    let fx = seeded().await;

    // Tear the commissions table out from under the walk; the sale
    // insert succeeds, the first commission insert cannot.
    sqlx::query("DROP TABLE commissions")
        .execute(fx.ledger.pool())
        .await
        .unwrap();

    let err = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)), "{err}");
    assert!(fx.ledger.sales_for_user(fx.c).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recalculate_replaces_commission_set() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    fx.engine.recalculate(receipt.sale_id, dec!(500)).await.unwrap();

    let sale = fx.ledger.sale(receipt.sale_id).await.unwrap().unwrap();
    assert_eq!(sale.amount, dec!(500));

    let rows = commission_rows(&fx.ledger, receipt.sale_id).await;
    assert_eq!(
        rows,
        vec![
            (fx.b, 1, dec!(10.00), dec!(50.00)),
            (fx.a, 2, dec!(5.00), dec!(25.00)),
            (fx.root, 3, dec!(3.00), dec!(15.00)),
        ]
    );
}

#[tokio::test]
async fn test_recalculate_same_amount_is_idempotent() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    fx.engine.recalculate(receipt.sale_id, dec!(750)).await.unwrap();
    let first = commission_rows(&fx.ledger, receipt.sale_id).await;

    fx.engine.recalculate(receipt.sale_id, dec!(750)).await.unwrap();
    let second = commission_rows(&fx.ledger, receipt.sale_id).await;

    assert_eq!(first, second);
    assert_eq!(second.len(), 3);
}

#[tokio::test]
async fn test_recalculate_to_zero_clears_commissions() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    fx.engine.recalculate(receipt.sale_id, dec!(0)).await.unwrap();

    let sale = fx.ledger.sale(receipt.sale_id).await.unwrap().unwrap();
    assert_eq!(sale.amount, dec!(0));
    assert!(commission_rows(&fx.ledger, receipt.sale_id).await.is_empty());
}

#[tokio::test]
async fn test_recalculate_rejects_negative_amount() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    let err = fx
        .engine
        .recalculate(receipt.sale_id, dec!(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");

    // Untouched: the precondition is checked before the unit of work.
    assert_eq!(commission_rows(&fx.ledger, receipt.sale_id).await.len(), 3);
}

#[tokio::test]
async fn test_recalculate_missing_sale_is_not_found() {
    let fx = seeded().await;

    let err = fx.engine.recalculate(424_242, dec!(10)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn test_recalculate_failure_keeps_original_sale_amount() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    sqlx::query("DROP TABLE commissions")
        .execute(fx.ledger.pool())
        .await
        .unwrap();

    let err = fx
        .engine
        .recalculate(receipt.sale_id, dec!(500))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)), "{err}");

    let sale = fx.ledger.sale(receipt.sale_id).await.unwrap().unwrap();
    assert_eq!(sale.amount, dec!(1000));
}

#[tokio::test]
async fn test_recalculate_follows_the_current_tree_shape() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    // Reparent C directly under the root, then recalculate: the new
    // commission set reflects the tree as it is now.
    fx.users
        .update_user(
            fx.c,
            UserEdit {
                name: "C".to_string(),
                email: "c@example.com".to_string(),
                parent_id: Some(fx.root),
                sale_edits: vec![],
            },
        )
        .await
        .unwrap();

    fx.engine.recalculate(receipt.sale_id, dec!(1000)).await.unwrap();

    let rows = commission_rows(&fx.ledger, receipt.sale_id).await;
    assert_eq!(rows, vec![(fx.root, 1, dec!(10.00), dec!(100.00))]);
}

#[tokio::test]
async fn test_rates_apply_at_time_of_sale() {
    let fx = seeded().await;

    let first = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    // Deactivate level 1 between the two sales. The first sale keeps
    // its rows; the second sale's walk stops at the level-1 gap.
    fx.levels.update_level(1, dec!(10.00), false).await.unwrap();
    let second = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    assert_eq!(commission_rows(&fx.ledger, first.sale_id).await.len(), 3);
    assert_eq!(second.levels_processed, 0);
    assert!(commission_rows(&fx.ledger, second.sale_id).await.is_empty());
}

#[tokio::test]
async fn test_walker_stops_at_gap_in_active_levels() {
    let fx = seeded().await;

    // Levels {1, 3, 4, 5} active: the walk pays level 1 and stops at
    // the missing level 2, never reaching level 3.
    fx.levels.update_level(2, dec!(5.00), false).await.unwrap();
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    assert_eq!(receipt.levels_processed, 1);
    let rows = commission_rows(&fx.ledger, receipt.sale_id).await;
    assert_eq!(rows, vec![(fx.b, 1, dec!(10.00), dec!(100.00))]);
}

#[tokio::test]
async fn test_level_percentage_locks_once_referenced() {
    let fx = seeded().await;
    fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    let err = fx
        .levels
        .update_level(1, dec!(12.00), true)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)), "{err}");

    // The active flag stays mutable when the percentage is unchanged,
    // even for a referenced level.
    fx.levels.update_level(1, dec!(10.00), false).await.unwrap();
    let level = fx.ledger.level_by_number(1).await.unwrap().unwrap();
    assert!(!level.active);
    assert_eq!(level.percentage, dec!(10.00));

    // Unreferenced levels stay fully editable.
    fx.levels.update_level(5, dec!(1.50), true).await.unwrap();
    let level = fx.ledger.level_by_number(5).await.unwrap().unwrap();
    assert_eq!(level.percentage, dec!(1.50));
}

#[tokio::test]
async fn test_add_level_validates_bounds() {
    let fx = seeded().await;

    let err = fx.levels.add_level(6, dec!(101)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");

    let err = fx.levels.add_level(1, dec!(7.00)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");

    fx.levels.add_level(6, dec!(0.50)).await.unwrap();
    let levels = fx.levels.list_levels().await.unwrap();
    assert_eq!(levels.len(), 6);
    assert_eq!(levels.last().unwrap().level, 6);
    assert!(levels.last().unwrap().active);
}

#[tokio::test]
async fn test_new_level_extends_the_walk() {
    let fx = seeded().await;

    // A sixth active level only pays out on chains deep enough; the
    // Root←A←B←C chain still yields three rows.
    fx.levels.add_level(6, dec!(0.50)).await.unwrap();
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();
    assert_eq!(receipt.levels_processed, 3);
}

#[tokio::test]
async fn test_total_commission_sums_per_recipient() {
    let fx = seeded().await;
    fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();
    fx.engine.distribute(fx.b, dec!(200)).await.unwrap();

    // From the first sale B earns 100; from the second A earns 20 and
    // B earns nothing (B is the seller).
    assert_eq!(fx.engine.total_commission(fx.b).await.unwrap(), dec!(100.00));
    assert_eq!(
        fx.engine.total_commission(fx.a).await.unwrap(),
        dec!(50.00) + dec!(20.00)
    );
    assert_eq!(fx.engine.total_commission(fx.c).await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_commission_totals_lists_every_user_root_first() {
    let fx = seeded().await;
    fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    let totals = fx.users.commission_totals().await.unwrap();
    assert_eq!(totals.len(), 4);

    assert_eq!(totals[0].user_id, fx.root);
    assert_eq!(totals[0].parent_name, None);
    assert_eq!(totals[0].total_commission, dec!(30.00));

    let b_row = totals.iter().find(|t| t.user_id == fx.b).unwrap();
    assert_eq!(b_row.total_commission, dec!(100.00));
    assert_eq!(b_row.parent_name.as_deref(), Some("A"));

    // C sold but earned nothing; still listed with a zero total.
    let c_row = totals.iter().find(|t| t.user_id == fx.c).unwrap();
    assert_eq!(c_row.total_commission, dec!(0));
}

#[tokio::test]
async fn test_batch_sale_update_applies_all_edits() {
    let fx = seeded().await;
    let s1 = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();
    let s2 = fx.engine.distribute(fx.c, dec!(400)).await.unwrap();

    fx.users
        .update_user(
            fx.c,
            UserEdit {
                name: "C prime".to_string(),
                email: "c@example.com".to_string(),
                parent_id: Some(fx.b),
                sale_edits: vec![(s1.sale_id, dec!(500)), (s2.sale_id, dec!(0))],
            },
        )
        .await
        .unwrap();

    assert_eq!(
        fx.ledger.sale(s1.sale_id).await.unwrap().unwrap().amount,
        dec!(500)
    );
    assert_eq!(commission_rows(&fx.ledger, s1.sale_id).await.len(), 3);
    assert!(commission_rows(&fx.ledger, s2.sale_id).await.is_empty());
    assert_eq!(
        fx.ledger.user_by_id(fx.c).await.unwrap().unwrap().name,
        "C prime"
    );
}

#[tokio::test]
async fn test_batch_sale_update_failure_rolls_back_field_edits() {
    let fx = seeded().await;
    let s1 = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();

    // The second edit targets a sale that does not exist; the first
    // edit and the name change must both be undone.
    let err = fx
        .users
        .update_user(
            fx.c,
            UserEdit {
                name: "Changed".to_string(),
                email: "c@example.com".to_string(),
                parent_id: Some(fx.b),
                sale_edits: vec![(s1.sale_id, dec!(700)), (999_999, dec!(100))],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)), "{err}");

    let user = fx.ledger.user_by_id(fx.c).await.unwrap().unwrap();
    assert_eq!(user.name, "C");
    assert_eq!(
        fx.ledger.sale(s1.sale_id).await.unwrap().unwrap().amount,
        dec!(1000)
    );
    assert_eq!(
        commission_rows(&fx.ledger, s1.sale_id).await,
        vec![
            (fx.b, 1, dec!(10.00), dec!(100.00)),
            (fx.a, 2, dec!(5.00), dec!(50.00)),
            (fx.root, 3, dec!(3.00), dec!(30.00)),
        ]
    );
}

#[tokio::test]
async fn test_delete_user_cascades_to_subtree_sales_and_commissions() {
    let fx = seeded().await;
    let receipt = fx.engine.distribute(fx.c, dec!(1000)).await.unwrap();
    assert_eq!(fx.engine.total_commission(fx.root).await.unwrap(), dec!(30.00));

    // Deleting A removes B and C beneath it, C's sale, and with the
    // sale every commission it generated, including the root's.
    fx.users.delete_user(fx.a).await.unwrap();

    let remaining = fx.users.list_users().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, fx.root);
    assert!(fx.ledger.sale(receipt.sale_id).await.unwrap().is_none());
    assert_eq!(fx.engine.total_commission(fx.root).await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_delete_missing_user_is_not_found() {
    let fx = seeded().await;

    let err = fx.users.delete_user(31_337).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn test_create_user_validates_parent_and_email() {
    let fx = seeded().await;

    let err = fx
        .users
        .create_user("D", "d@example.com", 999_999)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)), "{err}");

    let err = fx
        .users
        .create_user("D", "a@example.com", fx.root)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");
}

#[tokio::test]
async fn test_seeding_is_idempotent() {
    let ledger = memory_ledger().await;
    for _ in 0..2 {
        ledger.seed_default_levels().await.unwrap();
        ledger.seed_root_user().await.unwrap();
    }

    let levels = LevelAdmin::new(ledger.clone()).list_levels().await.unwrap();
    assert_eq!(levels.len(), 5);
    assert_eq!(
        levels.iter().map(|l| l.percentage).collect::<Vec<_>>(),
        vec![dec!(10.00), dec!(5.00), dec!(3.00), dec!(2.00), dec!(1.00)]
    );
    assert_eq!(UserAdmin::new(ledger).list_users().await.unwrap().len(), 1);
}
