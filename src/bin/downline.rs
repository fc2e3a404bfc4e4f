//! Downline ledger utility.
//!
//! Opens (and seeds, if fresh) the configured ledger database and
//! prints the commission dashboard: every user with their summed
//! earnings, root first.

use tracing::info;

use downline::bootstrap::init_tracing;
use downline::config::Config;
use downline::services::UserAdmin;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let ledger = downline::storage::connect(&config.storage).await?;
    ledger.seed_default_levels().await?;
    ledger.seed_root_user().await?;
    info!("Ledger ready");

    let users = UserAdmin::new(ledger);
    for row in users.commission_totals().await? {
        let parent = row.parent_name.as_deref().unwrap_or("-");
        println!(
            "{:>6}  {:<24} {:<28} parent: {:<24} total: {}",
            row.user_id, row.name, row.email, parent, row.total_commission
        );
    }

    Ok(())
}
