//! Ledger services: the distribution/recalculation engine plus level
//! and user administration.

pub mod commission;
pub mod levels;
pub mod users;

pub use commission::CommissionEngine;
pub use levels::LevelAdmin;
pub use users::{UserAdmin, UserEdit};
