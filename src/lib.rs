//! Downline - multi-level referral commission ledger.
//!
//! Users form a referral tree; each sale recorded against a seller pays
//! commissions to the seller's ancestors at per-level percentages. The
//! distribution and recalculation engines run as single atomic units of
//! work against the SQLite ledger.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod model;
pub mod services;
pub mod storage;

pub use error::{LedgerError, Result};
