//! Application services orchestrating the ledger.
//!
//! All ledger mutation flows through the [`award::AwardEngine`] or the
//! [`reconcile::Reconciler`]; nothing else writes to the stores.

pub mod award;
pub mod reconcile;
