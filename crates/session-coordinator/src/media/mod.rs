//! Media resource bookkeeping for rooms.

pub mod ledger;

pub use ledger::ResourceLedger;
