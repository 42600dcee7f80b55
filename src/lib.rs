/// Accounts are owned elsewhere, this crate only needs to resolve them.
pub mod account;

/// Balance counters and the ledger entries that move them.
/// A balance is always reproducible by replaying its entries.
pub mod balance;

/// Time source for entry timestamps and lock expiry.
pub mod clock;

/// Generic pre/execute/compensate/release lifecycle for financial commands.
pub mod command;

/// Per-account ledgers, pending transactions, and the store interface,
/// plus an "in memory" implementation.
pub mod ledger;

/// Named, exclusive, time bounded locks.
pub mod lock;

/// The money transfer saga, composing ledgers and locks through the
/// command lifecycle.
pub mod transfer;

/// Ideally, this module should exist in its own crate, as a way to
/// bootstrap core logic. However, it is used by integration tests
/// so it lives here.
pub mod bin_utils;
