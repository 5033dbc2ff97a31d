//! Core accounting for the stakepool escrow.
//!
//! Participants deposit value into an [`EscrowLedger`] before a fixed
//! deadline. If the pooled amount reaches the threshold while the window is
//! still open, anyone may finalize the pool, which forwards every held unit to
//! the [`Beneficiary`] exactly once. Otherwise each participant reclaims their
//! own contribution after the deadline.
//!
//! * [`amount`] — base-unit arithmetic and decimal parsing.
//! * [`clock`] — time sources; tests drive a [`ManualClock`].
//! * [`beneficiary`] — the one-shot receiver of the pooled funds.
//! * [`refund`] — the rail that carries refunds back to participants.
//! * [`ledger`] — the state machine itself.
//! * [`snapshot`] — verifiable, serializable ledger state.
//! * [`shared`] — a lock-serialized handle for multi-threaded hosts.

pub mod amount;
pub mod beneficiary;
pub mod clock;
pub mod config;
pub mod events;
pub mod ledger;
pub mod refund;
pub mod shared;
pub mod snapshot;

mod error;

pub use amount::{format_units, parse_units, Amount, UNIT};
pub use beneficiary::{Beneficiary, ExternalContract};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::EscrowConfig;
pub use error::{AmountError, ConfigError, EscrowError, SnapshotError, TransferError};
pub use events::DepositEvent;
pub use ledger::{EscrowLedger, ParticipantId, Phase};
pub use refund::{RefundRail, Wallets};
pub use shared::SharedLedger;
pub use snapshot::LedgerSnapshot;
