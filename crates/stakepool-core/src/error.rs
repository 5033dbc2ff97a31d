use thiserror::Error;

use crate::amount::Amount;

/// Rejections surfaced by the escrow ledger. A returned error always means the
/// ledger state is exactly what it was before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Deposit or finalize attempted at or after the deadline.
    #[error("deadline has been reached")]
    DeadlinePassed,

    /// Reclaim attempted while the deposit window is still open.
    #[error("deadline has not been reached yet")]
    DeadlineNotReached,

    /// The pool was already forwarded to the beneficiary.
    #[error("staking process has ended")]
    AlreadyCompleted,

    /// Finalize attempted with less than the threshold pooled.
    #[error("pooled {pooled} is below the threshold {threshold}")]
    ThresholdNotMet { pooled: Amount, threshold: Amount },

    /// Reclaim attempted by a participant with nothing recorded.
    #[error("no deposited funds to reclaim for {participant}")]
    NoFundsToReclaim { participant: String },

    #[error("deposit amount must be greater than zero")]
    ZeroAmount,

    #[error("amount overflow")]
    AmountOverflow,

    /// The outbound transfer failed and the operation was rolled back.
    #[error("outbound transfer failed: {0}")]
    TransferFailed(#[from] TransferError),
}

/// Failure reported by a collaborator receiving value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("transfer rejected by {0}")]
    Rejected(String),

    #[error("receiver balance overflow")]
    Overflow,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount {0:?}")]
    Invalid(String),

    #[error("amount {0:?} has more than 9 fractional digits")]
    TooPrecise(String),

    #[error("amount {0:?} does not fit in base units")]
    Overflow(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("deposit window must be longer than zero seconds")]
    ZeroWindow,

    #[error("threshold must be greater than zero")]
    ZeroThreshold,

    #[error("deadline overflows the clock range")]
    DeadlineOverflow,
}

/// Reasons a persisted snapshot cannot be turned back into a ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("state root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    #[error("held funds {held} do not match recorded balances {recorded}")]
    Unbalanced { held: Amount, recorded: Amount },

    #[error("completed pool still holds {0} base units")]
    CompletedWithFunds(Amount),

    #[error("snapshot completion flag disagrees with the beneficiary")]
    BeneficiaryMismatch,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
