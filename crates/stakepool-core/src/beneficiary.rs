use serde::{Deserialize, Serialize};

use crate::{amount::Amount, error::TransferError, ledger::ParticipantId};

/// External receiver of the pooled funds.
///
/// The ledger only ever calls [`Beneficiary::accept_transfer`] once per
/// successful finalize and reads [`Beneficiary::completed`] back; whatever the
/// collaborator does with the value is its own business. An `Err` from
/// `accept_transfer` means no value was received.
pub trait Beneficiary: Send {
    fn account(&self) -> &str;

    fn accept_transfer(&mut self, amount: Amount) -> Result<(), TransferError>;

    fn completed(&self) -> bool;

    /// Value the collaborator holds.
    fn held(&self) -> Amount;
}

/// In-memory beneficiary that marks itself completed on the first transfer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalContract {
    pub account: ParticipantId,
    pub completed: bool,
    pub held: Amount,
}

impl ExternalContract {
    pub fn new(account: impl Into<ParticipantId>) -> Self {
        Self {
            account: account.into(),
            completed: false,
            held: 0,
        }
    }
}

impl Beneficiary for ExternalContract {
    fn account(&self) -> &str {
        &self.account
    }

    fn accept_transfer(&mut self, amount: Amount) -> Result<(), TransferError> {
        self.held = self
            .held
            .checked_add(amount)
            .ok_or(TransferError::Overflow)?;
        self.completed = true;
        Ok(())
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn held(&self) -> Amount {
        self.held
    }
}
