use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{amount::Amount, error::TransferError, ledger::EscrowLedger, ledger::ParticipantId};

/// Carries a refund out of the ledger to a participant.
///
/// `pay` runs after the ledger has already zeroed the participant's balance
/// and receives the ledger itself, so a receiver that calls back into the pool
/// sees the post-debit state. Returning `Err` rolls the reclaim back.
pub trait RefundRail {
    fn pay(
        &mut self,
        to: &str,
        amount: Amount,
        ledger: &mut EscrowLedger,
    ) -> Result<(), TransferError>;
}

/// Participant accounts outside the pool, credited exactly by each refund.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Wallets {
    accounts: BTreeMap<ParticipantId, Amount>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, account: &str, amount: Amount) -> Result<(), TransferError> {
        let balance = self.accounts.entry(account.to_string()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(TransferError::Overflow)?;
        Ok(())
    }

    pub fn accounts(&self) -> &BTreeMap<ParticipantId, Amount> {
        &self.accounts
    }
}

impl RefundRail for Wallets {
    fn pay(
        &mut self,
        to: &str,
        amount: Amount,
        _ledger: &mut EscrowLedger,
    ) -> Result<(), TransferError> {
        self.credit(to, amount)
    }
}
