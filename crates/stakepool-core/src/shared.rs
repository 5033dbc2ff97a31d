use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    amount::Amount, error::EscrowError, events::DepositEvent, ledger::EscrowLedger,
    refund::RefundRail, snapshot::LedgerSnapshot,
};

/// Cloneable handle that serializes every ledger operation behind one lock.
///
/// Each ledger operation either completes or restores its prior state before
/// returning or unwinding, including when a beneficiary or refund rail
/// panics mid-transfer. A poisoned lock therefore still guards a consistent
/// ledger and is recovered rather than propagated.
#[derive(Clone, Debug)]
pub struct SharedLedger {
    inner: Arc<Mutex<EscrowLedger>>,
}

impl SharedLedger {
    pub fn new(ledger: EscrowLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EscrowLedger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn deposit(&self, participant: &str, amount: Amount) -> Result<DepositEvent, EscrowError> {
        self.lock().deposit(participant, amount)
    }

    pub fn finalize(&self) -> Result<Amount, EscrowError> {
        self.lock().finalize()
    }

    pub fn reclaim(
        &self,
        participant: &str,
        rail: &mut dyn RefundRail,
    ) -> Result<Amount, EscrowError> {
        self.lock().reclaim(participant, rail)
    }

    pub fn time_left(&self) -> u64 {
        self.lock().time_left()
    }

    pub fn balance_of(&self, participant: &str) -> Amount {
        self.lock().balance_of(participant)
    }

    pub fn held(&self) -> Amount {
        self.lock().held()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.lock().snapshot()
    }

    /// Run `f` with exclusive access, for reads that must agree with each
    /// other.
    pub fn with<R>(&self, f: impl FnOnce(&mut EscrowLedger) -> R) -> R {
        f(&mut self.lock())
    }
}
