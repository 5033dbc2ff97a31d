//! The escrow state machine.
//!
//! A ledger is `Open` until its deadline, `Expired` after it, and `Completed`
//! once the pool has been forwarded. `Expired` is never stored: it is derived
//! from the clock on every call. `Completed` is absorbing.
//!
//! Guard order per operation:
//!
//! | operation  | checks, first failing wins                      |
//! |------------|-------------------------------------------------|
//! | `deposit`  | deadline, completion, zero amount               |
//! | `finalize` | deadline, completion, threshold                 |
//! | `reclaim`  | completion, deadline, recorded balance          |
//!
//! `finalize` and `reclaim` commit their state change before the outbound
//! transfer and restore it if the transfer fails or panics, so a collaborator
//! observing the ledger mid-transfer sees the post-operation state and a
//! failed call leaves nothing behind. A panic is re-raised after the restore.

use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    amount::Amount,
    beneficiary::Beneficiary,
    clock::{Clock, Timestamp},
    config::EscrowConfig,
    error::{ConfigError, EscrowError, SnapshotError, TransferError},
    events::DepositEvent,
    refund::RefundRail,
    snapshot::LedgerSnapshot,
};

pub type ParticipantId = String;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Open,
    Expired,
    Completed,
}

/// Participant balances. Absent keys read as zero and zeroed entries are
/// dropped, so the map only ever contains live contributions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Balances {
    entries: BTreeMap<ParticipantId, Amount>,
}

impl Balances {
    fn get(&self, participant: &str) -> Amount {
        self.entries.get(participant).copied().unwrap_or(0)
    }

    fn set(&mut self, participant: &str, amount: Amount) {
        if amount == 0 {
            self.entries.remove(participant);
        } else {
            self.entries.insert(participant.to_string(), amount);
        }
    }

    fn total(&self) -> Option<Amount> {
        self.entries
            .values()
            .try_fold(0 as Amount, |acc, v| acc.checked_add(*v))
    }
}

/// Why an outbound transfer did not go through.
enum Failure {
    Rejected(TransferError),
    Panicked(Box<dyn Any + Send>),
}

fn flatten(
    outcome: Result<Result<(), TransferError>, Box<dyn Any + Send>>,
) -> Result<(), Failure> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Failure::Rejected(err)),
        Err(payload) => Err(Failure::Panicked(payload)),
    }
}

pub struct EscrowLedger {
    deadline: Timestamp,
    threshold: Amount,
    completed: bool,
    balances: Balances,
    held: Amount,
    events: Vec<DepositEvent>,
    beneficiary: Box<dyn Beneficiary>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for EscrowLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscrowLedger")
            .field("deadline", &self.deadline)
            .field("threshold", &self.threshold)
            .field("completed", &self.completed)
            .field("held", &self.held)
            .field("balances", &self.balances.entries)
            .field("beneficiary", &self.beneficiary.account())
            .finish_non_exhaustive()
    }
}

impl EscrowLedger {
    /// Create a ledger whose deadline is `config.window_secs` after the
    /// clock's current time.
    pub fn new(
        config: &EscrowConfig,
        beneficiary: impl Beneficiary + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self, ConfigError> {
        let deadline = config.deadline_from(clock.now())?;
        tracing::debug!(deadline, threshold = config.threshold, "escrow ledger created");
        Ok(Self {
            deadline,
            threshold: config.threshold,
            completed: false,
            balances: Balances::default(),
            held: 0,
            events: Vec::new(),
            beneficiary: Box::new(beneficiary),
            clock: Arc::new(clock),
        })
    }

    /// Rebuild a ledger from a persisted snapshot after checking its root,
    /// its accounting invariants, and that the beneficiary agrees on whether
    /// the pool was forwarded.
    pub fn restore(
        snapshot: LedgerSnapshot,
        beneficiary: impl Beneficiary + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self, SnapshotError> {
        snapshot.verify_root()?;
        if snapshot.threshold == 0 {
            return Err(ConfigError::ZeroThreshold.into());
        }

        let mut balances = Balances::default();
        for (participant, amount) in &snapshot.balances {
            balances.set(participant, *amount);
        }
        let recorded = balances.total().ok_or(SnapshotError::Unbalanced {
            held: snapshot.held,
            recorded: Amount::MAX,
        })?;

        if snapshot.completed {
            if snapshot.held != 0 {
                return Err(SnapshotError::CompletedWithFunds(snapshot.held));
            }
            if !beneficiary.completed() {
                return Err(SnapshotError::BeneficiaryMismatch);
            }
        } else {
            if recorded != snapshot.held {
                return Err(SnapshotError::Unbalanced {
                    held: snapshot.held,
                    recorded,
                });
            }
            if beneficiary.completed() {
                return Err(SnapshotError::BeneficiaryMismatch);
            }
        }

        Ok(Self {
            deadline: snapshot.deadline,
            threshold: snapshot.threshold,
            completed: snapshot.completed,
            balances,
            held: snapshot.held,
            events: snapshot.events,
            beneficiary: Box::new(beneficiary),
            clock: Arc::new(clock),
        })
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            deadline: self.deadline,
            threshold: self.threshold,
            completed: self.completed,
            held: self.held,
            balances: self.balances.entries.clone(),
            events: self.events.clone(),
            state_root: [0u8; 32],
        }
        .seal()
    }

    /// Record `amount` for `participant`. The value arrives with the call, so
    /// held funds grow by exactly the same amount.
    pub fn deposit(
        &mut self,
        participant: &str,
        amount: Amount,
    ) -> Result<DepositEvent, EscrowError> {
        let now = self.clock.now();
        if now >= self.deadline {
            return Err(EscrowError::DeadlinePassed);
        }
        if self.completed {
            return Err(EscrowError::AlreadyCompleted);
        }
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        let balance = self
            .balances
            .get(participant)
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow)?;
        let held = self
            .held
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow)?;
        self.balances.set(participant, balance);
        self.held = held;

        let event = DepositEvent {
            participant: participant.to_string(),
            amount,
            at: now,
        };
        tracing::info!(participant, amount, balance, "deposit");
        self.events.push(event.clone());
        Ok(event)
    }

    /// Forward the whole pool to the beneficiary. Returns the amount sent.
    pub fn finalize(&mut self) -> Result<Amount, EscrowError> {
        if self.clock.now() >= self.deadline {
            return Err(EscrowError::DeadlinePassed);
        }
        if self.completed {
            return Err(EscrowError::AlreadyCompleted);
        }
        let pooled = self.total_pooled();
        if pooled < self.threshold {
            return Err(EscrowError::ThresholdNotMet {
                pooled,
                threshold: self.threshold,
            });
        }

        self.completed = true;
        self.held = 0;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.beneficiary.accept_transfer(pooled)
        }));
        if let Err(failure) = flatten(outcome) {
            self.completed = false;
            self.held = pooled;
            let err = match failure {
                Failure::Rejected(err) => err,
                Failure::Panicked(payload) => {
                    tracing::warn!(pooled, "beneficiary panicked, finalize rolled back");
                    panic::resume_unwind(payload)
                }
            };
            tracing::warn!(
                beneficiary = self.beneficiary.account(),
                pooled,
                error = %err,
                "forwarding to beneficiary failed, finalize rolled back"
            );
            return Err(err.into());
        }

        tracing::info!(
            beneficiary = self.beneficiary.account(),
            amount = pooled,
            "pool forwarded"
        );
        Ok(pooled)
    }

    /// Refund `participant`'s whole balance through `rail`. Returns the amount
    /// refunded.
    pub fn reclaim(
        &mut self,
        participant: &str,
        rail: &mut dyn RefundRail,
    ) -> Result<Amount, EscrowError> {
        if self.completed {
            return Err(EscrowError::AlreadyCompleted);
        }
        if self.clock.now() < self.deadline {
            return Err(EscrowError::DeadlineNotReached);
        }
        let amount = self.balances.get(participant);
        if amount == 0 {
            return Err(EscrowError::NoFundsToReclaim {
                participant: participant.to_string(),
            });
        }
        let held = self
            .held
            .checked_sub(amount)
            .ok_or(EscrowError::AmountOverflow)?;

        self.balances.set(participant, 0);
        self.held = held;
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| rail.pay(participant, amount, self)));
        if let Err(failure) = flatten(outcome) {
            // Other participants may have reclaimed through a reentrant call,
            // so restore relative to the current pool rather than a copy.
            self.balances.set(participant, amount);
            self.held = self.held.saturating_add(amount);
            let err = match failure {
                Failure::Rejected(err) => err,
                Failure::Panicked(payload) => {
                    tracing::warn!(
                        participant,
                        amount,
                        "refund rail panicked, reclaim rolled back"
                    );
                    panic::resume_unwind(payload)
                }
            };
            tracing::warn!(participant, amount, error = %err, "refund failed, reclaim rolled back");
            return Err(err.into());
        }

        tracing::info!(participant, amount, "refund");
        Ok(amount)
    }

    /// Seconds until the deadline; zero once it has passed.
    pub fn time_left(&self) -> u64 {
        self.deadline.saturating_sub(self.clock.now())
    }

    pub fn phase(&self) -> Phase {
        if self.completed {
            Phase::Completed
        } else if self.clock.now() >= self.deadline {
            Phase::Expired
        } else {
            Phase::Open
        }
    }

    pub fn balance_of(&self, participant: &str) -> Amount {
        self.balances.get(participant)
    }

    /// Pooled funds, the amount finalize compares against the threshold and
    /// forwards. Zero once the pool has been forwarded.
    pub fn total_pooled(&self) -> Amount {
        self.held
    }

    /// Funds the ledger currently holds.
    pub fn held(&self) -> Amount {
        self.held
    }

    /// Sum of recorded balances. Equals [`held`](Self::held) until the pool
    /// is forwarded; afterwards the records remain but are unspendable.
    pub fn recorded_total(&self) -> Amount {
        self.balances.total().unwrap_or(Amount::MAX)
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn threshold(&self) -> Amount {
        self.threshold
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn beneficiary(&self) -> &dyn Beneficiary {
        self.beneficiary.as_ref()
    }

    pub fn participants(&self) -> impl Iterator<Item = (&str, Amount)> {
        self.balances
            .entries
            .iter()
            .map(|(participant, amount)| (participant.as_str(), *amount))
    }

    pub fn events(&self) -> &[DepositEvent] {
        &self.events
    }

    /// Hand recorded deposit notifications to an external monitor.
    pub fn drain_events(&mut self) -> Vec<DepositEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        amount::UNIT, beneficiary::ExternalContract, clock::ManualClock, error::TransferError,
        refund::Wallets,
    };

    const START: Timestamp = 1_700_000_000;
    const WINDOW: u64 = 120;

    fn ledger() -> (EscrowLedger, ManualClock) {
        let clock = ManualClock::at(START);
        let config = EscrowConfig {
            window_secs: WINDOW,
            threshold: UNIT,
        };
        let ledger =
            EscrowLedger::new(&config, ExternalContract::new("external"), clock.clone()).unwrap();
        (ledger, clock)
    }

    struct RefusingBeneficiary;

    impl Beneficiary for RefusingBeneficiary {
        fn account(&self) -> &str {
            "refusing"
        }

        fn accept_transfer(&mut self, _amount: Amount) -> Result<(), TransferError> {
            Err(TransferError::Rejected("refusing".into()))
        }

        fn completed(&self) -> bool {
            false
        }

        fn held(&self) -> Amount {
            0
        }
    }

    struct RefusingRail;

    impl RefundRail for RefusingRail {
        fn pay(
            &mut self,
            to: &str,
            _amount: Amount,
            _ledger: &mut EscrowLedger,
        ) -> Result<(), TransferError> {
            Err(TransferError::Rejected(to.to_string()))
        }
    }

    struct PanickingBeneficiary;

    impl Beneficiary for PanickingBeneficiary {
        fn account(&self) -> &str {
            "panicking"
        }

        fn accept_transfer(&mut self, _amount: Amount) -> Result<(), TransferError> {
            panic!("beneficiary blew up")
        }

        fn completed(&self) -> bool {
            false
        }

        fn held(&self) -> Amount {
            0
        }
    }

    struct PanickingRail;

    impl RefundRail for PanickingRail {
        fn pay(
            &mut self,
            _to: &str,
            _amount: Amount,
            _ledger: &mut EscrowLedger,
        ) -> Result<(), TransferError> {
            panic!("rail blew up")
        }
    }

    /// Calls back into the ledger before accepting the refund.
    #[derive(Default)]
    struct ReentrantRail {
        received: Amount,
        observed_balance: Option<Amount>,
        observed_held: Option<Amount>,
        reentry: Option<Result<Amount, EscrowError>>,
    }

    impl RefundRail for ReentrantRail {
        fn pay(
            &mut self,
            to: &str,
            amount: Amount,
            ledger: &mut EscrowLedger,
        ) -> Result<(), TransferError> {
            self.observed_balance = Some(ledger.balance_of(to));
            self.observed_held = Some(ledger.held());
            if self.reentry.is_none() {
                let mut inner = Wallets::new();
                self.reentry = Some(ledger.reclaim(to, &mut inner));
            }
            self.received += amount;
            Ok(())
        }
    }

    #[test]
    fn deposit_records_balance_and_held_funds() {
        let (mut ledger, _clock) = ledger();
        let event = ledger.deposit("alice", UNIT / 2).unwrap();
        assert_eq!(event.participant, "alice");
        assert_eq!(event.amount, UNIT / 2);
        assert_eq!(event.at, START);
        assert_eq!(ledger.balance_of("alice"), UNIT / 2);
        assert_eq!(ledger.held(), UNIT / 2);
        ledger.deposit("alice", UNIT / 4).unwrap();
        assert_eq!(ledger.balance_of("alice"), 3 * UNIT / 4);
        assert_eq!(ledger.balance_of("nobody"), 0);
        assert_eq!(ledger.events().len(), 2);
    }

    #[test]
    fn deposit_rejects_zero_and_overflow_without_side_effects() {
        let (mut ledger, _clock) = ledger();
        assert_eq!(ledger.deposit("alice", 0), Err(EscrowError::ZeroAmount));
        ledger.deposit("alice", Amount::MAX).unwrap();
        assert_eq!(ledger.deposit("bob", 1), Err(EscrowError::AmountOverflow));
        assert_eq!(ledger.balance_of("bob"), 0);
        assert_eq!(ledger.held(), Amount::MAX);
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn deadline_error_wins_over_completion_on_deposit() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        ledger.finalize().unwrap();
        assert_eq!(ledger.deposit("alice", 1), Err(EscrowError::AlreadyCompleted));
        clock.advance(WINDOW);
        assert_eq!(ledger.deposit("alice", 1), Err(EscrowError::DeadlinePassed));
    }

    #[test]
    fn deadline_is_exclusive_for_deposits() {
        let (mut ledger, clock) = ledger();
        clock.advance(WINDOW - 1);
        ledger.deposit("alice", 1).unwrap();
        clock.advance(1);
        assert_eq!(ledger.deposit("alice", 1), Err(EscrowError::DeadlinePassed));
    }

    #[test]
    fn finalize_below_threshold_is_rejected() {
        let (mut ledger, _clock) = ledger();
        ledger.deposit("alice", UNIT - 1).unwrap();
        assert_eq!(
            ledger.finalize(),
            Err(EscrowError::ThresholdNotMet {
                pooled: UNIT - 1,
                threshold: UNIT
            })
        );
        assert!(!ledger.is_completed());
        assert_eq!(ledger.held(), UNIT - 1);
    }

    #[test]
    fn finalize_forwards_everything_once() {
        let (mut ledger, _clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        ledger.deposit("bob", UNIT / 2).unwrap();
        assert_eq!(ledger.finalize(), Ok(UNIT + UNIT / 2));
        assert!(ledger.is_completed());
        assert_eq!(ledger.held(), 0);
        assert!(ledger.beneficiary().completed());
        assert_eq!(ledger.beneficiary().held(), UNIT + UNIT / 2);
        assert_eq!(ledger.phase(), Phase::Completed);
        assert_eq!(ledger.finalize(), Err(EscrowError::AlreadyCompleted));
        assert_eq!(ledger.beneficiary().held(), UNIT + UNIT / 2);
    }

    #[test]
    fn finalize_after_deadline_reports_deadline_first() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        clock.advance(WINDOW);
        assert_eq!(ledger.finalize(), Err(EscrowError::DeadlinePassed));
        assert!(!ledger.is_completed());
    }

    #[test]
    fn failed_forwarding_rolls_finalize_back() {
        let clock = ManualClock::at(START);
        let config = EscrowConfig {
            window_secs: WINDOW,
            threshold: UNIT,
        };
        let mut ledger = EscrowLedger::new(&config, RefusingBeneficiary, clock).unwrap();
        ledger.deposit("alice", UNIT).unwrap();
        assert_eq!(
            ledger.finalize(),
            Err(EscrowError::TransferFailed(TransferError::Rejected(
                "refusing".into()
            )))
        );
        assert!(!ledger.is_completed());
        assert_eq!(ledger.held(), UNIT);
        assert_eq!(ledger.phase(), Phase::Open);
        ledger.deposit("bob", 1).unwrap();
    }

    #[test]
    fn reclaim_guards() {
        let (mut ledger, clock) = ledger();
        let mut wallets = Wallets::new();
        ledger.deposit("alice", UNIT).unwrap();
        assert_eq!(
            ledger.reclaim("alice", &mut wallets),
            Err(EscrowError::DeadlineNotReached)
        );
        clock.advance(180);
        assert_eq!(
            ledger.reclaim("bob", &mut wallets),
            Err(EscrowError::NoFundsToReclaim {
                participant: "bob".into()
            })
        );
        assert_eq!(ledger.balance_of("alice"), UNIT);
    }

    #[test]
    fn reclaim_after_completion_is_rejected() {
        let (mut ledger, clock) = ledger();
        let mut wallets = Wallets::new();
        ledger.deposit("alice", UNIT).unwrap();
        ledger.finalize().unwrap();
        clock.advance(180);
        assert_eq!(
            ledger.reclaim("alice", &mut wallets),
            Err(EscrowError::AlreadyCompleted)
        );
        assert_eq!(wallets.balance_of("alice"), 0);
        assert_eq!(ledger.balance_of("alice"), UNIT);
    }

    #[test]
    fn reclaim_refunds_exactly_and_isolates_participants() {
        let (mut ledger, clock) = ledger();
        let mut wallets = Wallets::new();
        ledger.deposit("alice", 300).unwrap();
        ledger.deposit("bob", 200).unwrap();
        clock.advance(WINDOW);
        assert_eq!(ledger.phase(), Phase::Expired);
        assert_eq!(ledger.reclaim("alice", &mut wallets), Ok(300));
        assert_eq!(wallets.balance_of("alice"), 300);
        assert_eq!(ledger.balance_of("alice"), 0);
        assert_eq!(ledger.balance_of("bob"), 200);
        assert_eq!(ledger.held(), 200);
        assert_eq!(
            ledger.reclaim("alice", &mut wallets),
            Err(EscrowError::NoFundsToReclaim {
                participant: "alice".into()
            })
        );
    }

    #[test]
    fn failed_refund_restores_balance() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", 300).unwrap();
        clock.advance(WINDOW);
        let err = ledger.reclaim("alice", &mut RefusingRail).unwrap_err();
        assert!(matches!(err, EscrowError::TransferFailed(_)));
        assert_eq!(ledger.balance_of("alice"), 300);
        assert_eq!(ledger.held(), 300);

        let mut wallets = Wallets::new();
        assert_eq!(ledger.reclaim("alice", &mut wallets), Ok(300));
    }

    #[test]
    fn reentrant_reclaim_sees_zeroed_balance() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("mallory", 500).unwrap();
        ledger.deposit("alice", 100).unwrap();
        clock.advance(WINDOW);

        let mut rail = ReentrantRail::default();
        assert_eq!(ledger.reclaim("mallory", &mut rail), Ok(500));
        assert_eq!(rail.observed_balance, Some(0));
        assert_eq!(rail.observed_held, Some(100));
        assert_eq!(
            rail.reentry,
            Some(Err(EscrowError::NoFundsToReclaim {
                participant: "mallory".into()
            }))
        );
        assert_eq!(rail.received, 500);
        assert_eq!(ledger.held(), 100);
        assert_eq!(ledger.balance_of("alice"), 100);
    }

    #[test]
    fn time_left_counts_down_to_zero() {
        let (ledger, clock) = ledger();
        assert_eq!(ledger.time_left(), WINDOW);
        clock.advance(20);
        assert_eq!(ledger.time_left(), WINDOW - 20);
        clock.advance(180);
        assert_eq!(ledger.time_left(), 0);
        assert_eq!(ledger.phase(), Phase::Expired);
    }

    #[test]
    fn snapshot_restores_equivalent_ledger() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", 300).unwrap();
        ledger.deposit("bob", 200).unwrap();
        let snapshot = ledger.snapshot();

        let beneficiary = ExternalContract::new("external");
        let restored = EscrowLedger::restore(snapshot.clone(), beneficiary, clock).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.balance_of("bob"), 200);
        assert_eq!(restored.deadline(), ledger.deadline());
    }

    #[test]
    fn restore_rejects_unbalanced_snapshots() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", 300).unwrap();
        let mut snapshot = ledger.snapshot();
        snapshot.held = 299;
        let snapshot = snapshot.seal();
        let err = EscrowLedger::restore(snapshot, ExternalContract::new("external"), clock)
            .unwrap_err();
        assert_eq!(
            err,
            SnapshotError::Unbalanced {
                held: 299,
                recorded: 300
            }
        );
    }

    #[test]
    fn restore_requires_completed_beneficiary_for_completed_pool() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        ledger.finalize().unwrap();
        let snapshot = ledger.snapshot();
        let beneficiary = ExternalContract::new("external");
        let err = EscrowLedger::restore(snapshot.clone(), beneficiary, clock.clone()).unwrap_err();
        assert_eq!(err, SnapshotError::BeneficiaryMismatch);

        let mut beneficiary = ExternalContract::new("external");
        beneficiary.accept_transfer(UNIT).unwrap();
        let restored = EscrowLedger::restore(snapshot, beneficiary, clock).unwrap();
        assert!(restored.is_completed());
        assert_eq!(restored.recorded_total(), UNIT);
    }

    #[test]
    fn panicking_beneficiary_leaves_pool_open() {
        let clock = ManualClock::at(START);
        let config = EscrowConfig {
            window_secs: WINDOW,
            threshold: UNIT,
        };
        let mut ledger = EscrowLedger::new(&config, PanickingBeneficiary, clock).unwrap();
        ledger.deposit("alice", UNIT).unwrap();

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| ledger.finalize()));
        assert!(unwound.is_err());
        assert!(!ledger.is_completed());
        assert_eq!(ledger.held(), UNIT);
        assert_eq!(ledger.total_pooled(), UNIT);
        assert_eq!(ledger.phase(), Phase::Open);
        ledger.deposit("bob", 1).unwrap();
        assert_eq!(ledger.held(), UNIT + 1);
    }

    #[test]
    fn panicking_rail_restores_balance() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", 300).unwrap();
        ledger.deposit("bob", 200).unwrap();
        clock.advance(WINDOW);

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            ledger.reclaim("alice", &mut PanickingRail)
        }));
        assert!(unwound.is_err());
        assert_eq!(ledger.balance_of("alice"), 300);
        assert_eq!(ledger.held(), 500);

        let mut wallets = Wallets::new();
        assert_eq!(ledger.reclaim("alice", &mut wallets), Ok(300));
        assert_eq!(wallets.balance_of("alice"), 300);
    }

    #[test]
    fn total_pooled_tracks_open_pool() {
        let (mut ledger, clock) = ledger();
        assert_eq!(ledger.total_pooled(), 0);
        ledger.deposit("alice", 300).unwrap();
        ledger.deposit("bob", 200).unwrap();
        assert_eq!(ledger.total_pooled(), 500);
        assert_eq!(ledger.total_pooled(), ledger.recorded_total());

        clock.advance(WINDOW);
        ledger.reclaim("bob", &mut Wallets::new()).unwrap();
        assert_eq!(ledger.total_pooled(), 300);
    }

    #[test]
    fn total_pooled_is_zero_after_forwarding() {
        let (mut ledger, _clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        ledger.deposit("bob", UNIT).unwrap();
        assert_eq!(ledger.finalize(), Ok(2 * UNIT));
        assert_eq!(ledger.total_pooled(), 0);
        assert_eq!(ledger.recorded_total(), 2 * UNIT);
    }

    #[test]
    fn restore_rejects_open_pool_with_completed_beneficiary() {
        let (mut ledger, clock) = ledger();
        ledger.deposit("alice", UNIT).unwrap();
        let snapshot = ledger.snapshot();

        let mut beneficiary = ExternalContract::new("external");
        beneficiary.accept_transfer(UNIT).unwrap();
        let err = EscrowLedger::restore(snapshot.clone(), beneficiary, clock.clone()).unwrap_err();
        assert_eq!(err, SnapshotError::BeneficiaryMismatch);

        let restored =
            EscrowLedger::restore(snapshot, ExternalContract::new("external"), clock).unwrap();
        assert_eq!(restored.total_pooled(), UNIT);
    }
}
