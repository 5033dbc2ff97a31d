use serde::{Deserialize, Serialize};

use crate::{amount::Amount, clock::Timestamp, ledger::ParticipantId};

/// Notification recorded for every accepted deposit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositEvent {
    pub participant: ParticipantId,
    pub amount: Amount,
    pub at: Timestamp,
}
