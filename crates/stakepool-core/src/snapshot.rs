use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    amount::Amount, clock::Timestamp, error::SnapshotError, events::DepositEvent,
    ledger::ParticipantId,
};

/// Serializable copy of a ledger's state, sealed with a SHA-256 root over
/// every field.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub deadline: Timestamp,
    pub threshold: Amount,
    pub completed: bool,
    pub held: Amount,
    pub balances: BTreeMap<ParticipantId, Amount>,
    pub events: Vec<DepositEvent>,
    #[serde(with = "root_hex")]
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    /// Root over the current field values, ignoring `state_root` itself.
    pub fn compute_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> =
            Vec::with_capacity(1 + self.balances.len() + self.events.len());

        let mut hasher = Sha256::new();
        hasher.update(b"params");
        hasher.update(self.deadline.to_le_bytes());
        hasher.update(self.threshold.to_le_bytes());
        hasher.update([u8::from(self.completed)]);
        hasher.update(self.held.to_le_bytes());
        leaves.push(hasher.finalize().into());

        for (participant, amount) in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"balance");
            hasher.update((participant.len() as u64).to_le_bytes());
            hasher.update(participant.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for event in &self.events {
            let mut hasher = Sha256::new();
            hasher.update(b"deposit");
            hasher.update((event.participant.len() as u64).to_le_bytes());
            hasher.update(event.participant.as_bytes());
            hasher.update(event.amount.to_le_bytes());
            hasher.update(event.at.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        fold_root(leaves)
    }

    pub fn seal(mut self) -> Self {
        self.state_root = self.compute_root();
        self
    }

    pub fn verify_root(&self) -> Result<(), SnapshotError> {
        let computed = self.compute_root();
        if computed != self.state_root {
            return Err(SnapshotError::RootMismatch {
                expected: hex::encode(self.state_root),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }

    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

const EMPTY_ROOT_TAG: &[u8] = b"stakepool/empty-ledger";
const NODE_TAG: &[u8] = b"stakepool/node";

/// Fold leaf hashes level by level into one root. Each interior hash commits
/// to its level, and a trailing unpaired hash moves up unchanged.
fn fold_root(leaves: Vec<[u8; 32]>) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = leaves;
    let mut depth: u8 = 0;
    loop {
        match level.as_slice() {
            [] => return Sha256::digest(EMPTY_ROOT_TAG).into(),
            [root] => return *root,
            _ => {}
        }
        depth = depth.wrapping_add(1);
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => join(depth, left, right),
                _ => pair[0],
            })
            .collect();
    }
}

fn join(depth: u8, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(NODE_TAG);
    hasher.update([depth]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

mod root_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}
