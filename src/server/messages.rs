//! Consensus value types, proposal identifiers, and the replies of the
//! prepare/accept phases.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::server::ReplicaId;

use serde::{Deserialize, Serialize};

/// Proposal identifier type. Unique across the cluster.
pub type ProposalId = u64;

/// Command to the state machine.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Get the value of given key.
    Get { key: String },

    /// Put a new value into key.
    Put { key: String, value: String },

    /// Remove key and its value.
    Delete { key: String },
}

impl Command {
    /// Returns the key this command touches.
    pub fn key(&self) -> &str {
        match self {
            Command::Get { key }
            | Command::Put { key, .. }
            | Command::Delete { key } => key,
        }
    }

    /// Returns true if the command mutates state and must go through
    /// consensus.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Command::Get { .. })
    }
}

/// Command execution result returned by the state machine.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CommandResult {
    /// `Some(value)` if key is found in state machine, else `None`.
    Get { value: Option<String> },

    /// Put has been applied.
    Put,

    /// Delete has been applied (a no-op if the key was absent).
    Delete,
}

/// Identity of one client operation, assigned by the proposer that first
/// takes it on. Unlike a proposal ID it survives value substitution, which
/// lets learners recognize the same operation decided under two IDs.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize,
)]
pub struct DecreeId {
    pub proposer: ReplicaId,
    pub seq: u64,
}

impl fmt::Display for DecreeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.proposer, self.seq)
    }
}

/// The value agreed upon by a Paxos round: a mutating command plus its
/// operation identity.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Decree {
    pub id: DecreeId,
    pub cmd: Command,
}

/// A decree together with the proposal ID under which it was accepted.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Accepted {
    pub id: ProposalId,
    pub decree: Decree,
}

/// Acceptor reply to a prepare request.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PromiseResponse {
    /// True if the promise is granted.
    pub success: bool,

    /// Highest proposal ID the acceptor has promised after handling this
    /// request.
    pub promised_id: ProposalId,

    /// The last decree this acceptor accepted, if any.
    pub accepted: Option<Accepted>,
}

impl PromiseResponse {
    /// Creates a rejection carrying the currently promised ID.
    pub fn reject(promised_id: ProposalId) -> Self {
        PromiseResponse {
            success: false,
            promised_id,
            accepted: None,
        }
    }

    /// True if this acceptor reported a previously accepted decree.
    pub fn has_accepted_value(&self) -> bool {
        self.accepted.is_some()
    }
}

/// Acceptor reply to an accept request.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptResponse {
    /// True if the decree is accepted.
    pub success: bool,

    /// Highest proposal ID the acceptor has promised after handling this
    /// request.
    pub promised_id: ProposalId,
}

/// Generator of proposal IDs in this replica's residue class: replica `i`
/// of `N` hands out `i, i + N, i + 2N, ...`, so no two replicas ever share
/// an ID and each replica's IDs strictly increase.
#[derive(Debug)]
pub struct ProposalIdGen {
    /// Stride between consecutive IDs (cluster population).
    stride: u64,

    /// Next ID to hand out.
    next: AtomicU64,
}

impl ProposalIdGen {
    /// Creates a new generator for replica `me` in a cluster of size
    /// `population`.
    pub fn new(me: ReplicaId, population: u8) -> Self {
        debug_assert!(me < population);
        ProposalIdGen {
            stride: population as u64,
            next: AtomicU64::new(me as u64),
        }
    }

    /// Hands out a fresh proposal ID.
    pub fn next(&self) -> ProposalId {
        self.next.fetch_add(self.stride, Ordering::SeqCst)
    }

    /// Catches up with a promised ID observed at some acceptor: subsequent
    /// IDs will be strictly greater than `seen`. A `seen` too close to
    /// `u64::MAX` to jump past leaves the generator unchanged.
    pub fn observe(&self, seen: ProposalId) {
        let mut cur = self.next.load(Ordering::SeqCst);
        while cur <= seen {
            let steps = (seen - cur) / self.stride + 1;
            let target = match steps
                .checked_mul(self.stride)
                .and_then(|jump| cur.checked_add(jump))
            {
                Some(target) => target,
                None => break,
            };
            match self.next.compare_exchange(
                cur,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }
}
