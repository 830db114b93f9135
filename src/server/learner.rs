//! Paxos learner role: at-most-once application of decided decrees.

use std::collections::HashSet;

use crate::server::{Decree, DecreeId, ProposalId};

/// Record of everything this node has applied. Grows monotonically and is
/// never pruned.
#[derive(Debug, Default)]
pub struct LearnedSet {
    /// Proposal IDs whose decision has been applied.
    proposals: HashSet<ProposalId>,

    /// Operation identities that have been applied. A decree re-decided
    /// under a newer proposal ID after substitution is caught here.
    decrees: HashSet<DecreeId>,
}

impl LearnedSet {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns true if the decision `(id, decree)` has been applied already,
    /// under this or any other proposal ID.
    pub fn contains(&self, id: ProposalId, decree: &Decree) -> bool {
        self.proposals.contains(&id) || self.decrees.contains(&decree.id)
    }

    /// Returns true if the operation `decree_id` has been applied.
    pub fn has_decree(&self, decree_id: &DecreeId) -> bool {
        self.decrees.contains(decree_id)
    }

    /// Records the decision `(id, decree)`. Returns false if it was already
    /// recorded, in which case the caller must not apply it again.
    pub fn record(&mut self, id: ProposalId, decree: &Decree) -> bool {
        if self.contains(id, decree) {
            return false;
        }
        self.proposals.insert(id);
        self.decrees.insert(decree.id);
        true
    }

    /// Number of distinct operations applied.
    pub fn len(&self) -> usize {
        self.decrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decrees.is_empty()
    }
}

#[cfg(test)]
mod learner_tests {
    use super::*;
    use crate::server::Command;

    fn decree(proposer: u8, seq: u64) -> Decree {
        Decree {
            id: DecreeId { proposer, seq },
            cmd: Command::Delete { key: "k".into() },
        }
    }

    #[test]
    fn record_once() {
        let mut learned = LearnedSet::new();
        assert!(learned.is_empty());
        assert!(learned.record(3, &decree(3, 0)));
        assert!(!learned.record(3, &decree(3, 0)));
        assert_eq!(learned.len(), 1);
    }

    #[test]
    fn same_decree_new_proposal() {
        let mut learned = LearnedSet::new();
        assert!(learned.record(3, &decree(3, 0)));
        // substituted and decided again under a higher ID
        assert!(!learned.record(9, &decree(3, 0)));
        assert!(learned.has_decree(&DecreeId {
            proposer: 3,
            seq: 0
        }));
        assert_eq!(learned.len(), 1);
    }

    #[test]
    fn distinct_decrees() {
        let mut learned = LearnedSet::new();
        assert!(learned.record(1, &decree(1, 0)));
        assert!(learned.record(6, &decree(1, 1)));
        assert!(learned.record(2, &decree(2, 0)));
        assert_eq!(learned.len(), 3);
        assert!(!learned.has_decree(&DecreeId {
            proposer: 4,
            seq: 0
        }));
    }
}
