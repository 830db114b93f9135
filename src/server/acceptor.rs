//! Paxos acceptor role: the per-node promise/accept record.

use crate::server::{
    AcceptResponse, Accepted, Decree, PromiseResponse, ProposalId,
};

/// Acceptor state of one node. Only the most recently accepted decree is
/// kept; there is no per-slot log.
///
/// Invariant: `accepted.id <= promised_id` whenever `accepted` is set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcceptorState {
    /// Highest proposal ID promised so far.
    promised_id: ProposalId,

    /// Last accepted decree and the proposal ID it was accepted under.
    accepted: Option<Accepted>,
}

impl AcceptorState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn promised_id(&self) -> ProposalId {
        self.promised_id
    }

    pub fn accepted(&self) -> Option<&Accepted> {
        self.accepted.as_ref()
    }

    /// Phase 1b. Rejects (leaving state untouched) if a higher ID has been
    /// promised; otherwise promises `id` and reports the last accepted
    /// decree.
    pub fn prepare(&mut self, id: ProposalId) -> PromiseResponse {
        if id < self.promised_id {
            return PromiseResponse::reject(self.promised_id);
        }

        self.promised_id = id;
        PromiseResponse {
            success: true,
            promised_id: self.promised_id,
            accepted: self.accepted.clone(),
        }
    }

    /// Phase 2b. Rejects (leaving state untouched) if a higher ID has been
    /// promised; otherwise records `decree` as accepted under `id`. An equal
    /// ID passes, since it is the one promised in phase 1.
    pub fn accept(&mut self, id: ProposalId, decree: Decree) -> AcceptResponse {
        if id < self.promised_id {
            return AcceptResponse {
                success: false,
                promised_id: self.promised_id,
            };
        }

        self.promised_id = id;
        self.accepted = Some(Accepted { id, decree });
        AcceptResponse {
            success: true,
            promised_id: self.promised_id,
        }
    }

    /// Frees the accepted slot once a decision with ID `decided_id` has been
    /// learned, so the next operation does not inherit a closed round's
    /// value. A decree accepted under a higher ID belongs to a newer round
    /// and is kept. Returns true if something was cleared.
    pub fn close_round(&mut self, decided_id: ProposalId) -> bool {
        match self.accepted {
            Some(ref acc) if acc.id <= decided_id => {
                self.accepted = None;
                true
            }
            _ => false,
        }
    }
}
