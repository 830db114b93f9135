//! Node-to-node Paxos RPC surface, and the local node that serves it.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::server::{
    AcceptResponse, AcceptorGate, AcceptorState, Decree, DecreeId,
    LearnedSet, PromiseResponse, ProposalId, ReplicaId, StateMachine,
};
use crate::utils::PaxstoreError;

use async_trait::async_trait;

/// The four Paxos calls one node makes on another. `Err` means the callee
/// is unavailable (unreachable, timed out, or its acceptor is disabled);
/// a protocol-level rejection is an `Ok` reply with `success == false`.
#[async_trait]
pub trait PaxosRpc: Send + Sync {
    /// Phase 1a: asks the callee to promise proposal `id`.
    async fn prepare(
        &self,
        id: ProposalId,
    ) -> Result<PromiseResponse, PaxstoreError>;

    /// Phase 2a: asks the callee to accept `decree` under proposal `id`.
    async fn accept(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<AcceptResponse, PaxstoreError>;

    /// Announces that `decree` was decided under proposal `id`.
    async fn learn(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<(), PaxstoreError>;

    /// Liveness check.
    async fn is_alive(&self) -> Result<bool, PaxstoreError>;
}

/// Everything guarded by the node lock.
#[derive(Debug, Default)]
struct NodeCore {
    acceptor: AcceptorState,
    learned: LearnedSet,
    statemach: StateMachine,
}

/// One replica's consensus participant: acceptor and learner roles over the
/// local state machine. All mutable state sits behind a single lock, so
/// concurrent RPCs against this node are linearized and reads always see a
/// fully applied state.
#[derive(Debug)]
pub struct PaxosNode {
    /// My replica ID.
    me: ReplicaId,

    /// Acceptor state, learned set, and state machine.
    core: Mutex<NodeCore>,

    /// Availability of the acceptor role.
    gate: Arc<dyn AcceptorGate>,
}

impl PaxosNode {
    /// Creates a new node whose acceptor availability follows `gate`.
    pub fn new(me: ReplicaId, gate: Arc<dyn AcceptorGate>) -> Self {
        PaxosNode {
            me,
            core: Mutex::new(NodeCore::default()),
            gate,
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.me
    }

    /// Locks the node core, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, NodeCore> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), PaxstoreError> {
        if self.gate.is_enabled() {
            Ok(())
        } else {
            Err(PaxstoreError(format!(
                "acceptor {} unavailable",
                self.me
            )))
        }
    }

    /// Handles a prepare request locally.
    pub fn handle_prepare(
        &self,
        id: ProposalId,
    ) -> Result<PromiseResponse, PaxstoreError> {
        self.check_available()?;
        let resp = self.lock().acceptor.prepare(id);
        if resp.success {
            pf_trace!(self.me; "promised {}", id);
        } else {
            pf_debug!(self.me; "rejected prepare {} < {}", id, resp.promised_id);
        }
        Ok(resp)
    }

    /// Handles an accept request locally.
    pub fn handle_accept(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<AcceptResponse, PaxstoreError> {
        self.check_available()?;
        let resp = self.lock().acceptor.accept(id, decree);
        if resp.success {
            pf_trace!(self.me; "accepted under {}", id);
        } else {
            pf_debug!(self.me; "rejected accept {} < {}", id, resp.promised_id);
        }
        Ok(resp)
    }

    /// Applies a decided decree, at most once per operation. Always closes
    /// the round the decision belongs to. Returns true if the decree was
    /// newly applied.
    pub fn handle_learn(&self, id: ProposalId, decree: Decree) -> bool {
        let mut core = self.lock();
        core.acceptor.close_round(id);
        if !core.learned.record(id, &decree) {
            pf_trace!(self.me; "already learned {} under {}", decree.id, id);
            return false;
        }
        core.statemach.execute(&decree.cmd);
        pf_debug!(self.me; "learned {} under {}: {:?}", decree.id, id, decree.cmd);
        true
    }

    /// Reads a key from the local state machine.
    pub fn read(&self, key: &str) -> Option<String> {
        self.lock().statemach.get(key)
    }

    /// Returns true if the operation `decree_id` has been applied here.
    pub fn has_learned(&self, decree_id: &DecreeId) -> bool {
        self.lock().learned.has_decree(decree_id)
    }

    /// Number of distinct operations applied here.
    pub fn num_learned(&self) -> usize {
        self.lock().learned.len()
    }

    /// Snapshot of the acceptor state.
    pub fn acceptor_state(&self) -> AcceptorState {
        self.lock().acceptor.clone()
    }
}

#[async_trait]
impl PaxosRpc for PaxosNode {
    async fn prepare(
        &self,
        id: ProposalId,
    ) -> Result<PromiseResponse, PaxstoreError> {
        self.handle_prepare(id)
    }

    async fn accept(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<AcceptResponse, PaxstoreError> {
        self.handle_accept(id, decree)
    }

    async fn learn(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<(), PaxstoreError> {
        self.handle_learn(id, decree);
        Ok(())
    }

    async fn is_alive(&self) -> Result<bool, PaxstoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod rpc_tests {
    use super::*;
    use crate::server::{Command, FaultSwitch};

    fn put(proposer: ReplicaId, seq: u64, key: &str, value: &str) -> Decree {
        Decree {
            id: DecreeId { proposer, seq },
            cmd: Command::Put {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    #[tokio::test]
    async fn gate_blocks_acceptor_only() -> Result<(), PaxstoreError> {
        let switch = FaultSwitch::new();
        let node = PaxosNode::new(0, Arc::new(switch.clone()));
        switch.disable();
        assert!(node.prepare(5).await.is_err());
        assert!(node.accept(5, put(0, 0, "k", "v")).await.is_err());
        assert!(node.is_alive().await?);
        node.learn(5, put(0, 0, "k", "v")).await?;
        assert_eq!(node.read("k"), Some("v".into()));
        switch.enable();
        assert!(node.prepare(5).await?.success);
        Ok(())
    }

    #[test]
    fn learn_applies_once() {
        let node = PaxosNode::new(1, Arc::new(FaultSwitch::new()));
        assert!(node.handle_learn(6, put(1, 0, "k", "a")));
        // later overwrite by another operation
        assert!(node.handle_learn(11, put(1, 1, "k", "b")));
        // re-delivery of the first decision under its old and a new ID
        assert!(!node.handle_learn(6, put(1, 0, "k", "a")));
        assert!(!node.handle_learn(16, put(1, 0, "k", "a")));
        assert_eq!(node.read("k"), Some("b".into()));
        assert_eq!(node.num_learned(), 2);
        assert!(node.has_learned(&DecreeId {
            proposer: 1,
            seq: 0
        }));
    }

    #[test]
    fn learn_closes_round() -> Result<(), PaxstoreError> {
        let node = PaxosNode::new(2, Arc::new(FaultSwitch::new()));
        assert!(node.handle_prepare(7)?.success);
        assert!(node.handle_accept(7, put(2, 0, "k", "v"))?.success);
        node.handle_learn(7, put(2, 0, "k", "v"));
        let state = node.acceptor_state();
        assert!(state.accepted().is_none());
        assert_eq!(state.promised_id(), 7);
        // next operation starts with a free slot
        let resp = node.handle_prepare(12)?;
        assert!(resp.success);
        assert!(!resp.has_accepted_value());
        Ok(())
    }

    #[test]
    fn stale_proposals_rejected() -> Result<(), PaxstoreError> {
        let node = PaxosNode::new(0, Arc::new(FaultSwitch::new()));
        assert!(node.handle_prepare(10)?.success);
        let resp = node.handle_prepare(5)?;
        assert!(!resp.success);
        assert_eq!(resp.promised_id, 10);
        let resp = node.handle_accept(5, put(0, 0, "k", "v"))?;
        assert!(!resp.success);
        assert_eq!(resp.promised_id, 10);
        assert!(node.acceptor_state().accepted().is_none());
        Ok(())
    }
}
