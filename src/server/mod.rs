//! Server-side functionality modules: the Paxos roles, the peer transport,
//! the client-facing API, and the replica that wires them together.

mod directory;
mod messages;
mod acceptor;
mod learner;
mod statemach;
mod faults;
mod rpc;
mod transport;
mod proposer;
mod facade;
mod external;
mod replica;

pub use directory::{ReplicaDirectory, ReplicaId, ReplicaInfo};
pub use messages::{
    AcceptResponse, Accepted, Command, CommandResult, Decree, DecreeId,
    PromiseResponse, ProposalId, ProposalIdGen,
};
pub use acceptor::AcceptorState;
pub use learner::LearnedSet;
pub use statemach::StateMachine;
pub use faults::{AcceptorGate, FaultInjector, FaultSchedule, FaultSwitch};
pub use rpc::{PaxosNode, PaxosRpc};
pub use transport::{PeerReply, PeerRequest, PeerServer, PeerStub};
pub use proposer::Proposer;
pub use facade::KvStore;
pub use external::{ApiReply, ApiRequest, ExternalApi, RequestId};
pub use replica::{PaxosReplica, ReplicaConfig};
