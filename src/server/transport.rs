//! Paxos peer-to-peer TCP transport: a per-replica RPC server and the stubs
//! other replicas use to call it.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::{
    AcceptResponse, Decree, PaxosNode, PaxosRpc, PromiseResponse,
    ProposalId, ReplicaId, ReplicaInfo,
};
use crate::utils::{tcp_read_obj, tcp_write_obj, PaxstoreError};

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Request from one replica to another.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
    Prepare { id: ProposalId },
    Accept { id: ProposalId, decree: Decree },
    Learn { id: ProposalId, decree: Decree },
    IsAlive,
}

/// Reply to a `PeerRequest`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum PeerReply {
    Promise(PromiseResponse),
    Accepted(AcceptResponse),
    Learned,
    Alive,

    /// The callee's acceptor role is currently disabled.
    Unavailable,
}

/// Serves Paxos RPCs from peers against the local node.
pub struct PeerServer {
    /// My replica ID.
    me: ReplicaId,

    /// Sender side of the stop signal.
    tx_stop: Option<watch::Sender<bool>>,

    /// Join handle of the peer acceptor thread.
    peer_acceptor_handle: Option<JoinHandle<()>>,
}

// PeerServer public API implementation
impl PeerServer {
    /// Creates a new peer RPC server.
    pub fn new(me: ReplicaId) -> Self {
        PeerServer {
            me,
            tx_stop: None,
            peer_acceptor_handle: None,
        }
    }

    /// Binds a TCP listener on `bind_addr` and spawns the peer acceptor
    /// thread, which serves every incoming connection against `node`.
    pub async fn setup(
        &mut self,
        bind_addr: SocketAddr,
        node: Arc<PaxosNode>,
    ) -> Result<(), PaxstoreError> {
        if self.peer_acceptor_handle.is_some() {
            return logged_err!(self.me; "setup already done");
        }

        let peer_listener = TcpListener::bind(bind_addr).await?;
        let (tx_stop, rx_stop) = watch::channel(false);
        self.tx_stop = Some(tx_stop);

        self.peer_acceptor_handle =
            Some(tokio::spawn(Self::peer_acceptor_thread(
                self.me,
                peer_listener,
                node,
                rx_stop,
            )));
        Ok(())
    }

    /// Stops accepting peers and closes all open peer connections.
    pub async fn stop(&mut self) -> Result<(), PaxstoreError> {
        if let Some(tx_stop) = self.tx_stop.take() {
            let _ = tx_stop.send(true);
        }
        if let Some(handle) = self.peer_acceptor_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

// PeerServer peer_acceptor thread implementation
impl PeerServer {
    /// Peer acceptor thread function.
    async fn peer_acceptor_thread(
        me: ReplicaId,
        peer_listener: TcpListener,
        node: Arc<PaxosNode>,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "peer_acceptor thread spawned");
        if let Ok(local_addr) = peer_listener.local_addr() {
            pf_info!(me; "accepting peers on '{}'", local_addr);
        }

        let mut servant_handles: Vec<JoinHandle<()>> = vec![];
        loop {
            tokio::select! {
                accepted = peer_listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            pf_trace!(me; "accepted peer connection from {}", addr);
                            servant_handles.retain(|h| !h.is_finished());
                            servant_handles.push(tokio::spawn(
                                Self::peer_servant_thread(
                                    me,
                                    addr,
                                    stream,
                                    node.clone(),
                                    rx_stop.clone(),
                                ),
                            ));
                        }
                        Err(e) => {
                            pf_warn!(me; "error accepting peer connection: {}", e);
                        }
                    }
                },

                _ = rx_stop.changed() => break,
            }
        }

        for handle in servant_handles {
            let _ = handle.await;
        }
        pf_debug!(me; "peer_acceptor thread exited");
    }
}

// PeerServer peer_servant thread implementation
impl PeerServer {
    /// Handles one peer request against the local node.
    fn handle_request(node: &PaxosNode, req: PeerRequest) -> PeerReply {
        match req {
            PeerRequest::Prepare { id } => match node.handle_prepare(id) {
                Ok(resp) => PeerReply::Promise(resp),
                Err(_) => PeerReply::Unavailable,
            },
            PeerRequest::Accept { id, decree } => {
                match node.handle_accept(id, decree) {
                    Ok(resp) => PeerReply::Accepted(resp),
                    Err(_) => PeerReply::Unavailable,
                }
            }
            PeerRequest::Learn { id, decree } => {
                node.handle_learn(id, decree);
                PeerReply::Learned
            }
            PeerRequest::IsAlive => PeerReply::Alive,
        }
    }

    /// Serves requests on one connection, in order, until EOF.
    async fn peer_servant_thread(
        me: ReplicaId,
        addr: SocketAddr,
        mut conn: TcpStream,
        node: Arc<PaxosNode>,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                // on stop the connection is dropped, so a half-read request
                // is never resumed
                req = tcp_read_obj::<PeerRequest, _>(&mut conn) => {
                    let req = match req {
                        Ok(req) => req,
                        Err(_) => break, // peer closed the connection
                    };
                    let reply = Self::handle_request(&node, req);
                    if let Err(e) = tcp_write_obj(&mut conn, &reply).await {
                        pf_debug!(me; "error replying to {}: {}", addr, e);
                        break;
                    }
                },

                _ = rx_stop.changed() => break,
            }
        }
    }
}

/// Client-side handle to a remote replica's Paxos RPCs.
#[derive(Debug, Clone)]
pub struct PeerStub {
    /// My replica ID.
    me: ReplicaId,

    /// The remote replica.
    peer: ReplicaInfo,

    /// Bound on connect plus request plus reply of one call.
    call_timeout: Duration,
}

impl PeerStub {
    pub fn new(me: ReplicaId, peer: ReplicaInfo, call_timeout: Duration) -> Self {
        PeerStub {
            me,
            peer,
            call_timeout,
        }
    }

    /// Issues one request on a fresh connection. Abandoning the returned
    /// future just drops that connection.
    async fn call(&self, req: PeerRequest) -> Result<PeerReply, PaxstoreError> {
        let exchange = async {
            let mut conn =
                TcpStream::connect((self.peer.host(), self.peer.port()))
                    .await?;
            conn.set_nodelay(true)?;
            tcp_write_obj(&mut conn, &req).await?;
            tcp_read_obj::<PeerReply, _>(&mut conn).await
        };

        match time::timeout(self.call_timeout, exchange).await? {
            Ok(PeerReply::Unavailable) => Err(PaxstoreError(format!(
                "peer {} acceptor unavailable",
                self.peer.id()
            ))),
            Ok(reply) => Ok(reply),
            Err(e) => {
                pf_debug!(self.me; "call to peer {} failed: {}", self.peer, e);
                Err(e)
            }
        }
    }

    fn unexpected(&self, reply: PeerReply) -> PaxstoreError {
        PaxstoreError(format!(
            "unexpected reply from peer {}: {:?}",
            self.peer.id(),
            reply
        ))
    }
}

#[async_trait]
impl PaxosRpc for PeerStub {
    async fn prepare(
        &self,
        id: ProposalId,
    ) -> Result<PromiseResponse, PaxstoreError> {
        match self.call(PeerRequest::Prepare { id }).await? {
            PeerReply::Promise(resp) => Ok(resp),
            reply => Err(self.unexpected(reply)),
        }
    }

    async fn accept(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<AcceptResponse, PaxstoreError> {
        match self.call(PeerRequest::Accept { id, decree }).await? {
            PeerReply::Accepted(resp) => Ok(resp),
            reply => Err(self.unexpected(reply)),
        }
    }

    async fn learn(
        &self,
        id: ProposalId,
        decree: Decree,
    ) -> Result<(), PaxstoreError> {
        match self.call(PeerRequest::Learn { id, decree }).await? {
            PeerReply::Learned => Ok(()),
            reply => Err(self.unexpected(reply)),
        }
    }

    async fn is_alive(&self) -> Result<bool, PaxstoreError> {
        match self.call(PeerRequest::IsAlive).await? {
            PeerReply::Alive => Ok(true),
            reply => Err(self.unexpected(reply)),
        }
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;
    use crate::server::{Command, DecreeId, FaultSwitch};

    fn decree() -> Decree {
        Decree {
            id: DecreeId {
                proposer: 1,
                seq: 0,
            },
            cmd: Command::Put {
                key: "Jose".into(),
                value: "180".into(),
            },
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_calls() -> Result<(), PaxstoreError> {
        let switch = FaultSwitch::new();
        let node = Arc::new(PaxosNode::new(0, Arc::new(switch.clone())));
        let mut server = PeerServer::new(0);
        server.setup("127.0.0.1:53800".parse()?, node.clone()).await?;

        let stub = PeerStub::new(
            1,
            ReplicaInfo::new(0, "127.0.0.1", 53800),
            Duration::from_secs(2),
        );
        assert!(stub.is_alive().await?);

        let resp = stub.prepare(6).await?;
        assert!(resp.success);
        assert_eq!(resp.promised_id, 6);
        assert!(!resp.has_accepted_value());

        assert!(stub.accept(6, decree()).await?.success);
        let resp = stub.prepare(1).await?;
        assert!(!resp.success);
        assert_eq!(resp.promised_id, 6);

        stub.learn(6, decree()).await?;
        assert_eq!(node.read("Jose"), Some("180".into()));

        // disabled acceptor surfaces as an error, liveness unaffected
        switch.disable();
        assert!(stub.prepare(11).await.is_err());
        assert!(stub.accept(11, decree()).await.is_err());
        assert!(stub.is_alive().await?);

        server.stop().await?;
        assert!(stub.is_alive().await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_peer() -> Result<(), PaxstoreError> {
        let stub = PeerStub::new(
            0,
            ReplicaInfo::new(4, "127.0.0.1", 53809),
            Duration::from_millis(500),
        );
        assert!(stub.prepare(3).await.is_err());
        assert!(stub.is_alive().await.is_err());
        Ok(())
    }
}
