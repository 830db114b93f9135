//! Client-facing external API module implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::client::ClientId;
use crate::server::{Command, CommandResult, KvStore, ReplicaId};
use crate::utils::{tcp_read_obj, tcp_write_obj, PaxstoreError};

use serde::{Deserialize, Serialize};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// External API request ID type.
pub type RequestId = u64;

/// Request received from client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Regular request.
    Req {
        /// Client request ID.
        id: RequestId,

        /// Command to be executed, through consensus if it mutates.
        cmd: Command,
    },

    /// Client leave notification.
    Leave,
}

/// Reply back to client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiReply {
    /// Reply to regular request.
    Reply {
        /// ID of the corresponding client request.
        id: RequestId,

        /// Command result, or `None` if unsuccessful.
        result: Option<CommandResult>,

        /// Reason of failure if unsuccessful.
        error: Option<String>,
    },

    /// Reply to client leave notification.
    Leave,
}

impl ApiReply {
    /// Builds the reply to request `id` from the outcome of executing it.
    pub fn from_outcome(
        id: RequestId,
        outcome: Result<CommandResult, PaxstoreError>,
    ) -> Self {
        match outcome {
            Ok(result) => ApiReply::Reply {
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => ApiReply::Reply {
                id,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// The external client-facing API module.
pub struct ExternalApi {
    /// My replica ID.
    me: ReplicaId,

    /// Sender side of the stop signal.
    tx_stop: Option<watch::Sender<bool>>,

    /// Join handle of the client acceptor thread.
    client_acceptor_handle: Option<JoinHandle<()>>,
}

// ExternalApi public API implementation
impl ExternalApi {
    /// Creates a new external API module.
    pub fn new(me: ReplicaId) -> Self {
        ExternalApi {
            me,
            tx_stop: None,
            client_acceptor_handle: None,
        }
    }

    /// Creates a TCP listener for client connections on `api_addr` and
    /// spawns the client acceptor thread. Every client connection is served
    /// by its own servant thread against `store`.
    pub async fn setup(
        &mut self,
        api_addr: SocketAddr,
        store: Arc<KvStore>,
    ) -> Result<(), PaxstoreError> {
        if self.client_acceptor_handle.is_some() {
            return logged_err!(self.me; "setup already done");
        }

        let client_listener = TcpListener::bind(api_addr).await?;
        let (tx_stop, rx_stop) = watch::channel(false);
        self.tx_stop = Some(tx_stop);

        self.client_acceptor_handle =
            Some(tokio::spawn(Self::client_acceptor_thread(
                self.me,
                client_listener,
                store,
                rx_stop,
            )));
        Ok(())
    }

    /// Stops accepting clients and drops all client connections.
    pub async fn stop(&mut self) -> Result<(), PaxstoreError> {
        if let Some(tx_stop) = self.tx_stop.take() {
            let _ = tx_stop.send(true);
        }
        if let Some(handle) = self.client_acceptor_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

// ExternalApi client_acceptor thread implementation
impl ExternalApi {
    /// Client acceptor thread function.
    async fn client_acceptor_thread(
        me: ReplicaId,
        client_listener: TcpListener,
        store: Arc<KvStore>,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "client_acceptor thread spawned");
        if let Ok(local_addr) = client_listener.local_addr() {
            pf_info!(me; "accepting clients on '{}'", local_addr);
        }

        let mut client_servant_handles: Vec<JoinHandle<()>> = vec![];
        loop {
            tokio::select! {
                accepted = client_listener.accept() => {
                    let (mut stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pf_warn!(me; "error accepting client connection: {}", e);
                            continue;
                        }
                    };

                    let id = match stream.read_u64().await {
                        Ok(id) => id, // receive client ID
                        Err(e) => {
                            pf_error!(me; "error receiving new client ID: {}", e);
                            continue;
                        }
                    };
                    pf_info!(me; "accepted new client {}", id);

                    client_servant_handles.retain(|h| !h.is_finished());
                    client_servant_handles.push(tokio::spawn(
                        Self::client_servant_thread(
                            me,
                            id,
                            addr,
                            stream,
                            store.clone(),
                            rx_stop.clone(),
                        ),
                    ));
                },

                _ = rx_stop.changed() => break,
            }
        }

        for handle in client_servant_handles {
            let _ = handle.await;
        }
        pf_debug!(me; "client_acceptor thread exited");
    }
}

// ExternalApi client_servant thread implementation
impl ExternalApi {
    /// Client request handler thread function. Requests on one connection
    /// are served in order.
    async fn client_servant_thread(
        me: ReplicaId,
        id: ClientId,
        addr: SocketAddr,
        mut conn: TcpStream,
        store: Arc<KvStore>,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "client_servant thread for {} ({}) spawned", id, addr);

        loop {
            let req = tokio::select! {
                req = tcp_read_obj::<ApiRequest, _>(&mut conn) => req,
                _ = rx_stop.changed() => break,
            };

            match req {
                // client leaving, send dummy reply and break
                Ok(ApiRequest::Leave) => {
                    if let Err(e) = tcp_write_obj(&mut conn, &ApiReply::Leave).await {
                        pf_error!(me; "error replying to {}: {}", id, e);
                    } else {
                        pf_info!(me; "client {} has left", id);
                    }
                    break;
                }

                Ok(ApiRequest::Req { id: req_id, cmd }) => {
                    pf_trace!(me; "request {} from {}: {:?}", req_id, id, cmd);
                    let reply =
                        ApiReply::from_outcome(req_id, store.execute(cmd).await);
                    if let Err(e) = tcp_write_obj(&mut conn, &reply).await {
                        pf_error!(me; "error replying to {}: {}", id, e);
                        break;
                    }
                }

                Err(e) => {
                    pf_debug!(me; "error reading request from {}: {}", id, e);
                    break; // probably the client exited without `leave()`
                }
            }
        }

        pf_debug!(me; "client_servant thread for {} ({}) exited", id, addr);
    }
}

#[cfg(test)]
mod external_tests {
    use super::*;
    use crate::client::ClientApiStub;
    use crate::server::{FaultSwitch, PaxosNode, Proposer, ReplicaConfig};

    async fn single_replica_api(
        addr: &str,
    ) -> Result<ExternalApi, PaxstoreError> {
        let node = Arc::new(PaxosNode::new(0, Arc::new(FaultSwitch::new())));
        let proposer = Proposer::new(
            node.clone(),
            vec![],
            &ReplicaConfig {
                inject_faults: false,
                ..Default::default()
            },
        )?;
        let store = Arc::new(KvStore::new(node, Arc::new(proposer)));
        let mut api = ExternalApi::new(0);
        api.setup(addr.parse()?, store).await?;
        Ok(api)
    }

    #[test]
    fn reply_from_outcome() {
        assert_eq!(
            ApiReply::from_outcome(3, Ok(CommandResult::Put)),
            ApiReply::Reply {
                id: 3,
                result: Some(CommandResult::Put),
                error: None,
            }
        );
        assert_eq!(
            ApiReply::from_outcome(
                4,
                Err(PaxstoreError::msg("failed to reach consensus"))
            ),
            ApiReply::Reply {
                id: 4,
                result: None,
                error: Some("failed to reach consensus".into()),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn api_setup_twice() -> Result<(), PaxstoreError> {
        let mut api = single_replica_api("127.0.0.1:53700").await?;
        let node = Arc::new(PaxosNode::new(0, Arc::new(FaultSwitch::new())));
        let proposer = Proposer::new(node.clone(), vec![], &Default::default())?;
        let store = Arc::new(KvStore::new(node, Arc::new(proposer)));
        assert!(api.setup("127.0.0.1:53701".parse()?, store).await.is_err());
        api.stop().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn api_req_reply() -> Result<(), PaxstoreError> {
        let mut api = single_replica_api("127.0.0.1:53710").await?;
        let api_stub = ClientApiStub::new(2857);
        let (mut send_stub, mut recv_stub) =
            api_stub.connect("127.0.0.1:53710".parse()?).await?;

        send_stub
            .send_req(&ApiRequest::Req {
                id: 0,
                cmd: Command::Put {
                    key: "Jose".into(),
                    value: "123".into(),
                },
            })
            .await?;
        send_stub
            .send_req(&ApiRequest::Req {
                id: 1,
                cmd: Command::Get { key: "Jose".into() },
            })
            .await?;
        send_stub
            .send_req(&ApiRequest::Req {
                id: 2,
                cmd: Command::Delete { key: "".into() },
            })
            .await?;
        assert_eq!(
            recv_stub.recv_reply().await?,
            ApiReply::Reply {
                id: 0,
                result: Some(CommandResult::Put),
                error: None,
            }
        );
        assert_eq!(
            recv_stub.recv_reply().await?,
            ApiReply::Reply {
                id: 1,
                result: Some(CommandResult::Get {
                    value: Some("123".into())
                }),
                error: None,
            }
        );
        assert_eq!(
            recv_stub.recv_reply().await?,
            ApiReply::Reply {
                id: 2,
                result: None,
                error: Some("empty key".into()),
            }
        );

        send_stub.send_req(&ApiRequest::Leave).await?;
        assert_eq!(recv_stub.recv_reply().await?, ApiReply::Leave);
        api.stop().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn api_client_rejoin() -> Result<(), PaxstoreError> {
        let mut api = single_replica_api("127.0.0.1:53720").await?;
        let api_stub = ClientApiStub::new(77);
        let (mut send_stub, mut recv_stub) =
            api_stub.connect("127.0.0.1:53720".parse()?).await?;
        send_stub
            .send_req(&ApiRequest::Req {
                id: 0,
                cmd: Command::Put {
                    key: "Jose".into(),
                    value: "123".into(),
                },
            })
            .await?;
        recv_stub.recv_reply().await?;
        send_stub.send_req(&ApiRequest::Leave).await?;
        assert_eq!(recv_stub.recv_reply().await?, ApiReply::Leave);

        let (mut send_stub, mut recv_stub) =
            api_stub.connect("127.0.0.1:53720".parse()?).await?;
        send_stub
            .send_req(&ApiRequest::Req {
                id: 1,
                cmd: Command::Get { key: "Jose".into() },
            })
            .await?;
        assert_eq!(
            recv_stub.recv_reply().await?,
            ApiReply::Reply {
                id: 1,
                result: Some(CommandResult::Get {
                    value: Some("123".into())
                }),
                error: None,
            }
        );
        api.stop().await?;
        Ok(())
    }
}
