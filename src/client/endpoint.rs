//! Client endpoint talking to any one replica of the cluster.

use std::net::SocketAddr;

use crate::client::{ClientApiStub, ClientRecvStub, ClientSendStub};
use crate::server::{ApiReply, ApiRequest, Command, CommandResult, RequestId};
use crate::utils::PaxstoreError;

use rand::seq::SliceRandom;

use tokio::time::{self, Duration};

/// Client stub ID type.
pub type ClientId = u64;

/// Client endpoint. Every replica can serve every request, so the endpoint
/// sticks to one randomly chosen server and moves on to another one when
/// that connection breaks.
pub struct ClientEndpoint {
    /// My client ID.
    id: ClientId,

    /// API addresses of all servers.
    servers: Vec<SocketAddr>,

    /// API connection stub.
    api_stub: ClientApiStub,

    /// Currently connected server and the two halves of its connection.
    conn: Option<(SocketAddr, ClientSendStub, ClientRecvStub)>,

    /// ID of my next request.
    next_req: RequestId,

    /// Bound on connecting to a server and on waiting for one reply.
    timeout: Duration,
}

impl ClientEndpoint {
    /// Creates a new endpoint over the given server API addresses. Does not
    /// connect yet.
    pub fn new(
        id: ClientId,
        servers: Vec<SocketAddr>,
        timeout: Duration,
    ) -> Result<Self, PaxstoreError> {
        if servers.is_empty() {
            return logged_err!(id; "empty server list");
        }
        Ok(ClientEndpoint {
            id,
            servers,
            api_stub: ClientApiStub::new(id),
            conn: None,
            next_req: 0,
            timeout,
        })
    }

    /// Gets my client ID.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Currently connected server, if any.
    pub fn server(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|(addr, _, _)| *addr)
    }

    /// Connects to a server, trying all of them in random order. Returns
    /// the address of the one connected to.
    pub async fn connect(&mut self) -> Result<SocketAddr, PaxstoreError> {
        let mut candidates = self.servers.clone();
        candidates.shuffle(&mut rand::thread_rng());

        for addr in candidates {
            match time::timeout(self.timeout, self.api_stub.connect(addr)).await
            {
                Ok(Ok((send_stub, recv_stub))) => {
                    pf_debug!(self.id; "connected to server '{}'", addr);
                    self.conn = Some((addr, send_stub, recv_stub));
                    return Ok(addr);
                }
                Ok(Err(e)) => {
                    pf_warn!(self.id; "could not connect to '{}': {}", addr, e)
                }
                Err(_) => {
                    pf_warn!(self.id; "could not connect to '{}': timed out", addr)
                }
            }
        }

        logged_err!(self.id; "could not connect to any server")
    }

    /// Leaves the current server, if connected.
    pub async fn leave(&mut self) -> Result<(), PaxstoreError> {
        if let Some((addr, mut send_stub, mut recv_stub)) = self.conn.take() {
            send_stub.send_req(&ApiRequest::Leave).await?;
            loop {
                let reply =
                    time::timeout(self.timeout, recv_stub.recv_reply()).await??;
                if reply == ApiReply::Leave {
                    break;
                }
            }
            pf_debug!(self.id; "left server '{}'", addr);
        }
        Ok(())
    }

    /// Issues a command and waits for its result. On a broken connection
    /// or a missing reply, retries on another server, trying each server at
    /// most once. A failed command (e.g., no consensus) is returned as an
    /// error without retrying.
    pub async fn request(
        &mut self,
        cmd: Command,
    ) -> Result<CommandResult, PaxstoreError> {
        let req_id = self.next_req;
        self.next_req += 1;
        let req = ApiRequest::Req { id: req_id, cmd };

        for _ in 0..self.servers.len() {
            if self.conn.is_none() {
                self.connect().await?;
            }

            match self.exchange(req_id, &req).await {
                Ok(ApiReply::Reply {
                    result: Some(result),
                    ..
                }) => return Ok(result),
                Ok(ApiReply::Reply { error, .. }) => {
                    return Err(PaxstoreError(
                        error.unwrap_or_else(|| "request failed".into()),
                    ));
                }
                Ok(ApiReply::Leave) => {
                    return logged_err!(self.id; "unexpected leave reply");
                }
                Err(e) => {
                    if let Some(addr) = self.server() {
                        pf_warn!(self.id; "request {} failed on '{}': {}",
                                          req_id, addr, e);
                    }
                    self.conn = None;
                }
            }
        }

        logged_err!(self.id; "request {} failed on every server", req_id)
    }

    /// Sends `req` on the current connection and waits for the reply with
    /// matching ID.
    async fn exchange(
        &mut self,
        req_id: RequestId,
        req: &ApiRequest,
    ) -> Result<ApiReply, PaxstoreError> {
        let (_, send_stub, recv_stub) = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(PaxstoreError::msg("not connected")),
        };

        send_stub.send_req(req).await?;
        loop {
            let reply =
                time::timeout(self.timeout, recv_stub.recv_reply()).await??;
            match reply {
                ApiReply::Reply { id, .. } if id != req_id => continue,
                reply => return Ok(reply),
            }
        }
    }

    /// Reads the value of `key` from the connected server.
    pub async fn get(
        &mut self,
        key: &str,
    ) -> Result<Option<String>, PaxstoreError> {
        match self.request(Command::Get { key: key.into() }).await? {
            CommandResult::Get { value } => Ok(value),
            result => logged_err!(self.id; "unexpected result {:?}", result),
        }
    }

    /// Replicates `key = value`.
    pub async fn put(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), PaxstoreError> {
        match self
            .request(Command::Put {
                key: key.into(),
                value: value.into(),
            })
            .await?
        {
            CommandResult::Put => Ok(()),
            result => logged_err!(self.id; "unexpected result {:?}", result),
        }
    }

    /// Replicates removal of `key`.
    pub async fn delete(&mut self, key: &str) -> Result<(), PaxstoreError> {
        match self.request(Command::Delete { key: key.into() }).await? {
            CommandResult::Delete => Ok(()),
            result => logged_err!(self.id; "unexpected result {:?}", result),
        }
    }
}
