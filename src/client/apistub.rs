//! Client API communication stub implementation.

use std::net::SocketAddr;

use crate::client::ClientId;
use crate::server::{ApiReply, ApiRequest};
use crate::utils::{tcp_read_obj, tcp_write_obj, PaxstoreError};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Client API connection stub.
pub struct ClientApiStub {
    /// My client ID.
    id: ClientId,
}

impl ClientApiStub {
    /// Creates a new API connection stub.
    pub fn new(id: ClientId) -> Self {
        ClientApiStub { id }
    }

    /// Connects to the given server address, returning a split pair of owned
    /// read/write halves on success.
    pub async fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<(ClientSendStub, ClientRecvStub), PaxstoreError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_u64(self.id).await?; // send my client ID

        let (read_half, write_half) = stream.into_split();
        Ok((
            ClientSendStub {
                conn_write: write_half,
            },
            ClientRecvStub {
                conn_read: read_half,
            },
        ))
    }
}

/// Client write stub that owns a TCP write half.
pub struct ClientSendStub {
    /// Write-half split of the TCP connection stream.
    conn_write: OwnedWriteHalf,
}

impl ClientSendStub {
    /// Sends a request to established server connection.
    pub async fn send_req(
        &mut self,
        req: &ApiRequest,
    ) -> Result<(), PaxstoreError> {
        tcp_write_obj(&mut self.conn_write, req).await
    }
}

/// Client read stub that owns a TCP read half.
pub struct ClientRecvStub {
    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,
}

impl ClientRecvStub {
    /// Receives a reply from established server connection.
    pub async fn recv_reply(&mut self) -> Result<ApiReply, PaxstoreError> {
        tcp_read_obj(&mut self.conn_read).await
    }
}
