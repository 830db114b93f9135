//! Length-prefixed TCP object read/write helpers.
//!
//! Every object on the wire is a big-endian `u64` byte length followed by
//! the MessagePack encoding of the object.

use serde::de::DeserializeOwned;
use serde::Serialize;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::utils::PaxstoreError;

/// Upper bound on a single frame, to avoid allocating garbage lengths read
/// from a misbehaving peer.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Sends an object of type `T` through writable connection `conn_write`.
pub(crate) async fn tcp_write_obj<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), PaxstoreError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Receives an object of type `T` from readable connection `conn_read`.
///
/// Not cancellation-safe: callers must drop the connection if this future
/// is abandoned midway.
pub(crate) async fn tcp_read_obj<T, Conn>(
    conn_read: &mut Conn,
) -> Result<T, PaxstoreError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let obj_len = conn_read.read_u64().await?; // receive length first
    if obj_len > MAX_FRAME_LEN {
        return Err(PaxstoreError(format!(
            "frame length {} exceeds limit",
            obj_len
        )));
    }
    let mut obj_buf: Vec<u8> = vec![0; obj_len as usize];
    conn_read.read_exact(&mut obj_buf[..]).await?;
    let obj = decode_from_slice(&obj_buf)?;
    Ok(obj)
}
