//! Paxstore: a key-value store replicated over a fixed set of servers, with
//! every mutation agreed upon through single-decree Paxos.

#[macro_use]
mod utils;

pub mod client;
pub mod server;

pub use utils::{logger_init, Bitmap, PaxstoreError};

pub use server::{
    ApiReply, ApiRequest, Command, CommandResult, KvStore, PaxosReplica,
    ReplicaConfig, ReplicaDirectory, ReplicaId, RequestId,
};

pub use client::{ClientEndpoint, ClientId};
