//! Client-side functionality modules.

mod apistub;
mod endpoint;

pub use apistub::{ClientApiStub, ClientRecvStub, ClientSendStub};
pub use endpoint::{ClientEndpoint, ClientId};
