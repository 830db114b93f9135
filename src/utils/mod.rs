//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod bitmap;
mod safetcp;

pub use error::PaxstoreError;
pub use bitmap::Bitmap;
pub use print::logger_init;

pub(crate) use safetcp::{tcp_read_obj, tcp_write_obj};
