#![warn(rust_2018_idioms)]
#![allow(dead_code)]

#[cfg(feature = "buffer")]
pub mod buffer;
#[cfg(feature = "conn")]
pub mod conn;
pub mod error;
#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "buffer")]
pub use buffer::{Packet, PacketBuffer};
#[cfg(feature = "conn")]
pub use conn::Conn;
pub use error::Error;
