//! AppleMIDI / RTP-MIDI network side: control protocol, dispatch engine,
//! UDP reactor and mDNS advertisement.

pub mod discovery;
pub mod dispatch;
pub mod midi;
pub mod network_interface;

pub use dispatch::{Engine, Outbound, SocketId};
pub use network_interface::{run_reactor, Sockets};
