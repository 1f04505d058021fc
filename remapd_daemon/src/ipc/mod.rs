//! Unix-socket IPC: message framing, the request server, and the layer
//! broadcaster.
//!
//! Clients speak fixed-layout binary frames (`frame`). A connection either
//! carries one request and one response, or — after `LAYER_LISTEN` — turns
//! into a plain text stream of `±<layer>` lines fed by `broadcast`.

pub mod broadcast;
pub mod frame;
pub mod server;

pub use broadcast::{LayerBroadcaster, MAX_LAYER_LISTENERS};
pub use frame::{Frame, MAX_MESSAGE_SIZE};
pub use server::IpcServer;
