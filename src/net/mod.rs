//! Transport between peers and the relay hub.
//!
//! One TCP connection per peer, carrying newline-delimited JSON
//! [`SessionEvent`](crate::protocol::SessionEvent)s in both directions. The
//! hub assigns ids, bootstraps joining peers with a `hello`, and relays
//! everything else.

mod client;
mod hub;

pub use client::{connect, Connection, Inbound};
pub use hub::Hub;

/// Longest accepted line. Programs are capped far below this; the slack is
/// for editor states with many selections.
pub const MAX_LINE_LENGTH: usize = 256 * 1024;

fn codec() -> tokio_util::codec::LinesCodec {
    tokio_util::codec::LinesCodec::new_with_max_length(MAX_LINE_LENGTH)
}
