//! WebSocket echo
//!
//! A qualifying request is upgraded by [`Upgrader`] and then every text or
//! binary message is sent straight back by [`echo_frames`] until the peer
//! goes away.

pub mod echo;
pub mod handshake;


pub use echo::{echo_frames, serve_websocket};
pub use handshake::{HandshakeError, Upgrader};

use crate::http::EchoRequest;
use http::header::{CONNECTION, UPGRADE};

/// Whether the request asks to switch to the WebSocket protocol
///
/// The first `Connection` value must be exactly `Upgrade` and the first
/// `Upgrade` value must contain `websocket`. Anything else is echoed as
/// plain HTTP.
pub fn is_websocket_upgrade(request: &EchoRequest) -> bool {
    let connection_upgrade = request.header(CONNECTION.as_str()) == Some("Upgrade");
    let upgrade_websocket = request
        .header(UPGRADE.as_str())
        .is_some_and(|v| v.contains("websocket"));
    connection_upgrade && upgrade_websocket
}
