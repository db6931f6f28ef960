// Library root for the draft room server: configuration, per-connection
// sessions and the WebSocket transport. The `draftroom` binary wires them up.

pub mod config;
pub mod session;
pub mod ws_server;
