//! Remote gateway for shellgate.
//!
//! Provides:
//! - Wire protocol (JSON + base64)
//! - Token authentication
//! - `Gateway` - Per-connection action routing
//! - HTTP API and WebSocket transport (feature: websocket)

pub mod auth;
pub mod gateway;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod http;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use auth::{AuthError, Claims, IssuedToken, TokenAuthority};
pub use gateway::Gateway;
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};

#[cfg(feature = "websocket")]
pub use http::router;
