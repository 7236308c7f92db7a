//! Worker protocol RPC surface: wire messages, authentication, and
//! the axum WebSocket server tying them to the daemon registry.

pub mod auth;
pub mod messages;
pub mod server;

pub use auth::TokenAuthenticator;
pub use messages::{ClientMessage, ServerMessage, TranscodeStartDescriptor, TranscodeStreamState};
pub use server::{ConnectionRegistry, RpcError, RpcServerState, TranscodeEvent, ws_handler};
