// Keyward — Control gateway
//
// JSON-RPC 2.0 over a Unix domain socket. The daemon serves it; the CLI's
// daemon-bound commands are its clients.

mod caller;
mod client;
mod error;
mod protocol;
mod uds;

pub use caller::CallerInfo;
pub use client::GatewayClient;
pub use error::GatewayError;
pub use protocol::{CONFLICT, INVALID_STATE, NOT_FOUND, VALIDATION_FAILED};
pub use uds::{ControlState, UdsServer};
