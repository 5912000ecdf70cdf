//! Backend connectors.
//!
//! Every capability runs through the `Backend` trait. The production
//! implementation speaks JSON-RPC 2.0 to one endpoint per backend group,
//! chosen from the capability's registered group.

pub mod backend;
pub mod jsonrpc;

pub use backend::{is_unreachable, Backend, UNREACHABLE_PREFIX};
pub use jsonrpc::JsonRpcBackend;
