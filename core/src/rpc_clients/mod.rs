pub mod transport;

pub use transport::{RPC_API_KEY_HEADER, RpcTransport};
