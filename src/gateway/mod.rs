//! Access to the remote feature store.
pub mod http;
pub mod remote;
#[cfg(test)]
pub mod scripted;

pub use http::HttpGateway;
pub use remote::RemoteGateway;
