//! Generic typed XRPC calls with cursor pagination.

mod client;
mod page;
mod params;
mod request;

pub use client::XrpcClient;
pub use page::Page;
pub use request::XrpcRequest;
