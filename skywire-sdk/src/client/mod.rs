pub mod core;
pub mod http;
