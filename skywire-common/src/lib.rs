//! Types and constants shared by the skywire crates.
//!
//! - [`identifier`]: DID, handle and NSID syntax.
//! - [`events`]: stream cursor and commit operations.
//! - [`session`]: token records exchanged with authorization servers.
//! - [`constants`]: default endpoints and protocol names.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(any(), deny(clippy::unwrap_used))]

pub mod constants;
pub mod events;
pub mod identifier;
pub mod session;

pub use identifier::{AtIdentifier, Did, Handle, Nsid};
