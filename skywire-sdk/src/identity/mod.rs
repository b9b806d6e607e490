//! Handle and DID resolution.

mod core;
mod did_doc;

pub use self::core::{Identity, IdentityResolver};
pub use did_doc::{DidDocument, DidService};
