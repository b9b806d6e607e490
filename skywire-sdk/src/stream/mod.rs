//! Firehose (Jetstream) consumer: connect, filter, steer and resume.

mod builder;
mod consumer;
mod event;
mod options;

pub use builder::JetstreamBuilder;
pub use consumer::{CloseReason, ConsumerControl, FirehoseConsumer, HandlerId};
pub use event::{AccountEvent, CommitEvent, EventKind, IdentityEvent, StreamEvent};
pub use options::SubscriberOptions;
