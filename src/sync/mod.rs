//! Cross-thread handoff primitives

pub mod mailbox;

pub use mailbox::{create_shared_mailbox, Mailbox, SharedMailbox};
