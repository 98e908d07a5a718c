//! Domain models for mail entities

mod account;
mod label;
mod message;
mod sync_state;
mod thread;

pub use account::Account;
pub use label::LabelId;
pub use message::{FetchedMessage, MessageId, MessageRecord};
pub use sync_state::SyncCheckpoint;
pub use thread::ThreadId;
