//! Client-side realtime sync: keeps a user's conversation list current from
//! gateway events, with a full refetch on every (re)connect.

pub mod conversation_list;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testing;

pub use conversation_list::{ApplyOutcome, ConversationList};
pub use subscription::{SubscriptionConfig, SubscriptionError, SubscriptionManager, SyncStatus};
pub use transport::{ConversationFetcher, EventSource, HttpConversationFetcher, WsEventSource};
