use std::cmp::Reverse;

use tether_types::events::GatewayEvent;
use tether_types::models::{ConversationId, ConversationSummary, Message, UserId};

/// What applying one event did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Stale, duplicate, or irrelevant; the list is unchanged.
    Ignored,
    /// The event names a conversation the list does not know. Only a full
    /// refetch can fill it in.
    NeedsRefetch,
}

/// Client-side conversation list, most recently active first.
///
/// Events may arrive late or twice. A message only replaces the stored
/// snapshot when its `(created_at, id)` is not older, so redelivery never
/// rolls the list back.
#[derive(Debug, Clone)]
pub struct ConversationList {
    user_id: UserId,
    entries: Vec<ConversationSummary>,
}

impl ConversationList {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            entries: Vec::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Swap in a freshly fetched list.
    pub fn replace_all(&mut self, entries: Vec<ConversationSummary>) {
        self.entries = entries;
        self.sort();
    }

    pub fn entries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&ConversationSummary> {
        self.entries.iter().find(|s| s.conversation.id == conversation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&mut self, event: &GatewayEvent) -> ApplyOutcome {
        match event {
            GatewayEvent::Ready { .. } => ApplyOutcome::Ignored,
            GatewayEvent::MessageCreate { message, .. } => self.apply_message(message),
            GatewayEvent::MessageUpdate { message } => {
                let Some(entry) = self.entry_mut(message.conversation_id) else {
                    return ApplyOutcome::NeedsRefetch;
                };
                match &mut entry.last_message {
                    Some(last) if last.id == message.id && last.updated_at <= message.updated_at => {
                        *last = message.clone();
                        ApplyOutcome::Applied
                    }
                    _ => ApplyOutcome::Ignored,
                }
            }
            GatewayEvent::MessageDelivered {
                conversation_id,
                message_id,
                delivered_at,
            } => {
                let Some(entry) = self.entry_mut(*conversation_id) else {
                    return ApplyOutcome::Ignored;
                };
                match &mut entry.last_message {
                    Some(last) if last.id == *message_id && last.delivered_at.is_none() => {
                        last.delivered_at = Some(*delivered_at);
                        ApplyOutcome::Applied
                    }
                    _ => ApplyOutcome::Ignored,
                }
            }
            GatewayEvent::ConversationCreate { conversation_id } => {
                if self.get(*conversation_id).is_some() {
                    ApplyOutcome::Ignored
                } else {
                    ApplyOutcome::NeedsRefetch
                }
            }
            GatewayEvent::ConversationDelete { conversation_id } => {
                let before = self.entries.len();
                self.entries.retain(|s| s.conversation.id != *conversation_id);
                if self.entries.len() < before {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Ignored
                }
            }
            GatewayEvent::ReadStateUpdate { conversation_id, .. } => match self.entry_mut(*conversation_id) {
                Some(entry) if entry.unread_count > 0 => {
                    entry.unread_count = 0;
                    ApplyOutcome::Applied
                }
                Some(_) => ApplyOutcome::Ignored,
                None => ApplyOutcome::NeedsRefetch,
            },
        }
    }

    fn apply_message(&mut self, message: &Message) -> ApplyOutcome {
        let user_id = self.user_id;
        let Some(entry) = self.entry_mut(message.conversation_id) else {
            return ApplyOutcome::NeedsRefetch;
        };

        let is_new = match &entry.last_message {
            Some(last) if message.sort_key() < last.sort_key() => return ApplyOutcome::Ignored,
            Some(last) => message.sort_key() > last.sort_key(),
            None => true,
        };

        if is_new && message.sender_id != user_id {
            entry.unread_count += 1;
        }
        let activity = entry.conversation.last_message_at.map_or(message.created_at, |t| t.max(message.created_at));
        entry.conversation.last_message_at = Some(activity);
        entry.conversation.updated_at = entry.conversation.updated_at.max(message.updated_at);
        entry.last_message = Some(message.clone());

        self.sort();
        ApplyOutcome::Applied
    }

    fn entry_mut(&mut self, conversation_id: ConversationId) -> Option<&mut ConversationSummary> {
        self.entries.iter_mut().find(|s| s.conversation.id == conversation_id)
    }

    fn sort(&mut self) {
        self.entries
            .sort_by_key(|s| (Reverse(s.conversation.activity_at()), s.conversation.id));
    }
}
