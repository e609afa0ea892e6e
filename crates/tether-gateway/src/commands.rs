use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, error};

use tether_db::{ChatError, ChatResult, Database};
use tether_types::events::GatewayEvent;
use tether_types::models::{ConversationId, Message, MessageId, UserId};

use crate::dispatcher::Dispatcher;

/// Run a store operation off the async runtime.
pub async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Database) -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Transient(format!("blocking task failed: {}", e))
        })?
}

/// A recipient device acknowledged `message_id`. The first acknowledgement
/// stamps `delivered_at` and tells the conversation.
pub async fn mark_delivered(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: UserId,
    message_id: MessageId,
) -> ChatResult<Message> {
    let (message, newly_delivered, members) = run_blocking(db, move |db| {
        let message = db.require_member_of_message(message_id, user_id)?;
        if message.sender_id == user_id {
            // A sender's own devices do not count as delivery.
            return Ok((message, false, Vec::new()));
        }
        let (message, changed) = db.mark_delivered(message_id)?;
        let members = if changed {
            db.participants(message.conversation_id)?
                .into_iter()
                .map(|p| p.user_id)
                .collect()
        } else {
            Vec::new()
        };
        Ok((message, changed, members))
    })
    .await?;

    if let (true, Some(delivered_at)) = (newly_delivered, message.delivered_at) {
        let event = GatewayEvent::MessageDelivered {
            conversation_id: message.conversation_id,
            message_id: message.id,
            delivered_at,
        };
        let reached = dispatcher.publish(members, &event);
        debug!("Message {} delivered, notified {} connections", message.id, reached);
    }
    Ok(message)
}

/// Advance the reader's marker and sync their other devices.
pub async fn mark_read(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: UserId,
    conversation_id: ConversationId,
    at: DateTime<Utc>,
) -> ChatResult<bool> {
    // Stored with microsecond precision; other tabs see the stored value.
    let at = at.trunc_subsecs(6);
    let advanced = run_blocking(db, move |db| db.mark_read(conversation_id, user_id, at)).await?;

    if advanced {
        dispatcher.send_to_user(
            user_id,
            GatewayEvent::ReadStateUpdate {
                conversation_id,
                last_read_at: at,
            },
        );
    }
    Ok(advanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tether_db::message_log::MessageBody;
    use tether_db::models::now;
    use uuid::Uuid;

    #[tokio::test]
    async fn first_delivery_is_broadcast_once() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        let message = db.append(cid, a, MessageBody::text("hi")).unwrap().message;

        let mut sender_tab = dispatcher.subscribe(a);

        // The sender acknowledging its own message changes nothing.
        let own = mark_delivered(&db, &dispatcher, a, message.id).await.unwrap();
        assert!(own.delivered_at.is_none());

        let delivered = mark_delivered(&db, &dispatcher, b, message.id).await.unwrap();
        assert!(delivered.delivered_at.is_some());
        mark_delivered(&db, &dispatcher, b, message.id).await.unwrap();

        match sender_tab.next().await {
            Some(GatewayEvent::MessageDelivered { message_id, .. }) => assert_eq!(message_id, message.id),
            other => panic!("unexpected event: {:?}", other),
        }
        // Closing the dispatcher ends the stream; nothing else was queued.
        drop(dispatcher);
        assert_eq!(sender_tab.next().await, None);
    }

    #[tokio::test]
    async fn outsiders_cannot_acknowledge() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        let message = db.append(cid, a, MessageBody::text("hi")).unwrap().message;

        let err = mark_delivered(&db, &dispatcher, Uuid::new_v4(), message.id).await.unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant));
    }

    #[tokio::test]
    async fn mark_read_syncs_other_tabs_only_when_advanced() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        let mut other_tab = dispatcher.subscribe(a);

        let t = now();
        assert!(mark_read(&db, &dispatcher, a, cid, t).await.unwrap());
        assert!(!mark_read(&db, &dispatcher, a, cid, t).await.unwrap());

        assert_eq!(
            other_tab.next().await,
            Some(GatewayEvent::ReadStateUpdate { conversation_id: cid, last_read_at: t })
        );
        assert_eq!(dispatcher.send_to_user(a, GatewayEvent::ConversationDelete { conversation_id: cid }), 1);
        assert!(matches!(other_tab.next().await, Some(GatewayEvent::ConversationDelete { .. })));
    }

    #[tokio::test]
    async fn read_state_event_matches_stored_precision() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cid = db.get_or_create_direct(a, b).unwrap();
        let mut other_tab = dispatcher.subscribe(a);

        let t = now();
        assert!(mark_read(&db, &dispatcher, a, cid, t + chrono::Duration::nanoseconds(750)).await.unwrap());

        let stored = db.participant(cid, a).unwrap().last_read_at;
        assert_eq!(stored, Some(t));
        assert_eq!(
            other_tab.next().await,
            Some(GatewayEvent::ReadStateUpdate { conversation_id: cid, last_read_at: t })
        );
    }
}
