use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tether_api::ChatService;
use tether_api::gateway::InProcessSource;
use tether_client::{SubscriptionConfig, SubscriptionManager, SyncStatus};
use tether_db::{ChatError, Database};
use tether_gateway::Dispatcher;
use tether_types::api::SendMessageRequest;

fn text(content: &str) -> SendMessageRequest {
    SendMessageRequest {
        content: Some(content.to_string()),
        attachment: None,
    }
}

#[tokio::test]
async fn client_list_follows_server_activity() {
    let dispatcher = Dispatcher::default();
    let service = ChatService::new(Database::open_in_memory().unwrap(), dispatcher.clone());
    let (me, friend, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let existing = service.get_or_create_direct_conversation(me, friend).await.unwrap();

    let manager = SubscriptionManager::new(
        InProcessSource::new(dispatcher.clone()),
        service.clone(),
        SubscriptionConfig::default(),
    );
    let mut status = manager.watch_status();
    manager.start(me).await;
    timeout(Duration::from_secs(5), status.wait_for(|s| *s == SyncStatus::Live))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager.conversations().len(), 1);

    // A conversation the client has never seen arrives as a message event
    // and is filled in by a refetch.
    let fresh = service.get_or_create_direct_conversation(other, me).await.unwrap();
    service.append_message(other, fresh, text("hey, new here")).await.unwrap();
    let reply = service.append_message(friend, existing, text("later")).await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            let list = manager.conversations();
            if list.len() == 2 && list[0].last_message.as_ref().map(|m| m.id) == Some(reply.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let list = manager.conversations();
    assert_eq!(list[0].conversation.id, existing);
    assert_eq!(list[1].conversation.id, fresh);
    assert_eq!(list[1].unread_count, 1);

    manager.stop().await;
    assert_eq!(dispatcher.connection_count(me), 0);
}

#[tokio::test]
async fn cancelled_search_returns_immediately() {
    let service = ChatService::new(Database::open_in_memory().unwrap(), Dispatcher::default());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let cid = service.get_or_create_direct_conversation(a, b).await.unwrap();
    service.append_message(a, cid, text("invoice #1")).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = service
        .search_messages(b, cid, "invoice".into(), 50, cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Cancelled));

    let found = service
        .search_messages(b, cid, "invoice".into(), 50, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}
