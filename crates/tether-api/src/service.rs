use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tether_db::message_log::{HistoryCursor, MessageBody};
use tether_db::models::now;
use tether_db::moderation::NewReport;
use tether_db::{ChatError, ChatResult, Database};
use tether_gateway::{Dispatcher, Subscription, commands, run_blocking};
use tether_types::api::{ReportRequest, SendMessageRequest, ToggleMuteRequest};
use tether_types::events::GatewayEvent;
use tether_types::models::{
    Block, ConversationId, ConversationSummary, Message, MessageId, MuteDuration, MuteState, Participant,
    RankedMessage, Report, UserId,
};

/// The messaging operations available to an authenticated user.
///
/// Store work runs on the blocking pool; successful mutations fan out to
/// the affected participants through the dispatcher.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(db: Database, dispatcher: Dispatcher) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // -- Conversations --

    pub async fn get_or_create_direct_conversation(&self, actor: UserId, other_user_id: UserId) -> ChatResult<ConversationId> {
        run_blocking(&self.db, move |db| db.get_or_create_direct(actor, other_user_id)).await
    }

    pub async fn create_group_conversation(&self, actor: UserId, participant_ids: Vec<UserId>) -> ChatResult<ConversationId> {
        let (conversation_id, members) = run_blocking(&self.db, move |db| {
            let conversation_id = db.create_group(actor, &participant_ids)?;
            let members = db.participants(conversation_id)?;
            Ok((conversation_id, members))
        })
        .await?;

        self.dispatcher.publish(
            members.into_iter().map(|p| p.user_id),
            &GatewayEvent::ConversationCreate { conversation_id },
        );
        Ok(conversation_id)
    }

    pub async fn list_conversations(&self, actor: UserId) -> ChatResult<Vec<ConversationSummary>> {
        run_blocking(&self.db, move |db| db.list_conversations(actor)).await
    }

    pub async fn participants(&self, actor: UserId, conversation_id: ConversationId) -> ChatResult<Vec<Participant>> {
        run_blocking(&self.db, move |db| {
            db.participant(conversation_id, actor)?;
            db.participants(conversation_id)
        })
        .await
    }

    pub async fn hide_conversation(&self, actor: UserId, conversation_id: ConversationId) -> ChatResult<()> {
        run_blocking(&self.db, move |db| db.hide(conversation_id, actor)).await
    }

    /// Bring a hidden conversation back; works for groups as well as direct chats.
    pub async fn reopen_conversation(&self, actor: UserId, conversation_id: ConversationId) -> ChatResult<bool> {
        run_blocking(&self.db, move |db| db.reopen(conversation_id, actor)).await
    }

    pub async fn delete_conversation(&self, actor: UserId, conversation_id: ConversationId) -> ChatResult<()> {
        let members = run_blocking(&self.db, move |db| db.delete_for_everyone(conversation_id, actor)).await?;
        self.dispatcher
            .publish(members, &GatewayEvent::ConversationDelete { conversation_id });
        Ok(())
    }

    // -- Participant state --

    /// No duration and not indefinite means unmute.
    pub async fn toggle_mute(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        req: ToggleMuteRequest,
    ) -> ChatResult<MuteState> {
        let duration = match (req.indefinite, req.duration_hours) {
            (true, Some(_)) => {
                return Err(ChatError::validation(
                    "duration_hours",
                    "cannot be combined with indefinite",
                ));
            }
            (true, None) => MuteDuration::Indefinitely,
            (false, Some(hours)) => MuteDuration::from_hours(hours)
                .ok_or_else(|| ChatError::validation("duration_hours", "must be one of 1, 8, 24, 168"))?,
            (false, None) => MuteDuration::Unmute,
        };

        run_blocking(&self.db, move |db| db.mute(conversation_id, actor, duration, now())).await
    }

    /// `at` defaults to now and is never taken from the future.
    pub async fn mark_read(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        at: Option<DateTime<Utc>>,
    ) -> ChatResult<bool> {
        let current = now();
        let at = at.map_or(current, |t| t.min(current));
        commands::mark_read(&self.db, &self.dispatcher, actor, conversation_id, at).await
    }

    // -- Messages --

    pub async fn append_message(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        req: SendMessageRequest,
    ) -> ChatResult<Message> {
        let body = MessageBody {
            content: req.content,
            attachment: req.attachment,
        };
        let outcome = run_blocking(&self.db, move |db| db.append(conversation_id, actor, body)).await?;

        let mut reached = 0;
        for recipient in &outcome.recipients {
            reached += self.dispatcher.send_to_user(
                recipient.user_id,
                GatewayEvent::MessageCreate {
                    message: outcome.message.clone(),
                    notify: recipient.notify,
                },
            );
        }
        debug!("Message {} fanned out to {} connections", outcome.message.id, reached);
        Ok(outcome.message)
    }

    pub async fn messages(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<HistoryCursor>,
    ) -> ChatResult<Vec<Message>> {
        run_blocking(&self.db, move |db| db.messages(conversation_id, actor, limit, before)).await
    }

    pub async fn edit_message(&self, actor: UserId, message_id: MessageId, content: String) -> ChatResult<Message> {
        let (message, members) = run_blocking(&self.db, move |db| {
            let message = db.edit(message_id, actor, content)?;
            let members: Vec<UserId> = db
                .participants(message.conversation_id)?
                .into_iter()
                .filter(|p| !p.is_hidden())
                .map(|p| p.user_id)
                .collect();
            Ok((message, members))
        })
        .await?;

        self.dispatcher.publish(
            members,
            &GatewayEvent::MessageUpdate {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    pub async fn mark_delivered(&self, actor: UserId, message_id: MessageId) -> ChatResult<Message> {
        commands::mark_delivered(&self.db, &self.dispatcher, actor, message_id).await
    }

    // -- Search --

    /// Ranked search that gives up as soon as `cancel` fires. The blocking
    /// scan is left to finish on its own; its result is discarded.
    pub async fn search_messages(
        &self,
        actor: UserId,
        conversation_id: ConversationId,
        query: String,
        limit: u32,
        cancel: CancellationToken,
    ) -> ChatResult<Vec<RankedMessage>> {
        let search = run_blocking(&self.db, move |db| db.search(conversation_id, actor, &query, limit));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Search in {} cancelled by {}", conversation_id, actor);
                Err(ChatError::Cancelled)
            }
            result = search => result,
        }
    }

    // -- Moderation --

    pub async fn block_user(&self, actor: UserId, blocked_id: UserId) -> ChatResult<bool> {
        run_blocking(&self.db, move |db| db.block(actor, blocked_id)).await
    }

    pub async fn unblock_user(&self, actor: UserId, blocked_id: UserId) -> ChatResult<bool> {
        run_blocking(&self.db, move |db| db.unblock(actor, blocked_id)).await
    }

    pub async fn blocked_users(&self, actor: UserId) -> ChatResult<Vec<Block>> {
        run_blocking(&self.db, move |db| db.blocked_users(actor)).await
    }

    pub async fn report_user(&self, actor: UserId, req: ReportRequest) -> ChatResult<Report> {
        let report = new_report(req);
        run_blocking(&self.db, move |db| db.report(actor, report)).await
    }

    /// Two independent steps; see `Database::block_and_report`.
    pub async fn block_and_report(&self, actor: UserId, req: ReportRequest) -> ChatResult<Report> {
        let report = new_report(req);
        let created = run_blocking(&self.db, move |db| db.block_and_report(actor, report)).await?;
        info!("{} blocked and reported {}", actor, created.reported_id);
        Ok(created)
    }

    // -- Realtime --

    pub fn subscribe_to_messages(&self, user_id: UserId) -> Subscription {
        self.dispatcher.subscribe(user_id)
    }
}

fn new_report(req: ReportRequest) -> NewReport {
    NewReport {
        reported_id: req.reported_id,
        reason: req.reason,
        description: req.description,
        conversation_id: req.conversation_id,
    }
}
