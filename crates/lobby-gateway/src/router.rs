use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use lobby_db::Database;
use lobby_types::ChatError;
use lobby_types::events::{ClientCommand, ServerEvent};
use lobby_types::models::{self, Identity, Message, Reaction};

use crate::catalog::ChannelCatalog;
use crate::registry::{ConnectionId, Registry};

/// Default bound on a single store operation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest history page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Applies client commands to the message store and the registry, and
/// announces the results to rooms.
///
/// Both the gateway and the REST fallback go through this type, so the two
/// surfaces validate, persist and broadcast identically. An event is only
/// broadcast after its store write has committed.
#[derive(Clone)]
pub struct ChatRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    db: Arc<Database>,
    registry: Registry,
    catalog: Arc<dyn ChannelCatalog>,
    timeout: Duration,
}

impl ChatRouter {
    pub fn new(
        db: Arc<Database>,
        registry: Registry,
        catalog: Arc<dyn ChannelCatalog>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                db,
                registry,
                catalog,
                timeout,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Handle one gateway command from `conn_id`. Errors belong to the
    /// caller alone and are never broadcast.
    pub async fn handle(
        &self,
        conn_id: ConnectionId,
        identity: &Identity,
        command: ClientCommand,
    ) -> Result<(), ChatError> {
        debug!("{} ({}) -> {}", identity.user_name, identity.user_id, command.name());

        match command {
            ClientCommand::JoinChannel { channel_id } => self.join(conn_id, &channel_id),
            ClientCommand::LeaveChannel { channel_id } => self.leave(conn_id, &channel_id),
            ClientCommand::SendMessage {
                channel_id,
                content,
                reply_to,
            } => self
                .send_message(identity, &channel_id, &content, reply_to)
                .await
                .map(drop),
            ClientCommand::EditMessage { message_id, content } => {
                self.edit_message(identity, message_id, &content).await.map(drop)
            }
            ClientCommand::DeleteMessage { message_id } => {
                self.delete_message(identity, message_id).await.map(drop)
            }
            ClientCommand::AddReaction { message_id, emoji } => {
                self.toggle_reaction(identity, message_id, &emoji).await.map(drop)
            }
            ClientCommand::TypingStart { channel_id } => self.typing(conn_id, identity, &channel_id, true),
            ClientCommand::TypingStop { channel_id } => self.typing(conn_id, identity, &channel_id, false),
        }
    }

    pub fn join(&self, conn_id: ConnectionId, channel_id: &str) -> Result<(), ChatError> {
        self.check_channel(channel_id)?;
        self.inner.registry.join(conn_id, channel_id);
        Ok(())
    }

    pub fn leave(&self, conn_id: ConnectionId, channel_id: &str) -> Result<(), ChatError> {
        self.check_channel(channel_id)?;
        self.inner.registry.leave(conn_id, channel_id);
        Ok(())
    }

    /// Typing indicators are not persisted and skip the sender's own connection.
    pub fn typing(
        &self,
        conn_id: ConnectionId,
        identity: &Identity,
        channel_id: &str,
        started: bool,
    ) -> Result<(), ChatError> {
        self.check_channel(channel_id)?;
        let event = if started {
            ServerEvent::UserTyping {
                user_id: identity.user_id.clone(),
                user_name: identity.user_name.clone(),
                channel_id: channel_id.to_string(),
            }
        } else {
            ServerEvent::UserStoppedTyping {
                user_id: identity.user_id.clone(),
                channel_id: channel_id.to_string(),
            }
        };
        self.inner.registry.broadcast(channel_id, &event, Some(conn_id));
        Ok(())
    }

    /// Persist a new message and announce `message:new` to the whole room,
    /// sender's connections included.
    pub async fn send_message(
        &self,
        author: &Identity,
        channel_id: &str,
        content: &str,
        reply_to: Option<Uuid>,
    ) -> Result<Message, ChatError> {
        self.check_channel(channel_id)?;
        let content = models::validate_content(content)?;
        let message = Message::new(author, channel_id, content, reply_to);

        self.commit(
            move |db| {
                db.insert_message(&message)?;
                Ok(message)
            },
            |registry, message| {
                registry.broadcast(
                    &message.channel_id,
                    &ServerEvent::MessageNew(message.clone()),
                    None,
                );
            },
        )
        .await
    }

    pub async fn edit_message(
        &self,
        editor: &Identity,
        message_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = models::validate_content(content)?;
        let user_id = editor.user_id.clone();

        self.commit(
            move |db| {
                db.mutate_message(message_id, |message| {
                    ensure_owner(message, &user_id)?;
                    message.edit(content);
                    Ok(message.clone())
                })
            },
            |registry, message| {
                registry.broadcast(
                    &message.channel_id,
                    &ServerEvent::MessageEdited {
                        message_id: message.id,
                        content: message.content.clone(),
                        edited: message.edited,
                        timestamp: Utc::now(),
                    },
                    None,
                );
            },
        )
        .await
    }

    /// Redact a message. Unknown and already-deleted ids both fail with
    /// `NotFound`.
    pub async fn delete_message(&self, requester: &Identity, message_id: Uuid) -> Result<Message, ChatError> {
        let user_id = requester.user_id.clone();

        self.commit(
            move |db| {
                db.mutate_message(message_id, |message| {
                    ensure_owner(message, &user_id)?;
                    message.redact();
                    Ok(message.clone())
                })
            },
            |registry, message| {
                registry.broadcast(
                    &message.channel_id,
                    &ServerEvent::MessageDeleted {
                        message_id: message.id,
                        timestamp: Utc::now(),
                    },
                    None,
                );
            },
        )
        .await
    }

    /// Toggle the caller's `emoji` reaction and announce the full list.
    ///
    /// The announced timestamp is taken while the store write is held, so
    /// toggles of one message are stamped in commit order.
    pub async fn toggle_reaction(
        &self,
        reactor: &Identity,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ChatError> {
        let emoji = models::validate_emoji(emoji)?;
        let user_id = reactor.user_id.clone();

        let updated = self
            .commit(
                move |db| {
                    db.mutate_message(message_id, |message| {
                        if message.deleted {
                            return Err(ChatError::NotFound.into());
                        }
                        let toggle = message.toggle_reaction(&emoji, &user_id);
                        debug!("{} {:?} {} on {}", user_id, toggle, emoji, message_id);
                        Ok(ReactionUpdate {
                            channel_id: message.channel_id.clone(),
                            reactions: message.reactions.clone(),
                            timestamp: Utc::now(),
                        })
                    })
                },
                move |registry, update: &ReactionUpdate| {
                    registry.broadcast(
                        &update.channel_id,
                        &ServerEvent::ReactionUpdated {
                            message_id,
                            reactions: update.reactions.clone(),
                            timestamp: update.timestamp,
                        },
                        None,
                    );
                },
            )
            .await?;

        Ok(updated.reactions)
    }

    /// A page of channel history, oldest first. Readable without joining.
    pub async fn history(
        &self,
        channel_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.check_channel(channel_id)?;
        let channel_id = channel_id.to_string();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        self.commit(
            move |db| db.get_messages(&channel_id, before, limit),
            |_, _| {},
        )
        .await
    }

    fn check_channel(&self, channel_id: &str) -> Result<(), ChatError> {
        if self.inner.catalog.contains(channel_id) {
            Ok(())
        } else {
            Err(ChatError::UnknownChannel(channel_id.to_string()))
        }
    }

    /// Run `op` against the store off the async runtime, then `announce` its
    /// result.
    ///
    /// The caller waits at most the configured timeout. On expiry it gets
    /// `Timeout`, while the operation runs on detached: once it commits the
    /// announcement still goes out.
    async fn commit<T, F, A>(&self, op: F, announce: A) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        A: FnOnce(&Registry, &T) + Send + 'static,
    {
        let db = self.inner.db.clone();
        let registry = self.inner.registry.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || op(&db))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    ChatError::storage(e)
                })?
                .map_err(into_chat_error)?;
            announce(&registry, &outcome);
            Ok::<_, ChatError>(outcome)
        });

        match tokio::time::timeout(self.inner.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Store task failed: {}", e);
                Err(ChatError::storage(e))
            }
            Err(_) => {
                warn!(
                    "Store operation exceeded {:?}, completing in background",
                    self.inner.timeout
                );
                Err(ChatError::Timeout)
            }
        }
    }
}

struct ReactionUpdate {
    channel_id: String,
    reactions: Vec<Reaction>,
    timestamp: DateTime<Utc>,
}

fn ensure_owner(message: &Message, user_id: &str) -> anyhow::Result<()> {
    if message.deleted {
        return Err(ChatError::NotFound.into());
    }
    if !message.is_owned_by(user_id) {
        return Err(ChatError::Forbidden.into());
    }
    Ok(())
}

/// Domain rejections travel through the store as `anyhow` errors; anything
/// else is a storage failure.
fn into_chat_error(err: anyhow::Error) -> ChatError {
    match err.downcast::<ChatError>() {
        Ok(chat) => chat,
        Err(other) => {
            error!("Store error: {:#}", other);
            ChatError::storage(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::registry::Outbound;
    use tokio::sync::mpsc;

    fn identity(id: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            user_name: format!("user-{}", id),
            badge: None,
        }
    }

    fn router_with_timeout(timeout: Duration) -> ChatRouter {
        ChatRouter::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Registry::default(),
            Arc::new(StaticCatalog::new(["channel-1", "channel-2"])),
            timeout,
        )
    }

    fn router() -> ChatRouter {
        router_with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            events.push(serde_json::from_str(&payload).unwrap());
        }
        events
    }

    /// Register and join `channel`, discarding the join acknowledgment.
    fn connect(router: &ChatRouter, who: &Identity, channel: &str) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (conn, mut rx) = router.registry().register(who.clone());
        router.join(conn, channel).unwrap();
        drain(&mut rx);
        (conn, rx)
    }

    #[tokio::test]
    async fn send_reaches_whole_room_including_sender() {
        let router = router();
        let alice = identity("A");
        let (_a1, mut rx_a1) = connect(&router, &alice, "channel-1");
        let (_a2, mut rx_a2) = connect(&router, &alice, "channel-1");
        let (_c, mut rx_c) = connect(&router, &identity("C"), "channel-2");
        // a1 saw a2 arrive.
        assert!(matches!(
            &drain(&mut rx_a1)[..],
            [ServerEvent::UserJoined { user_id, .. }] if user_id == "A"
        ));

        let sent = router
            .send_message(&alice, "channel-1", "hello", None)
            .await
            .unwrap();
        assert!(!sent.edited);

        for rx in [&mut rx_a1, &mut rx_a2] {
            assert_eq!(drain(rx), vec![ServerEvent::MessageNew(sent.clone())]);
        }
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn invalid_send_is_not_persisted_or_broadcast() {
        let router = router();
        let alice = identity("A");
        let (_a, mut rx) = connect(&router, &alice, "channel-1");

        let err = router.send_message(&alice, "channel-1", "   ", None).await.unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));

        let long = "x".repeat(models::MAX_CONTENT_CHARS + 1);
        assert!(router.send_message(&alice, "channel-1", &long, None).await.is_err());

        let err = router.send_message(&alice, "nowhere", "hi", None).await.unwrap_err();
        assert_eq!(err, ChatError::UnknownChannel("nowhere".into()));

        assert!(drain(&mut rx).is_empty());
        assert!(router.history("channel-1", None, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_to_other_channel_is_rejected() {
        let router = router();
        let alice = identity("A");
        let parent = router.send_message(&alice, "channel-1", "parent", None).await.unwrap();

        let ok = router
            .send_message(&alice, "channel-1", "child", Some(parent.id))
            .await
            .unwrap();
        assert_eq!(ok.reply_to, Some(parent.id));

        let err = router
            .send_message(&alice, "channel-2", "child", Some(parent.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn edit_by_owner_broadcasts() {
        let router = router();
        let alice = identity("A");
        let (_a, mut rx) = connect(&router, &alice, "channel-1");
        let sent = router.send_message(&alice, "channel-1", "helo", None).await.unwrap();
        drain(&mut rx);

        let edited = router.edit_message(&alice, sent.id, "hello").await.unwrap();
        assert!(edited.edited);
        assert_eq!(edited.timestamp, sent.timestamp);

        let events = drain(&mut rx);
        assert!(matches!(
            &events[..],
            [ServerEvent::MessageEdited { message_id, content, edited: true, .. }]
                if *message_id == sent.id && content == "hello"
        ));
    }

    #[tokio::test]
    async fn edit_by_non_owner_is_forbidden_and_private() {
        let router = router();
        let alice = identity("A");
        let bob = identity("B");
        let (_a, mut rx_a) = connect(&router, &alice, "channel-1");
        let sent = router.send_message(&alice, "channel-1", "hello", None).await.unwrap();
        drain(&mut rx_a);

        let err = router.edit_message(&bob, sent.id, "pwned").await.unwrap_err();
        assert_eq!(err, ChatError::Forbidden);
        assert_eq!(
            router.delete_message(&bob, sent.id).await.unwrap_err(),
            ChatError::Forbidden
        );

        assert!(drain(&mut rx_a).is_empty());
        let page = router.history("channel-1", None, 50).await.unwrap();
        assert_eq!(page[0].content, "hello");
        assert!(!page[0].edited);
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let router = router();
        let alice = identity("A");
        let id = Uuid::new_v4();
        assert_eq!(router.edit_message(&alice, id, "x").await.unwrap_err(), ChatError::NotFound);
        assert_eq!(router.delete_message(&alice, id).await.unwrap_err(), ChatError::NotFound);
        assert_eq!(router.toggle_reaction(&alice, id, "🔥").await.unwrap_err(), ChatError::NotFound);
    }

    #[tokio::test]
    async fn deleted_message_is_terminal() {
        let router = router();
        let alice = identity("A");
        let sent = router.send_message(&alice, "channel-1", "hello", None).await.unwrap();
        router.delete_message(&alice, sent.id).await.unwrap();

        assert_eq!(router.edit_message(&alice, sent.id, "again").await.unwrap_err(), ChatError::NotFound);
        assert_eq!(router.delete_message(&alice, sent.id).await.unwrap_err(), ChatError::NotFound);

        let page = router.history("channel-1", None, 50).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, models::REDACTED_CONTENT);
    }

    #[tokio::test]
    async fn typing_skips_sender() {
        let router = router();
        let alice = identity("A");
        let (a, mut rx_a) = connect(&router, &alice, "channel-1");
        let (_b, mut rx_b) = connect(&router, &identity("B"), "channel-1");
        drain(&mut rx_a);

        router.typing(a, &alice, "channel-1", true).unwrap();
        router.typing(a, &alice, "channel-1", false).unwrap();

        assert!(drain(&mut rx_a).is_empty());
        let events = drain(&mut rx_b);
        assert!(matches!(
            &events[..],
            [ServerEvent::UserTyping { .. }, ServerEvent::UserStoppedTyping { .. }]
        ));
    }

    #[tokio::test]
    async fn join_unknown_channel_is_rejected() {
        let router = router();
        let (conn, _rx) = router.registry().register(identity("A"));
        let err = router
            .handle(conn, &identity("A"), ClientCommand::JoinChannel { channel_id: "nope".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_channel");
        assert!(router.registry().rooms_of(conn).is_empty());
    }

    #[tokio::test]
    async fn full_scenario() {
        let router = router();
        let alice = identity("A");
        let bob = identity("B");
        let (a, mut rx_a) = router.registry().register(alice.clone());
        let (b, _rx_b) = router.registry().register(bob.clone());

        router
            .handle(a, &alice, ClientCommand::JoinChannel { channel_id: "channel-1".into() })
            .await
            .unwrap();
        assert!(matches!(&drain(&mut rx_a)[..], [ServerEvent::ChannelJoined { .. }]));

        router
            .handle(
                a,
                &alice,
                ClientCommand::SendMessage {
                    channel_id: "channel-1".into(),
                    content: "hello".into(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        let events = drain(&mut rx_a);
        let sent = match &events[..] {
            [ServerEvent::MessageNew(m)] => m.clone(),
            other => panic!("expected one message:new, got {:?}", other),
        };
        assert!(!sent.edited);

        // B never joined but may still react.
        let react = ClientCommand::AddReaction {
            message_id: sent.id,
            emoji: "🔥".into(),
        };
        router.handle(b, &bob, react.clone()).await.unwrap();
        match &drain(&mut rx_a)[..] {
            [ServerEvent::ReactionUpdated { message_id, reactions, .. }] => {
                assert_eq!(*message_id, sent.id);
                assert_eq!(
                    reactions,
                    &vec![Reaction { emoji: "🔥".into(), user_ids: vec!["B".into()] }]
                );
            }
            other => panic!("expected reaction:updated, got {:?}", other),
        }

        router.handle(b, &bob, react).await.unwrap();
        match &drain(&mut rx_a)[..] {
            [ServerEvent::ReactionUpdated { reactions, .. }] => assert!(reactions.is_empty()),
            other => panic!("expected reaction:updated, got {:?}", other),
        }

        router
            .handle(a, &alice, ClientCommand::DeleteMessage { message_id: sent.id })
            .await
            .unwrap();
        assert!(matches!(
            &drain(&mut rx_a)[..],
            [ServerEvent::MessageDeleted { message_id, .. }] if *message_id == sent.id
        ));

        let page = router.history("channel-1", None, 50).await.unwrap();
        assert_eq!(page[0].content, models::REDACTED_CONTENT);
        assert_ne!(page[0].content, "hello");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reactions_are_not_lost() {
        let router = router();
        let alice = identity("A");
        let sent = router.send_message(&alice, "channel-1", "vote", None).await.unwrap();
        let message_id = sent.id;

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .toggle_reaction(&identity(&format!("U{}", i)), message_id, "👍")
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let page = router.history("channel-1", None, 1).await.unwrap();
        assert_eq!(page[0].reactions.len(), 1);
        assert_eq!(page[0].reactions[0].user_ids.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reaction_updates_are_stamped_in_commit_order() {
        let router = router();
        let alice = identity("A");
        let (_a, mut rx) = connect(&router, &alice, "channel-1");
        let sent = router.send_message(&alice, "channel-1", "vote", None).await.unwrap();
        drain(&mut rx);
        let message_id = sent.id;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .toggle_reaction(&identity(&format!("U{}", i)), message_id, "👍")
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut updates: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                ServerEvent::ReactionUpdated { reactions, timestamp, .. } => (timestamp, reactions[0].user_ids.len()),
                other => panic!("expected reaction:updated, got {:?}", other),
            })
            .collect();
        assert_eq!(updates.len(), 8);

        // Each toggle adds one user, so the newest stamp must carry the longest list.
        updates.sort_by_key(|(timestamp, _)| *timestamp);
        let counts: Vec<_> = updates.iter().map(|(_, count)| *count).collect();
        assert_eq!(counts, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn emoji_is_trimmed_before_toggling() {
        let router = router();
        let alice = identity("A");
        let sent = router.send_message(&alice, "channel-1", "hello", None).await.unwrap();

        let reactions = router.toggle_reaction(&alice, sent.id, " 🔥 ").await.unwrap();
        assert_eq!(reactions, vec![Reaction { emoji: "🔥".into(), user_ids: vec!["A".into()] }]);

        let reactions = router.toggle_reaction(&alice, sent.id, "🔥").await.unwrap();
        assert!(reactions.is_empty());

        let err = router.toggle_reaction(&alice, sent.id, "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn timed_out_send_still_commits_and_broadcasts() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let router = ChatRouter::new(
            db.clone(),
            Registry::default(),
            Arc::new(StaticCatalog::new(["channel-1"])),
            Duration::from_millis(50),
        );
        let alice = identity("A");
        let (_a, mut rx) = connect(&router, &alice, "channel-1");

        // Hold the store lock so the insert cannot finish within the bound.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            db.with_conn(|_| {
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        });
        locked_rx.recv().unwrap();

        let err = router.send_message(&alice, "channel-1", "late", None).await.unwrap_err();
        assert_eq!(err, ChatError::Timeout);

        // The detached commit finishes and announces on its own.
        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let event: ServerEvent = serde_json::from_str(&payload).unwrap();
        assert!(matches!(event, ServerEvent::MessageNew(m) if m.content == "late"));

        holder.join().unwrap();
        assert_eq!(router.history("channel-1", None, 50).await.unwrap().len(), 1);
    }
}
