//! Room Channels - broadcast groups per room
//!
//! One broadcast channel per room with open connections. Publishing persists first
//! and broadcasts second, one message at a time per room.

use crate::core::ChatError;
use crate::dtos::ChatBroadcastFrame;
use crate::entities::{Message, RoomId};
use crate::ws::BROADCAST_CHANNEL_CAPACITY;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, info, instrument};

/// Broadcast group of one room plus its serialization point.
pub struct RoomChannel {
    tx: Sender<Arc<ChatBroadcastFrame>>,
    /// Held for the whole persist-then-broadcast step; remembers the last timestamp
    /// handed out so timestamps never go backwards within the room.
    last_sent: Mutex<Option<DateTime<Utc>>>,
}

impl RoomChannel {
    fn new() -> Self {
        // Arc<frame> to share the ref, not the frame: no copy per receiver
        let (tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            tx,
            last_sent: Mutex::new(None),
        }
    }
}

/// Outcome of a successful publish.
#[derive(Debug)]
pub struct Published {
    pub message: Message,
    /// Connections the frame was handed to
    pub delivered: usize,
}

pub struct RoomChannels {
    channels: DashMap<RoomId, Arc<RoomChannel>>,
}

impl Default for RoomChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomChannels {
    pub fn new() -> Self {
        RoomChannels {
            channels: DashMap::new(),
        }
    }

    fn channel(&self, rid: RoomId) -> Arc<RoomChannel> {
        self.channels
            .entry(rid)
            .or_insert_with(|| Arc::new(RoomChannel::new()))
            .value()
            .clone()
    }

    /// Joins the broadcast group of `rid`, creating it on first use.
    #[instrument(skip(self))]
    pub fn subscribe(&self, rid: RoomId) -> Receiver<Arc<ChatBroadcastFrame>> {
        let rx = self
            .channels
            .entry(rid)
            .or_insert_with(|| {
                info!("Creating new broadcast channel for room");
                Arc::new(RoomChannel::new())
            })
            .tx
            .subscribe();
        debug!("Subscribed to room broadcast channel");
        rx
    }

    /// Persists and broadcasts one message, serialized with every other publish on
    /// the same room.
    ///
    /// `persist` receives the server timestamp and must durably record the message;
    /// the broadcast happens only if it succeeds, so no connection can observe a
    /// message missing from the history. Receivers that lag or are closing simply
    /// miss the frame.
    #[instrument(skip(self, persist))]
    pub async fn publish<F, Fut>(&self, rid: RoomId, persist: F) -> Result<Published, ChatError>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<Message, ChatError>>,
    {
        let channel = self.channel(rid);

        let outcome = {
            let mut last_sent = channel.last_sent.lock().await;
            let now = Utc::now();
            let sent_at = match *last_sent {
                Some(previous) if previous > now => previous,
                _ => now,
            };

            persist(sent_at).await.map(|message| {
                *last_sent = Some(message.sent_at);

                // Err only means nobody is subscribed right now
                let delivered = channel
                    .tx
                    .send(Arc::new(ChatBroadcastFrame::from(&message)))
                    .unwrap_or(0);
                debug!(receivers = delivered, "Message broadcast to receivers");

                Published { message, delivered }
            })
        };

        // released on failure too, or a group recreated here would outlive its room
        drop(channel);
        self.release(rid);
        outcome
    }

    /// Drops the group of `rid` when nobody is subscribed and no publish is in flight.
    pub fn release(&self, rid: RoomId) {
        let removed = self.channels.remove_if(&rid, |_, channel| {
            channel.tx.receiver_count() == 0 && Arc::strong_count(channel) == 1
        });
        if removed.is_some() {
            debug!(rid, "Idle broadcast channel removed");
        }
    }

    /// Tears the group down: subscribed connections see the stream end and close.
    #[instrument(skip(self))]
    pub fn close(&self, rid: RoomId) {
        if self.channels.remove(&rid).is_some() {
            info!("Broadcast channel closed");
        }
    }

    pub fn receiver_count(&self, rid: RoomId) -> usize {
        self.channels
            .get(&rid)
            .map(|channel| channel.tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_active(&self, rid: RoomId) -> bool {
        self.channels.contains_key(&rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn message(mid: i64, rid: RoomId, content: &str, sent_at: DateTime<Utc>) -> Message {
        Message {
            mid,
            rid,
            sender_uid: "S".to_string(),
            content: content.to_string(),
            sent_at,
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let channels = RoomChannels::new();
        let mut first = channels.subscribe(1);
        let mut second = channels.subscribe(1);

        let published = channels
            .publish(1, |at| async move { Ok(message(1, 1, "hello", at)) })
            .await
            .unwrap();

        assert_eq!(published.delivered, 2);
        assert_eq!(first.recv().await.unwrap().message, "hello");
        assert_eq!(second.recv().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn failed_persistence_broadcasts_nothing() {
        let channels = RoomChannels::new();
        let mut rx = channels.subscribe(1);

        let result = channels
            .publish(1, |_| async { Err(ChatError::Persistence(sqlx::Error::PoolClosed)) })
            .await;

        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn concurrent_publishes_keep_one_order_per_room() {
        let channels = Arc::new(RoomChannels::new());
        let mut rx = channels.subscribe(1);
        let next_mid = Arc::new(AtomicI64::new(1));

        let mut handles = Vec::new();
        for i in 0..20 {
            let channels = channels.clone();
            let next_mid = next_mid.clone();
            handles.push(tokio::spawn(async move {
                channels
                    .publish(1, move |at| async move {
                        // ids are handed out inside the critical section
                        let mid = next_mid.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(message(mid, 1, &format!("{mid}:{i}"), at))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut previous_mid = 0;
        for _ in 0..20 {
            let frame = rx.recv().await.unwrap();
            let mid: i64 = frame.message.split(':').next().unwrap().parse().unwrap();
            assert!(mid > previous_mid, "frames must arrive in persistence order");
            previous_mid = mid;
        }
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let channels = RoomChannels::new();
        let future = Utc::now() + chrono::Duration::hours(1);

        // a clock reading ahead of the wall clock is kept as the floor
        let first = channels
            .publish(1, move |_| async move { Ok(message(1, 1, "a", future)) })
            .await
            .unwrap();
        let _rx = channels.subscribe(1);
        let second = channels
            .publish(1, |at| async move { Ok(message(2, 1, "b", at)) })
            .await
            .unwrap();

        assert_eq!(first.message.sent_at, future);
        assert!(second.message.sent_at >= first.message.sent_at);
    }

    #[tokio::test]
    async fn idle_groups_are_garbage_collected() {
        let channels = RoomChannels::new();

        let rx = channels.subscribe(5);
        assert!(channels.is_active(5));
        assert_eq!(channels.receiver_count(5), 1);

        channels.release(5);
        assert!(channels.is_active(5), "still subscribed");

        drop(rx);
        channels.release(5);
        assert!(!channels.is_active(5));

        // publishing to nobody leaves nothing behind
        channels
            .publish(5, |at| async move { Ok(message(1, 5, "x", at)) })
            .await
            .unwrap();
        assert!(!channels.is_active(5));
    }

    #[tokio::test]
    async fn failed_publish_leaves_no_group_behind() {
        let channels = RoomChannels::new();

        let result = channels
            .publish(7, |_| async { Err(ChatError::RoomNotFound) })
            .await;

        assert!(matches!(result, Err(ChatError::RoomNotFound)));
        assert!(!channels.is_active(7));
    }

    #[tokio::test]
    async fn publish_racing_close_does_not_resurrect_the_group() {
        let channels = Arc::new(RoomChannels::new());
        let rx = channels.subscribe(8);
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();

        let in_flight = {
            let channels = channels.clone();
            tokio::spawn(async move {
                channels
                    .publish(8, move |_| async move {
                        let _ = entered_tx.send(());
                        let _ = resume_rx.await;
                        Err::<Message, _>(ChatError::RoomNotFound)
                    })
                    .await
            })
        };

        entered_rx.await.unwrap();
        channels.close(8);
        drop(rx);

        // a frame arriving after the teardown recreates the group for its publish
        let late = channels
            .publish(8, |_| async { Err(ChatError::RoomNotFound) })
            .await;
        assert!(late.is_err());

        resume_tx.send(()).unwrap();
        assert!(in_flight.await.unwrap().is_err());
        assert!(!channels.is_active(8));
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let channels = RoomChannels::new();
        let mut rx = channels.subscribe(9);

        channels.close(9);

        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(!channels.is_active(9));
    }
}
