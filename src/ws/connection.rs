//! WebSocket Connection Management
//!
//! A connection moves through `Connecting -> Authenticated -> Bound -> Closed`, and
//! may jump to `Closed` from any state. Authentication, authorization and binding all
//! happen before the HTTP upgrade: a refused connection never touches presence, the
//! broadcast groups or the notification bindings.
//!
//! The bindings are RAII guards. Dropping a [`RoomConnection`] releases its presence
//! reference and its broadcast subscription; dropping a [`GlobalConnection`] removes
//! its notification binding. Cleanup therefore runs exactly once whether the socket
//! closes, the upgrade fails or a task panics.

use crate::core::{AppState, ChatError, IdentityVerifier};
use crate::dtos::{ChatBroadcastFrame, NotificationFrame, WsErrorFrame};
use crate::entities::{Identity, Room, RoomId};
use crate::ws::event_handlers::process_message;
use crate::ws::usermap::ConnectionId;
use crate::ws::utils::send_json;
use crate::ws::{PING_INTERVAL_SECONDS, RATE_LIMITER_MILLIS, SHUTDOWN_GRACE_MILLIS};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval, timeout};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, instrument, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Local signals from a connection's reader to its writer task.
#[derive(Debug, Clone)]
pub enum InternalSignal {
    Shutdown,
    Error(WsErrorFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Room(RoomId),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Bound,
    Closed,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Bound => "bound",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated) | (Authenticated, Bound) | (Connecting | Authenticated | Bound, Closed)
        )
    }
}

#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    kind: ConnectionKind,
    state: ConnectionState,
    identity: Option<Identity>,
}

impl ConnectionContext {
    pub fn new(kind: ConnectionKind) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            state: ConnectionState::Connecting,
            identity: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Known once the connection is authenticated.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn advance(&mut self, next: ConnectionState) -> Result<(), ChatError> {
        if !self.state.can_transition_to(next) {
            return Err(ChatError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        debug!(
            connection_id = self.id,
            from = self.state.name(),
            to = next.name(),
            "Connection state changed"
        );
        self.state = next;
        Ok(())
    }

    /// `Connecting -> Authenticated`. A missing or refused credential closes the
    /// connection.
    pub fn authenticate(
        &mut self,
        verifier: &dyn IdentityVerifier,
        credential: Option<&str>,
    ) -> Result<Identity, ChatError> {
        let verified = credential
            .ok_or(ChatError::AuthenticationFailed)
            .and_then(|credential| verifier.verify(credential));

        match verified {
            Ok(identity) => {
                self.advance(ConnectionState::Authenticated)?;
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn bind(&mut self) -> Result<(), ChatError> {
        self.advance(ConnectionState::Bound)
    }

    /// Moves to `Closed`; closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            info!(connection_id = self.id, kind = ?self.kind, "Connection closed");
        }
    }
}

/// Bound room connection: one presence reference plus one broadcast subscription.
pub struct RoomConnection {
    ctx: ConnectionContext,
    room: Room,
    identity: Identity,
    state: Arc<AppState>,
    subscription: Option<Receiver<Arc<ChatBroadcastFrame>>>,
}

impl RoomConnection {
    /// Authenticates, authorizes and binds a connection to room `rid`.
    #[instrument(skip(state, credential))]
    pub async fn open(
        state: Arc<AppState>,
        rid: RoomId,
        credential: Option<&str>,
    ) -> Result<Self, ChatError> {
        let mut ctx = ConnectionContext::new(ConnectionKind::Room(rid));
        let identity = ctx.authenticate(state.verifier.as_ref(), credential)?;

        let room = match state.room.authorize_connection(&identity, rid).await {
            Ok(room) => room,
            Err(e) => {
                warn!(uid = %identity, "Room connection refused: {}", e);
                ctx.close();
                return Err(e);
            }
        };

        ctx.bind()?;
        state.presence.join(rid, &identity);
        let subscription = state.chats_online.subscribe(rid);
        info!(uid = %identity, connection_id = ctx.id(), "Room connection bound");

        Ok(Self {
            ctx,
            room,
            identity,
            state,
            subscription: Some(subscription),
        })
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Hands the broadcast subscription to the writer task.
    pub fn take_subscription(&mut self) -> Option<Receiver<Arc<ChatBroadcastFrame>>> {
        self.subscription.take()
    }

    /// Releases presence and the broadcast subscription, once.
    pub fn close(&mut self) {
        if self.ctx.state() == ConnectionState::Closed {
            return;
        }
        // the receiver must be gone before the group is offered for collection
        drop(self.subscription.take());
        self.state.presence.leave(self.room.rid, &self.identity);
        self.state.chats_online.release(self.room.rid);
        self.ctx.close();
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bound global connection: one notification binding.
pub struct GlobalConnection {
    ctx: ConnectionContext,
    identity: Identity,
    state: Arc<AppState>,
    signals: Option<UnboundedReceiver<Arc<NotificationFrame>>>,
}

impl GlobalConnection {
    #[instrument(skip(state, credential))]
    pub fn open(state: Arc<AppState>, credential: Option<&str>) -> Result<Self, ChatError> {
        let mut ctx = ConnectionContext::new(ConnectionKind::Global);
        let identity = ctx.authenticate(state.verifier.as_ref(), credential)?;
        ctx.bind()?;

        let (tx, rx) = unbounded_channel();
        state.users_online.register_online(&identity, ctx.id(), tx);
        info!(uid = %identity, connection_id = ctx.id(), "Global connection bound");

        Ok(Self {
            ctx,
            identity,
            state,
            signals: Some(rx),
        })
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn take_signals(&mut self) -> Option<UnboundedReceiver<Arc<NotificationFrame>>> {
        self.signals.take()
    }

    pub fn close(&mut self) {
        if self.ctx.state() == ConnectionState::Closed {
            return;
        }
        self.state
            .users_online
            .remove_from_online(&self.identity, self.ctx.id());
        self.ctx.close();
    }
}

impl Drop for GlobalConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/*------------------------------------------- */
/* Socket tasks                                */
/*------------------------------------------- */

/// Drives an upgraded room socket until either side gives up.
#[instrument(skip_all, fields(rid = connection.room().rid, uid = %connection.identity()))]
pub async fn handle_room_socket(ws: WebSocket, mut connection: RoomConnection) {
    info!("Room WebSocket connection established");
    let Some(subscription) = connection.take_subscription() else {
        error!("Room connection has no subscription");
        return;
    };

    let (ws_tx, ws_rx) = ws.split();
    let (int_tx, int_rx) = unbounded_channel::<InternalSignal>();

    let writer = tokio::spawn(write_room_ws(ws_tx, BroadcastStream::new(subscription), int_rx));
    let reader = listen_room_ws(ws_rx, &connection, int_tx.clone());
    drive(reader, writer, &int_tx).await;

    connection.close();
}

/// Drives an upgraded global socket. Clients only listen on this socket; their frames
/// are read for liveness and otherwise ignored.
#[instrument(skip_all, fields(uid = %connection.identity()))]
pub async fn handle_global_socket(ws: WebSocket, mut connection: GlobalConnection) {
    info!("Global WebSocket connection established");
    let Some(signals) = connection.take_signals() else {
        error!("Global connection has no signal receiver");
        return;
    };

    let (ws_tx, ws_rx) = ws.split();
    let idle_timeout = connection.state.idle_timeout;
    let (int_tx, int_rx) = unbounded_channel::<InternalSignal>();

    let writer = tokio::spawn(write_global_ws(ws_tx, signals, int_rx));
    let reader = listen_global_ws(ws_rx, idle_timeout);
    drive(reader, writer, &int_tx).await;

    connection.close();
}

/// Runs the reader inline and the writer as a task. Whichever ends first ends the
/// other: a finished reader asks the writer to flush and stop, a finished writer drops
/// the reader.
async fn drive<R>(reader: R, mut writer: JoinHandle<()>, int_tx: &UnboundedSender<InternalSignal>)
where
    R: std::future::Future<Output = ()>,
{
    tokio::pin!(reader);
    let writer_finished = tokio::select! {
        _ = &mut reader => false,
        _ = &mut writer => true,
    };

    if !writer_finished {
        let _ = int_tx.send(InternalSignal::Shutdown);
        if timeout(Duration::from_millis(SHUTDOWN_GRACE_MILLIS), &mut writer)
            .await
            .is_err()
        {
            warn!("Write task did not stop in time, aborting it");
            writer.abort();
            let _ = writer.await;
        }
    }
}

#[instrument(skip_all)]
async fn write_room_ws(
    mut websocket_tx: SplitSink<WebSocket, Message>,
    mut broadcasts: BroadcastStream<Arc<ChatBroadcastFrame>>,
    mut internal_rx: UnboundedReceiver<InternalSignal>,
) {
    debug!("Write task started");
    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECONDS));
    ping.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            item = broadcasts.next() => match item {
                Some(Ok(frame)) => {
                    if send_json(&mut websocket_tx, frame.as_ref()).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Connection lagged behind the room, frames dropped");
                }
                None => {
                    info!("Room broadcast channel closed");
                    break;
                }
            },

            signal = internal_rx.recv() => match signal {
                Some(InternalSignal::Error(frame)) => {
                    if send_json(&mut websocket_tx, &frame).await.is_err() {
                        break;
                    }
                }
                Some(InternalSignal::Shutdown) | None => break,
            },

            _ = ping.tick() => {
                if websocket_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = websocket_tx.send(Message::Close(None)).await;
    debug!("Write task terminated");
}

#[instrument(skip_all)]
async fn write_global_ws(
    mut websocket_tx: SplitSink<WebSocket, Message>,
    mut notifications: UnboundedReceiver<Arc<NotificationFrame>>,
    mut internal_rx: UnboundedReceiver<InternalSignal>,
) {
    debug!("Write task started");
    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECONDS));
    ping.tick().await;

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(frame) => {
                    if send_json(&mut websocket_tx, frame.as_ref()).await.is_err() {
                        break;
                    }
                }
                // binding removed
                None => break,
            },

            signal = internal_rx.recv() => match signal {
                Some(InternalSignal::Error(frame)) => {
                    if send_json(&mut websocket_tx, &frame).await.is_err() {
                        break;
                    }
                }
                Some(InternalSignal::Shutdown) | None => break,
            },

            _ = ping.tick() => {
                if websocket_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = websocket_tx.send(Message::Close(None)).await;
    debug!("Write task terminated");
}

#[instrument(skip_all)]
async fn listen_room_ws(
    mut websocket_rx: SplitStream<WebSocket>,
    connection: &RoomConnection,
    internal_tx: UnboundedSender<InternalSignal>,
) {
    debug!("Listen task started");
    let state = &connection.state;
    let rid = connection.room.rid;
    let idle_timeout = state.idle_timeout;
    let mut rate_limiter = interval(Duration::from_millis(RATE_LIMITER_MILLIS));

    loop {
        let msg = match timeout(idle_timeout, websocket_rx.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                warn!("WebSocket error: {:?}", e);
                break;
            }
            Ok(None) => {
                info!("WebSocket stream ended");
                break;
            }
            Err(_) => {
                warn!(timeout_secs = idle_timeout.as_secs(), "Connection timeout");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                rate_limiter.tick().await;
                match process_message(state, rid, &connection.identity, text.as_str()).await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!(code = e.code(), "Frame refused: {}", e);
                        let _ = internal_tx.send(InternalSignal::Error(WsErrorFrame::from(&e)));
                        if e.is_fatal_for_connection() {
                            break;
                        }
                    }
                }
            }
            Message::Binary(_) => {
                let e = ChatError::InvalidFrame("binary frames are not supported".to_string());
                let _ = internal_tx.send(InternalSignal::Error(WsErrorFrame::from(&e)));
            }
            Message::Close(_) => {
                info!("Close message received");
                break;
            }
            // ping/pong only keep the connection alive
            _ => {}
        }
    }
    debug!("Listen task terminated");
}

#[instrument(skip_all)]
async fn listen_global_ws(mut websocket_rx: SplitStream<WebSocket>, idle_timeout: Duration) {
    debug!("Listen task started");
    loop {
        match timeout(idle_timeout, websocket_rx.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                info!("Global WebSocket closed by client");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                warn!("WebSocket error: {:?}", e);
                break;
            }
            Err(_) => {
                warn!(timeout_secs = idle_timeout.as_secs(), "Connection timeout");
                break;
            }
        }
    }
    debug!("Listen task terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JwtVerifier;
    use crate::core::encode_jwt;
    use crate::repositories::test_support::seeded_pool;

    const SECRET: &str = "connection-secret";

    async fn state() -> Arc<AppState> {
        Arc::new(AppState::new(seeded_pool().await, SECRET.to_string()))
    }

    fn token(uid: &str) -> String {
        encode_jwt(uid, true, chrono::Duration::hours(1), SECRET).unwrap()
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Bound));
        assert!(Bound.can_transition_to(Closed));
        assert!(Connecting.can_transition_to(Closed));

        assert!(!Connecting.can_transition_to(Bound));
        assert!(!Bound.can_transition_to(Authenticated));
        assert!(!Closed.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn failed_authentication_closes_context() {
        let verifier = JwtVerifier::new(SECRET);

        let mut ctx = ConnectionContext::new(ConnectionKind::Global);
        assert!(matches!(
            ctx.authenticate(&verifier, None),
            Err(ChatError::AuthenticationFailed)
        ));
        assert_eq!(ctx.state(), ConnectionState::Closed);
        assert!(ctx.identity().is_none());

        let mut ctx = ConnectionContext::new(ConnectionKind::Room(1));
        let identity = ctx.authenticate(&verifier, Some(&token("buyer-bea"))).unwrap();
        assert_eq!(identity, "buyer-bea");
        assert_eq!(ctx.state(), ConnectionState::Authenticated);
        assert!(matches!(
            ctx.authenticate(&verifier, Some(&token("buyer-bea"))),
            Err(ChatError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionContext::new(ConnectionKind::Global);
        let b = ConnectionContext::new(ConnectionKind::Global);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn participant_binds_and_drop_cleans_up() {
        let state = state().await;

        let connection = RoomConnection::open(state.clone(), 1, Some(&token("seller-sam")))
            .await
            .unwrap();
        assert_eq!(connection.context().state(), ConnectionState::Bound);
        assert!(state.presence.is_present(1, "seller-sam"));
        assert_eq!(state.chats_online.receiver_count(1), 1);

        drop(connection);
        assert!(!state.presence.is_present(1, "seller-sam"));
        assert!(!state.chats_online.is_active(1));
    }

    #[tokio::test]
    async fn refused_connections_touch_no_shared_state() {
        let state = state().await;

        let outsider = RoomConnection::open(state.clone(), 1, Some(&token("outsider-olga"))).await;
        assert!(matches!(outsider, Err(ChatError::AuthorizationDenied)));

        let missing = RoomConnection::open(state.clone(), 77, Some(&token("seller-sam"))).await;
        assert!(matches!(missing, Err(ChatError::RoomNotFound)));

        let anonymous = RoomConnection::open(state.clone(), 1, None).await;
        assert!(matches!(anonymous, Err(ChatError::AuthenticationFailed)));

        assert!(!state.presence.is_present(1, "outsider-olga"));
        assert_eq!(state.presence.active_rooms(), 0);
        assert!(!state.chats_online.is_active(1));
        assert!(!state.chats_online.is_active(77));
    }

    #[tokio::test]
    async fn closing_twice_releases_once() {
        let state = state().await;

        let mut first = RoomConnection::open(state.clone(), 1, Some(&token("seller-sam")))
            .await
            .unwrap();
        let _second = RoomConnection::open(state.clone(), 1, Some(&token("seller-sam")))
            .await
            .unwrap();

        first.close();
        first.close();
        assert!(state.presence.is_present(1, "seller-sam"), "second tab still open");
        drop(first);
        assert!(state.presence.is_present(1, "seller-sam"));
    }

    #[tokio::test]
    async fn global_binding_lives_as_long_as_the_connection() {
        let state = state().await;

        let connection = GlobalConnection::open(state.clone(), Some(&token("buyer-bea"))).unwrap();
        assert_eq!(connection.context().kind(), ConnectionKind::Global);
        assert!(state.users_online.is_user_online("buyer-bea"));

        drop(connection);
        assert!(!state.users_online.is_user_online("buyer-bea"));

        let refused = GlobalConnection::open(state.clone(), Some("garbage"));
        assert!(refused.is_err());
        assert_eq!(state.users_online.online_count(), 0);
    }

    #[tokio::test]
    async fn global_queue_carries_notifications_until_closed() {
        let state = state().await;

        let mut connection = GlobalConnection::open(state.clone(), Some(&token("buyer-bea"))).unwrap();
        let mut notifications = connection.take_signals().unwrap();
        assert!(connection.take_signals().is_none());

        let frame = Arc::new(NotificationFrame {
            sender: "seller-sam".to_string(),
            message: "price drop".to_string(),
            room: "Calculus textbook".to_string(),
        });
        assert_eq!(state.users_online.notify("buyer-bea", frame), 1);
        assert_eq!(notifications.recv().await.unwrap().message, "price drop");

        connection.close();
        assert!(notifications.recv().await.is_none());
    }
}
