//! Per-session state: the outbound queue with its backpressure policy,
//! and the socket loop handling inbound control messages.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::keys;
use crate::fanout::messages::{
    envelope, events, AllPricesResponse, ConnectionEstablished, InboundEnvelope,
    PairSelection, Pong, PriceError, PriceResponse, ServerStats, SubscriptionConfirmed,
    SubscriptionError, SubscriptionsInfo, UnsubscriptionConfirmed,
};
use crate::fanout::FanoutState;
use crate::models::PriceQuote;

/// Buffered outbound frames per session before the drop policy engages.
pub const OUTBOUND_CAPACITY: usize = 64;
/// Price-update drops after which a session is closed as a slow consumer.
pub const SLOW_CONSUMER_DROPS: u64 = 100;

/// Close code for capacity and slow-consumer rejections (try again later).
const CLOSE_OVERLOADED: u16 = 1013;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SlowConsumer,
    SessionEnded,
}

/// One queued outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text { text: String, droppable: bool },
    Ping,
}

/// Result of waiting on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePop {
    Item(Outbound),
    Closed(CloseReason),
}

struct QueueInner {
    items: VecDeque<Outbound>,
    drops: u64,
    closed: Option<CloseReason>,
}

/// Bounded outbound buffer for one session.
///
/// When full, the oldest buffered price update is shed to make room for
/// the next one; alerts and `data_ready` are never dropped and may push
/// the queue past its nominal capacity. A session exceeding the drop
/// threshold is closed as a slow consumer.
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    drop_threshold: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize, drop_threshold: u64) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                drops: 0,
                closed: None,
            }),
            notify: Notify::new(),
            capacity,
            drop_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().expect("outbound queue lock poisoned")
    }

    /// Enqueue a text frame. `droppable` marks price updates, the only
    /// frames the backpressure policy may shed.
    pub fn push_text(&self, text: String, droppable: bool) {
        let mut inner = self.lock();
        if inner.closed.is_some() {
            return;
        }

        if inner.items.len() >= self.capacity {
            if droppable {
                let oldest_droppable = inner
                    .items
                    .iter()
                    .position(|i| matches!(i, Outbound::Text { droppable: true, .. }));
                match oldest_droppable {
                    Some(idx) => {
                        inner.items.remove(idx);
                    }
                    None => {
                        // Nothing sheddable buffered; shed the incoming
                        // update instead.
                        inner.drops += 1;
                        if inner.drops > self.drop_threshold {
                            inner.closed = Some(CloseReason::SlowConsumer);
                            self.notify.notify_one();
                        }
                        return;
                    }
                }
                inner.drops += 1;
                if inner.drops > self.drop_threshold {
                    inner.closed = Some(CloseReason::SlowConsumer);
                    self.notify.notify_one();
                    return;
                }
            }
            // Non-droppable frames are always queued.
        }

        inner.items.push_back(Outbound::Text { text, droppable });
        self.notify.notify_one();
    }

    /// Enqueue a keep-alive ping. Control frames bypass the capacity cap.
    pub fn push_ping(&self) {
        let mut inner = self.lock();
        if inner.closed.is_some() {
            return;
        }
        inner.items.push_back(Outbound::Ping);
        self.notify.notify_one();
    }

    /// Wait for the next frame, or for the queue to close once drained.
    pub async fn pop(&self) -> QueuePop {
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return QueuePop::Item(item);
                }
                if let Some(reason) = inner.closed {
                    return QueuePop::Closed(reason);
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self, reason: CloseReason) {
        let mut inner = self.lock();
        if inner.closed.is_none() {
            inner.closed = Some(reason);
        }
        self.notify.notify_one();
    }

    pub fn drops(&self) -> u64 {
        self.lock().drops
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

/// Drive one subscriber session to completion.
pub(crate) async fn handle_socket(socket: WebSocket, state: FanoutState) {
    let client_id = Uuid::new_v4().to_string();
    let queue = Arc::new(OutboundQueue::new(OUTBOUND_CAPACITY, SLOW_CONSUMER_DROPS));

    if state.registry.register(&client_id, queue.clone()).is_err() {
        // Raced past the pre-upgrade capacity gate.
        let mut socket = socket;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_OVERLOADED,
                reason: "capacity".into(),
            })))
            .await;
        return;
    }

    let stats = state.registry.stats();
    info!(client_id = %client_id, active = stats.active_sessions, "session connected");
    queue.push_text(
        envelope(
            events::CONNECTION_ESTABLISHED,
            &ConnectionEstablished {
                message: "Connected to FX data pipeline fan-out server".to_string(),
                client_id: client_id.clone(),
                tracked_pairs: state.config.tracked_pairs.clone(),
                pair_count: state.config.tracked_pairs.len(),
                max_clients: state.config.fanout_max_clients,
                active_clients: stats.active_sessions,
                timestamp: Utc::now(),
            },
        ),
        false,
    );

    let (mut sender, mut receiver) = socket.split();

    let writer_queue = queue.clone();
    let writer = tokio::spawn(async move {
        loop {
            match writer_queue.pop().await {
                QueuePop::Item(Outbound::Text { text, .. }) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                QueuePop::Item(Outbound::Ping) => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                QueuePop::Closed(CloseReason::SlowConsumer) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_OVERLOADED,
                            reason: "slow-consumer".into(),
                        })))
                        .await;
                    break;
                }
                QueuePop::Closed(CloseReason::SessionEnded) => break,
            }
        }
    });

    let mut ping_interval = tokio::time::interval(state.config.fanout_ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first tick would ping before the handshake settles.
    ping_interval.tick().await;
    let mut awaiting_pong: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

    loop {
        tokio::select! {
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &client_id, &queue, text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = None;
                    }
                    // Inbound pings are answered by the websocket layer.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(client_id, error = %e, "socket error");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                queue.push_ping();
                if awaiting_pong.is_none() {
                    awaiting_pong = Some(Box::pin(tokio::time::sleep(
                        state.config.fanout_ping_timeout,
                    )));
                }
            }
            _ = async {
                match awaiting_pong.as_mut() {
                    Some(deadline) => deadline.as_mut().await,
                    None => std::future::pending().await,
                }
            } => {
                info!(client_id = %client_id, "ping timeout, closing session");
                break;
            }
        }
        if queue.is_closed() {
            break;
        }
    }

    state.registry.unregister(&client_id);
    queue.close(CloseReason::SessionEnded);
    let _ = writer.await;
    info!(client_id = %client_id, drops = queue.drops(), "session closed");
}

async fn handle_inbound(
    state: &FanoutState,
    client_id: &str,
    queue: &Arc<OutboundQueue>,
    text: &str,
) {
    let frame: InboundEnvelope = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(client_id, error = %e, "unparseable inbound frame ignored");
            return;
        }
    };

    match frame.event.as_str() {
        "subscribe" => handle_subscribe(state, client_id, queue, &frame.data),
        "unsubscribe" => handle_unsubscribe(state, client_id, queue, &frame.data),
        "get_subscriptions" => {
            if let Some((pairs, wildcard)) = state.registry.subscriptions_of(client_id) {
                queue.push_text(
                    envelope(
                        events::SUBSCRIPTIONS_INFO,
                        &SubscriptionsInfo {
                            pair_count: pairs.len(),
                            subscribed_pairs: pairs,
                            subscribed_to_all: wildcard,
                            timestamp: Utc::now(),
                        },
                    ),
                    false,
                );
            }
        }
        "request_price" => handle_request_price(state, queue, &frame.data).await,
        "request_all_prices" => handle_request_all_prices(state, queue).await,
        "get_server_stats" => {
            let stats = state.registry.stats();
            let active = stats.active_sessions.max(1);
            queue.push_text(
                envelope(
                    events::SERVER_STATS,
                    &ServerStats {
                        active_clients: stats.active_sessions,
                        max_clients: state.config.fanout_max_clients,
                        total_subscriptions: stats.total_subscriptions,
                        average_subs_per_client: stats.total_subscriptions as f64
                            / active as f64,
                        tracked_pairs: state.config.tracked_pairs.len(),
                        timestamp: Utc::now(),
                    },
                ),
                false,
            );
        }
        "ping" => {
            queue.push_text(
                envelope(events::PONG, &Pong { timestamp: Utc::now() }),
                false,
            );
        }
        other => {
            debug!(client_id, event = other, "unknown inbound event ignored");
        }
    }
}

fn handle_subscribe(
    state: &FanoutState,
    client_id: &str,
    queue: &Arc<OutboundQueue>,
    data: &serde_json::Value,
) {
    match PairSelection::parse(data) {
        Some(PairSelection::All) => {
            state
                .registry
                .subscribe_all(client_id, &state.config.tracked_pairs);
            info!(client_id, "subscribed to all pairs");
            queue.push_text(
                envelope(
                    events::SUBSCRIPTION_CONFIRMED,
                    &SubscriptionConfirmed {
                        pairs: state.config.tracked_pairs.clone(),
                        pair_count: state.config.tracked_pairs.len(),
                        subscribed_to_all: true,
                        timestamp: Utc::now(),
                    },
                ),
                false,
            );
        }
        Some(PairSelection::Pairs(pairs)) => {
            let invalid: Vec<&String> =
                pairs.iter().filter(|p| !state.config.is_tracked(p)).collect();
            if !invalid.is_empty() {
                // All-or-nothing: no room change on any invalid instrument.
                queue.push_text(
                    envelope(
                        events::SUBSCRIPTION_ERROR,
                        &SubscriptionError {
                            error: format!("invalid pairs: {invalid:?}"),
                            valid_pairs: state.config.tracked_pairs.clone(),
                        },
                    ),
                    false,
                );
                return;
            }
            state.registry.subscribe(client_id, &pairs);
            info!(client_id, pairs = pairs.len(), "subscribed");
            queue.push_text(
                envelope(
                    events::SUBSCRIPTION_CONFIRMED,
                    &SubscriptionConfirmed {
                        pair_count: pairs.len(),
                        pairs,
                        subscribed_to_all: false,
                        timestamp: Utc::now(),
                    },
                ),
                false,
            );
        }
        None => {
            queue.push_text(
                envelope(
                    events::SUBSCRIPTION_ERROR,
                    &SubscriptionError {
                        error: "expected pairs as a list or \"*\"".to_string(),
                        valid_pairs: state.config.tracked_pairs.clone(),
                    },
                ),
                false,
            );
        }
    }
}

fn handle_unsubscribe(
    state: &FanoutState,
    client_id: &str,
    queue: &Arc<OutboundQueue>,
    data: &serde_json::Value,
) {
    match PairSelection::parse(data) {
        Some(PairSelection::All) => {
            state.registry.unsubscribe_all(client_id);
            info!(client_id, "unsubscribed from all pairs");
            queue.push_text(
                envelope(
                    events::UNSUBSCRIPTION_CONFIRMED,
                    &UnsubscriptionConfirmed {
                        pairs: state.config.tracked_pairs.clone(),
                        message: "Unsubscribed from all pairs".to_string(),
                        timestamp: Utc::now(),
                    },
                ),
                false,
            );
        }
        Some(PairSelection::Pairs(pairs)) => {
            state.registry.unsubscribe(client_id, &pairs);
            info!(client_id, pairs = pairs.len(), "unsubscribed");
            queue.push_text(
                envelope(
                    events::UNSUBSCRIPTION_CONFIRMED,
                    &UnsubscriptionConfirmed {
                        message: format!("Unsubscribed from {} pairs", pairs.len()),
                        pairs,
                        timestamp: Utc::now(),
                    },
                ),
                false,
            );
        }
        None => {
            queue.push_text(
                envelope(
                    events::SUBSCRIPTION_ERROR,
                    &SubscriptionError {
                        error: "expected pairs as a list or \"*\"".to_string(),
                        valid_pairs: state.config.tracked_pairs.clone(),
                    },
                ),
                false,
            );
        }
    }
}

async fn handle_request_price(
    state: &FanoutState,
    queue: &Arc<OutboundQueue>,
    data: &serde_json::Value,
) {
    let instrument = data
        .get("instrument")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if !state.config.is_tracked(instrument) {
        queue.push_text(
            envelope(
                events::PRICE_ERROR,
                &PriceError {
                    error: format!("invalid instrument: {instrument}"),
                },
            ),
            false,
        );
        return;
    }

    match state.cache.get(&keys::prices(instrument)).await {
        Ok(Some(raw)) => match serde_json::from_str::<PriceQuote>(&raw) {
            Ok(price) => queue.push_text(
                envelope(
                    events::PRICE_RESPONSE,
                    &PriceResponse {
                        instrument: instrument.to_string(),
                        price,
                        timestamp: Utc::now(),
                    },
                ),
                false,
            ),
            Err(e) => {
                warn!(instrument, error = %e, "corrupt cached price");
                queue.push_text(
                    envelope(
                        events::PRICE_ERROR,
                        &PriceError {
                            error: format!("no cached price for {instrument}"),
                        },
                    ),
                    false,
                );
            }
        },
        Ok(None) => queue.push_text(
            envelope(
                events::PRICE_ERROR,
                &PriceError {
                    error: format!("no cached price for {instrument}"),
                },
            ),
            false,
        ),
        Err(e) => {
            warn!(instrument, error = %e, "cache read failed");
            queue.push_text(
                envelope(
                    events::PRICE_ERROR,
                    &PriceError {
                        error: "cache unavailable".to_string(),
                    },
                ),
                false,
            );
        }
    }
}

async fn handle_request_all_prices(state: &FanoutState, queue: &Arc<OutboundQueue>) {
    let mut prices: BTreeMap<String, PriceQuote> = BTreeMap::new();
    for instrument in &state.config.tracked_pairs {
        if let Ok(Some(raw)) = state.cache.get(&keys::prices(instrument)).await {
            if let Ok(price) = serde_json::from_str::<PriceQuote>(&raw) {
                prices.insert(instrument.clone(), price);
            }
        }
    }

    if prices.is_empty() {
        queue.push_text(
            envelope(
                events::PRICE_ERROR,
                &PriceError {
                    error: "no cached prices available".to_string(),
                },
            ),
            false,
        );
        return;
    }
    queue.push_text(
        envelope(
            events::ALL_PRICES_RESPONSE,
            &AllPricesResponse {
                pair_count: prices.len(),
                prices,
                timestamp: Utc::now(),
            },
        ),
        false,
    );
}
