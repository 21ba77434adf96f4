//! Unit tests for the per-session outbound queue backpressure policy.

use fxpulse::fanout::session::{CloseReason, Outbound, OutboundQueue, QueuePop};

fn drain_texts(queue: &OutboundQueue) -> Vec<String> {
    let mut texts = Vec::new();
    while let Some(item) = try_pop(queue) {
        if let Outbound::Text { text, .. } = item {
            texts.push(text);
        }
    }
    texts
}

fn try_pop(queue: &OutboundQueue) -> Option<Outbound> {
    if queue.is_empty() {
        return None;
    }
    match futures_util::FutureExt::now_or_never(queue.pop())? {
        QueuePop::Item(item) => Some(item),
        QueuePop::Closed(_) => None,
    }
}

#[test]
fn fifo_below_capacity() {
    let queue = OutboundQueue::new(4, 100);
    queue.push_text("a".into(), true);
    queue.push_text("b".into(), false);
    assert_eq!(drain_texts(&queue), vec!["a", "b"]);
    assert_eq!(queue.drops(), 0);
}

#[test]
fn oldest_price_update_is_shed_when_full() {
    let queue = OutboundQueue::new(2, 100);
    queue.push_text("p1".into(), true);
    queue.push_text("p2".into(), true);
    queue.push_text("p3".into(), true);

    assert_eq!(queue.drops(), 1);
    assert_eq!(drain_texts(&queue), vec!["p2", "p3"]);
}

#[test]
fn alerts_are_never_dropped() {
    let queue = OutboundQueue::new(2, 100);
    queue.push_text("p1".into(), true);
    queue.push_text("p2".into(), true);
    queue.push_text("alert".into(), false);
    queue.push_text("ready".into(), false);

    // Non-droppable frames push the queue past its nominal capacity.
    assert_eq!(queue.drops(), 0);
    assert_eq!(drain_texts(&queue), vec!["p1", "p2", "alert", "ready"]);
}

#[test]
fn incoming_update_is_shed_when_only_alerts_are_buffered() {
    let queue = OutboundQueue::new(2, 100);
    queue.push_text("alert1".into(), false);
    queue.push_text("alert2".into(), false);
    queue.push_text("price".into(), true);

    assert_eq!(queue.drops(), 1);
    assert_eq!(drain_texts(&queue), vec!["alert1", "alert2"]);
}

#[test]
fn drop_threshold_closes_the_session() {
    let queue = OutboundQueue::new(1, 2);
    queue.push_text("p1".into(), true);
    for i in 0..4 {
        queue.push_text(format!("p{}", i + 2), true);
    }
    assert!(queue.is_closed());
    assert!(queue.drops() > 2);
}

#[tokio::test]
async fn closed_queue_reports_the_reason_after_draining() {
    let queue = OutboundQueue::new(4, 100);
    queue.push_text("last".into(), false);
    queue.close(CloseReason::SlowConsumer);

    match queue.pop().await {
        QueuePop::Item(Outbound::Text { text, .. }) => assert_eq!(text, "last"),
        other => panic!("expected the buffered frame, got {other:?}"),
    }
    assert_eq!(queue.pop().await, QueuePop::Closed(CloseReason::SlowConsumer));
}

#[tokio::test]
async fn pop_wakes_on_push() {
    let queue = std::sync::Arc::new(OutboundQueue::new(4, 100));
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.pop().await })
    };
    tokio::task::yield_now().await;
    queue.push_text("wake".into(), false);

    match waiter.await.unwrap() {
        QueuePop::Item(Outbound::Text { text, .. }) => assert_eq!(text, "wake"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn pushes_after_close_are_ignored() {
    let queue = OutboundQueue::new(4, 100);
    queue.close(CloseReason::SessionEnded);
    queue.push_text("late".into(), false);
    assert!(queue.is_empty());
}
