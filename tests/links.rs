//! Integration tests for link flow control and settlement

mod common;

use common::{init_tracing, run_to_completion};
use msglink::{
    ConnectionId, ConnectionOptions, Container, Context, Delivery, LinkId, LinkOptions, ListenerId,
    ListenerOptions, Message, MessagingHandler, Tracker,
};
use msglink::container::DEFAULT_CREDIT_WINDOW;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TOTAL: usize = 5;

/// Server side: sends `TOTAL` messages on any receiver the client opens
struct Producer {
    listener: Option<ListenerId>,
    sent: usize,
    accepted: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

impl MessagingHandler for Producer {
    fn on_listener_open(&mut self, _ctx: &mut Context<'_>, listener: ListenerId) {
        self.listener = Some(listener);
    }

    fn on_connection_open(&mut self, ctx: &mut Context<'_>, _conn: ConnectionId) {
        if let Some(listener) = self.listener.take() {
            ctx.stop_listener(listener);
        }
    }

    fn on_sendable(&mut self, ctx: &mut Context<'_>, link: LinkId) {
        while self.sent < TOTAL && ctx.link_credit(link).unwrap_or(0) > 0 {
            let message = Message::new(format!("msg-{}", self.sent)).with_subject("seq");
            ctx.send(link, message).unwrap();
            self.sent += 1;
        }
    }

    fn on_tracker_accept(&mut self, _ctx: &mut Context<'_>, _tracker: Tracker) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tracker_reject(&mut self, _ctx: &mut Context<'_>, _tracker: Tracker) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }
}

/// Client side: receives with a small credit window
struct Consumer {
    accepted: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
    reject: bool,
    window: u32,
    bodies: Vec<String>,
    max_credit_seen: u32,
}

impl MessagingHandler for Consumer {
    fn on_container_start(&mut self, ctx: &mut Context<'_>) {
        let producer = ctx.add_handler(Box::new(Producer {
            listener: None,
            sent: 0,
            accepted: self.accepted.clone(),
            rejected: self.rejected.clone(),
        }));
        let listener = ctx
            .listen("127.0.0.1:0", ListenerOptions::new().handler(producer))
            .unwrap();
        let port = ctx.listener_addr(listener).unwrap().port();
        ctx.connect(&format!("127.0.0.1:{}", port), ConnectionOptions::new())
            .unwrap();
    }

    fn on_connection_start(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        ctx.open_receiver(conn, "numbers", LinkOptions::new().credit_window(self.window))
            .unwrap();
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, delivery: Delivery, message: Message) {
        assert_eq!(message.subject(), Some("seq"));
        self.bodies.push(message.body_str().unwrap().to_string());
        let credit = ctx.link_credit(delivery.link).unwrap_or(0);
        self.max_credit_seen = self.max_credit_seen.max(credit);
        if self.reject {
            ctx.reject(delivery).unwrap();
        }

        if self.bodies.len() == TOTAL {
            // Let the automatic accept go out first
            ctx.post(move |ctx| ctx.close(delivery.connection()).unwrap());
        }
    }
}

impl Consumer {
    fn new(window: u32, reject: bool) -> Self {
        Self {
            accepted: Arc::new(AtomicUsize::new(0)),
            rejected: Arc::new(AtomicUsize::new(0)),
            reject,
            window,
            bodies: Vec::new(),
            max_credit_seen: 0,
        }
    }
}

#[tokio::test]
async fn test_credit_window_replenishes_and_auto_accepts() {
    init_tracing();
    let mut container = Container::new(Consumer::new(2, false));
    run_to_completion(&mut container).await;

    let consumer = container.into_handler();
    let expected: Vec<String> = (0..TOTAL).map(|i| format!("msg-{}", i)).collect();
    assert_eq!(consumer.bodies, expected);
    assert!(consumer.max_credit_seen <= 2);
    assert_eq!(consumer.accepted.load(Ordering::SeqCst), TOTAL);
    assert_eq!(consumer.rejected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_explicit_reject_overrides_auto_accept() {
    init_tracing();
    let mut container = Container::new(Consumer::new(DEFAULT_CREDIT_WINDOW, true));
    run_to_completion(&mut container).await;

    let consumer = container.into_handler();
    assert_eq!(consumer.bodies.len(), TOTAL);
    assert_eq!(consumer.rejected.load(Ordering::SeqCst), TOTAL);
    assert_eq!(consumer.accepted.load(Ordering::SeqCst), 0);
}
