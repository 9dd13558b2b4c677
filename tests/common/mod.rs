//! Shared fixtures for container integration tests

#![allow(dead_code)]

use msglink::error::condition;
use msglink::{
    BarrierId, ConnectionId, ConnectionOptions, ConnectionState, Container, Context, Delivery,
    ErrorCondition, LinkId, LinkOptions, ListenerId, ListenerOptions, Message, MessagingHandler,
    ReconnectConfig, Tracker,
};
use std::time::Duration;

/// Route library logs to the test harness when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run a container until it stops on its own, failing after ten seconds
pub async fn run_to_completion<H: MessagingHandler>(container: &mut Container<H>) {
    let finished = tokio::time::timeout(Duration::from_secs(10), container.run())
        .await
        .expect("container did not finish");
    tokio_test::assert_ok!(finished);
}

/// Run `client` in a fresh container and hand it back afterwards
pub async fn run_client(client: Client) -> Client {
    let mut container = Container::new(client);
    run_to_completion(&mut container).await;
    container.into_handler()
}

/// A port nothing listens on
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{}", port)
}

/// Server that forcibly closes its connection after `expect` messages
///
/// Accepts one connection, then stops listening. Receivers it accepts are
/// granted a single credit and settle manually.
pub struct ServerFixture {
    expect: usize,
    messages: usize,
    clean_close: bool,
    listener: Option<ListenerId>,
    ready: Option<BarrierId>,
    closing: bool,
}

impl ServerFixture {
    pub fn new(expect: usize) -> Self {
        Self {
            expect,
            messages: 0,
            clean_close: false,
            listener: None,
            ready: None,
            closing: false,
        }
    }

    /// Close without an error condition
    pub fn clean_close(mut self) -> Self {
        self.clean_close = true;
        self
    }

    fn ready_on(mut self, barrier: BarrierId) -> Self {
        self.ready = Some(barrier);
        self
    }

    fn stop_listening(&mut self, ctx: &mut Context<'_>) {
        if let Some(listener) = self.listener.take() {
            ctx.stop_listener(listener);
        }
    }

    fn close(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        if self.closing {
            return;
        }
        self.closing = true;
        if self.clean_close {
            ctx.close(conn).unwrap();
        } else {
            ctx.close_with_error(
                conn,
                ErrorCondition::new(condition::CONNECTION_FORCED, "Failover testing"),
            )
            .unwrap();
        }
    }
}

impl MessagingHandler for ServerFixture {
    fn on_listener_open(&mut self, ctx: &mut Context<'_>, listener: ListenerId) {
        self.listener = Some(listener);
        if let Some(barrier) = self.ready.take() {
            ctx.arrive(barrier);
        }
    }

    fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        assert_eq!(ctx.listener_of(conn), self.listener);
        self.stop_listening(ctx);
        if self.messages == self.expect {
            self.close(ctx, conn);
        } else {
            ctx.open_connection(conn).unwrap();
        }
    }

    fn on_receiver_open(&mut self, ctx: &mut Context<'_>, link: LinkId) {
        ctx.accept_link(link, LinkOptions::new().credit_window(0).auto_accept(false))
            .unwrap();
        ctx.add_credit(link, 1).unwrap();
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, delivery: Delivery, _message: Message) {
        self.messages += 1;
        if self.messages == self.expect {
            self.close(ctx, delivery.connection());
        } else {
            ctx.accept(delivery).unwrap();
        }
    }

    fn on_transport_error(
        &mut self,
        ctx: &mut Context<'_>,
        _conn: ConnectionId,
        _condition: &ErrorCondition,
    ) {
        self.stop_listening(ctx);
    }
}

/// Callback tallies for one client connection
#[derive(Debug, Default)]
pub struct Counts {
    pub start: usize,
    pub open: usize,
    pub reconnecting: usize,
    pub close: usize,
    pub sender_open: usize,
    pub sender_reconnected: Vec<bool>,
    pub accepted: usize,
    pub transport_error: usize,
    pub transport_close: usize,
    pub errors: Vec<ErrorCondition>,
    pub reconnected: Vec<bool>,
    pub open_ports: Vec<u16>,
    pub final_attempts: Option<u32>,
    pub final_state: Option<ConnectionState>,
}

/// Client driving a connection through a set of fixture servers
///
/// With servers, the first is the primary and the rest are failover
/// endpoints; the client connects once every listener is open.
pub struct Client {
    pub counts: Counts,
    pub conn: Option<ConnectionId>,
    servers: Vec<ServerFixture>,
    server_options: ListenerOptions,
    url: Option<String>,
    options: ConnectionOptions,
    reconnect: Option<ReconnectConfig>,
    send: bool,
    close_on_reconnecting: bool,
    close_after: Option<Duration>,
    stop_after: Option<Duration>,
}

impl Client {
    pub fn to_url(url: impl Into<String>) -> Self {
        Self::build(Vec::new(), Some(url.into()))
    }

    pub fn to_servers(servers: Vec<ServerFixture>) -> Self {
        Self::build(servers, None)
    }

    fn build(servers: Vec<ServerFixture>, url: Option<String>) -> Self {
        Self {
            counts: Counts::default(),
            conn: None,
            servers,
            server_options: ListenerOptions::new(),
            url,
            options: ConnectionOptions::new(),
            reconnect: None,
            send: false,
            close_on_reconnecting: false,
            close_after: None,
            stop_after: None,
        }
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn server_options(mut self, options: ListenerOptions) -> Self {
        self.server_options = options;
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Open a sender, send one message, close once it is accepted
    pub fn send_one(mut self) -> Self {
        self.send = true;
        self
    }

    pub fn close_on_reconnecting(mut self) -> Self {
        self.close_on_reconnecting = true;
        self
    }

    /// Close the connection from a timer `delay` after it starts
    pub fn close_after(mut self, delay: Duration) -> Self {
        self.close_after = Some(delay);
        self
    }

    pub fn stop_after(mut self, delay: Duration) -> Self {
        self.stop_after = Some(delay);
        self
    }
}

impl MessagingHandler for Client {
    fn on_container_start(&mut self, ctx: &mut Context<'_>) {
        if let Some(delay) = self.stop_after {
            ctx.schedule(delay, |ctx| ctx.stop());
        }

        let mut options = self.options.clone();
        if let Some(url) = self.url.clone() {
            if let Some(reconnect) = self.reconnect.clone() {
                options = options.reconnect(reconnect);
            }
            ctx.connect(&url, options).unwrap();
            return;
        }

        let barrier = ctx.barrier(self.servers.len());
        let mut urls = Vec::new();
        for server in self.servers.drain(..) {
            let handler = ctx.add_handler(Box::new(server.ready_on(barrier)));
            let listener = ctx
                .listen("127.0.0.1:0", self.server_options.clone().handler(handler))
                .unwrap();
            let port = ctx.listener_addr(listener).unwrap().port();
            urls.push(format!("127.0.0.1:{}", port));
        }

        if let Some(reconnect) = self.reconnect.clone() {
            options = options.reconnect(reconnect.failover_urls(&urls[1..]).unwrap());
        }
        let primary = urls[0].clone();
        ctx.barrier_then(barrier, move |ctx| {
            ctx.connect(&primary, options).unwrap();
        });
    }

    fn on_connection_start(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        self.conn = Some(conn);
        self.counts.start += 1;
        if let Some(delay) = self.close_after {
            ctx.schedule(delay, move |ctx| ctx.close(conn).unwrap());
        }
        if self.send {
            ctx.open_sender(conn, "messages", LinkOptions::new()).unwrap();
        }
    }

    fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        self.counts.open += 1;
        self.counts.reconnected.push(ctx.reconnected(conn));
        assert_eq!(ctx.attempt_count(conn), Some(0));
        if let Some(endpoint) = ctx.current_endpoint(conn) {
            self.counts.open_ports.push(endpoint.port());
        }
    }

    fn on_connection_reconnecting(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        self.counts.reconnecting += 1;
        assert_eq!(ctx.connection_state(conn), Some(ConnectionState::Reconnecting));
        if self.close_on_reconnecting {
            ctx.close(conn).unwrap();
        }
    }

    fn on_connection_close(&mut self, _ctx: &mut Context<'_>, _conn: ConnectionId) {
        self.counts.close += 1;
    }

    fn on_sender_open(&mut self, ctx: &mut Context<'_>, link: LinkId) {
        self.counts.sender_open += 1;
        self.counts
            .sender_reconnected
            .push(ctx.reconnected(link.connection));
    }

    fn on_sendable(&mut self, ctx: &mut Context<'_>, link: LinkId) {
        if ctx.link_credit(link).unwrap_or(0) > 0 {
            ctx.send(link, "hello").unwrap();
        }
    }

    fn on_tracker_accept(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {
        self.counts.accepted += 1;
        ctx.close(tracker.connection()).unwrap();
    }

    fn on_transport_error(
        &mut self,
        _ctx: &mut Context<'_>,
        _conn: ConnectionId,
        condition: &ErrorCondition,
    ) {
        self.counts.transport_error += 1;
        self.counts.errors.push(condition.clone());
    }

    fn on_transport_close(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        self.counts.transport_close += 1;
        self.counts.final_attempts = ctx.attempt_count(conn);
        self.counts.final_state = ctx.connection_state(conn);
    }
}
