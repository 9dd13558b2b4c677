//! Failover demonstration
//!
//! Runs two servers and one client in a single container. The primary
//! server drops the connection after the first message; the client fails
//! over to the backup, re-attaches its sender and carries on.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example failover
//! RUST_LOG=msglink=debug cargo run --example failover
//! ```

use msglink::error::condition;
use msglink::{
    ConnectionId, ConnectionOptions, Container, Context, Delivery, ErrorCondition, LinkId,
    LinkOptions, ListenerId, ListenerOptions, Message, MessagingHandler, ReconnectConfig, Tracker,
};
use std::time::Duration;

const MESSAGES: usize = 3;

struct Server {
    name: &'static str,
    drop_after: Option<usize>,
    received: usize,
    listener: Option<ListenerId>,
}

impl MessagingHandler for Server {
    fn on_listener_open(&mut self, _ctx: &mut Context<'_>, listener: ListenerId) {
        self.listener = Some(listener);
    }

    fn on_connection_open(&mut self, _ctx: &mut Context<'_>, conn: ConnectionId) {
        println!("[{}] Client connected ({})", self.name, conn);
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, delivery: Delivery, message: Message) {
        self.received += 1;
        println!("[{}] Received: {}", self.name, message.body_str().unwrap_or("<binary>"));
        if Some(self.received) == self.drop_after {
            println!("[{}] Simulating failure\n", self.name);
            let _ = ctx.close_with_error(
                delivery.connection(),
                ErrorCondition::new(condition::CONNECTION_FORCED, "simulated failure"),
            );
            if let Some(listener) = self.listener.take() {
                ctx.stop_listener(listener);
            }
        }
    }

    fn on_connection_close(&mut self, ctx: &mut Context<'_>, _conn: ConnectionId) {
        if let Some(listener) = self.listener.take() {
            ctx.stop_listener(listener);
        }
    }
}

#[derive(Default)]
struct Client {
    sent: usize,
    accepted: usize,
}

impl MessagingHandler for Client {
    fn on_container_start(&mut self, ctx: &mut Context<'_>) {
        let mut urls = Vec::new();
        for (name, drop_after) in [("Primary", Some(1)), ("Backup", None)] {
            let handler = ctx.add_handler(Box::new(Server {
                name,
                drop_after,
                received: 0,
                listener: None,
            }));
            let options = ListenerOptions::new().handler(handler);
            let listener = match ctx.listen("127.0.0.1:0", options) {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("[ERROR] Failed to listen: {}", e);
                    ctx.stop();
                    return;
                }
            };
            if let Some(addr) = ctx.listener_addr(listener) {
                println!("[{}] Listening on {}", name, addr);
                urls.push(addr.to_string());
            }
        }

        let reconnect =
            ReconnectConfig::with_delays(Duration::from_millis(200), Duration::from_secs(5))
                .max_attempts(Some(10))
                .failover_urls(&urls[1..]);
        let result = reconnect.and_then(|reconnect| {
            ctx.connect(&urls[0], ConnectionOptions::new().reconnect(reconnect))
        });
        if let Err(e) = result {
            eprintln!("[ERROR] Failed to connect: {}", e);
            ctx.stop();
        }
    }

    fn on_connection_start(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        let _ = ctx.open_sender(conn, "demo", LinkOptions::new());
    }

    fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        let endpoint = ctx.current_endpoint(conn).map(|e| e.to_string()).unwrap_or_default();
        if ctx.reconnected(conn) {
            println!("[Client] Reconnected to {}", endpoint);
        } else {
            println!("[Client] Connected to {}", endpoint);
        }
    }

    fn on_connection_reconnecting(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        // Unaccepted messages are resent after failover
        self.sent = self.accepted;
        println!(
            "[Client] Connection lost, retrying (attempt {})",
            ctx.attempt_count(conn).unwrap_or(0) + 1
        );
    }

    fn on_sendable(&mut self, ctx: &mut Context<'_>, link: LinkId) {
        while self.sent < MESSAGES && ctx.link_credit(link).unwrap_or(0) > 0 {
            let body = format!("message {}", self.sent + 1);
            if ctx.send(link, body).is_err() {
                break;
            }
            self.sent += 1;
        }
    }

    fn on_tracker_accept(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {
        self.accepted += 1;
        if self.accepted == MESSAGES {
            println!("[Client] All {} messages accepted", MESSAGES);
            let _ = ctx.close(tracker.connection());
        }
    }

    fn on_transport_error(
        &mut self,
        _ctx: &mut Context<'_>,
        _conn: ConnectionId,
        condition: &ErrorCondition,
    ) {
        eprintln!("[Client] Gave up: {}", condition);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    println!("=== Failover Demo ===\n");

    let mut container = Container::new(Client::default());
    container.run().await?;

    let client = container.handler();
    println!("\n=== Demo completed: {} messages accepted ===", client.accepted);
    Ok(())
}
