//! Backoff against an unreachable endpoint
//!
//! Connects to an address nobody listens on and shows the retry schedule
//! until the attempt limit is reached.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:1, 5 attempts
//! cargo run --example reconnect_unreachable
//!
//! # Custom target and attempt limit
//! cargo run --example reconnect_unreachable -- 10.255.255.1:5672 8
//! ```

use msglink::{
    ConnectionId, ConnectionOptions, Container, Context, ErrorCondition, MessagingHandler,
    ReconnectConfig,
};
use std::env;
use std::time::{Duration, Instant};

struct RetryWatcher {
    url: String,
    max_attempts: u32,
    started: Instant,
}

impl RetryWatcher {
    fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl MessagingHandler for RetryWatcher {
    fn on_container_start(&mut self, ctx: &mut Context<'_>) {
        let reconnect =
            ReconnectConfig::with_delays(Duration::from_millis(100), Duration::from_secs(2))
                .max_attempts(Some(self.max_attempts));
        let options = ConnectionOptions::new()
            .reconnect(reconnect)
            .connect_timeout(Duration::from_secs(1));
        if let Err(e) = ctx.connect(&self.url, options) {
            eprintln!("[ERROR] {}", e);
        }
    }

    fn on_connection_reconnecting(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        println!(
            "[{:>6} ms] Attempt {} failed on {}",
            self.elapsed_ms(),
            ctx.attempt_count(conn).unwrap_or(0),
            ctx.current_endpoint(conn).map(|e| e.to_string()).unwrap_or_default()
        );
    }

    fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        println!("[{:>6} ms] Unexpectedly connected; closing", self.elapsed_ms());
        let _ = ctx.close(conn);
    }

    fn on_transport_error(
        &mut self,
        _ctx: &mut Context<'_>,
        _conn: ConnectionId,
        condition: &ErrorCondition,
    ) {
        println!("[{:>6} ms] Giving up: {}", self.elapsed_ms(), condition);
    }

    fn on_transport_close(&mut self, _ctx: &mut Context<'_>, conn: ConnectionId) {
        println!("[{:>6} ms] {} finished", self.elapsed_ms(), conn);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_target(false)
        .init();

    let url = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:1".to_string());
    let max_attempts = env::args()
        .nth(2)
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(5);

    println!("=== Reconnect Backoff Demo ===");
    println!("Target: {}, max attempts: {}\n", url, max_attempts);

    let mut container = Container::new(RetryWatcher {
        url,
        max_attempts,
        started: Instant::now(),
    });
    container.run().await?;
    Ok(())
}
