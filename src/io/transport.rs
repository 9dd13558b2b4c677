//! Physical transport instances
//!
//! One [`TransportInstance`] wraps one TCP socket for the lifetime of one
//! connect attempt. All socket work happens in a single tokio task that reads
//! frames, writes queued frames, sends heartbeats and watches the idle timer.
//! Everything the task observes is reported through an event sink; the task
//! never touches connection state directly.
//!
//! Dropping an instance aborts its task. [`TransportInstance::finish`] instead
//! lets already queued frames drain before the socket is shut down.

use crate::endpoint::Endpoint;
use crate::error::{condition, ErrorCondition, LinkError, Result};
use crate::protocol::frame::{decode_frame, Frame};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Read buffer size
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Upper bound on draining queued frames in [`TransportInstance::finish`]
const FINISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Event reported by a transport task
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket is connected (or was accepted) and ready for frames
    Connected,
    /// A complete frame arrived
    Frame(Frame),
    /// Peer closed the socket cleanly (EOF)
    Closed,
    /// Socket-level or framing failure
    Failed(ErrorCondition),
}

/// Per-instance socket settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportConfig {
    /// Give up on the TCP connect after this long
    pub connect_timeout: Option<Duration>,
    /// Fail the transport if nothing arrives for this long
    pub idle_timeout: Option<Duration>,
}

enum Command {
    Send(Bytes),
    Heartbeat(Duration),
    Shutdown,
}

/// One physical connection attempt
///
/// # Examples
///
/// ```no_run
/// use msglink::io::{TransportConfig, TransportEvent, TransportInstance};
/// use msglink::Endpoint;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let endpoint: Endpoint = "127.0.0.1:5672".parse()?;
///     let transport = TransportInstance::connect(&endpoint, TransportConfig::default(), |event| {
///         println!("{:?}", event);
///         true
///     });
///     Ok(())
/// }
/// ```
pub struct TransportInstance {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    peer: String,
}

impl TransportInstance {
    /// Start connecting to `endpoint`
    ///
    /// Completion is reported as [`TransportEvent::Connected`] or
    /// [`TransportEvent::Failed`]. The sink returns `false` once nobody is
    /// listening, which ends the task.
    pub fn connect<F>(endpoint: &Endpoint, config: TransportConfig, sink: F) -> Self
    where
        F: FnMut(TransportEvent) -> bool + Send + 'static,
    {
        let host = endpoint.connect_host().to_string();
        let port = endpoint.port();
        let peer = endpoint.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        debug!(endpoint = %peer, "Starting transport");
        let task = tokio::spawn(async move {
            let mut sink = sink;
            let connect = TcpStream::connect((host.as_str(), port));
            let result = match config.connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, connect).await {
                    Ok(result) => result,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", limit),
                    )),
                },
                None => connect.await,
            };
            match result {
                Ok(stream) => run(stream, config, rx, sink).await,
                Err(e) => {
                    debug!(host = %host, port = port, error = %e, "Connect failed");
                    sink(TransportEvent::Failed(ErrorCondition::io(&e)));
                }
            }
        });

        Self {
            commands: tx,
            task: Some(task),
            peer,
        }
    }

    /// Wrap a socket accepted by a listener
    pub fn accept<F>(stream: TcpStream, config: TransportConfig, sink: F) -> Self
    where
        F: FnMut(TransportEvent) -> bool + Send + 'static,
    {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(stream, config, rx, sink));
        Self {
            commands: tx,
            task: Some(task),
            peer,
        }
    }

    /// Queue a frame for writing
    ///
    /// # Errors
    ///
    /// - [`LinkError::FrameTooLarge`] / [`LinkError::InvalidFrame`] - frame could not be encoded
    /// - [`LinkError::Io`] - the transport task has already exited
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let data = frame.encode()?;
        trace!(
            peer = %self.peer,
            frame_type = ?frame.frame_type(),
            size = data.len(),
            "Queue frame"
        );
        self.commands.send(Command::Send(data)).map_err(|_| {
            LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport closed",
            ))
        })
    }

    /// Start sending heartbeats at `interval`
    pub fn set_heartbeat(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let _ = self.commands.send(Command::Heartbeat(interval));
    }

    /// Peer address as text
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Flush queued frames, shut the socket down, and release the task
    ///
    /// The task reports nothing further.
    pub fn finish(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        self.task = None;
    }
}

impl Drop for TransportInstance {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            trace!(peer = %self.peer, "Aborting transport task");
            task.abort();
        }
    }
}

async fn run<F>(
    stream: TcpStream,
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut sink: F,
) where
    F: FnMut(TransportEvent) -> bool + Send + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "Failed to set TCP_NODELAY");
    }
    if let Ok(addr) = stream.peer_addr() {
        info!(peer_addr = %addr, "Transport connected");
    }
    if !sink(TransportEvent::Connected) {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut heartbeat: Option<Interval> = None;
    let mut last_read = Instant::now();

    loop {
        let idle_deadline = config.idle_timeout.map(|t| last_read + t);

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!("Peer closed transport");
                    sink(TransportEvent::Closed);
                    return;
                }
                Ok(n) => {
                    trace!(bytes = n, "Read from transport");
                    last_read = Instant::now();
                    loop {
                        match decode_frame(&mut buf) {
                            Ok(Some(frame)) => {
                                if !sink(TransportEvent::Frame(frame)) {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "Framing error");
                                sink(TransportEvent::Failed(ErrorCondition::new(
                                    condition::FRAMING_ERROR,
                                    e.to_string(),
                                )));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Transport read failed");
                    sink(TransportEvent::Failed(ErrorCondition::io(&e)));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!(error = %e, "Transport write failed");
                        sink(TransportEvent::Failed(ErrorCondition::io(&e)));
                        return;
                    }
                }
                Some(Command::Heartbeat(interval)) => {
                    debug!(interval_ms = interval.as_millis() as u64, "Heartbeat enabled");
                    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    heartbeat = Some(ticker);
                }
                Some(Command::Shutdown) | None => {
                    let _ = tokio::time::timeout(FINISH_TIMEOUT, writer.shutdown()).await;
                    trace!("Transport finished");
                    return;
                }
            },
            _ = tick(&mut heartbeat) => {
                if let Ok(data) = Frame::Empty.encode() {
                    if let Err(e) = writer.write_all(&data).await {
                        sink(TransportEvent::Failed(ErrorCondition::io(&e)));
                        return;
                    }
                }
            }
            _ = expire(idle_deadline) => {
                warn!("Transport idle timeout expired");
                sink(TransportEvent::Failed(ErrorCondition::new(
                    condition::RESOURCE_LIMIT_EXCEEDED,
                    "local idle timeout expired",
                )));
                return;
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn channel_sink() -> (
        impl FnMut(TransportEvent) -> bool + Send + 'static,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |event| tx.send(event).is_ok(), rx)
    }

    #[tokio::test]
    async fn test_connect_refused_reports_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (sink, mut rx) = channel_sink();
        let _t = TransportInstance::connect(
            &Endpoint::new("127.0.0.1", port),
            TransportConfig::default(),
            sink,
        );

        match rx.recv().await {
            Some(TransportEvent::Failed(cond)) => assert_eq!(cond.name, condition::TRANSPORT_IO),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client_sink, mut client_rx) = channel_sink();
        let client = TransportInstance::connect(
            &Endpoint::new("127.0.0.1", addr.port()),
            TransportConfig::default(),
            client_sink,
        );

        let (stream, _) = listener.accept().await.unwrap();
        let (server_sink, mut server_rx) = channel_sink();
        let server = TransportInstance::accept(stream, TransportConfig::default(), server_sink);

        assert_eq!(client_rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(server_rx.recv().await, Some(TransportEvent::Connected));

        client.send(&Frame::Flow { handle: 1, credit: 5 }).unwrap();
        assert_eq!(
            server_rx.recv().await,
            Some(TransportEvent::Frame(Frame::Flow { handle: 1, credit: 5 }))
        );

        server.send(&Frame::Close { error: None }).unwrap();
        server.finish();
        assert_eq!(
            client_rx.recv().await,
            Some(TransportEvent::Frame(Frame::Close { error: None }))
        );
        assert_eq!(client_rx.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (sink, mut rx) = channel_sink();
        let config = TransportConfig {
            connect_timeout: None,
            idle_timeout: Some(Duration::from_millis(50)),
        };
        let _client =
            TransportInstance::connect(&Endpoint::new("127.0.0.1", addr.port()), config, sink);
        let (_silent_peer, _) = listener.accept().await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        match rx.recv().await {
            Some(TransportEvent::Failed(cond)) => {
                assert_eq!(cond.name, condition::RESOURCE_LIMIT_EXCEEDED)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_peer_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client_sink, mut client_rx) = channel_sink();
        let client = TransportInstance::connect(
            &Endpoint::new("127.0.0.1", addr.port()),
            TransportConfig::default(),
            client_sink,
        );
        let (stream, _) = listener.accept().await.unwrap();
        let (server_sink, mut server_rx) = channel_sink();
        let _server = TransportInstance::accept(stream, TransportConfig::default(), server_sink);

        assert_eq!(client_rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(server_rx.recv().await, Some(TransportEvent::Connected));

        client.set_heartbeat(Duration::from_millis(20));
        assert_eq!(server_rx.recv().await, Some(TransportEvent::Frame(Frame::Empty)));
    }
}
