//! Serial-over-TCP transport.
//!
//! Connects to a TCP endpoint that bridges the controller's serial port (a
//! ser2net-style server). A background task owns the socket: bytes written by
//! the session go out through one channel, bytes read from the socket come
//! back through another, and the session side only ever uses non-blocking
//! channel operations.

use std::io;
use std::time::Duration;

use occtl_session::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Chunks queued in either direction before back-pressure applies.
const CHANNEL_DEPTH: usize = 256;

/// Read buffer size of the socket task.
const READ_BUF_LEN: usize = 1024;

/// How long `close` waits for queued writes to reach the socket.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// One event from the socket task.
type Inbound = io::Result<Vec<u8>>;

/// A [`Transport`] over a TCP connection.
pub struct TcpTransport {
    address: String,
    runtime: Option<Runtime>,
    task: Option<JoinHandle<()>>,
    /// Dropped on close so the socket task drains its queue and exits.
    tx_sender: Option<mpsc::Sender<Vec<u8>>>,
    rx_receiver: mpsc::Receiver<Inbound>,
    /// Bytes received by `wait_readable` and not yet returned.
    pending: Vec<u8>,
    /// Set once the socket task has reported its end.
    failure: Option<io::ErrorKind>,
}

impl TcpTransport {
    /// Connect to `address`, giving up after `timeout`.
    pub fn connect(address: &str, timeout: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("occtl-tcp")
            .enable_all()
            .build()?;

        let stream = runtime.block_on(async {
            match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", address),
                )),
            }
        })?;
        stream.set_nodelay(true)?;

        let (tx_sender, tx_receiver) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (rx_sender, rx_receiver) = mpsc::channel::<Inbound>(CHANNEL_DEPTH);
        let task = runtime.spawn(run_tcp_link(stream, tx_receiver, rx_sender));

        debug!("TcpTransport: connected to {}", address);
        Ok(TcpTransport {
            address: address.to_string(),
            runtime: Some(runtime),
            task: Some(task),
            tx_sender: Some(tx_sender),
            rx_receiver,
            pending: Vec::new(),
            failure: None,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn closed_error(&self) -> io::Error {
        let kind = self.failure.unwrap_or(io::ErrorKind::NotConnected);
        io::Error::new(kind, format!("connection to {} is closed", self.address))
    }

    fn absorb(&mut self, event: Inbound) {
        match event {
            Ok(data) => self.pending.extend_from_slice(&data),
            Err(e) => {
                debug!("TcpTransport: {} ended: {}", self.address, e);
                self.failure = Some(e.kind());
            }
        }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let sender = match (&self.tx_sender, self.failure) {
            (Some(sender), None) => sender,
            _ => return Err(self.closed_error()),
        };
        sender
            .blocking_send(bytes.to_vec())
            .map_err(|_| self.closed_error())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        if self.runtime.is_none() {
            return Err(self.closed_error());
        }
        loop {
            match self.rx_receiver.try_recv() {
                Ok(event) => self.absorb(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.failure.get_or_insert(io::ErrorKind::ConnectionAborted);
                    break;
                }
            }
        }

        // Deliver what arrived before the link ended, then report the end.
        if !self.pending.is_empty() {
            return Ok(std::mem::take(&mut self.pending));
        }
        match self.failure {
            Some(_) => Err(self.closed_error()),
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) {
        self.tx_sender.take();
        if let Some(runtime) = self.runtime.take() {
            if let Some(task) = self.task.take() {
                let _ = runtime.block_on(async { tokio::time::timeout(CLOSE_GRACE, task).await });
            }
            runtime.shutdown_background();
            debug!("TcpTransport: closed {}", self.address);
        }
    }

    fn is_open(&self) -> bool {
        self.runtime.is_some() && self.failure.is_none()
    }

    fn wait_readable(&mut self, timeout: Duration) {
        if !self.pending.is_empty() || self.failure.is_some() {
            return;
        }
        let Some(runtime) = self.runtime.as_ref() else { return };
        let receiver = &mut self.rx_receiver;
        let event = runtime.block_on(async { tokio::time::timeout(timeout, receiver.recv()).await });
        match event {
            Ok(Some(event)) => self.absorb(event),
            Ok(None) => {
                self.failure.get_or_insert(io::ErrorKind::ConnectionAborted);
            }
            Err(_) => {}
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shuttle bytes between the socket and the session's channels.
async fn run_tcp_link(
    mut stream: TcpStream,
    mut tx_receiver: mpsc::Receiver<Vec<u8>>,
    rx_sender: mpsc::Sender<Inbound>,
) {
    let (mut reader, mut writer) = stream.split();
    let mut read_buf = [0u8; READ_BUF_LEN];

    let end: io::Error = loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => break io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection"),
                    Ok(n) => {
                        if rx_sender.send(Ok(read_buf[..n].to_vec())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => break e,
                }
            }

            outgoing = tx_receiver.recv() => {
                let Some(data) = outgoing else { return };
                if let Err(e) = writer.write_all(&data).await {
                    break e;
                }
                if let Err(e) = writer.flush().await {
                    break e;
                }
            }
        }
    };

    let _ = rx_sender.send(Err(end)).await;
}
