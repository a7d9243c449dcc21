//! Test harness for forwarder integration tests.
//!
//! Provides helpers to spawn TCP targets with scripted behaviour and a
//! running forwarder bound to an ephemeral loopback port.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

use tcpfwd::{Config, DisplayFlags, ForwarderService, ListenerStats};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What a test target does with each accepted connection.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Echo everything back until the peer closes.
    Echo,
    /// Read exactly `expect` bytes, answer with `reply`, then wait for the
    /// peer to close.
    Reply { expect: usize, reply: Vec<u8> },
    /// Send `greeting` and close immediately.
    SendAndClose { greeting: Vec<u8> },
    /// Read and discard until the peer closes.
    Sink,
}

#[allow(dead_code)]
pub struct TestTarget {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    pub peer_closed: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestTarget {
    pub async fn echo() -> io::Result<Self> {
        Self::spawn(Behaviour::Echo).await
    }

    pub async fn spawn(behaviour: Behaviour) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Self::serve(listener, behaviour)
    }

    /// Serve on an already-bound listener.
    pub fn serve(listener: TcpListener, behaviour: Behaviour) -> io::Result<Self> {
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));
        let peer_closed = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);
        let closed_clone = Arc::clone(&peer_closed);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                tokio::spawn(handle_connection(
                                    stream,
                                    behaviour.clone(),
                                    Arc::clone(&bytes_clone),
                                    Arc::clone(&closed_clone),
                                ));
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            bytes_received,
            peer_closed,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn peer_closed_count(&self) -> u64 {
        self.peer_closed.load(Ordering::Relaxed)
    }
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    behaviour: Behaviour,
    bytes: Arc<AtomicU64>,
    peer_closed: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; 8192];
    match behaviour {
        Behaviour::Echo => loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    bytes.fetch_add(n as u64, Ordering::Relaxed);
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        },
        Behaviour::Reply { expect, reply } => {
            let mut request = vec![0u8; expect];
            if stream.read_exact(&mut request).await.is_err() {
                return;
            }
            bytes.fetch_add(expect as u64, Ordering::Relaxed);
            if stream.write_all(&reply).await.is_err() {
                return;
            }
            drain(&mut stream, &mut buf, &bytes).await;
        }
        Behaviour::SendAndClose { greeting } => {
            let _ = stream.write_all(&greeting).await;
            return;
        }
        Behaviour::Sink => drain(&mut stream, &mut buf, &bytes).await,
    }
    peer_closed.fetch_add(1, Ordering::Relaxed);
}

async fn drain(stream: &mut TcpStream, buf: &mut [u8], bytes: &AtomicU64) {
    loop {
        match stream.read(buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                bytes.fetch_add(n as u64, Ordering::Relaxed);
            }
        }
    }
}

/// A loopback address with nothing listening on it.
#[allow(dead_code)]
pub async fn refusing_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A forwarder service listening on an ephemeral loopback port.
#[allow(dead_code)]
pub struct ForwarderHandle {
    pub listen_addr: SocketAddr,
    pub service: ForwarderService,
}

#[allow(dead_code)]
impl ForwarderHandle {
    pub async fn spawn(targets: Vec<SocketAddr>) -> io::Result<Self> {
        Self::spawn_with(targets, DisplayFlags::default()).await
    }

    pub async fn spawn_with(targets: Vec<SocketAddr>, display: DisplayFlags) -> io::Result<Self> {
        let mut config = Config::new(vec!["127.0.0.1:0".parse().unwrap()], targets);
        config.display = display;
        config.connect_timeout = Duration::from_millis(500);

        let service = ForwarderService::start(&config)
            .await
            .map_err(io::Error::other)?;
        let listen_addr = service.local_addrs()[0];

        Ok(Self {
            listen_addr,
            service,
        })
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.service.listener_stats()[0])
    }

    /// Wait until `count` tunnels on the first listener have closed.
    pub async fn wait_closed(&self, count: u64) {
        let stats = self.stats();
        wait_until(|| stats.connections_closed.load(Ordering::Relaxed) >= count).await;
    }
}

/// Poll `condition` until it holds, failing the test after [`TEST_TIMEOUT`].
#[allow(dead_code)]
pub async fn wait_until(condition: impl Fn() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Send `payload` through the forwarder and read back one response chunk.
#[allow(dead_code)]
pub async fn try_roundtrip(addr: SocketAddr, payload: &[u8]) -> Result<Vec<u8>, &'static str> {
    let result = timeout(Duration::from_millis(1000), async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await?;
        Ok::<_, io::Error>(buf[..n].to_vec())
    })
    .await;

    match result {
        Ok(Ok(data)) if !data.is_empty() => Ok(data),
        Ok(Ok(_)) => Err("connection closed"),
        Ok(Err(_)) => Err("io error"),
        Err(_) => Err("timeout"),
    }
}
