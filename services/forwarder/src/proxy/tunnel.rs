//! Per-connection forwarding.
//!
//! A tunnel joins an accepted source connection to a target connection
//! obtained from the [`TargetSelector`]. Bytes are pumped in both directions
//! by two independent tasks. The tunnel ends as soon as either pump stops;
//! the other pump is then aborted, which drops its socket halves and closes
//! both connections.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use super::selector::TargetSelector;
use super::visibility::{emit, format_size, DisplayFlags};

/// Size of the buffer each pump copies through.
pub const PUMP_BUFFER_SIZE: usize = 8192;

/// How a tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// The source closed its side first.
    SourceClosed,
    /// The target closed its side first.
    TargetClosed,
    /// Reading from or writing to the source failed.
    SourceError,
    /// Reading from or writing to the target failed.
    TargetError,
    /// No target could be reached; nothing was pumped.
    NoTarget,
}

impl TunnelEnd {
    /// Whether the tunnel ended by an orderly close.
    pub fn is_clean(self) -> bool {
        matches!(self, Self::SourceClosed | Self::TargetClosed)
    }
}

/// Summary of a closed tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReport {
    /// Remote address of the accepted connection.
    pub source: SocketAddr,
    /// Target the connection was forwarded to, if one was reached.
    pub target: Option<SocketAddr>,
    /// Bytes copied from source to target.
    pub source_to_target: u64,
    /// Bytes copied from target to source.
    pub target_to_source: u64,
    /// What ended the tunnel.
    pub end: TunnelEnd,
}

/// Which pump a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    SourceToTarget,
    TargetToSource,
}

/// Why a pump stopped.
#[derive(Debug)]
enum PumpExit {
    /// The reading side returned end of stream.
    Eof,
    /// Reading failed.
    Read(io::Error),
    /// Writing failed.
    Write(io::Error),
}

/// Live state of one forwarded connection.
struct Tunnel {
    source: SocketAddr,
    target: Option<SocketAddr>,
    source_to_target: Arc<AtomicU64>,
    target_to_source: Arc<AtomicU64>,
}

impl Tunnel {
    fn new(source: SocketAddr) -> Self {
        Self {
            source,
            target: None,
            source_to_target: Arc::new(AtomicU64::new(0)),
            target_to_source: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pump both directions until either one stops, then close everything.
    async fn pump(&self, source: TcpStream, target: TcpStream) -> TunnelEnd {
        source.set_nodelay(true).ok();
        target.set_nodelay(true).ok();

        let (source_read, source_write) = source.into_split();
        let (target_read, target_write) = target.into_split();

        let mut upstream = tokio::spawn(copy_chunks(
            source_read,
            target_write,
            Arc::clone(&self.source_to_target),
        ));
        let mut downstream = tokio::spawn(copy_chunks(
            target_read,
            source_write,
            Arc::clone(&self.target_to_source),
        ));

        // First one out ends the tunnel; the other may be parked on a
        // half-closed peer indefinitely.
        let (direction, result, remaining) = tokio::select! {
            result = &mut upstream => (Direction::SourceToTarget, result, downstream),
            result = &mut downstream => (Direction::TargetToSource, result, upstream),
        };

        close_remaining(remaining).await;

        let end = classify(direction, result);
        if !end.is_clean() {
            debug!(
                source_addr = %self.source,
                target_addr = ?self.target,
                end = ?end,
                "Unclean tunnel exit"
            );
        }
        end
    }

    fn into_report(self, end: TunnelEnd) -> TunnelReport {
        TunnelReport {
            source: self.source,
            target: self.target,
            source_to_target: self.source_to_target.load(Ordering::Acquire),
            target_to_source: self.target_to_source.load(Ordering::Acquire),
            end,
        }
    }
}

/// Abort the still-running pump and wait for it, so its socket halves are
/// dropped before the tunnel reports.
async fn close_remaining(handle: JoinHandle<PumpExit>) {
    handle.abort();
    match handle.await {
        Ok(exit) => debug!(exit = ?exit, "Second pump finished before abort"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => debug!(error = %e, "Second pump failed"),
    }
}

/// Map the first finished pump to the tunnel end it represents.
fn classify(direction: Direction, result: Result<PumpExit, JoinError>) -> TunnelEnd {
    let exit = match result {
        Ok(exit) => exit,
        Err(e) => {
            error!(direction = ?direction, error = %e, "Pump task failed");
            PumpExit::Read(io::Error::other(e.to_string()))
        }
    };

    match (direction, exit) {
        (Direction::SourceToTarget, PumpExit::Eof) => TunnelEnd::SourceClosed,
        (Direction::TargetToSource, PumpExit::Eof) => TunnelEnd::TargetClosed,
        (Direction::SourceToTarget, PumpExit::Read(e))
        | (Direction::TargetToSource, PumpExit::Write(e)) => {
            debug!(error = %e, "Source side failed");
            TunnelEnd::SourceError
        }
        (Direction::TargetToSource, PumpExit::Read(e))
        | (Direction::SourceToTarget, PumpExit::Write(e)) => {
            debug!(error = %e, "Target side failed");
            TunnelEnd::TargetError
        }
    }
}

/// Copy from `reader` to `writer` in bounded chunks until end of stream or
/// error.
///
/// `counter` grows with every successful write, including the partial writes
/// of a chunk, so an abort between two writes loses no accepted bytes.
async fn copy_chunks<R, W>(mut reader: R, mut writer: W, counter: Arc<AtomicU64>) -> PumpExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return PumpExit::Eof,
            Ok(n) => n,
            Err(e) => return PumpExit::Read(e),
        };

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            match writer.write(chunk).await {
                Ok(0) => return PumpExit::Write(io::ErrorKind::WriteZero.into()),
                Ok(written) => {
                    counter.fetch_add(written as u64, Ordering::Release);
                    chunk = &chunk[written..];
                }
                Err(e) => return PumpExit::Write(e),
            }
        }
    }
}

/// Runs tunnels for accepted connections.
#[derive(Debug)]
pub struct Forwarder {
    selector: Arc<TargetSelector>,
    display: DisplayFlags,
}

impl Forwarder {
    pub fn new(selector: Arc<TargetSelector>, display: DisplayFlags) -> Self {
        Self { selector, display }
    }

    pub fn selector(&self) -> &Arc<TargetSelector> {
        &self.selector
    }

    pub fn display(&self) -> DisplayFlags {
        self.display
    }

    /// Forward one accepted connection until either side ends.
    ///
    /// All failures are logged and reflected in the returned report; nothing
    /// escapes to the caller.
    pub async fn forward(&self, source: TcpStream, source_addr: SocketAddr) -> TunnelReport {
        let mut tunnel = Tunnel::new(source_addr);

        let end = match self.selector.select_and_connect().await {
            Ok((target, target_addr)) => {
                tunnel.target = Some(target_addr);
                debug!(
                    source_addr = %source_addr,
                    target_addr = %target_addr,
                    "Establishing tunnel"
                );
                tunnel.pump(source, target).await
            }
            Err(e) => {
                error!(source_addr = %source_addr, error = %e, "No target reachable");
                drop(source);
                TunnelEnd::NoTarget
            }
        };

        let report = tunnel.into_report(end);
        self.log_closed(&report);
        report
    }

    fn log_closed(&self, report: &TunnelReport) {
        let target = report
            .target
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        emit!(
            self.display.statistics(),
            source_addr = %report.source,
            target_addr = %target,
            source_to_target = report.source_to_target,
            target_to_source = report.target_to_source,
            "Tunnel {} <-> {} closed. Source2Target: {} Target2Source: {}",
            report.source,
            target,
            format_size(report.source_to_target),
            format_size(report.target_to_source)
        );
        emit!(
            self.display.connects(),
            source_addr = %report.source,
            "Disconnect from {}",
            report.source
        );
    }
}
