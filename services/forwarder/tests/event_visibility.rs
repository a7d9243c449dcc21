mod harness;

use std::io;
use std::sync::{Arc, Mutex};

use harness::{refusing_addr, Behaviour, ForwarderHandle, TestTarget, TEST_TIMEOUT};
use tcpfwd::DisplayFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::Level;

/// Log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// The single captured line containing `needle`.
    fn line(&self, needle: &str) -> String {
        let matching: Vec<_> = self
            .lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect();
        assert_eq!(matching.len(), 1, "expected one '{}' record in {:?}", needle, matching);
        matching[0].clone()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn level_of(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or_default()
}

/// Run one 10-byte request / 5-byte reply tunnel with the given display
/// flags and return everything logged while it ran.
async fn run_scenario(display: DisplayFlags) -> CapturedLogs {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    // The test runtime is single threaded, so spawned sessions log here too.
    let _guard = tracing::subscriber::set_default(subscriber);

    let target = TestTarget::spawn(Behaviour::Reply {
        expect: 10,
        reply: b"hello".to_vec(),
    })
    .await
    .unwrap();
    let dead = refusing_addr().await;
    let forwarder = ForwarderHandle::spawn_with(vec![target.addr, dead], display)
        .await
        .unwrap();

    let mut client = TcpStream::connect(forwarder.listen_addr).await.unwrap();
    client.write_all(b"0123456789").await.unwrap();
    let mut reply = [0u8; 5];
    timeout(TEST_TIMEOUT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    drop(client);

    forwarder.wait_closed(1).await;
    forwarder.service.shutdown().await;
    logs
}

#[tokio::test]
async fn lifecycle_records_are_info_when_shown() {
    let logs = run_scenario(DisplayFlags {
        show_connects: true,
        show_statistics: true,
    })
    .await;

    assert_eq!(level_of(&logs.line("Connect from")), "INFO");
    assert_eq!(level_of(&logs.line("Disconnect from")), "INFO");

    let closed = logs.line("closed. Source2Target:");
    assert_eq!(level_of(&closed), "INFO");
    assert!(
        closed.contains("Source2Target: 10 B Target2Source: 5 B"),
        "unexpected record: {}",
        closed
    );
    assert!(closed.contains("source_to_target=10"));
    assert!(closed.contains("target_to_source=5"));

    // Dial failures stay low visibility regardless of the display flags.
    assert_eq!(level_of(&logs.line("Could not connect to target")), "DEBUG");
}

#[tokio::test]
async fn lifecycle_records_are_debug_when_hidden() {
    let logs = run_scenario(DisplayFlags::default()).await;

    assert_eq!(level_of(&logs.line("Connect from")), "DEBUG");
    assert_eq!(level_of(&logs.line("Disconnect from")), "DEBUG");

    let closed = logs.line("closed. Source2Target:");
    assert_eq!(level_of(&closed), "DEBUG");
    assert!(closed.contains("Source2Target: 10 B Target2Source: 5 B"));

    assert_eq!(level_of(&logs.line("Could not connect to target")), "DEBUG");
}

#[tokio::test]
async fn connects_and_statistics_are_gated_independently() {
    let logs = run_scenario(DisplayFlags {
        show_connects: false,
        show_statistics: true,
    })
    .await;

    assert_eq!(level_of(&logs.line("Connect from")), "DEBUG");
    assert_eq!(level_of(&logs.line("Disconnect from")), "DEBUG");
    assert_eq!(level_of(&logs.line("closed. Source2Target:")), "INFO");
}
