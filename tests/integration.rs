//! Integration tests for cdcwire.
//!
//! These tests drive a coordinator end to end against a scripted consumer
//! listening on a local TCP port, or a plain file standing in for a pipe.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use cdcwire::protocol::{Record, Separators};
use cdcwire::{
    CdcWireError, ChangeEvent, Column, Coordinator, CoordinatorState, OperationKind, OutputType,
    SubscriptionBuilder, TableId,
};

const DATA_SEP: char = '|';
const META_SEP: char = '#';

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Consumer that records every line and answers handshakes from a script.
///
/// `None` in the script means "stay silent for this handshake".
struct FakeConsumer {
    port: u16,
    task: JoinHandle<Vec<String>>,
}

impl FakeConsumer {
    async fn spawn(send_ready: bool, script: Vec<Option<&'static str>>) -> Self {
        let script = script
            .into_iter()
            .map(|reply| reply.map(|r| (r, Duration::ZERO)))
            .collect();
        Self::spawn_delayed(send_ready, script).await
    }

    /// Like [`spawn`](Self::spawn), each reply sent after its delay.
    async fn spawn_delayed(send_ready: bool, script: Vec<Option<(&'static str, Duration)>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            if send_ready {
                write.write_all(b"i\n").await.unwrap();
            }
            let mut script = script.into_iter();
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with('h') {
                    if let Some(Some((reply, delay))) = script.next() {
                        tokio::time::sleep(delay).await;
                        let _ = write.write_all(format!("{}\n", reply).as_bytes()).await;
                    }
                }
                received.push(line);
            }
            received
        });

        Self { port, task }
    }

    fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Lines received until the producer closed the connection.
    async fn received(self) -> Vec<String> {
        self.task.await.unwrap()
    }
}

fn builder(output_type: OutputType, endpoint: &str) -> SubscriptionBuilder {
    SubscriptionBuilder::new()
        .output_type(output_type)
        .endpoint(endpoint)
        .separators(DATA_SEP, META_SEP)
        .connect_timeout_seconds(2)
        .ready_timeout_seconds(2)
        .handshake_ack_timeout_ms(300)
}

fn orders() -> TableId {
    TableId::new("LIB", "ORDERS")
}

fn insert(tx: &str) -> ChangeEvent {
    ChangeEvent::insert(
        orders(),
        tx,
        "2024-01-01 00:00:00.000000",
        vec![
            Column::new("ID", tx),
            Column::null("NOTE"),
            Column::new("&ENTTYP", "PT"),
        ],
    )
}

fn prefixes(lines: &[String]) -> String {
    lines.iter().filter_map(|l| l.chars().next()).collect()
}

#[tokio::test]
async fn test_handshake_after_two_transactions() {
    init_tracing();
    let consumer = FakeConsumer::spawn(true, vec![Some("h")]).await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_transactions(2)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(!c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 1);

    c.on_row_change(&insert("2")).await.unwrap();
    assert!(c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 0);
    assert_eq!(c.state(), CoordinatorState::Streaming);

    assert!(c.on_transaction_boundary().await.unwrap());
    c.stop().await;

    let lines = consumer.received().await;
    assert_eq!(prefixes(&lines), "idcdchf");
    assert_eq!(lines[2], "c#***COMMIT***#2024-01-01 00:00:00.000000#1");
}

#[tokio::test]
async fn test_unacknowledged_handshakes_exhaust() {
    init_tracing();
    let consumer = FakeConsumer::spawn(true, vec![None, None, None]).await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_transactions(1)
        .handshake_max_consecutive_failures(2)
        .handshake_ack_timeout_ms(100)
        .start()
        .await
        .unwrap();

    for (tx, failures) in [("1", 1), ("2", 2)] {
        c.on_row_change(&insert(tx)).await.unwrap();
        assert!(!c.on_transaction_boundary().await.unwrap());
        assert_eq!(c.handshake_state().consecutive_failures, failures);
        assert_eq!(c.state(), CoordinatorState::HandshakePending);
    }

    c.on_row_change(&insert("3")).await.unwrap();
    let err = c.on_transaction_boundary().await.unwrap_err();
    match err {
        CdcWireError::HandshakeExhausted {
            failures,
            max_failures,
            pending_transactions,
            ref last_tx_id,
            ..
        } => {
            assert_eq!(failures, 3);
            assert_eq!(max_failures, 2);
            assert_eq!(pending_transactions, 3);
            assert_eq!(last_tx_id, "3");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(c.state(), CoordinatorState::Failed);

    assert!(matches!(
        c.on_transaction_boundary().await.unwrap_err(),
        CdcWireError::Failed { .. }
    ));
    c.stop().await;

    let lines = consumer.received().await;
    assert!(lines.last().unwrap().starts_with('f'));
}

#[tokio::test]
async fn test_late_ack_is_not_taken_for_the_next_handshake() {
    init_tracing();
    let slow = Duration::from_millis(400);
    let consumer = FakeConsumer::spawn_delayed(
        true,
        vec![Some(("h", slow)), Some(("h", slow)), Some(("h", Duration::ZERO))],
    )
    .await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_transactions(1)
        .handshake_ack_timeout_ms(200)
        .handshake_max_consecutive_failures(5)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(!c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.handshake_state().unanswered, 1);

    // The answer to handshake #1 is now buffered; handshake #2 must not use it.
    tokio::time::sleep(Duration::from_millis(500)).await;
    c.on_row_change(&insert("2")).await.unwrap();
    assert!(!c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 2);
    assert_eq!(c.handshake_state().consecutive_failures, 2);
    assert_eq!(c.handshake_state().unanswered, 1);

    // Handshake #3 skips the late answer to #2 and takes its own.
    tokio::time::sleep(Duration::from_millis(500)).await;
    c.on_row_change(&insert("3")).await.unwrap();
    assert!(c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 0);
    assert_eq!(c.handshake_state().unanswered, 0);
    assert_eq!(c.handshake_state().consecutive_failures, 0);
    c.stop().await;
}

#[tokio::test]
async fn test_lost_connection_fails_coordinator() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let consumer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        // Take the init record, then hang up.
        lines.next_line().await.unwrap();
    });

    let mut c = builder(OutputType::TcpSource, &endpoint)
        .start()
        .await
        .unwrap();
    consumer.await.unwrap();

    let mut failure = None;
    for tx in 0..100 {
        let outcome = match c.on_row_change(&insert(&tx.to_string())).await {
            Ok(()) => c.on_transaction_boundary().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            failure = Some(e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let err = failure.expect("writes to a closed connection kept succeeding");
    assert!(
        matches!(err, CdcWireError::Write { .. } | CdcWireError::Flush { .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(c.state(), CoordinatorState::Failed);
    assert!(!c.transport().is_healthy());

    assert!(matches!(
        c.on_row_change(&insert("x")).await.unwrap_err(),
        CdcWireError::Failed { .. }
    ));
    assert!(matches!(
        c.on_transaction_boundary().await.unwrap_err(),
        CdcWireError::Failed { .. }
    ));
    c.stop().await;
}

#[tokio::test]
async fn test_declined_handshake_keeps_pending() {
    init_tracing();
    let consumer = FakeConsumer::spawn(true, vec![Some("t"), Some("h")]).await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_transactions(1)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(!c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 1);
    assert_eq!(c.handshake_state().consecutive_failures, 0);
    assert_eq!(c.state(), CoordinatorState::HandshakePending);

    // Retried on the next boundary even without new rows.
    assert!(c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 0);
    assert_eq!(c.state(), CoordinatorState::Streaming);
    c.stop().await;

    assert_eq!(prefixes(&consumer.received().await), "idchhf");
}

#[tokio::test]
async fn test_malformed_ack_counts_as_failure() {
    init_tracing();
    let consumer = FakeConsumer::spawn(true, vec![Some("x")]).await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_transactions(1)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    let err = c.on_transaction_boundary().await.unwrap_err();
    assert!(matches!(err, CdcWireError::HandshakeExhausted { failures: 1, max_failures: 0, .. }));
    c.stop().await;
}

#[tokio::test]
async fn test_timed_handshake() {
    init_tracing();
    let consumer = FakeConsumer::spawn(true, vec![Some("h")]).await;
    let mut c = builder(OutputType::CdcSource, &consumer.endpoint())
        .handshake_after_max_seconds(1)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(!c.on_transaction_boundary().await.unwrap());
    assert!(!c.on_transaction_boundary().await.unwrap());

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 0);
    c.stop().await;
}

#[tokio::test]
async fn test_plain_tcp_does_not_enforce() {
    init_tracing();
    let consumer = FakeConsumer::spawn(false, vec![]).await;
    let mut c = builder(OutputType::TcpSource, &consumer.endpoint())
        .handshake_after_max_transactions(1)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(c.on_transaction_boundary().await.unwrap());
    assert_eq!(c.pending_transactions(), 0);
    c.stop().await;

    assert_eq!(prefixes(&consumer.received().await), "idchf");
}

#[tokio::test]
async fn test_data_record_on_the_wire() {
    init_tracing();
    let consumer = FakeConsumer::spawn(false, vec![]).await;
    let mut c = builder(OutputType::TcpSource, &consumer.endpoint())
        .sanitize_column("NOTE")
        .start()
        .await
        .unwrap();

    let update = ChangeEvent::update(
        orders(),
        "77",
        "2024-02-03 04:05:06.000000",
        vec![Column::new("ID", "5"), Column::new("NOTE", "")],
        vec![Column::new("ID", "5"), Column::new("NOTE", "two\nlines|x")],
    )
    .with_user("ALICE");
    c.on_row_change(&update).await.unwrap();
    c.on_row_change(&ChangeEvent::delete(
        orders(),
        "77",
        "2024-02-03 04:05:06.000000",
        vec![Column::new("ID", "5"), Column::null("NOTE")],
    ))
    .await
    .unwrap();
    c.on_transaction_boundary().await.unwrap();
    c.stop().await;

    let seps = Separators::new(DATA_SEP, META_SEP);
    let lines = consumer.received().await;
    let records: Vec<Record> = lines
        .iter()
        .map(|l| Record::decode(l, &seps).unwrap())
        .collect();

    let Record::Data(upd) = &records[1] else {
        panic!("expected data record, got {:?}", records[1]);
    };
    assert_eq!(upd.table, "LIB.ORDERS");
    assert_eq!(upd.operation, OperationKind::Update);
    assert_eq!(upd.user, "ALICE");
    assert_eq!(upd.tx_id, "77");
    assert_eq!(upd.before_columns(DATA_SEP), vec!["5", ""]);
    assert_eq!(upd.after_columns(DATA_SEP), vec!["5", "two lines x"]);

    let Record::Data(del) = &records[2] else {
        panic!("expected data record, got {:?}", records[2]);
    };
    assert_eq!(del.operation, OperationKind::Delete);
    assert_eq!(del.before_columns(DATA_SEP), vec!["5", ""]);
    assert_eq!(del.after, "|");

    assert!(matches!(records[3], Record::Commit { ref tx_id, .. } if tx_id == "77"));
}

#[tokio::test]
async fn test_connect_timeout() {
    init_tracing();
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let err = builder(OutputType::TcpSource, &format!("127.0.0.1:{}", port))
        .connect_timeout_seconds(1)
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, CdcWireError::Connect { .. }));
}

#[tokio::test]
async fn test_null_output_advances_whenever_window_is_empty() {
    init_tracing();
    let mut c = Coordinator::builder()
        .output_type(OutputType::Null)
        .handshake_after_max_transactions(3)
        .start()
        .await
        .unwrap();

    for tx in 0..20 {
        c.on_row_change(&insert(&tx.to_string())).await.unwrap();
        c.on_transaction_boundary().await.unwrap();
        assert!(c.on_transaction_boundary().await.unwrap());
    }
    c.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_named_pipe_output() {
    init_tracing();
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut c = builder(OutputType::NamedPipe, file.path().to_str().unwrap())
        .handshake_after_max_transactions(1)
        .start()
        .await
        .unwrap();

    c.on_row_change(&insert("1")).await.unwrap();
    assert!(c.on_transaction_boundary().await.unwrap());
    c.stop().await;

    let written = std::fs::read_to_string(file.path()).unwrap();
    let lines: Vec<String> = written.lines().map(str::to_string).collect();
    // No init record on pipes.
    assert_eq!(prefixes(&lines), "dchf");
    assert!(written.ends_with('\n'));
}

#[tokio::test]
async fn test_missing_named_pipe() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.fifo");
    let err = builder(OutputType::NamedPipe, path.to_str().unwrap())
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, CdcWireError::PipeMissing { .. }));
}
