//! Relay - stream a few transactions to an acknowledging consumer.
//!
//! This example demonstrates:
//! - Starting a `cdcsource` subscription with the builder pattern
//! - Feeding row changes and transaction boundaries
//! - Advancing the checkpoint only when the consumer acknowledged
//!
//! A toy consumer runs in the same process: it reports readiness, prints
//! every record and answers each handshake with `h`.
//!
//! ```text
//! RUST_LOG=cdcwire=debug cargo run --example relay
//! ```

use cdcwire::{ChangeEvent, Column, Coordinator, OutputType, TableId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();

    // Toy consumer: ready, then echo records and acknowledge handshakes
    let consumer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let (read, mut write) = stream.into_split();
        write.write_all(b"i\n").await?;
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await? {
            println!("consumer <- {}", line.replace('\0', " | "));
            if line.starts_with('h') {
                write.write_all(b"h\n").await?;
            }
        }
        Ok::<_, std::io::Error>(())
    });

    let mut coordinator = Coordinator::builder()
        .output_type(OutputType::CdcSource)
        .endpoint(endpoint)
        .handshake_after_max_transactions(2)
        .start()
        .await?;

    let orders = TableId::new("LIB", "ORDERS");
    for tx in 1..=5 {
        let event = ChangeEvent::insert(
            orders.clone(),
            &tx.to_string(),
            "2024-01-01 12:00:00.000000",
            vec![
                Column::new("ID", tx.to_string()),
                Column::new("NOTE", format!("order {}", tx)),
            ],
        );
        coordinator.on_row_change(&event).await?;
        let advance = coordinator.on_transaction_boundary().await?;
        println!(
            "producer: tx {} committed, checkpoint may advance: {}",
            tx, advance
        );
    }

    // Closing the connection ends the consumer loop
    coordinator.stop().await;
    consumer.await??;

    Ok(())
}
