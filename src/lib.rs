//! # cdcwire
//!
//! Change-event delivery for replication engines.
//!
//! This crate takes row-level change events grouped into source
//! transactions, frames them into a line-oriented wire protocol and sends
//! them to one downstream consumer. At every transaction boundary it decides
//! whether the host may advance its checkpoint.
//!
//! ## Architecture
//!
//! - **Data plane**: newline-terminated records (`i`, `d`, `c`, `h`, `f`)
//!   over TCP, a named pipe or a null sink
//! - **Feedback plane** (TCP only): single-line acknowledgments (`i` ready,
//!   `h` handshake acknowledged, `t` declined)
//!
//! ## Example
//!
//! ```ignore
//! use cdcwire::{ChangeEvent, Column, Coordinator, OutputType, TableId};
//!
//! #[tokio::main]
//! async fn main() -> cdcwire::Result<()> {
//!     let mut coordinator = Coordinator::builder()
//!         .output_type(OutputType::TcpSource)
//!         .endpoint("localhost:12345")
//!         .start()
//!         .await?;
//!
//!     let event = ChangeEvent::insert(
//!         TableId::new("LIB", "ORDERS"),
//!         "4711",
//!         "2024-01-01 12:00:00.000000",
//!         vec![Column::new("ID", "1"), Column::null("NOTE")],
//!     );
//!     coordinator.on_row_change(&event).await?;
//!     let may_advance = coordinator.on_transaction_boundary().await?;
//!
//!     coordinator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod protocol;
pub mod subscription;
pub mod transport;
pub mod writer;

pub use config::{OutputType, Settings};
pub use coordinator::{Coordinator, CoordinatorState};
pub use error::{CdcWireError, Result};
pub use event::{ChangeEvent, Column, RowImage, TableId};
pub use protocol::OperationKind;
pub use subscription::SubscriptionBuilder;
