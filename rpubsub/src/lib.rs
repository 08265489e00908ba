#![deny(unsafe_code)] // Enforce memory safety across the entire crate

//! # Overall Example
//! ```rust,no_run
//! use rpubsub::{Bus, Handler, Listen, Publish, Result, Subscribe};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = Bus::new();
//!
//!     bus.subscribe(Subscribe::new(Handler::sync(|m, _| Ok(json!(format!("audit {}", m))))).phase("before"))?;
//!     bus.listen(Listen::new("Reports.table.sorted", Handler::sync(|_, p| Ok(p.clone()))).channel("Table"))?;
//!     bus.listen(
//!         Listen::new(
//!             "Reports.*",
//!             Handler::async_fn(|_, _, next| {
//!                 tokio::spawn(async move { next.complete(json!("saved")) });
//!             }),
//!         )
//!         .channel("Store"),
//!     )?;
//!     bus.add_route("reports", ["Store", "Table"])?;
//!
//!     bus.publish(
//!         Publish::new("Reports.table.sorted.DESC")
//!             .route("reports")
//!             .payload(json!({ "column": "date" }))
//!             .on_publish(|v| println!("result: {}", v))
//!             .on_complete(|| println!("done")),
//!     )
//!     .await
//! }
//! ```

/// Core Bus Components
pub mod bus; // Bus handle and public entry points
pub mod error; // Error and Result types
pub mod handler; // Sync/async handlers and continuations
pub mod pipeline; // Staged delivery of a single message
pub mod registry; // Handler and subscriber storage
pub mod request; // Request builders
pub mod route; // Named channel routes
pub mod stats; // Delivery counters
pub mod topic; // Topic parsing and wildcard matching

#[cfg(feature = "logger")] // slog output and log bridge
pub mod logger;

pub use bus::Bus;
pub use error::{Error, Result};
pub use handler::{Continuation, Handler, HandlerId};
pub use registry::Phase;
pub use request::{Listen, Messages, Publish, Stop, Subscribe, Unsubscribe};
pub use topic::{compare, MessagePattern};

/// External Crate Re-exports
pub use rpubsub_conf as conf; // Settings
