//! parley-client: Rust client library for the parley text relay.
//!
//! Connects over TCP, claims a username, then sends and receives directed
//! text messages. The interactive prompt lives outside this crate.
//!
//! # Quick Start
//!
//! ```no_run
//! use parley_client::{RelayClient, RetryPolicy};
//!
//! # async fn example() -> parley_core::RelayResult<()> {
//! let mut client =
//!     RelayClient::connect_and_register("127.0.0.1:8080", "alice", &RetryPolicy::default()).await?;
//!
//! client.send_message("bob", "hi").await?;
//!
//! while let Some(envelope) = client.recv().await? {
//!     println!("{}: {}", envelope.sender, envelope.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;

// Re-export primary public types.
pub use client::{RelayClient, RetryPolicy};

// Re-export parley-core error types for convenience.
pub use parley_core::{RelayError, RelayResult};
