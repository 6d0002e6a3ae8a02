//! Relay core: registry, router actor and dispatcher.
//!
//! ```text
//! read workers ──RouterEvent──▶ Router (owns Registry)
//!                                  │
//!                           DispatchCommand
//!                                  ▼
//!                             Dispatcher ──Envelope──▶ per-connection writers
//! ```

pub mod dispatcher;
pub mod registry;
pub mod router;

pub use dispatcher::{DispatchCommand, Dispatcher};
pub use router::{Router, RouterEvent};
