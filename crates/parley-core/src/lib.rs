//! parley-core: Shared protocol library for the parley text relay.
//!
//! Provides the envelope type exchanged on the wire, the newline-delimited
//! JSON codec, and the error type shared by server and client.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{frame_encode, json_decode, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
pub use error::{RelayError, RelayResult};
pub use messages::{Envelope, MsgKind};
