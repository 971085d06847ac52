//! # Kestrel Core
//!
//! Protocol-independent building blocks shared by every Kestrel crate.
//!
//! - **Messages**: [`CanonicalMessage`] with its bound [`ReplyHandle`]
//! - **Capabilities consumed from the outside**: [`Transport`] for replies,
//!   [`AccessOracle`] for owner and premium queries
//! - **Adapter seam**: [`EventDecoder`] turns raw inbound events into
//!   canonical messages
//!
//! ```text
//! raw event ──▶ EventDecoder ──▶ CanonicalMessage ──▶ dispatch pipeline
//!                                      │
//!                                      └── ReplyHandle ──▶ Transport
//! ```

pub mod access;
pub mod decoder;
pub mod error;
pub mod message;
pub mod transport;

pub use access::{AccessOracle, BoxedAccessOracle, NoAccess};
pub use decoder::{BoxedDecoder, EventDecoder};
pub use error::{BoxError, TransportError, TransportResult};
pub use message::{
    CanonicalMessage, EditInfo, MessageKind, QuotedMessage, ReplyHandle, sender_number_of,
};
pub use transport::{BoxedTransport, SendOptions, Transport};
