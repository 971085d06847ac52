//! # Kestrel adapter for multi-device chat events
//!
//! Normalises the loosely structured events delivered by a multi-device chat
//! client into [`kestrel_core::CanonicalMessage`]s.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kestrel_adapter_whatsapp::{NormalizerConfig, WhatsAppDecoder};
//!
//! let decoder = WhatsAppDecoder::new(NormalizerConfig::default());
//! for msg in decoder.normalize_all(&raw_event, &transport) {
//!     println!("{} sent {:?}", msg.sender_number, msg.command);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`model`]: the batch and single-item envelope shapes
//! - [`extract`]: ordered content extractors
//! - [`classify`]: message type tags and coarse kinds
//! - [`command`]: prefix and command parsing
//! - [`correlation`]: the bounded id correlation log

pub mod classify;
pub mod command;
pub mod config;
pub mod correlation;
pub mod decoder;
pub mod extract;
pub mod model;

pub use command::{ParsedCommand, parse_command};
pub use config::NormalizerConfig;
pub use correlation::{Correlation, CorrelationLog};
pub use decoder::WhatsAppDecoder;
pub use model::{MessageKey, RawBatch, RawEvent, RawItem};
