//! netfec - Sliding-Window Network Coding
//!
//! Forward erasure correction for lossy datagram transports, computed on the
//! fly. The sender-side [`Encoder`] emits every application symbol verbatim
//! as a *source* packet and, at a configurable rate, seals *repair* packets:
//! coefficient-weighted XOR combinations over GF(2^w) of every un-acked
//! source. The receiver-side [`Decoder`] subtracts known sources out of
//! arriving repairs, reconstructs lost symbols by online elimination or full
//! matrix inversion, and acknowledges what it holds so the sender's window
//! can advance.
//!
//! The engines are single-threaded and I/O-free: outbound packets flow
//! through a [`transport::PacketSink`], inbound bytes are handed to
//! `on_packet`, and whatever event loop owns the sockets drives both. Both
//! endpoints must be configured with the same field width and wire format.
//!
//! # Example
//!
//! ```rust
//! use netfec::{Config, Decoder, Encoder};
//! use netfec::transport::VecSink;
//!
//! let config = Config::default();
//!
//! // Sender: packets land in the sink, ready for the wire.
//! let mut encoder = Encoder::new(&config, VecSink::new());
//! encoder.on_symbol(b"hello").unwrap();
//!
//! // Receiver: feed packets in, decoded symbols come out of the callback.
//! let mut decoder = Decoder::new(
//!     &config,
//!     |id: u32, data: &[u8]| println!("symbol {id}: {data:?}"),
//!     VecSink::new(),
//! );
//! for packet in encoder.sink_mut().drain() {
//!     decoder.on_packet(&packet).unwrap();
//! }
//! assert_eq!(decoder.sources().len(), 1);
//! ```

use std::time::Duration;

use thiserror::Error as ThisError;

pub mod buffer;
pub mod galois;
pub mod matrix;
pub mod protocol;
pub mod source_list;
pub mod symbol;
pub mod transport;

mod decoder;
mod encoder;

pub use decoder::{Decoder, SymbolHandler};
pub use encoder::Encoder;
pub use galois::{FieldSize, GaloisField};
pub use protocol::PacketType;


/// Largest symbol the wire format can carry: sizes travel as `u16` and
/// repair symbols are padded to a 16-byte multiple that must still fit one.
pub const MAX_SYMBOL_SIZE: usize = (u16::MAX as usize) & !15;

/// Fatal error surfaced to the caller.
///
/// Recoverable conditions (useless repairs, singular matrices) never error;
/// they advance engine counters instead.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The field width is not one of 4, 8, 16 or 32 bits.
    #[error("unsupported field size: {0} bits")]
    UnsupportedFieldSize(u8),

    /// A symbol exceeds what the wire format can carry.
    #[error("symbol too large: {size} bytes exceeds maximum {max}")]
    SymbolTooLarge {
        /// Offending symbol length.
        size: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Unknown tag or truncated packet; dropped without touching state.
    #[error("malformed packet")]
    Malformed,

    /// A well-formed packet arrived at the wrong engine.
    #[error("unexpected packet type: {0:?}")]
    UnexpectedPacket(PacketType),
}

/// Whether sources are transmitted verbatim alongside repairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    /// Every source goes out verbatim and participates in repairs.
    Systematic,
    /// Only repairs are transmitted.
    NonSystematic,
}

/// Delivery discipline for decoded symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    /// Deliver in strict ascending id order, skipping only retired gaps.
    InOrder,
    /// Deliver each symbol the moment it is received or reconstructed.
    OutOfOrder,
}

/// Shared configuration for both engines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Field width; both endpoints must agree.
    pub field_size: FieldSize,

    /// Seal one repair every `code_rate` sources (≥ 1; 0 is treated as 1).
    pub code_rate: u32,

    /// Systematic or repair-only transmission.
    pub code_type: CodeType,

    /// Decoder delivery order.
    pub order: OrderMode,

    /// Auto-ack after this much time between admissions; zero disables
    /// auto-ack and leaves ack cadence to the collaborator's timer.
    pub ack_frequency: Duration,

    /// Cap on the encoder window; `None` leaves retirement entirely to
    /// acks.
    pub max_window: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_size: FieldSize::W8,
            code_rate: 1,
            code_type: CodeType::Systematic,
            order: OrderMode::InOrder,
            ack_frequency: Duration::ZERO,
            max_window: None,
        }
    }
}
