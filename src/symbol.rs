//! Source and repair records, encoder- and decoder-side.
//!
//! A source is one application symbol tagged with its id; its bytes are
//! stored zero-padded to a 16-byte multiple so it can enter region
//! operations directly. A repair is a linear combination of a window of
//! sources; the decoder's form keeps a mutable residual id set that shrinks
//! as referenced sources arrive.
//!
//! Source bytes live in [`RawBuffer`]s (written once, never regrown); repair
//! accumulators live in [`ZeroBuffer`]s so the XOR combination always starts
//! from zero.

use crate::buffer::{align16, RawBuffer, ZeroBuffer};
use crate::galois::GaloisField;

/// A source held by the encoder window.
#[derive(Debug, Clone)]
pub struct EncoderSource {
    id: u32,
    bytes: RawBuffer,
    user_size: u16,
}

impl EncoderSource {
    /// Store `data` under `id`, zero-padded to a 16-byte multiple.
    pub fn new(id: u32, data: &[u8]) -> Self {
        debug_assert!(data.len() <= usize::from(u16::MAX));
        Self {
            id,
            bytes: RawBuffer::from_padded(data, align16(data.len())),
            user_size: data.len() as u16,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Exact length the application supplied.
    #[inline]
    pub fn user_size(&self) -> u16 {
        self.user_size
    }

    /// The symbol bytes, exactly `user_size` long.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[..usize::from(self.user_size)]
    }

    /// The zero-padded symbol bytes, ready for region operations.
    #[inline]
    pub fn padded(&self) -> &[u8] {
        &self.bytes
    }
}

/// A source held by the decoder: received verbatim or reconstructed.
#[derive(Debug, Clone)]
pub struct DecoderSource {
    id: u32,
    bytes: RawBuffer,
    user_size: u16,
    decoded: bool,
}

impl DecoderSource {
    /// A source received verbatim off the wire.
    pub fn received(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            bytes: RawBuffer::from_padded(data, align16(data.len())),
            user_size: data.len() as u16,
            decoded: false,
        }
    }

    /// A source reconstructed by decoding. `bytes` holds the recovered
    /// padded symbol; `user_size` the recovered exact length.
    pub fn decoded(id: u32, mut bytes: RawBuffer, user_size: u16) -> Self {
        let need = align16(usize::from(user_size));
        if bytes.len() < need {
            // Only a claimed size past the repair symbol lands here; raw
            // growth is indeterminate, so zero the tail by hand.
            let old = bytes.len();
            bytes.resize(need);
            bytes[old..].fill(0);
        }
        Self {
            id,
            bytes,
            user_size,
            decoded: true,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn user_size(&self) -> u16 {
        self.user_size
    }

    /// True if this source was reconstructed rather than received.
    #[inline]
    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[..usize::from(self.user_size)]
    }

    #[inline]
    pub fn padded(&self) -> &[u8] {
        &self.bytes[..align16(usize::from(self.user_size))]
    }
}

/// A sealed repair on the encoder side: the combination of every source in
/// the window at seal time. Transient: emitted, then discarded.
#[derive(Debug, Clone)]
pub struct EncoderRepair {
    pub(crate) id: u32,
    pub(crate) source_ids: Vec<u32>,
    pub(crate) encoded_size: u16,
    pub(crate) symbol: ZeroBuffer,
}

impl EncoderRepair {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Ids of the sources combined into this repair, ascending.
    #[inline]
    pub fn source_ids(&self) -> &[u32] {
        &self.source_ids
    }

    #[inline]
    pub fn encoded_size(&self) -> u16 {
        self.encoded_size
    }

    #[inline]
    pub fn symbol(&self) -> &[u8] {
        &self.symbol
    }
}

/// A retained repair on the decoder side.
///
/// `source_ids` is the *residual* set: sources that have arrived since are
/// subtracted out of `symbol`/`encoded_size` and removed. The repair stays
/// useful only while the residual is non-empty.
#[derive(Debug, Clone)]
pub struct DecoderRepair {
    id: u32,
    source_ids: Vec<u32>,
    encoded_size: u16,
    symbol: ZeroBuffer,
}

impl DecoderRepair {
    /// Build from parsed wire fields. `source_ids` must be ascending.
    pub fn new(id: u32, source_ids: Vec<u32>, encoded_size: u16, symbol: &[u8]) -> Self {
        debug_assert!(source_ids.windows(2).all(|w| w[0] < w[1]));
        Self {
            id,
            source_ids,
            encoded_size,
            symbol: ZeroBuffer::from_padded(symbol, align16(symbol.len())),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The residual source ids, ascending.
    #[inline]
    pub fn source_ids(&self) -> &[u32] {
        &self.source_ids
    }

    #[inline]
    pub fn min_id(&self) -> Option<u32> {
        self.source_ids.first().copied()
    }

    #[inline]
    pub fn references(&self, id: u32) -> bool {
        self.source_ids.binary_search(&id).is_ok()
    }

    #[inline]
    pub fn encoded_size(&self) -> u16 {
        self.encoded_size
    }

    #[inline]
    pub fn symbol(&self) -> &[u8] {
        &self.symbol
    }

    /// Subtract a now-known source out of the combination.
    ///
    /// Returns `false` (and leaves the repair untouched) when the source is
    /// not in the residual set.
    pub fn subtract(&mut self, gf: &GaloisField, src: &DecoderSource) -> bool {
        let Ok(pos) = self.source_ids.binary_search(&src.id()) else {
            return false;
        };
        let c = gf.coefficient(self.id, src.id());
        if self.symbol.len() < src.padded().len() {
            // A referenced source can outsize the sealed symbol only on a
            // corrupt peer; keep the algebra total anyway.
            self.symbol.resize(src.padded().len());
        }
        gf.mul_add_region(src.padded(), &mut self.symbol, c);
        self.encoded_size ^= gf.mul_size(src.user_size(), c);
        self.source_ids.remove(pos);
        true
    }
}
