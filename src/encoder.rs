//! Encoder engine (sender side).
//!
//! Each application symbol is assigned the next source id, appended to the
//! window of un-acked sources, and emitted verbatim (systematic mode). Every
//! `code_rate`-th intake additionally seals a repair: the coefficient-
//! weighted XOR of every source currently in the window. Inbound acks retire
//! acknowledged sources so the window advances.

use tracing::{debug, trace};

use crate::buffer::{align16, ZeroBuffer};
use crate::galois::GaloisField;
use crate::protocol::{self, Packet, PacketType};
use crate::source_list::SourceList;
use crate::symbol::EncoderRepair;
use crate::transport::PacketSink;
use crate::{CodeType, Config, Error};

/// Sliding-window encoder.
#[derive(Debug)]
pub struct Encoder<S> {
    gf: GaloisField,
    rate: u32,
    code_type: CodeType,
    max_window: Option<usize>,

    next_source_id: u32,
    next_repair_id: u32,
    window: SourceList,
    sink: S,

    nb_sources: u64,
    nb_repairs: u64,
    nb_acks: u64,
}

impl<S: PacketSink> Encoder<S> {
    /// Create an encoder writing packets into `sink`.
    pub fn new(config: &Config, sink: S) -> Self {
        Self {
            gf: GaloisField::new(config.field_size),
            rate: config.code_rate.max(1),
            code_type: config.code_type,
            max_window: config.max_window,
            next_source_id: 0,
            next_repair_id: 0,
            window: SourceList::new(),
            sink,
            nb_sources: 0,
            nb_repairs: 0,
            nb_acks: 0,
        }
    }

    /// Ingest one application symbol.
    ///
    /// Emits the source packet (systematic mode) and, on every
    /// `code_rate`-th symbol, a repair over the current window. Returns the
    /// assigned source id.
    pub fn on_symbol(&mut self, data: &[u8]) -> Result<u32, Error> {
        if data.len() > crate::MAX_SYMBOL_SIZE {
            return Err(Error::SymbolTooLarge {
                size: data.len(),
                max: crate::MAX_SYMBOL_SIZE,
            });
        }

        let id = self.next_source_id;
        self.next_source_id += 1;

        self.window.emplace(id, data);
        if let Some(cap) = self.max_window {
            while self.window.len() > cap {
                self.window.pop_front();
            }
        }

        if self.code_type == CodeType::Systematic {
            protocol::write_source(&mut self.sink, id, data);
        }
        self.nb_sources += 1;

        if id % self.rate == self.rate - 1 {
            self.seal_repair();
        }

        Ok(id)
    }

    /// Process one inbound packet; only acks are expected here.
    ///
    /// Returns the number of bytes consumed.
    pub fn on_packet(&mut self, packet: &[u8]) -> Result<usize, Error> {
        match Packet::parse(packet) {
            Some((Packet::Ack { source_ids }, consumed)) => {
                self.on_ack(&source_ids);
                Ok(consumed)
            }
            Some((Packet::Source { .. }, _)) => Err(Error::UnexpectedPacket(PacketType::Source)),
            Some((Packet::Repair { .. }, _)) => Err(Error::UnexpectedPacket(PacketType::Repair)),
            None => Err(Error::Malformed),
        }
    }

    /// Process an ack. Cumulative by maximum: every source with id up to the
    /// largest acknowledged id is retired. Returns the number retired.
    pub fn on_ack(&mut self, ids: &[u32]) -> usize {
        self.nb_acks += 1;
        let Some(&max) = ids.iter().max() else {
            return 0;
        };
        let retired = self.window.retire_through(max);
        trace!(ack_max = max, retired, window = self.window.len(), "ack processed");
        retired
    }

    /// Number of un-acked sources currently held.
    #[inline]
    pub fn window(&self) -> usize {
        self.window.len()
    }

    /// Total symbols ingested.
    #[inline]
    pub fn nb_sources(&self) -> u64 {
        self.nb_sources
    }

    /// Total repairs emitted.
    #[inline]
    pub fn nb_repairs(&self) -> u64 {
        self.nb_repairs
    }

    /// Total acks processed.
    #[inline]
    pub fn nb_acks(&self) -> u64 {
        self.nb_acks
    }

    /// The output sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the encoder and return its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drop the window and restart id assignment; counters are kept.
    ///
    /// Peers see a fresh stream: ordering across a reset is not preserved.
    pub fn reset(&mut self) {
        self.window = SourceList::new();
        self.next_source_id = 0;
        self.next_repair_id = 0;
    }

    fn seal_repair(&mut self) {
        let id = self.next_repair_id;
        self.next_repair_id += 1;

        let repair = build_repair(&self.gf, id, &self.window);
        debug!(
            repair_id = id,
            nb_sources = repair.source_ids().len(),
            symbol_len = repair.symbol().len(),
            "repair sealed"
        );
        protocol::write_repair(&mut self.sink, &repair);
        self.nb_repairs += 1;
    }
}

/// Combine every source in `window` into a repair with id `repair_id`.
///
/// The accumulator spans the padded length of the largest source; every
/// source enters as `coefficient(repair_id, id) ⊗ padded bytes`, and its
/// user size enters the `encoded_size` checksum under the same coefficient.
pub(crate) fn build_repair(gf: &GaloisField, repair_id: u32, window: &SourceList) -> EncoderRepair {
    let symbol_len = align16(usize::from(window.max_user_size()));
    let mut symbol = ZeroBuffer::with_len(symbol_len);
    let mut encoded_size = 0u16;
    let mut source_ids = Vec::with_capacity(window.len());

    for src in window.iter() {
        let c = gf.coefficient(repair_id, src.id());
        gf.mul_add_region(src.padded(), &mut symbol, c);
        encoded_size ^= gf.mul_size(src.user_size(), c);
        source_ids.push(src.id());
    }

    EncoderRepair {
        id: repair_id,
        source_ids,
        encoded_size,
        symbol,
    }
}
