//! Decoder engine (receiver side).
//!
//! The decoder admits source and repair packets in any order and keeps three
//! pieces of linear-algebra state coherent: `sources` (symbols held, received
//! or reconstructed), `missing` (ids referenced by retained repairs but not
//! yet held), and `repairs` (combinations whose residual id set is still
//! non-empty). Arriving sources are subtracted out of retained repairs; a
//! repair whose residual shrinks to one id immediately reconstructs that
//! source, and reconstructions cascade. When enough repairs accumulate, a
//! full Gauss-Jordan decoding recovers every missing source at once.
//!
//! A repair also carries window information: ids below its smallest
//! reference have been retired by the encoder and can never be reconstructed
//! again, so the decoder purges them everywhere on arrival.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::buffer::{RawBuffer, ZeroBuffer};
use crate::galois::GaloisField;
use crate::matrix::{self, SquareMatrix};
use crate::protocol::{self, Packet, PacketType};
use crate::symbol::{DecoderRepair, DecoderSource};
use crate::transport::PacketSink;
use crate::{Config, Error, OrderMode};

/// Receives every symbol the decoder delivers, verbatim or reconstructed.
pub trait SymbolHandler {
    fn on_symbol(&mut self, id: u32, data: &[u8]);
}

impl<F: FnMut(u32, &[u8])> SymbolHandler for F {
    fn on_symbol(&mut self, id: u32, data: &[u8]) {
        self(id, data)
    }
}

/// Sliding-window decoder.
#[derive(Debug)]
pub struct Decoder<S, H> {
    gf: GaloisField,
    order: OrderMode,
    handler: H,
    sink: S,

    sources: BTreeMap<u32, DecoderSource>,
    missing: BTreeSet<u32>,
    repairs: BTreeMap<u32, DecoderRepair>,
    highest_retired: Option<u32>,
    next_deliver: Option<u32>,

    ack_frequency: Duration,
    last_ack: Instant,

    nb_sources: u64,
    nb_repairs: u64,
    nb_acks: u64,
    nb_decoded: u64,
    nb_useless_repairs: u64,
    nb_failed_full_decodings: u64,
    nb_malformed: u64,
}

impl<S: PacketSink, H: SymbolHandler> Decoder<S, H> {
    /// Create a decoder delivering symbols to `handler` and writing acks
    /// into `sink`.
    pub fn new(config: &Config, handler: H, sink: S) -> Self {
        Self {
            gf: GaloisField::new(config.field_size),
            order: config.order,
            handler,
            sink,
            sources: BTreeMap::new(),
            missing: BTreeSet::new(),
            repairs: BTreeMap::new(),
            highest_retired: None,
            next_deliver: None,
            ack_frequency: config.ack_frequency,
            last_ack: Instant::now(),
            nb_sources: 0,
            nb_repairs: 0,
            nb_acks: 0,
            nb_decoded: 0,
            nb_useless_repairs: 0,
            nb_failed_full_decodings: 0,
            nb_malformed: 0,
        }
    }

    /// Process one inbound packet (source or repair).
    ///
    /// Admission runs to completion, including cascaded reconstructions and
    /// deliveries, before this returns. Returns the number of bytes
    /// consumed.
    pub fn on_packet(&mut self, packet: &[u8]) -> Result<usize, Error> {
        let consumed = match Packet::parse(packet) {
            Some((Packet::Source { source_id, data }, n)) => {
                self.nb_sources += 1;
                self.admit_source(DecoderSource::received(source_id, data));
                n
            }
            Some((
                Packet::Repair {
                    repair_id,
                    encoded_size,
                    source_ids,
                    symbol,
                },
                n,
            )) => {
                self.nb_repairs += 1;
                self.admit_repair(DecoderRepair::new(repair_id, source_ids, encoded_size, symbol));
                n
            }
            Some((Packet::Ack { .. }, _)) => {
                return Err(Error::UnexpectedPacket(PacketType::Ack));
            }
            None => {
                self.nb_malformed += 1;
                return Err(Error::Malformed);
            }
        };

        if self.ack_frequency > Duration::ZERO && self.last_ack.elapsed() >= self.ack_frequency {
            self.send_ack();
        }

        Ok(consumed)
    }

    /// Emit an ack naming every id currently held. A no-op while nothing is
    /// held. Driven by the collaborator's timer and by `ack_frequency`.
    pub fn send_ack(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        let ids: Vec<u32> = self.sources.keys().copied().collect();
        protocol::write_ack(&mut self.sink, &ids);
        self.nb_acks += 1;
        self.last_ack = Instant::now();
        trace!(nb_ids = ids.len(), "ack sent");
    }

    /// Symbols currently held, received or reconstructed.
    pub fn sources(&self) -> &BTreeMap<u32, DecoderSource> {
        &self.sources
    }

    /// Ids referenced by retained repairs but not yet held.
    pub fn missing(&self) -> &BTreeSet<u32> {
        &self.missing
    }

    /// Retained repairs, by repair id.
    pub fn repairs(&self) -> &BTreeMap<u32, DecoderRepair> {
        &self.repairs
    }

    /// Largest id known to be retired by the encoder.
    pub fn highest_retired(&self) -> Option<u32> {
        self.highest_retired
    }

    /// Total source packets received.
    #[inline]
    pub fn nb_sources(&self) -> u64 {
        self.nb_sources
    }

    /// Total repair packets received.
    #[inline]
    pub fn nb_repairs(&self) -> u64 {
        self.nb_repairs
    }

    /// Total acks emitted.
    #[inline]
    pub fn nb_acks(&self) -> u64 {
        self.nb_acks
    }

    /// Total sources reconstructed (rather than received).
    #[inline]
    pub fn nb_decoded(&self) -> u64 {
        self.nb_decoded
    }

    /// Repairs dropped because they carried no new information.
    #[inline]
    pub fn nb_useless_repairs(&self) -> u64 {
        self.nb_useless_repairs
    }

    /// Full decoding attempts abandoned on a singular matrix.
    #[inline]
    pub fn nb_failed_full_decodings(&self) -> u64 {
        self.nb_failed_full_decodings
    }

    /// Malformed packets dropped.
    #[inline]
    pub fn nb_malformed(&self) -> u64 {
        self.nb_malformed
    }

    /// The ack sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Drop all held state; counters are kept.
    pub fn reset(&mut self) {
        self.sources.clear();
        self.missing.clear();
        self.repairs.clear();
        self.highest_retired = None;
        self.next_deliver = None;
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Admit one source and run every cascaded reconstruction it enables.
    pub(crate) fn admit_source(&mut self, src: DecoderSource) {
        let mut queue = VecDeque::from([src]);
        while let Some(s) = queue.pop_front() {
            self.admit_one(s, &mut queue);
        }
        self.try_full_decoding();
    }

    /// Admit one repair.
    pub(crate) fn admit_repair(&mut self, mut rep: DecoderRepair) {
        if rep.source_ids().is_empty() {
            self.nb_useless_repairs += 1;
            return;
        }

        if self.order == OrderMode::InOrder && self.next_deliver.is_none() {
            self.next_deliver = rep.min_id();
        }

        // Everything below the repair's smallest reference has been retired
        // by the encoder and is gone for good.
        if let Some(min) = rep.min_id() {
            if min > 0 {
                self.retire_through(min - 1);
            }
        }

        if self.repairs.contains_key(&rep.id()) {
            trace!(repair_id = rep.id(), "duplicate repair");
            self.nb_useless_repairs += 1;
            return;
        }

        // A stale repair can still reference an id a newer repair already
        // outdated; its combination can never be unwound.
        if let (Some(h), Some(min)) = (self.highest_retired, rep.min_id()) {
            if min <= h {
                trace!(repair_id = rep.id(), "repair references outdated sources");
                self.nb_useless_repairs += 1;
                return;
            }
        }

        // Subtract every source already held.
        let held: Vec<u32> = rep
            .source_ids()
            .iter()
            .copied()
            .filter(|id| self.sources.contains_key(id))
            .collect();
        for id in held {
            if let Some(src) = self.sources.get(&id) {
                rep.subtract(&self.gf, src);
            }
        }

        match rep.source_ids().len() {
            0 => {
                trace!(repair_id = rep.id(), "useless repair");
                self.nb_useless_repairs += 1;
            }
            1 => {
                if let Some(src) = self.reconstruct_single(rep) {
                    self.admit_source(src);
                } else {
                    self.nb_useless_repairs += 1;
                }
            }
            _ => {
                for &id in rep.source_ids() {
                    self.missing.insert(id);
                }
                self.repairs.insert(rep.id(), rep);
                self.try_full_decoding();
            }
        }
    }

    fn admit_one(&mut self, src: DecoderSource, queue: &mut VecDeque<DecoderSource>) {
        let id = src.id();
        if self.is_outdated(id) || self.sources.contains_key(&id) {
            return;
        }
        self.missing.remove(&id);

        // Subtract the new source out of every repair that references it.
        let mut emptied: Vec<u32> = Vec::new();
        let mut singles: Vec<u32> = Vec::new();
        for (&rid, rep) in self.repairs.iter_mut() {
            if rep.subtract(&self.gf, &src) {
                match rep.source_ids().len() {
                    0 => emptied.push(rid),
                    1 => singles.push(rid),
                    _ => {}
                }
            }
        }
        for rid in emptied {
            self.repairs.remove(&rid);
            self.nb_useless_repairs += 1;
            trace!(repair_id = rid, "repair exhausted by arriving source");
        }
        for rid in singles {
            if let Some(rep) = self.repairs.remove(&rid) {
                match self.reconstruct_single(rep) {
                    Some(next) => queue.push_back(next),
                    None => self.nb_useless_repairs += 1,
                }
            }
        }

        if src.is_decoded() {
            self.nb_decoded += 1;
        }
        self.sources.insert(id, src);
        self.deliver_new(id);
    }

    /// Reconstruct the sole source a repair still references.
    ///
    /// `None` only if the coefficient degenerated to zero (possible with the
    /// wrapping w=32 generator), in which case the repair is unusable.
    fn reconstruct_single(&self, rep: DecoderRepair) -> Option<DecoderSource> {
        let sid = rep.source_ids()[0];
        let c = self.gf.coefficient(rep.id(), sid);
        if c == 0 {
            return None;
        }
        let inv = self.gf.inv(c);
        let size = self.gf.mul_size(rep.encoded_size(), inv);
        // Scratch is overwritten end to end, so raw growth semantics apply.
        let mut bytes = RawBuffer::with_len(rep.symbol().len());
        self.gf.mul_region(rep.symbol(), &mut bytes, inv);
        trace!(source_id = sid, repair_id = rep.id(), "reconstructed from single repair");
        Some(DecoderSource::decoded(sid, bytes, size))
    }

    // -------------------------------------------------------------------------
    // Full decoding
    // -------------------------------------------------------------------------

    fn try_full_decoding(&mut self) {
        let m = self.missing.len();
        if m == 0 || self.repairs.len() < m {
            return;
        }

        let missing_ids: Vec<u32> = self.missing.iter().copied().collect();
        // The m most recent repairs.
        let chosen: Vec<u32> = self.repairs.keys().rev().take(m).copied().collect();

        let mut a = SquareMatrix::new(m);
        for (i, rid) in chosen.iter().enumerate() {
            if let Some(rep) = self.repairs.get(rid) {
                for (j, mid) in missing_ids.iter().enumerate() {
                    if rep.references(*mid) {
                        a[(i, j)] = self.gf.coefficient(*rid, *mid);
                    }
                }
            }
        }

        let Some(inv) = matrix::invert(&self.gf, &a) else {
            self.nb_failed_full_decodings += 1;
            debug!(missing = m, "full decoding abandoned, singular matrix");
            return;
        };

        // Consume the chosen repairs before admitting reconstructions so the
        // cascade never subtracts from them again.
        let reps: Vec<DecoderRepair> = chosen
            .iter()
            .filter_map(|rid| self.repairs.remove(rid))
            .collect();
        let symbol_len = reps.iter().map(|r| r.symbol().len()).max().unwrap_or(0);

        debug!(missing = m, "full decoding");
        let mut queue: VecDeque<DecoderSource> = VecDeque::new();
        for (j, mid) in missing_ids.iter().enumerate() {
            let mut size = 0u16;
            let mut bytes = ZeroBuffer::with_len(symbol_len);
            for (i, rep) in reps.iter().enumerate() {
                let c = inv[(i, j)];
                if c == 0 {
                    continue;
                }
                size ^= self.gf.mul_size(rep.encoded_size(), c);
                self.gf.mul_add_region(rep.symbol(), &mut bytes, c);
            }
            queue.push_back(DecoderSource::decoded(*mid, bytes.into(), size));
        }
        while let Some(s) = queue.pop_front() {
            self.admit_one(s, &mut queue);
        }
    }

    // -------------------------------------------------------------------------
    // Retirement & delivery
    // -------------------------------------------------------------------------

    #[inline]
    fn is_outdated(&self, id: u32) -> bool {
        self.highest_retired.map_or(false, |h| id <= h)
    }

    /// Purge every id ≤ `h` from all state; such ids can never be
    /// reconstructed again.
    fn retire_through(&mut self, h: u32) {
        if self.highest_retired.map_or(false, |cur| cur >= h) {
            return;
        }
        self.highest_retired = Some(h);

        match h.checked_add(1) {
            Some(next) => {
                let kept = self.missing.split_off(&next);
                self.missing = kept;
                let kept = self.sources.split_off(&next);
                self.sources = kept;
            }
            None => {
                self.missing.clear();
                self.sources.clear();
            }
        }
        // A retained repair referencing a retired id can never be unwound.
        // Dropped without counting: unlike a useless repair, it arrived
        // carrying information, the window just moved past it.
        self.repairs
            .retain(|_, r| r.min_id().map_or(false, |min| min > h));

        if self.order == OrderMode::InOrder {
            let next = h.saturating_add(1);
            self.next_deliver = Some(self.next_deliver.map_or(next, |n| n.max(next)));
            self.drain_in_order();
        }
        debug!(boundary = h, "outdated sources retired");
    }

    fn deliver_new(&mut self, id: u32) {
        match self.order {
            OrderMode::OutOfOrder => {
                if let Some(src) = self.sources.get(&id) {
                    self.handler.on_symbol(id, src.data());
                }
            }
            OrderMode::InOrder => {
                if self.next_deliver.is_none() {
                    self.next_deliver = Some(id);
                }
                self.drain_in_order();
            }
        }
    }

    fn drain_in_order(&mut self) {
        let Some(mut next) = self.next_deliver else {
            return;
        };
        while let Some(src) = self.sources.get(&next) {
            self.handler.on_symbol(next, src.data());
            match next.checked_add(1) {
                Some(n) => next = n,
                None => break,
            }
        }
        self.next_deliver = Some(next);
    }
}
