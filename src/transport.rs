//! Outbound packet sinks.
//!
//! The engines never touch a socket. Every outgoing packet is written into a
//! [`PacketSink`]: one or more `put` calls with chunks of the packet, then
//! one `end` call at the packet boundary. The collaborator that owns the
//! sockets concatenates the chunks and ships them; inbound bytes flow the
//! other way through `on_packet`. Loss simulation, timers, and the receive
//! loop all live with that collaborator, not here.

use std::io;

/// Receives outgoing packets as chunks.
///
/// A packet is delivered as one or more `put` calls followed by exactly one
/// `end` call. Implementations typically concatenate the chunks and transmit
/// the whole packet on `end`.
pub trait PacketSink {
    /// Append one chunk of the packet under construction.
    fn put(&mut self, chunk: &[u8]);

    /// Mark the end of the packet.
    fn end(&mut self);
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    fn put(&mut self, chunk: &[u8]) {
        (**self).put(chunk);
    }

    fn end(&mut self) {
        (**self).end();
    }
}

/// Sink that collects whole packets into a vector. Useful in tests and for
/// loops that want to shuttle packets by hand.
#[derive(Debug, Default)]
pub struct VecSink {
    current: Vec<u8>,
    packets: Vec<Vec<u8>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed packets, in emission order.
    pub fn packets(&self) -> &[Vec<u8>] {
        &self.packets
    }

    /// Take the completed packets, leaving the sink empty.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.packets)
    }
}

impl PacketSink for VecSink {
    fn put(&mut self, chunk: &[u8]) {
        self.current.extend_from_slice(chunk);
    }

    fn end(&mut self) {
        self.packets.push(std::mem::take(&mut self.current));
    }
}

/// One completed packet per outgoing datagram.
///
/// The only transport capability the sink needs is sending; receiving stays
/// with the collaborator's event loop.
pub trait DatagramSendMut {
    /// Send one datagram, whole. Returns the number of bytes sent.
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// Connected UDP socket. Requires `connect()` before use.
impl DatagramSendMut for std::net::UdpSocket {
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
        self.send(data)
    }
}

#[cfg(unix)]
impl DatagramSendMut for std::os::unix::net::UnixDatagram {
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
        self.send(data)
    }
}

/// Sink that sends each completed packet as one datagram.
#[derive(Debug)]
pub struct DatagramSink<T> {
    transport: T,
    buffer: Vec<u8>,
}

impl<T: DatagramSendMut> DatagramSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: DatagramSendMut> PacketSink for DatagramSink<T> {
    fn put(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn end(&mut self) {
        if let Err(e) = self.transport.send_datagram(&self.buffer) {
            tracing::warn!(error = %e, "dropping outgoing packet");
        }
        self.buffer.clear();
    }
}
