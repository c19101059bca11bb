//! Encoder → lossy UDP loopback → decoder, end to end.
//!
//! Two connected UDP sockets on localhost: coded packets flow one way, acks
//! flow back. The sender-side sink drops every Nth packet before it reaches
//! the wire, the decoder reconstructs what the "network" ate, and both
//! engines' counters are dumped at the end.
//!
//! ```sh
//! cargo run --example transcode
//! ```

use std::net::UdpSocket;
use std::time::Duration;

use netfec::transport::{DatagramSink, PacketSink};
use netfec::{Config, Decoder, Encoder, FieldSize, OrderMode};

/// Sends each sealed packet as one datagram, dropping every `drop_every`th.
struct LossyUdpSink {
    socket: UdpSocket,
    buffer: Vec<u8>,
    counter: u64,
    drop_every: u64,
}

impl LossyUdpSink {
    fn new(socket: UdpSocket, drop_every: u64) -> Self {
        Self {
            socket,
            buffer: Vec::new(),
            counter: 0,
            drop_every,
        }
    }
}

impl PacketSink for LossyUdpSink {
    fn put(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn end(&mut self) {
        self.counter += 1;
        if self.counter % self.drop_every != 0 {
            if let Err(e) = self.socket.send(&self.buffer) {
                eprintln!("send failed: {e}");
            }
        }
        self.buffer.clear();
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = Config {
        field_size: FieldSize::W8,
        code_rate: 4,
        order: OrderMode::OutOfOrder,
        ..Config::default()
    };

    // Loopback pair: coded packets flow a -> b, acks flow b -> a.
    let a = UdpSocket::bind("127.0.0.1:0")?;
    let b = UdpSocket::bind("127.0.0.1:0")?;
    a.connect(b.local_addr()?)?;
    b.connect(a.local_addr()?)?;
    a.set_read_timeout(Some(Duration::from_millis(2)))?;
    b.set_read_timeout(Some(Duration::from_millis(2)))?;

    let mut encoder = Encoder::new(&config, LossyUdpSink::new(a.try_clone()?, 6));
    let mut decoder = Decoder::new(
        &config,
        |id: u32, data: &[u8]| {
            println!("<- symbol {id:4}  ({} bytes)", data.len());
        },
        DatagramSink::new(b.try_clone()?),
    );

    let mut buf = [0u8; 2048];
    for id in 0..200u32 {
        let len = 32 + (id as usize * 13) % 512;
        let symbol: Vec<u8> = (0..len).map(|i| (id as u8).wrapping_add(i as u8)).collect();
        encoder.on_symbol(&symbol).expect("symbol within size limit");

        // Pump whatever survived the lossy link into the decoder.
        while let Ok(n) = b.recv(&mut buf) {
            if decoder.on_packet(&buf[..n]).is_err() {
                eprintln!("dropped malformed packet");
            }
        }

        // Timer tick: ack back every 32 symbols.
        if id % 32 == 31 {
            decoder.send_ack();
            while let Ok(n) = a.recv(&mut buf) {
                encoder.on_packet(&buf[..n]).expect("ack parses");
            }
        }
    }

    // Final drain and ack round.
    while let Ok(n) = b.recv(&mut buf) {
        let _ = decoder.on_packet(&buf[..n]);
    }
    decoder.send_ack();
    while let Ok(n) = a.recv(&mut buf) {
        encoder.on_packet(&buf[..n]).expect("ack parses");
    }

    println!("-- encoder --");
    println!("-> sources: {}", encoder.nb_sources());
    println!("-> repairs: {}", encoder.nb_repairs());
    println!("<- acks   : {}", encoder.nb_acks());
    println!("window    : {}", encoder.window());
    println!();
    println!("-- decoder --");
    println!("<- sources: {}", decoder.nb_sources());
    println!("<- repairs: {}", decoder.nb_repairs());
    println!("-> acks   : {}", decoder.nb_acks());
    println!("decoded   : {}", decoder.nb_decoded());
    println!("useless   : {}", decoder.nb_useless_repairs());
    println!("failed    : {}", decoder.nb_failed_full_decodings());

    Ok(())
}
