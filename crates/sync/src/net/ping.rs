use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::protocol::ProtocolError;
use super::wire::{WireReader, WireWriter};

pub const PING_TAG: u8 = 0xF0;
pub const PING_LEN: usize = 9;
pub const DEFAULT_SMA_WINDOW: usize = 5;

pub fn encode_ping(timestamp_nanos: u64) -> Vec<u8> {
    let mut out = WireWriter::with_capacity(PING_LEN);
    out.put_u8(PING_TAG);
    out.put_u64(timestamp_nanos);
    out.into_bytes()
}

pub fn decode_ping(data: &[u8]) -> Result<u64, ProtocolError> {
    let mut input = WireReader::new(data);
    let tag = input.u8()?;
    if tag != PING_TAG {
        return Err(ProtocolError::UnknownType(tag));
    }
    let timestamp = input.u64()?;
    if !input.is_exhausted() {
        return Err(ProtocolError::TrailingBytes(input.remaining()));
    }
    Ok(timestamp)
}

/// Round-trip samples with a simple moving average over the last `window`
/// samples. The average is only published once the window is full.
#[derive(Debug, Clone)]
pub struct PingStatistics {
    window: usize,
    samples: VecDeque<Duration>,
    latest: Option<Duration>,
    average: Option<Duration>,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Default for PingStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_SMA_WINDOW)
    }
}

impl PingStatistics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            latest: None,
            average: None,
            min: None,
            max: None,
        }
    }

    pub fn record(&mut self, rtt: Duration) {
        self.samples.push_back(rtt);
        if self.samples.len() > self.window {
            self.samples.pop_front();
        }

        self.latest = Some(rtt);
        self.min = Some(self.min.map_or(rtt, |min| min.min(rtt)));
        self.max = Some(self.max.map_or(rtt, |max| max.max(rtt)));

        if self.samples.len() == self.window {
            let sum: Duration = self.samples.iter().sum();
            self.average = Some(sum / self.window as u32);
        }
    }

    pub fn latest(&self) -> Option<Duration> {
        self.latest
    }

    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Echoes every well-formed ping back to its sender.
#[derive(Debug)]
pub struct PingResponder {
    socket: UdpSocket,
    recv_buffer: [u8; 64],
}

impl PingResponder {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            recv_buffer: [0; 64],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Answers every pending ping and returns how many were echoed.
    pub fn service(&mut self) -> io::Result<usize> {
        let mut echoed = 0;
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let datagram = &self.recv_buffer[..size];
                    if let Err(e) = decode_ping(datagram) {
                        log::debug!("ignoring bad ping from {}: {}", addr, e);
                        continue;
                    }
                    match self.socket.send_to(datagram, addr) {
                        Ok(_) => echoed += 1,
                        Err(e) => log::debug!("ping reply to {} failed: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(echoed)
    }
}

/// Sends timestamped pings to a responder and folds the echoes into
/// `PingStatistics`.
#[derive(Debug)]
pub struct PingClient {
    socket: UdpSocket,
    server: SocketAddr,
    epoch: Instant,
    stats: PingStatistics,
    recv_buffer: [u8; 64],
}

impl PingClient {
    pub fn bind<A: ToSocketAddrs>(addr: A, server: SocketAddr, window: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            server,
            epoch: Instant::now(),
            stats: PingStatistics::new(window),
            recv_buffer: [0; 64],
        })
    }

    pub fn send_ping(&mut self) -> io::Result<()> {
        let timestamp = self.epoch.elapsed().as_nanos() as u64;
        self.socket.send_to(&encode_ping(timestamp), self.server)?;
        Ok(())
    }

    /// Reads every pending echo. Returns the number of samples recorded.
    pub fn receive(&mut self) -> io::Result<usize> {
        let mut recorded = 0;
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, _)) => {
                    let Ok(sent) = decode_ping(&self.recv_buffer[..size]) else {
                        continue;
                    };
                    let now = self.epoch.elapsed().as_nanos() as u64;
                    self.stats
                        .record(Duration::from_nanos(now.saturating_sub(sent)));
                    recorded += 1;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(recorded)
    }

    pub fn stats(&self) -> &PingStatistics {
        &self.stats
    }
}
