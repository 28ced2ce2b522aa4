use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::protocol::Channel;

pub const INJECTOR_TICK: Duration = Duration::from_micros(500);

/// Per-destination one-way delay. Owned by the transport; destinations
/// without an entry fall back to the default delay.
#[derive(Debug, Clone, Default)]
pub struct LatencyTable {
    delays: HashMap<SocketAddr, Duration>,
    default_delay: Duration,
}

impl LatencyTable {
    pub fn new(default_ms: u32) -> Self {
        Self {
            delays: HashMap::new(),
            default_delay: Duration::from_millis(default_ms as u64),
        }
    }

    pub fn set(&mut self, addr: SocketAddr, delay_ms: u32) {
        log::debug!("latency for {} set to {}ms", addr, delay_ms);
        self.delays
            .insert(addr, Duration::from_millis(delay_ms as u64));
    }

    pub fn remove(&mut self, addr: &SocketAddr) {
        self.delays.remove(addr);
    }

    pub fn set_default(&mut self, delay_ms: u32) {
        self.default_delay = Duration::from_millis(delay_ms as u64);
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    pub fn delay_for(&self, addr: &SocketAddr) -> Duration {
        self.delays
            .get(addr)
            .copied()
            .unwrap_or(self.default_delay)
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

/// The raw sockets the injector writes to. Sends through here bypass any
/// further delay.
#[derive(Debug)]
pub struct SocketPair {
    reliable: UdpSocket,
    unreliable: UdpSocket,
}

impl SocketPair {
    pub fn new(reliable: UdpSocket, unreliable: UdpSocket) -> Self {
        Self {
            reliable,
            unreliable,
        }
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            reliable: self.reliable.try_clone()?,
            unreliable: self.unreliable.try_clone()?,
        })
    }

    pub fn send(&self, channel: Channel, bytes: &[u8], dest: SocketAddr) -> io::Result<usize> {
        match channel {
            Channel::Reliable => self.reliable.send_to(bytes, dest),
            Channel::Unreliable => self.unreliable.send_to(bytes, dest),
        }
    }
}

#[derive(Debug)]
struct QueuedPacket {
    send_at: Instant,
    sequence: u64,
    bytes: Vec<u8>,
    dest: SocketAddr,
    channel: Channel,
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.send_at == other.send_at && self.sequence == other.sequence
    }
}

impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap; equal send times keep enqueue order.
        other
            .send_at
            .cmp(&self.send_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug)]
struct Inbox {
    pending: Vec<QueuedPacket>,
    running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent(usize),
    Queued(Duration),
}

pub struct LatencyInjector {
    table: LatencyTable,
    sockets: SocketPair,
    inbox: Arc<Mutex<Inbox>>,
    worker: Option<JoinHandle<()>>,
    next_sequence: u64,
}

impl LatencyInjector {
    pub fn spawn(sockets: SocketPair, table: LatencyTable) -> io::Result<Self> {
        let inbox = Arc::new(Mutex::new(Inbox {
            pending: Vec::new(),
            running: true,
        }));

        let worker_sockets = sockets.try_clone()?;
        let worker_inbox = Arc::clone(&inbox);
        let worker = thread::Builder::new()
            .name("latency-injector".into())
            .spawn(move || run_worker(worker_inbox, worker_sockets))?;

        Ok(Self {
            table,
            sockets,
            inbox,
            worker: Some(worker),
            next_sequence: 0,
        })
    }

    pub fn table(&self) -> &LatencyTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut LatencyTable {
        &mut self.table
    }

    pub fn enqueue(&mut self, bytes: Vec<u8>, dest: SocketAddr, channel: Channel) -> io::Result<Dispatch> {
        let delay = self.table.delay_for(&dest);
        self.enqueue_with_delay(bytes, dest, channel, delay)
    }

    pub fn enqueue_with_delay(
        &mut self,
        bytes: Vec<u8>,
        dest: SocketAddr,
        channel: Channel,
        delay: Duration,
    ) -> io::Result<Dispatch> {
        if delay.is_zero() {
            let sent = self.sockets.send(channel, &bytes, dest)?;
            return Ok(Dispatch::Sent(sent));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut inbox = lock(&self.inbox);
        if !inbox.running {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "latency injector stopped",
            ));
        }
        inbox.pending.push(QueuedPacket {
            send_at: Instant::now() + delay,
            sequence,
            bytes,
            dest,
            channel,
        });

        Ok(Dispatch::Queued(delay))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inbox).running
    }

    /// Stops the worker and joins it. Anything still queued is dropped.
    pub fn shutdown(&mut self) {
        lock(&self.inbox).running = false;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("latency injector thread panicked");
            }
        }
    }
}

impl Drop for LatencyInjector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(inbox: &Mutex<Inbox>) -> MutexGuard<'_, Inbox> {
    inbox.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_worker(inbox: Arc<Mutex<Inbox>>, sockets: SocketPair) {
    let mut heap: BinaryHeap<QueuedPacket> = BinaryHeap::new();

    loop {
        thread::sleep(INJECTOR_TICK);

        {
            let mut shared = lock(&inbox);
            if !shared.running {
                break;
            }
            heap.extend(shared.pending.drain(..));
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|packet| packet.send_at <= now) {
            let Some(packet) = heap.pop() else {
                break;
            };
            if let Err(e) = sockets.send(packet.channel, &packet.bytes, packet.dest) {
                log::debug!("delayed send to {} failed: {}", packet.dest, e);
            }
        }
    }

    if !heap.is_empty() {
        log::debug!("latency injector stopped with {} packets queued", heap.len());
    }
}
