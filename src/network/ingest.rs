//! Network ingestion loop
//!
//! One dedicated thread per inbound stream blocks on its UDP socket,
//! decodes each datagram and publishes the result into the stream's
//! mailbox. The thread never touches the scene; the consumer tick does.
//!
//! ```text
//!   Bound ──start──▶ Receiving ──close──▶ Closed
//!                     │    ▲
//!              error  ▼    │ next datagram
//!                    Faulted
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{MAX_DATAGRAM, SHUTDOWN_JOIN_TIMEOUT};
use crate::error::NetworkError;
use crate::network::join_bounded;
use crate::network::udp::{create_socket, shutdown_socket, SocketOptions};
use crate::protocol::sequence::{SequenceEvent, SequenceTracker};
use crate::protocol::wire::{decode, Packet, WireFrame};
use crate::sync::mailbox::SharedMailbox;

/// Pause after a failed receive so a persistent error cannot spin the thread.
const FAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Lifecycle of one ingestion stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Bound = 0,
    Receiving = 1,
    Closed = 2,
    /// The last cycle failed; the loop is still running.
    Faulted = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Bound,
            1 => StreamState::Receiving,
            2 => StreamState::Closed,
            _ => StreamState::Faulted,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == StreamState::Closed
    }
}

struct AtomicStreamState(AtomicU8);

impl AtomicStreamState {
    fn new(state: StreamState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Default)]
struct StreamCounters {
    accepted: AtomicU64,
    malformed: AtomicU64,
    faults: AtomicU64,
    gaps: AtomicU64,
    reordered: AtomicU64,
    duplicates: AtomicU64,
    last_sequence: AtomicU32,
}

/// Snapshot of a stream's counters.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub accepted: u64,
    pub malformed: u64,
    pub faults: u64,
    /// Packets missing between observed sequence numbers.
    pub gaps: u64,
    pub reordered: u64,
    pub duplicates: u64,
    pub last_sequence: u32,
}

/// Receive side of one stream, decoding frames of type `F`.
pub struct StreamReceiver<F: WireFrame> {
    name: String,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    state: Arc<AtomicStreamState>,
    close_requested: Arc<AtomicBool>,
    mailbox: SharedMailbox<Packet<F>>,
    counters: Arc<StreamCounters>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<F> StreamReceiver<F>
where
    F: WireFrame + Send + 'static,
{
    /// Create and bind the stream's socket.
    pub fn bind(
        name: impl Into<String>,
        addr: SocketAddr,
        options: &SocketOptions,
        mailbox: SharedMailbox<Packet<F>>,
    ) -> Result<Self, NetworkError> {
        let name = name.into();
        let socket = create_socket(addr, options)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::info!("Stream {} bound on {}", name, local_addr);

        Ok(Self {
            name,
            socket: Arc::new(socket),
            local_addr,
            state: Arc::new(AtomicStreamState::new(StreamState::Bound)),
            close_requested: Arc::new(AtomicBool::new(false)),
            mailbox,
            counters: Arc::new(StreamCounters::default()),
            thread_handle: None,
        })
    }

    /// Spawn the receive thread.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.thread_handle.is_some() || self.state.load() != StreamState::Bound {
            return Err(NetworkError::AlreadyStarted);
        }

        let ctx = LoopContext {
            name: self.name.clone(),
            socket: self.socket.clone(),
            state: self.state.clone(),
            close_requested: self.close_requested.clone(),
            mailbox: self.mailbox.clone(),
            counters: self.counters.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("ingest-{}", self.name))
            .spawn(move || run_loop(ctx))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Close the socket and wait a bounded interval for the thread to exit.
    pub fn close(&mut self) -> StreamState {
        self.close_requested.store(true, Ordering::Release);
        shutdown_socket(&self.socket);

        match self.thread_handle.take() {
            Some(handle) => {
                join_bounded(&self.name, handle, SHUTDOWN_JOIN_TIMEOUT);
            }
            None => self.state.store(StreamState::Closed),
        }

        let state = self.state.load();
        tracing::info!("Stream {} closed ({:?})", self.name, state);
        state
    }

    pub fn state(&self) -> StreamState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn mailbox(&self) -> &SharedMailbox<Packet<F>> {
        &self.mailbox
    }

    pub fn stats(&self) -> StreamStats {
        let c = &self.counters;
        StreamStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            gaps: c.gaps.load(Ordering::Relaxed),
            reordered: c.reordered.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            last_sequence: c.last_sequence.load(Ordering::Relaxed),
        }
    }
}

impl<F: WireFrame> Drop for StreamReceiver<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.close_requested.store(true, Ordering::Release);
            shutdown_socket(&self.socket);
            join_bounded(&self.name, handle, SHUTDOWN_JOIN_TIMEOUT);
        }
    }
}

struct LoopContext<F> {
    name: String,
    socket: Arc<UdpSocket>,
    state: Arc<AtomicStreamState>,
    close_requested: Arc<AtomicBool>,
    mailbox: SharedMailbox<Packet<F>>,
    counters: Arc<StreamCounters>,
}

fn run_loop<F: WireFrame>(ctx: LoopContext<F>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut tracker = SequenceTracker::new();

    ctx.state.store(StreamState::Receiving);
    tracing::info!("Stream {} receiving", ctx.name);

    loop {
        if ctx.close_requested.load(Ordering::Acquire) {
            break;
        }

        // `recv` rather than `recv_from`: a shutdown wake-up carries no
        // source address.
        let received = ctx.socket.recv(&mut buf);

        // Shutdown can surface as an empty read or as an error.
        if ctx.close_requested.load(Ordering::Acquire) {
            break;
        }

        let outcome = handle_cycle(&ctx, &mut tracker, received.map(|len| &buf[..len]));
        if outcome == CycleOutcome::Faulted {
            thread::sleep(FAULT_BACKOFF);
        }
    }

    ctx.state.store(StreamState::Closed);
    tracing::debug!("Stream {} loop exited", ctx.name);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Idle,
    Accepted,
    Malformed,
    Faulted,
}

/// One receive/decode cycle. Never terminal; closure is decided by the caller.
fn handle_cycle<F: WireFrame>(
    ctx: &LoopContext<F>,
    tracker: &mut SequenceTracker,
    received: std::io::Result<&[u8]>,
) -> CycleOutcome {
    let datagram = match received {
        Ok(datagram) => datagram,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            return CycleOutcome::Idle;
        }
        Err(e) => {
            ctx.counters.faults.fetch_add(1, Ordering::Relaxed);
            // Warn once per run of faults.
            if ctx.state.load() == StreamState::Faulted {
                tracing::trace!("Stream {} receive error: {}", ctx.name, e);
            } else {
                tracing::warn!("Stream {} receive error: {}", ctx.name, e);
            }
            ctx.state.store(StreamState::Faulted);
            return CycleOutcome::Faulted;
        }
    };

    match decode::<F>(datagram) {
        Ok(packet) => {
            record_sequence(&ctx.counters, tracker.observe(packet.sequence));
            ctx.counters
                .last_sequence
                .store(packet.sequence, Ordering::Relaxed);
            ctx.counters.accepted.fetch_add(1, Ordering::Relaxed);
            ctx.mailbox.publish(packet);
            if ctx.state.load() == StreamState::Faulted {
                tracing::info!("Stream {} recovered", ctx.name);
            }
            ctx.state.store(StreamState::Receiving);
            CycleOutcome::Accepted
        }
        Err(e) => {
            ctx.counters.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Stream {} dropped datagram: {}", ctx.name, e);
            CycleOutcome::Malformed
        }
    }
}

fn record_sequence(counters: &StreamCounters, event: SequenceEvent) {
    match event {
        SequenceEvent::Gap(n) => {
            counters.gaps.fetch_add(u64::from(n), Ordering::Relaxed);
        }
        SequenceEvent::Reordered => {
            counters.reordered.fetch_add(1, Ordering::Relaxed);
        }
        SequenceEvent::Duplicate => {
            counters.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        SequenceEvent::First | SequenceEvent::InOrder => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_SAMPLES;
    use crate::protocol::wire::{encode, AudioFrame, BodyJointFrame, PoseFrame};
    use crate::sync::mailbox::create_shared_mailbox;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn options() -> SocketOptions {
        SocketOptions {
            read_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        }
    }

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(v) = poll() {
                return Some(v);
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn test_lifecycle() {
        let mailbox = create_shared_mailbox::<Packet<PoseFrame>>();
        let mut stream = StreamReceiver::bind("pose", loopback(), &options(), mailbox).unwrap();
        assert_eq!(stream.state(), StreamState::Bound);

        stream.start().unwrap();
        assert!(wait_for(|| (stream.state() == StreamState::Receiving).then_some(())).is_some());
        assert!(matches!(stream.start(), Err(NetworkError::AlreadyStarted)));

        let started = Instant::now();
        assert_eq!(stream.close(), StreamState::Closed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!stream.is_running());
    }

    #[test]
    fn test_valid_published_malformed_dropped() {
        let mailbox = create_shared_mailbox::<Packet<BodyJointFrame>>();
        let mut stream =
            StreamReceiver::bind("body", loopback(), &options(), mailbox.clone()).unwrap();
        stream.start().unwrap();

        let sender = UdpSocket::bind(loopback()).unwrap();
        let target = stream.local_addr();

        sender.send_to(&[0u8; 10], target).unwrap();
        let mut wrong_magic = encode(&Packet::new(9, BodyJointFrame::default())).to_vec();
        wrong_magic[0] ^= 0xFF;
        sender.send_to(&wrong_magic, target).unwrap();

        let mut angles = [0.0f32; 29];
        angles[0] = 0.5;
        sender
            .send_to(&encode(&Packet::new(1, BodyJointFrame::new(angles))), target)
            .unwrap();

        let packet = wait_for(|| mailbox.take_if_new()).unwrap();
        assert_eq!(packet.sequence, 1);
        assert_eq!(packet.payload.angles[0], 0.5);

        assert!(wait_for(|| (stream.stats().malformed == 2).then_some(())).is_some());
        let stats = stream.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.faults, 0);
        assert_eq!(stream.state(), StreamState::Receiving);

        assert_eq!(stream.close(), StreamState::Closed);
    }

    #[test]
    fn test_sequence_gaps_are_observed_not_enforced() {
        let mailbox = create_shared_mailbox::<Packet<PoseFrame>>();
        let mut stream =
            StreamReceiver::bind("pose", loopback(), &options(), mailbox.clone()).unwrap();
        stream.start().unwrap();

        let sender = UdpSocket::bind(loopback()).unwrap();
        for seq in [1u32, 2, 6, 4] {
            sender
                .send_to(&encode(&Packet::new(seq, PoseFrame::default())), stream.local_addr())
                .unwrap();
        }

        assert!(wait_for(|| (stream.stats().accepted == 4).then_some(())).is_some());
        let stats = stream.stats();
        assert_eq!(stats.gaps, 3);
        assert_eq!(stats.reordered, 1);
        assert_eq!(stats.last_sequence, 4);
        assert_eq!(mailbox.take_if_new().map(|p| p.sequence), Some(4));

        assert_eq!(stream.close(), StreamState::Closed);
    }

    #[test]
    fn test_close_after_traffic_reaches_closed() {
        // Long timeout: only the socket shutdown can wake the receive.
        let opts = SocketOptions {
            read_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mailbox = create_shared_mailbox::<Packet<PoseFrame>>();
        let mut stream = StreamReceiver::bind("pose", loopback(), &opts, mailbox).unwrap();
        stream.start().unwrap();

        let sender = UdpSocket::bind(loopback()).unwrap();
        sender
            .send_to(&encode(&Packet::new(1, PoseFrame::default())), stream.local_addr())
            .unwrap();
        assert!(wait_for(|| (stream.stats().accepted == 1).then_some(())).is_some());
        thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        assert_eq!(stream.close(), StreamState::Closed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!stream.is_running());
    }

    #[test]
    fn test_largest_audio_frame_fits() {
        let mailbox = create_shared_mailbox::<Packet<AudioFrame>>();
        let mut stream =
            StreamReceiver::bind("audio", loopback(), &options(), mailbox.clone()).unwrap();
        stream.start().unwrap();

        let frame = AudioFrame::new(vec![7; MAX_FRAME_SAMPLES]).unwrap();
        let bytes = encode(&Packet::new(3, frame));
        assert!(bytes.len() <= MAX_DATAGRAM);

        let sender = UdpSocket::bind(loopback()).unwrap();
        sender.send_to(&bytes, stream.local_addr()).unwrap();

        let packet = wait_for(|| mailbox.take_if_new()).unwrap();
        assert_eq!(packet.sequence, 3);
        assert_eq!(packet.payload.samples().len(), MAX_FRAME_SAMPLES);
        assert_eq!(stream.stats().malformed, 0);

        assert_eq!(stream.close(), StreamState::Closed);
    }

    #[test]
    fn test_fault_is_transient() {
        let mailbox = create_shared_mailbox::<Packet<PoseFrame>>();
        let ctx = LoopContext {
            name: "pose".to_string(),
            socket: Arc::new(create_socket(loopback(), &options()).unwrap()),
            state: Arc::new(AtomicStreamState::new(StreamState::Receiving)),
            close_requested: Arc::new(AtomicBool::new(false)),
            mailbox: mailbox.clone(),
            counters: Arc::new(StreamCounters::default()),
        };
        let mut tracker = SequenceTracker::new();
        let refused = || Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));

        assert_eq!(handle_cycle(&ctx, &mut tracker, refused()), CycleOutcome::Faulted);
        assert_eq!(ctx.state.load(), StreamState::Faulted);
        assert_eq!(handle_cycle(&ctx, &mut tracker, refused()), CycleOutcome::Faulted);
        assert_eq!(ctx.counters.faults.load(Ordering::Relaxed), 2);

        // Timeouts and bad datagrams leave the state alone.
        let timeout = Err(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert_eq!(handle_cycle(&ctx, &mut tracker, timeout), CycleOutcome::Idle);
        assert_eq!(handle_cycle(&ctx, &mut tracker, Ok(&[0u8; 3][..])), CycleOutcome::Malformed);
        assert_eq!(ctx.state.load(), StreamState::Faulted);

        let bytes = encode(&Packet::new(5, PoseFrame::default()));
        assert_eq!(handle_cycle(&ctx, &mut tracker, Ok(&bytes[..])), CycleOutcome::Accepted);
        assert_eq!(ctx.state.load(), StreamState::Receiving);
        assert!(!ctx.state.load().is_terminal());
        assert_eq!(mailbox.take_if_new().map(|p| p.sequence), Some(5));
        assert_eq!(ctx.counters.faults.load(Ordering::Relaxed), 2);
        assert_eq!(ctx.counters.malformed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_close_without_start() {
        let mailbox = create_shared_mailbox::<Packet<PoseFrame>>();
        let mut stream = StreamReceiver::bind("idle", loopback(), &options(), mailbox).unwrap();
        assert_eq!(stream.close(), StreamState::Closed);
    }
}
