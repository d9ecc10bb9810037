//! Network subsystem: UDP ingestion, audio uplink and the control channel

pub mod control;
pub mod ingest;
pub mod sender;
pub mod udp;

pub use control::{ControlClient, ControlRequest, ControlResponse, ControlServer};
pub use ingest::{StreamReceiver, StreamState, StreamStats};
pub use sender::{PacketSender, SenderStats};
pub use udp::{create_socket, SocketOptions};

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Best-effort join: wait up to `timeout`, then detach.
///
/// Returns `true` only when the thread exited cleanly in time.
pub(crate) fn join_bounded(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("Thread {} did not exit within {:?}, detaching", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    if handle.join().is_err() {
        tracing::error!("Thread {} panicked", name);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_bounded_reports_outcome() {
        let quick = thread::spawn(|| {});
        assert!(join_bounded("quick", quick, Duration::from_secs(1)));

        let panicked = thread::spawn(|| panic!("worker failed"));
        assert!(!join_bounded("panicked", panicked, Duration::from_secs(1)));

        let slow = thread::spawn(|| thread::sleep(Duration::from_millis(200)));
        assert!(!join_bounded("slow", slow, Duration::from_millis(10)));
    }
}
