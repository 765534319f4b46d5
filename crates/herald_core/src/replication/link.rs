//! Point-to-point replication link over the host's plugin channel.
//!
//! Outbound: [`ReplicationLink::send`] / [`ReplicationLink::broadcast`]
//! encode an envelope and hand the bytes to the host transport,
//! fire-and-forget. Inbound: the host pushes raw frames into an
//! [`InboundSender`]; the paired [`ReplicationStream`] decodes them lazily,
//! drops malformed frames and self-originated echoes, and yields envelopes in
//! transport order.

use super::protocol::ReplicationMessage;
use crate::types::{ProcessId, SequenceCounter};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Host messaging capability: moves one frame to one process.
///
/// Implementations must not block; delivery is best effort with no
/// acknowledgment.
pub trait ReplicationTransport: Send + Sync {
    fn send_frame(&self, target: &ProcessId, frame: Vec<u8>);
}

/// Raw frame as received from the host channel.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: ProcessId,
    pub data: Vec<u8>,
}

/// Counters shared between the link and its inbound stream.
#[derive(Debug, Default)]
pub struct LinkStats {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub malformed: AtomicU64,
    pub echoes: AtomicU64,
    pub sequence_gaps: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed: u64,
    pub echoes: u64,
    pub sequence_gaps: u64,
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            echoes: self.echoes.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
        }
    }
}

/// Outbound half of the replication link.
pub struct ReplicationLink {
    local: ProcessId,
    peers: Vec<ProcessId>,
    transport: Arc<dyn ReplicationTransport>,
    sequence: SequenceCounter,
    stats: Arc<LinkStats>,
}

impl ReplicationLink {
    /// Creates the link plus the inbound pair the host feeds.
    pub fn new(
        local: ProcessId,
        peers: Vec<ProcessId>,
        transport: Arc<dyn ReplicationTransport>,
    ) -> (Self, InboundSender, ReplicationStream) {
        let stats = Arc::new(LinkStats::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = ReplicationStream {
            rx,
            local: local.clone(),
            tracker: SequenceTracker::default(),
            stats: stats.clone(),
        };
        let link = Self {
            local,
            peers,
            transport,
            sequence: SequenceCounter::new(),
            stats,
        };
        (link, InboundSender { tx }, stream)
    }

    pub fn local(&self) -> &ProcessId {
        &self.local
    }

    pub fn peers(&self) -> &[ProcessId] {
        &self.peers
    }

    /// Sequence number for the next outbound envelope.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.next()
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Sends one envelope to one process. At most once, never blocks.
    pub fn send(&self, target: &ProcessId, message: &ReplicationMessage) {
        match message.encode() {
            Ok(frame) => self.send_frame(target, frame),
            Err(e) => error!("Dropping outbound replication message: {}", e),
        }
    }

    /// Sends one envelope to every configured peer.
    pub fn broadcast(&self, message: &ReplicationMessage) {
        if self.peers.is_empty() {
            return;
        }
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping outbound replication message: {}", e);
                return;
            }
        };
        trace!(
            "📤 {} v{} for {} -> {} peers",
            message.kind(),
            message.version,
            message.identity,
            self.peers.len()
        );
        for peer in &self.peers {
            self.send_frame(peer, frame.clone());
        }
    }

    fn send_frame(&self, target: &ProcessId, frame: Vec<u8>) {
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.transport.send_frame(target, frame);
    }
}

/// Handle the host uses to push received channel frames.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<InboundFrame>,
}

impl InboundSender {
    /// Queues a frame. Returns `false` once the receiving side has shut down.
    pub fn deliver(&self, from: ProcessId, data: Vec<u8>) -> bool {
        self.tx.send(InboundFrame { from, data }).is_ok()
    }
}

/// Lazy, unbounded, non-restartable stream of decoded envelopes.
pub struct ReplicationStream {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
    local: ProcessId,
    tracker: SequenceTracker,
    stats: Arc<LinkStats>,
}

impl ReplicationStream {
    /// Stops accepting new frames; already queued frames are still yielded.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Frames queued but not yet yielded.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn accept(&mut self, frame: InboundFrame) -> Option<ReplicationMessage> {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let message = match ReplicationMessage::decode(&frame.data) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("🗑️ Dropping frame from {}: {}", frame.from, e);
                return None;
            }
        };

        if message.origin == self.local {
            self.stats.echoes.fetch_add(1, Ordering::Relaxed);
            trace!("Ignoring echo of own sequence {}", message.sequence);
            return None;
        }

        let missed = self.tracker.observe(&message.origin, message.sequence);
        if missed > 0 {
            self.stats.sequence_gaps.fetch_add(missed, Ordering::Relaxed);
            debug!(
                "Missed {} frame(s) from {} before sequence {}; next snapshot will repair",
                missed, message.origin, message.sequence
            );
        }
        Some(message)
    }
}

impl Stream for ReplicationStream {
    type Item = ReplicationMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(frame)) => {
                    if let Some(message) = self.accept(frame) {
                        return Poll::Ready(Some(message));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Highest sequence seen per origin; used only to account for gaps.
#[derive(Debug, Default)]
struct SequenceTracker {
    last_seen: HashMap<ProcessId, u64>,
}

impl SequenceTracker {
    /// Records `sequence` from `origin` and returns how many frames were
    /// skipped since the last one.
    fn observe(&mut self, origin: &ProcessId, sequence: u64) -> u64 {
        match self.last_seen.get_mut(origin) {
            None => {
                self.last_seen.insert(origin.clone(), sequence);
                0
            }
            Some(last) if sequence > *last => {
                let missed = sequence - *last - 1;
                *last = sequence;
                missed
            }
            Some(last) if sequence < *last / 2 => {
                // Far below the high-water mark: the origin restarted.
                debug!("{} restarted its sequence ({} -> {})", origin, last, sequence);
                *last = sequence;
                0
            }
            // Reordered or duplicated delivery.
            Some(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayerId, PlayerIdentity, PlayerRecord};
    use chrono::Utc;
    use futures::StreamExt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingTransport {
        sent: Mutex<Vec<(ProcessId, Vec<u8>)>>,
    }

    impl ReplicationTransport for CapturingTransport {
        fn send_frame(&self, target: &ProcessId, frame: Vec<u8>) {
            self.sent.lock().push((target.clone(), frame));
        }
    }

    fn snapshot(origin: &str, sequence: u64) -> ReplicationMessage {
        let nova = PlayerIdentity::new(PlayerId::new(), "Nova");
        let record = PlayerRecord::first_join(&nova, "survival", Utc::now());
        ReplicationMessage::snapshot(origin.into(), sequence, nova.id, record)
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let transport = Arc::new(CapturingTransport::default());
        let (link, _inbound, _stream) = ReplicationLink::new(
            "proxy".into(),
            vec!["survival".into(), "creative".into()],
            transport.clone(),
        );

        link.broadcast(&snapshot("proxy", link.next_sequence()));

        let sent = transport.sent.lock();
        let targets: Vec<_> = sent.iter().map(|(t, _)| t.as_str().to_string()).collect();
        assert_eq!(targets, vec!["survival", "creative"]);
        assert_eq!(link.stats().frames_sent, 2);
    }

    #[tokio::test]
    async fn test_stream_drops_malformed_and_echoes() {
        let transport = Arc::new(CapturingTransport::default());
        let (link, inbound, mut stream) =
            ReplicationLink::new("survival".into(), vec!["proxy".into()], transport);

        let good = snapshot("proxy", 1);
        inbound.deliver("proxy".into(), b"not json".to_vec());
        inbound.deliver("proxy".into(), snapshot("survival", 1).encode().unwrap());
        inbound.deliver("proxy".into(), good.encode().unwrap());
        drop(inbound);

        assert_eq!(stream.next().await, Some(good));
        assert_eq!(stream.next().await, None);

        let stats = link.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.echoes, 1);
    }

    #[tokio::test]
    async fn test_sequence_gaps_are_counted() {
        let transport = Arc::new(CapturingTransport::default());
        let (link, inbound, mut stream) =
            ReplicationLink::new("survival".into(), vec!["proxy".into()], transport);

        for sequence in [1, 2, 5, 4] {
            inbound.deliver("proxy".into(), snapshot("proxy", sequence).encode().unwrap());
        }
        drop(inbound);

        let received: Vec<_> = stream.by_ref().collect().await;
        assert_eq!(received.len(), 4);
        assert_eq!(link.stats().sequence_gaps, 2);
    }

    #[test]
    fn test_tracker_detects_restart() {
        let mut tracker = SequenceTracker::default();
        let origin = ProcessId::from("proxy");
        assert_eq!(tracker.observe(&origin, 1000), 0);
        assert_eq!(tracker.observe(&origin, 1), 0);
        assert_eq!(tracker.observe(&origin, 3), 1);
    }

    #[test]
    fn test_tracker_tolerates_extreme_sequences() {
        let mut tracker = SequenceTracker::default();
        let origin = ProcessId::from("proxy");
        assert_eq!(tracker.observe(&origin, u64::MAX), 0);
        assert_eq!(tracker.observe(&origin, u64::MAX), 0);
        assert_eq!(tracker.observe(&origin, 0), 0);
        assert_eq!(tracker.observe(&origin, u64::MAX), u64::MAX - 1);
    }

    #[test]
    fn test_send_targets_one_process() {
        let transport = Arc::new(CapturingTransport::default());
        let (link, _inbound, _stream) = ReplicationLink::new(
            "proxy".into(),
            vec!["survival".into(), "creative".into()],
            transport.clone(),
        );
        let message = snapshot("proxy", link.next_sequence());

        link.send(&"creative".into(), &message);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "creative");
        assert_eq!(ReplicationMessage::decode(&sent[0].1).unwrap(), message);
        assert_eq!(link.stats().frames_sent, 1);
    }
}
