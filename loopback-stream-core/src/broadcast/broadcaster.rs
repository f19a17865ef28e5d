use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::models::status::StreamFormat;

/// One message queued for a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Format description for the capture run that follows.
    Handshake(StreamFormat),
    /// One decimated PCM buffer.
    Audio(Bytes),
}

struct Subscriber {
    tx: mpsc::Sender<StreamMessage>,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

struct BroadcastState {
    subscribers: HashMap<Uuid, Subscriber>,
    /// Format of the running capture, if any. Handed to new subscribers
    /// under the same lock that inserts them.
    format: Option<StreamFormat>,
}

/// Fans decimated audio out to every connected subscriber.
///
/// Each subscriber owns a bounded queue. `broadcast` never blocks: it
/// `try_send`s into every queue and drops the frame for subscribers whose
/// queue is full or whose transport has gone away.
///
/// ```text
/// [capture thread] → broadcast() ─┬→ [queue] → [connection task] → peer
///                                 ├→ [queue] → [connection task] → peer
///                                 └→ ...
/// ```
pub struct Broadcaster {
    state: RwLock<BroadcastState>,
    queue_depth: usize,
    bytes_broadcast: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new(queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(BroadcastState {
                subscribers: HashMap::new(),
                format: None,
            }),
            queue_depth: queue_depth.max(1),
            bytes_broadcast: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    /// Add a subscriber.
    ///
    /// If a capture is running, its handshake is queued first, atomically
    /// with insertion, so no audio can precede it.
    pub fn register(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = Uuid::new_v4();

        let handshake_sent = {
            let mut state = self.state.write();
            let handshake_sent = match &state.format {
                // Fresh queue with capacity >= 1: cannot be full.
                Some(format) => tx.try_send(StreamMessage::Handshake(format.clone())).is_ok(),
                None => false,
            };
            state.subscribers.insert(id, Subscriber { tx });
            handshake_sent
        };

        log::debug!("Subscriber {} registered (handshake: {})", id, handshake_sent);

        Subscription {
            id,
            rx,
            handshake_sent,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Queue `payload` for every live subscriber.
    ///
    /// Never fails and never blocks on a subscriber.
    pub fn broadcast(&self, payload: Bytes) {
        self.bytes_broadcast
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let mut saw_closed = false;
        {
            let state = self.state.read();
            for (id, subscriber) in state.subscribers.iter() {
                match subscriber.tx.try_send(StreamMessage::Audio(payload.clone())) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Subscriber {} queue full, frame dropped", id);
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            // Never wait for the write lock on the capture thread.
            if let Some(mut state) = self.state.try_write() {
                Self::retain_live(&mut state);
            }
        }
    }

    /// Record the format of a new capture run and queue its handshake for
    /// every registered subscriber.
    ///
    /// A subscriber whose queue cannot take the handshake is disconnected
    /// rather than fed audio it cannot interpret.
    pub fn announce(&self, format: StreamFormat) {
        let mut state = self.state.write();

        let mut evicted = Vec::new();
        for (id, subscriber) in state.subscribers.iter() {
            match subscriber.tx.try_send(StreamMessage::Handshake(format.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("Subscriber {} too far behind for handshake, disconnecting", id);
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in evicted {
            state.subscribers.remove(&id);
        }

        state.format = Some(format);
    }

    /// Forget the current capture format. Subscribers stay connected.
    pub fn withdraw(&self) {
        self.state.write().format = None;
    }

    pub fn current_format(&self) -> Option<StreamFormat> {
        self.state.read().format.clone()
    }

    /// Subscribers whose transport is still open.
    pub fn live_count(&self) -> usize {
        self.state
            .read()
            .subscribers
            .values()
            .filter(|s| s.is_live())
            .count()
    }

    /// Registered entries, live or not.
    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Remove entries whose transport has closed. Returns how many were removed.
    pub fn compact(&self) -> usize {
        let mut state = self.state.write();
        Self::retain_live(&mut state)
    }

    pub fn bytes_broadcast(&self) -> u64 {
        self.bytes_broadcast.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    fn retain_live(state: &mut BroadcastState) -> usize {
        let before = state.subscribers.len();
        state.subscribers.retain(|_, s| s.is_live());
        let removed = before - state.subscribers.len();
        if removed > 0 {
            log::debug!("Reclaimed {} closed subscriber(s)", removed);
        }
        removed
    }

    fn unregister(&self, id: &Uuid) {
        if self.state.write().subscribers.remove(id).is_some() {
            log::debug!("Subscriber {} unregistered", id);
        }
    }
}

/// Receiving side of one subscriber. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<StreamMessage>,
    handshake_sent: bool,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a handshake was queued at registration time.
    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }

    /// Next queued message. `None` once the broadcaster disconnected us.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamMessage> {
        self.rx.try_recv().ok()
    }

    /// Mark this subscriber not-live. Nothing further is queued; the entry
    /// is reclaimed on a later broadcast or on drop.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unregister(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::models::audio_models::{SampleEncoding, WaveFormat};

    fn format() -> StreamFormat {
        StreamFormat::new(
            &WaveFormat {
                sample_rate: 48000,
                bits_per_sample: 16,
                channels: 2,
                encoding: SampleEncoding::Pcm,
            },
            4,
        )
    }

    fn audio(bytes: &[u8]) -> StreamMessage {
        StreamMessage::Audio(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn register_without_capture_sends_no_handshake() {
        let broadcaster = Broadcaster::new(8);
        let mut sub = broadcaster.register();

        assert!(!sub.handshake_sent());
        assert!(sub.try_recv().is_none());

        broadcaster.broadcast(Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(sub.try_recv(), Some(audio(&[1, 2, 3, 4])));
    }

    #[test]
    fn register_during_capture_gets_handshake_first() {
        let broadcaster = Broadcaster::new(8);
        broadcaster.announce(format());
        broadcaster.broadcast(Bytes::from_static(&[9, 9, 9, 9]));

        let mut sub = broadcaster.register();
        broadcaster.broadcast(Bytes::from_static(&[1, 1, 1, 1]));

        assert!(sub.handshake_sent());
        assert_eq!(sub.try_recv(), Some(StreamMessage::Handshake(format())));
        assert_eq!(sub.try_recv(), Some(audio(&[1, 1, 1, 1])));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn announce_reaches_existing_subscribers() {
        let broadcaster = Broadcaster::new(8);
        let mut sub = broadcaster.register();

        broadcaster.announce(format());
        broadcaster.broadcast(Bytes::from_static(&[5, 5, 5, 5]));

        assert_eq!(sub.try_recv(), Some(StreamMessage::Handshake(format())));
        assert_eq!(sub.try_recv(), Some(audio(&[5, 5, 5, 5])));
    }

    #[test]
    fn withdraw_stops_handshakes_for_new_subscribers() {
        let broadcaster = Broadcaster::new(8);
        broadcaster.announce(format());
        broadcaster.withdraw();

        let mut sub = broadcaster.register();
        assert!(!sub.handshake_sent());
        assert!(sub.try_recv().is_none());
        assert!(broadcaster.current_format().is_none());
    }

    #[test]
    fn closed_subscriber_does_not_affect_others() {
        let broadcaster = Broadcaster::new(8);
        let mut a = broadcaster.register();
        let mut b = broadcaster.register();
        let mut c = broadcaster.register();

        b.close();
        assert_eq!(broadcaster.live_count(), 2);

        broadcaster.broadcast(Bytes::from_static(&[7, 7]));

        assert_eq!(a.try_recv(), Some(audio(&[7, 7])));
        assert_eq!(c.try_recv(), Some(audio(&[7, 7])));
        assert!(b.try_recv().is_none());

        // The closed entry was reclaimed by the broadcast.
        assert_eq!(broadcaster.subscriber_count(), 2);
    }

    #[test]
    fn full_queue_drops_frames_for_that_subscriber_only() {
        let broadcaster = Broadcaster::new(2);
        let mut slow = broadcaster.register();
        let mut fast = broadcaster.register();

        for i in 0..4u8 {
            broadcaster.broadcast(Bytes::copy_from_slice(&[i]));
            assert_eq!(fast.try_recv(), Some(audio(&[i])));
        }

        assert_eq!(slow.try_recv(), Some(audio(&[0])));
        assert_eq!(slow.try_recv(), Some(audio(&[1])));
        assert!(slow.try_recv().is_none());
        assert_eq!(broadcaster.frames_dropped(), 2);
        assert_eq!(broadcaster.bytes_broadcast(), 4);
    }

    #[test]
    fn announce_disconnects_subscriber_with_full_queue() {
        let broadcaster = Broadcaster::new(1);
        let mut stuck = broadcaster.register();
        broadcaster.broadcast(Bytes::from_static(&[1]));

        broadcaster.announce(format());

        assert_eq!(broadcaster.subscriber_count(), 0);
        // Queued audio drains, then the queue reports disconnection.
        assert_eq!(stuck.try_recv(), Some(audio(&[1])));
        assert!(stuck.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let broadcaster = Broadcaster::new(8);
        let sub = broadcaster.register();
        let _other = broadcaster.register();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn compact_removes_closed_entries() {
        let broadcaster = Broadcaster::new(8);
        let mut a = broadcaster.register();
        let _b = broadcaster.register();
        a.close();

        assert_eq!(broadcaster.compact(), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn concurrent_register_and_broadcast_preserves_order() {
        let broadcaster = Broadcaster::new(4096);

        let producer = {
            let broadcaster = Arc::clone(&broadcaster);
            thread::spawn(move || {
                for i in 0..2000u32 {
                    broadcaster.broadcast(Bytes::copy_from_slice(&i.to_le_bytes()));
                }
            })
        };

        let mut subs: Vec<Subscription> = (0..32).map(|_| broadcaster.register()).collect();
        producer.join().unwrap();

        for sub in subs.iter_mut() {
            let mut last: Option<u32> = None;
            while let Some(StreamMessage::Audio(bytes)) = sub.try_recv() {
                let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if let Some(prev) = last {
                    assert_eq!(value, prev + 1);
                }
                last = Some(value);
            }
        }
        assert_eq!(broadcaster.live_count(), 32);
    }
}
