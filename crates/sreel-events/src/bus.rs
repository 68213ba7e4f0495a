//! Per-job broadcast channels with latest-event replay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use sreel_models::{EventEnvelope, JobEvent, JobId};

/// Ring-buffer capacity per job channel. A slower subscriber may lag
/// up to this many events before it is dropped.
const CHANNEL_CAPACITY: usize = 256;

struct JobChannel {
    tx: broadcast::Sender<EventEnvelope>,
    latest: Option<EventEnvelope>,
    next_seq: u64,
}

impl JobChannel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            latest: None,
            next_seq: 1,
        }
    }
}

/// Multi-subscriber event fan-out keyed by job id.
///
/// Cheap to clone; all clones share state. Per-job channels persist
/// until [`EventBus::forget`] so subscribers attaching after a job
/// finished still observe the terminal event.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<HashMap<String, JobChannel>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event, assigning the next sequence number.
    ///
    /// Never blocks: broadcast send drops the oldest buffered item for
    /// lagging receivers instead of waiting on them.
    pub fn publish(&self, job_id: &JobId, event: JobEvent) -> EventEnvelope {
        let mut map = self.lock();
        let channel = map
            .entry(job_id.as_str().to_string())
            .or_insert_with(JobChannel::new);

        let envelope = EventEnvelope::new(job_id.clone(), event).with_seq(channel.next_seq);
        channel.next_seq += 1;
        channel.latest = Some(envelope.clone());

        // Err means no live receivers; the envelope is still retained
        // as the latest for future subscribers.
        let _ = channel.tx.send(envelope.clone());
        envelope
    }

    /// Subscribe to a job's events.
    ///
    /// The stream starts with the latest envelope (if any), then live
    /// events, and ends after a terminal event is delivered.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let mut map = self.lock();
        let channel = map
            .entry(job_id.as_str().to_string())
            .or_insert_with(JobChannel::new);

        Subscription {
            replay: channel.latest.clone(),
            rx: channel.tx.subscribe(),
            finished: false,
        }
    }

    /// Latest envelope published for a job, if any.
    pub fn latest(&self, job_id: &JobId) -> Option<EventEnvelope> {
        self.lock().get(job_id.as_str()).and_then(|c| c.latest.clone())
    }

    /// Discard a job's channel state.
    pub fn forget(&self, job_id: &JobId) {
        if self.lock().remove(job_id.as_str()).is_some() {
            debug!(job_id = %job_id, "dropped event channel");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobChannel>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One item delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The next event in sequence order.
    Event(EventEnvelope),
    /// The subscriber fell behind and skipped this many events; the
    /// subscription ends after this item.
    Lagged(u64),
}

/// A single subscriber's view of one job's event stream.
pub struct Subscription {
    replay: Option<EventEnvelope>,
    rx: broadcast::Receiver<EventEnvelope>,
    finished: bool,
}

impl Subscription {
    /// Next delivery, or `None` once the stream has ended.
    ///
    /// The stream ends after delivering a terminal event, after a lag
    /// signal, or when the bus drops the job channel.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }

        if let Some(envelope) = self.replay.take() {
            if envelope.is_terminal() {
                self.finished = true;
            }
            return Some(Delivery::Event(envelope));
        }

        match self.rx.recv().await {
            Ok(envelope) => {
                if envelope.is_terminal() {
                    self.finished = true;
                }
                Some(Delivery::Event(envelope))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                self.finished = true;
                Some(Delivery::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.finished = true;
                None
            }
        }
    }

    /// Drain the rest of the stream into a vector (tests, polling).
    pub async fn collect_events(mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(Delivery::Event(envelope)) = self.next().await {
            events.push(envelope);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sreel_models::{ErrorKind, FinalVideo, Stage};

    fn final_video() -> FinalVideo {
        FinalVideo {
            path: "/videos/j/final.mp4".into(),
            duration_seconds: 9.0,
            byte_size: 4096,
            scene_count: 3,
            chapter_count: 1,
        }
    }

    #[tokio::test]
    async fn test_sequences_are_strictly_monotonic() {
        let bus = EventBus::new();
        let job = JobId::from_string("j1");

        let a = bus.publish(&job, JobEvent::progress(Stage::Analyze, 0, "start"));
        let b = bus.publish(&job, JobEvent::progress(Stage::Analyze, 20, "done"));
        let c = bus.publish(&job, JobEvent::progress(Stage::Storyboard, 30, "done"));

        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_replay() {
        let bus = EventBus::new();
        let job = JobId::from_string("j2");

        bus.publish(&job, JobEvent::progress(Stage::Analyze, 10, "a"));
        bus.publish(&job, JobEvent::progress(Stage::Render, 50, "b"));

        let mut sub = bus.subscribe(&job);
        match sub.next().await {
            Some(Delivery::Event(env)) => {
                assert_eq!(env.event.progress_value(), Some(50));
            }
            other => panic!("expected replayed event, got {:?}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal_event() {
        let bus = EventBus::new();
        let job = JobId::from_string("j3");

        let mut sub = bus.subscribe(&job);
        bus.publish(&job, JobEvent::progress(Stage::Render, 60, "render"));
        bus.publish(&job, JobEvent::completed(final_video()));

        let first = sub.next().await;
        assert!(matches!(first, Some(Delivery::Event(_))));
        let second = sub.next().await;
        match second {
            Some(Delivery::Event(env)) => assert!(env.is_terminal()),
            other => panic!("expected terminal event, got {:?}", other.is_some()),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_all_subscribers_observe_same_terminal_event() {
        let bus = EventBus::new();
        let job = JobId::from_string("j4");

        let mut early = bus.subscribe(&job);
        bus.publish(&job, JobEvent::progress(Stage::Render, 40, "mid"));
        let mut mid = bus.subscribe(&job);
        bus.publish(&job, JobEvent::failed(ErrorKind::Render, "scene 2 failed"));
        let mut late = bus.subscribe(&job);

        async fn last_event(sub: &mut Subscription) -> EventEnvelope {
            let mut last = None;
            while let Some(Delivery::Event(env)) = sub.next().await {
                last = Some(env);
            }
            last.expect("stream delivered no events")
        }

        let (a, b, c) = (
            last_event(&mut early).await,
            last_event(&mut mid).await,
            last_event(&mut late).await,
        );
        assert_eq!(a.seq, b.seq);
        assert_eq!(b.seq, c.seq);
        assert!(a.is_terminal());
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped_with_lag_signal() {
        let bus = EventBus::new();
        let job = JobId::from_string("j5");

        let mut sub = bus.subscribe(&job);
        for i in 0..CHANNEL_CAPACITY + 50 {
            bus.publish(
                &job,
                JobEvent::progress(Stage::Render, (i % 100) as u8, "spam"),
            );
        }

        // First recv observes the lag, ends the subscription.
        match sub.next().await {
            Some(Delivery::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag signal, got event={:?}", other.is_some()),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_jobs_are_independent() {
        let bus = EventBus::new();
        let j1 = JobId::from_string("a");
        let j2 = JobId::from_string("b");

        bus.publish(&j1, JobEvent::progress(Stage::Analyze, 5, "j1"));
        assert!(bus.latest(&j2).is_none());
        let e2 = bus.publish(&j2, JobEvent::progress(Stage::Analyze, 5, "j2"));
        assert_eq!(e2.seq, 1);
    }

    #[tokio::test]
    async fn test_forget_drops_channel() {
        let bus = EventBus::new();
        let job = JobId::from_string("j6");
        bus.publish(&job, JobEvent::progress(Stage::Analyze, 5, "x"));
        bus.forget(&job);
        assert!(bus.latest(&job).is_none());
    }
}
