//! Change feed over a container.
//!
//! A [`ChangeStream`] is a listener whose callback serializes each
//! notification into a [`ChangeRecord`] and pushes it onto a bounded
//! channel. Delivery never blocks the fire; if the buffer is full the record
//! is dropped and counted. Records are plain JSON, so the receiving end can
//! be handed to another thread.
//!
//! Records are only produced by fires on the container's own thread, so the
//! stream itself offers no unbounded blocking receive. Block on
//! [`ChangeStream::receiver`] from a consumer thread instead.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::dispatch::{ListenerHandle, ListenerParams, Observed, Registration, TopicFilter};
use crate::error::{ObservableResult, StreamError};
use crate::event::{Disposition, FireEvent};
use crate::observable::Observable;

/// Per-stream buffer capacity used by [`Observable::changes`].
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// One delivered notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub event_id: Uuid,
    /// Filter paths, or the firing topics for an unfiltered stream.
    pub topics: Vec<String>,
    pub entries: Vec<String>,
    pub exits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubbling: Option<Vec<String>>,
    pub current: serde_json::Value,
    pub prior: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    fn capture(paths: &[String], current: &Observed, prior: &Observed, event: &FireEvent) -> Self {
        let topics = if paths.is_empty() { current.topics() } else { paths.to_vec() };
        Self {
            event_id: event.id(),
            topics,
            entries: event.entries.clone(),
            exits: event.exits.clone(),
            bubbling: event.bubbling.clone(),
            current: current.to_json(),
            prior: prior.to_json(),
            timestamp: event.fired_at(),
        }
    }
}

/// A subscription to a container's changes.
///
/// Dropping the stream detaches its listener.
#[derive(Debug)]
pub struct ChangeStream {
    listener: ListenerHandle,
    rx: Receiver<ChangeRecord>,
    tx: Rc<RefCell<Option<Sender<ChangeRecord>>>>,
    dropped: Rc<Cell<u64>>,
}

impl ChangeStream {
    /// Records discarded because the buffer was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }

    /// A receiver clone, for draining the feed on another thread.
    #[must_use]
    pub fn receiver(&self) -> Receiver<ChangeRecord> {
        self.rx.clone()
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.listener.is_attached()
    }

    /// Stops delivery. Idempotent.
    ///
    /// Buffered records can still be received; after that the stream reports
    /// `StreamError::Disconnected`, and iterators over [`receiver`](Self::receiver)
    /// clones end.
    pub fn unsubscribe(&self) {
        if self.listener.detach() {
            debug!(listener = %self.listener.id(), "change stream unsubscribed");
        }
        self.tx.borrow_mut().take();
    }

    /// Receive the next record if one is buffered.
    ///
    /// # Errors
    /// `StreamError::Disconnected` once unsubscribed and drained.
    pub fn try_recv(&self) -> Result<Option<ChangeRecord>, StreamError> {
        match self.rx.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamError::Disconnected),
        }
    }

    /// Receive the next record with a timeout.
    ///
    /// # Errors
    /// `StreamError::Timeout` if nothing arrives in time,
    /// `StreamError::Disconnected` once unsubscribed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeRecord, StreamError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => StreamError::Disconnected,
        })
    }

    /// Everything currently buffered.
    #[must_use]
    pub fn drain(&self) -> Vec<ChangeRecord> {
        self.rx.try_iter().collect()
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Observable {
    /// Subscribes a change feed with the default capacity.
    ///
    /// # Errors
    /// See [`stream`](Self::stream).
    pub fn changes(&self, filter: impl Into<TopicFilter>) -> ObservableResult<ChangeStream> {
        self.stream(filter, ListenerParams::new(), DEFAULT_STREAM_CAPACITY)
    }

    /// Subscribes a change feed over `filter`, gated by `params`.
    ///
    /// # Errors
    /// Registration errors from the dispatch engine.
    pub fn stream(
        &self,
        filter: impl Into<TopicFilter>,
        params: ListenerParams,
        capacity: usize,
    ) -> ObservableResult<ChangeStream> {
        let filter = filter.into();
        let paths = filter.paths().to_vec();
        let (tx, rx) = bounded::<ChangeRecord>(capacity.max(1));
        let tx = Rc::new(RefCell::new(Some(tx)));
        let dropped = Rc::new(Cell::new(0_u64));

        let sender = Rc::clone(&tx);
        let counter = Rc::clone(&dropped);
        let callback = move |current: Observed, prior: Observed, event: &mut FireEvent| {
            let guard = sender.borrow();
            let Some(tx) = guard.as_ref() else {
                return Disposition::Continue;
            };
            match tx.try_send(ChangeRecord::capture(&paths, &current, &prior, event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counter.set(counter.get() + 1);
                    trace!("change stream full, record dropped");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
            Disposition::Continue
        };

        let listener = self.observe(Registration::any().filter(filter).params(params).callback(callback))?;
        Ok(ChangeStream {
            listener,
            rx,
            tx,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn records_carry_values_and_topics() {
        let obs = Observable::map([("a", 1)]);
        let stream = obs.changes("a").unwrap();
        obs.set("a", 2).unwrap();

        let record = stream.try_recv().unwrap().unwrap();
        assert_eq!(record.topics, vec!["a"]);
        assert_eq!(record.current, serde_json::json!(2));
        assert_eq!(record.prior, serde_json::json!(1));
        assert!(record.bubbling.is_none());
        assert!(stream.try_recv().unwrap().is_none());
    }

    #[test]
    fn unfiltered_stream_uses_firing_topics() {
        let obs = Observable::map(Vec::<(String, Value)>::new());
        let stream = obs.changes(TopicFilter::Any).unwrap();
        obs.assign([("x", 1), ("y", 2)]).unwrap();

        let record = stream.try_recv().unwrap().unwrap();
        assert_eq!(record.topics, vec!["x", "y"]);
        assert_eq!(record.entries, vec!["x", "y"]);
        assert_eq!(record.current, serde_json::json!({"x": 1, "y": 2}));
    }

    #[test]
    fn full_buffer_drops_and_counts() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.stream("a", ListenerParams::new(), 1).unwrap();
        obs.set("a", 1).unwrap();
        obs.set("a", 2).unwrap();
        obs.set("a", 3).unwrap();

        assert_eq!(stream.dropped_count(), 2);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_disconnects() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        obs.set("a", 1).unwrap();
        stream.unsubscribe();
        stream.unsubscribe();
        obs.set("a", 2).unwrap();

        assert!(!stream.is_subscribed());
        assert_eq!(stream.try_recv().unwrap().unwrap().current, serde_json::json!(1));
        assert_eq!(stream.try_recv(), Err(StreamError::Disconnected));
        assert_eq!(
            stream.recv_timeout(Duration::from_millis(5)),
            Err(StreamError::Disconnected)
        );
    }

    #[test]
    fn empty_stream_never_blocks_its_owner() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        assert_eq!(stream.try_recv(), Ok(None));
        assert!(stream.drain().is_empty());
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(1)),
            Err(StreamError::Timeout { .. })
        ));

        obs.set("a", 1).unwrap();
        assert_eq!(stream.recv_timeout(Duration::from_millis(1)).unwrap().current, serde_json::json!(1));
    }

    #[test]
    fn receiver_clones_end_after_unsubscribe() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        let rx = stream.receiver();
        obs.set("a", 1).unwrap();
        stream.unsubscribe();
        let records: Vec<ChangeRecord> = rx.iter().collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn recv_timeout_reports_timeout() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, StreamError::Timeout { duration_ms: 5 });
    }

    #[test]
    fn dropping_the_stream_detaches() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        assert_eq!(obs.listener_count(), 1);
        drop(stream);
        assert_eq!(obs.listener_count(), 0);
    }

    #[test]
    fn records_serialize_to_json() {
        let obs = Observable::map([("a", 0)]);
        let stream = obs.changes("a").unwrap();
        obs.set("a", 1).unwrap();
        let record = stream.try_recv().unwrap().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["topics"], serde_json::json!(["a"]));
        let back: ChangeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
