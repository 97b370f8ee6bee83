//! Publish/subscribe notifications for page lifecycle and usage changes.
//!
//! Two ways to listen:
//!
//! * [`EventBus::subscribe`] registers a listener called synchronously on the
//!   publishing task. Keep listeners cheap (update a progress bar, forward to
//!   a channel). The returned [`Subscription`] removes it again.
//! * [`EventBus::stream`] yields the same events as an async stream, backed by
//!   a broadcast channel. Slow consumers miss events rather than blocking
//!   publishers.
//!
//! ```rust
//! use edgequake_slides::events::{EventBus, SlidesEvent};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let sub = bus.subscribe(move |_event: &SlidesEvent| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! bus.publish(SlidesEvent::ConfigChanged);
//! sub.unsubscribe();
//! bus.publish(SlidesEvent::ConfigChanged);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::ledger::UsageRecord;
use crate::model::PageStatus;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const STREAM_CAPACITY: usize = 256;

/// Something observable happened.
#[derive(Debug, Clone)]
pub enum SlidesEvent {
    /// A page moved between lifecycle states.
    StatusChanged {
        page_id: String,
        from: PageStatus,
        to: PageStatus,
    },
    PageCompleted {
        page_id: String,
    },
    PageFailed {
        page_id: String,
        error: String,
    },
    /// The page's current image changed to an existing version.
    ImageVersionSelected {
        page_id: String,
        version: u32,
    },
    UsageRecorded(UsageRecord),
    /// A batch or deck run issued generation for these pages.
    BatchDispatched {
        page_ids: Vec<String>,
    },
    BatchSettled {
        succeeded: usize,
        failed: usize,
    },
    /// The provider configuration set was replaced or edited.
    ConfigChanged,
}

/// Receives events from an [`EventBus`].
///
/// Implemented for every `Fn(&SlidesEvent) + Send + Sync` closure.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &SlidesEvent);
}

impl<F> EventListener for F
where
    F: Fn(&SlidesEvent) + Send + Sync,
{
    fn on_event(&self, event: &SlidesEvent) {
        self(event)
    }
}

/// A boxed stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = SlidesEvent> + Send>>;

struct Inner {
    listeners: Mutex<BTreeMap<u64, Arc<dyn EventListener>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SlidesEvent>,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                sender,
            }),
        }
    }

    /// Register a listener. It stays registered until
    /// [`Subscription::unsubscribe`] is called; dropping the handle does not
    /// remove it.
    pub fn subscribe(&self, listener: impl EventListener + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Events published from now on, as a stream. Lagged events are skipped.
    pub fn stream(&self) -> EventStream {
        let rx = self.inner.sender.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|r| r.ok()))
    }

    /// Deliver `event` to every listener and stream.
    pub fn publish(&self, event: SlidesEvent) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<Arc<dyn EventListener>> =
            self.inner.listeners.lock().values().cloned().collect();
        for listener in &listeners {
            listener.on_event(&event);
        }
        let _ = self.inner.sender.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener. No further events are delivered to it.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}
