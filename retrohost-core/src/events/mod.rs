//! Notifications observed by the host.
//!
//! Listeners run synchronously on the thread that carries the core call, in the order the
//! module issued the callbacks. No core state lock is held while a listener runs, so a
//! listener may query the core (read the frame, list options...) freely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use tracing::trace;

use crate::abi::{LogLevel, RumbleEffect};
use crate::state::lock;

#[derive(Clone, Debug, PartialEq)]
pub enum CoreEvent {
    /// A new frame is in the frame buffer; read it with `Core::acquire_frame`.
    FrameReady,
    /// Interleaved stereo samples.
    AudioOutput { samples: Vec<i16>, rate: f64 },
    /// On-screen message, shown for `frames` frames.
    Message { text: String, frames: u32 },
    Log {
        domain: String,
        level: LogLevel,
        text: String,
    },
    Shutdown,
    VariablesChanged,
    RumbleStateChanged {
        port: u32,
        effect: RumbleEffect,
        strength: u16,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    FrameReady,
    AudioOutput,
    Message,
    Log,
    Shutdown,
    VariablesChanged,
    RumbleStateChanged,
}

impl CoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CoreEvent::FrameReady => EventKind::FrameReady,
            CoreEvent::AudioOutput { .. } => EventKind::AudioOutput,
            CoreEvent::Message { .. } => EventKind::Message,
            CoreEvent::Log { .. } => EventKind::Log,
            CoreEvent::Shutdown => EventKind::Shutdown,
            CoreEvent::VariablesChanged => EventKind::VariablesChanged,
            CoreEvent::RumbleStateChanged { .. } => EventKind::RumbleStateChanged,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

/// Returns whether the subscription stays.
type Listener = Arc<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

struct Subscription {
    id: ListenerId,
    // `None` receives every kind.
    kind: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
pub(crate) struct EventHub {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventHub {
    pub(crate) fn subscribe(
        &self,
        kind: Option<EventKind>,
        listener: impl Fn(&CoreEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.subscribe_while(
            kind,
            Arc::new(move |event: &CoreEvent| {
                listener(event);
                true
            }),
        )
    }

    /// Subscribe until `listener` returns `false`.
    fn subscribe_while(&self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription { id, kind, listener });
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Forward every event into a channel. The subscription ends with `unsubscribe` or with
    /// the first event after the receiver is dropped.
    pub(crate) fn channel(&self) -> (ListenerId, mpsc::Receiver<CoreEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.subscribe_while(
            None,
            Arc::new(move |event: &CoreEvent| lock(&tx).send(event.clone()).is_ok()),
        );
        (id, rx)
    }

    pub(crate) fn emit(&self, event: CoreEvent) {
        let kind = event.kind();
        let listeners: Vec<(ListenerId, Listener)> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| (s.id, Arc::clone(&s.listener)))
            .collect();

        let closed: Vec<ListenerId> = listeners
            .into_iter()
            .filter_map(|(id, listener)| (!listener(&event)).then_some(id))
            .collect();
        if !closed.is_empty() {
            trace!(count = closed.len(), "dropping closed event listeners");
            lock(&self.subscriptions).retain(|s| !closed.contains(&s.id));
        }
    }
}
