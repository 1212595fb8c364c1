//! Capability registry for outbound link events.
//!
//! Integrations (redirect-chain managers, marketing trackers) implement
//! `EventSink` and are registered at startup; an empty registry is the
//! normal "no integrations" state.

use std::sync::{Arc, RwLock};

use tracing::info;

#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A code edit changed the lookup key. Sinks that maintain legacy
    /// redirect chains should map `old_slug` to `new_slug` with the given
    /// status (301).
    SlugChanged {
        link_id: i64,
        old_slug: String,
        new_slug: String,
        http_status: u16,
    },
    /// An expired link was served its expired-redirect URL (302). Expired
    /// links without a redirect URL answer 410 and emit nothing.
    LinkExpired {
        link_id: i64,
        slug: String,
        redirect_url: String,
    },
    /// A link with recorded hits was deleted.
    LinkDeleted {
        link_id: i64,
        slug: String,
        hit_count: i64,
    },
}

pub trait EventSink: Send + Sync {
    /// Handle one event; returns whether the sink accepted it.
    fn push(&self, event: &LinkEvent) -> bool;
}

#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().expect("sink registry poisoned").push(sink);
    }

    /// Fan an event out to every registered sink.
    pub fn dispatch(&self, event: &LinkEvent) {
        let sinks = self.sinks.read().expect("sink registry poisoned");
        for sink in sinks.iter() {
            sink.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.read().expect("sink registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Built-in sink that records events to the log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn push(&self, event: &LinkEvent) -> bool {
        match event {
            LinkEvent::SlugChanged {
                link_id,
                old_slug,
                new_slug,
                http_status,
            } => info!(
                link_id,
                old_slug = %old_slug,
                new_slug = %new_slug,
                http_status,
                "link slug changed"
            ),
            LinkEvent::LinkExpired {
                link_id,
                slug,
                redirect_url,
            } => info!(
                link_id,
                slug = %slug,
                redirect_url = %redirect_url,
                "expired link served"
            ),
            LinkEvent::LinkDeleted {
                link_id,
                slug,
                hit_count,
            } => info!(link_id, slug = %slug, hit_count, "link deleted"),
        }
        true
    }
}
