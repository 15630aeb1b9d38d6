//! Typed event bus between the anchoring engine and companion panels.
//!
//! The engine never calls UI code directly. It publishes [`AnchorEvent`]s
//! on an [`EventBus`], and anything interested (a side panel listing
//! highlights, a scroll controller, a logger) registers an [`EventSink`].
//! The set of event kinds is closed, so every producer and consumer is
//! checked against the same payload shapes at compile time.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::models::{Anchor, BoundingRegion, HighlightColor};

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnchorEvent {
    /// An anchor was applied optimistically, before the store confirmed it.
    #[serde(rename = "anchor-created")]
    Created { anchor: Anchor },
    /// The full anchor list should be reloaded and re-rendered.
    #[serde(rename = "anchors-refresh-requested")]
    RefreshRequested,
    /// Companion panels should scroll to / highlight this anchor.
    #[serde(rename = "anchor-focus-requested")]
    FocusRequested {
        #[serde(rename = "anchorId")]
        anchor_id: String,
    },
    /// A rendered marker was activated by the user.
    #[serde(rename = "anchor-activated")]
    Activated {
        #[serde(rename = "anchorId")]
        anchor_id: String,
        #[serde(rename = "boundingRegion")]
        bounding_region: BoundingRegion,
        color: HighlightColor,
        quote: String,
    },
}

impl AnchorEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AnchorEvent::Created { .. } => "anchor-created",
            AnchorEvent::RefreshRequested => "anchors-refresh-requested",
            AnchorEvent::FocusRequested { .. } => "anchor-focus-requested",
            AnchorEvent::Activated { .. } => "anchor-activated",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receives events from an [`EventBus`].
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AnchorEvent);
}

/// Fan-out of events to every registered sink, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&self, event: AnchorEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Keeps every event it receives, for inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AnchorEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<AnchorEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(AnchorEvent::kind).collect()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AnchorEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Logs every event at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AnchorEvent) {
        debug!(kind = event.kind(), payload = %event.to_json(), "anchor event");
    }
}
