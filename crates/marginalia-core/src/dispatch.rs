//! Interaction dispatcher: from an activated marker back to its anchor.
//!
//! Markers carry nothing but the anchor id (see
//! [`ANCHOR_ID_ATTR`](crate::render::ANCHOR_ID_ATTR)). On activation the
//! dispatcher looks that id up in the current anchor list and publishes an
//! `anchor-activated` event with the data a companion panel needs. It never
//! mutates anchors or documents.

use tracing::debug;

use crate::events::{AnchorEvent, EventBus};
use crate::markup::{ContentTree, NodeId};
use crate::models::{Anchor, BoundingRegion};
use crate::render::{RenderOptions, ANCHOR_ID_ATTR};

/// Anchor id of the innermost marker enclosing `node` (or `node` itself).
///
/// With nested markers from overlapping anchors, the innermost one wins,
/// which is the marker the user actually clicked on.
pub fn marker_anchor_id<'t>(
    tree: &'t ContentTree,
    node: NodeId,
    options: &RenderOptions,
) -> Option<&'t str> {
    if !tree.contains(node) {
        return None;
    }
    std::iter::once(node)
        .chain(tree.ancestors(node))
        .filter_map(|id| tree.element(id))
        .filter(|el| el.is_named(&options.marker_tag))
        .find_map(|el| el.attr(ANCHOR_ID_ATTR))
}

/// Routes marker activations and focus requests onto the event bus.
pub struct InteractionDispatcher<'a> {
    bus: &'a EventBus,
}

impl<'a> InteractionDispatcher<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Publish `anchor-activated` for `anchor_id`. Returns the event, or
    /// `None` when the id is not in `anchors` (stale marker).
    pub fn activate(
        &self,
        anchors: &[Anchor],
        anchor_id: &str,
        region: BoundingRegion,
    ) -> Option<AnchorEvent> {
        let Some(anchor) = anchors.iter().find(|a| a.id == anchor_id) else {
            debug!(anchor_id, "activated marker has no matching anchor");
            return None;
        };
        let event = AnchorEvent::Activated {
            anchor_id: anchor.id.clone(),
            bounding_region: region,
            color: anchor.color,
            quote: anchor.quote.clone(),
        };
        self.bus.publish(event.clone());
        Some(event)
    }

    /// Activation starting from any node inside a rendered tree.
    pub fn activate_node(
        &self,
        tree: &ContentTree,
        node: NodeId,
        anchors: &[Anchor],
        options: &RenderOptions,
        region: BoundingRegion,
    ) -> Option<AnchorEvent> {
        let anchor_id = marker_anchor_id(tree, node, options)?;
        self.activate(anchors, anchor_id, region)
    }

    /// Ask companion panels to bring `anchor_id` into view.
    pub fn request_focus(&self, anchor_id: &str) {
        self.bus.publish(AnchorEvent::FocusRequested {
            anchor_id: anchor_id.to_string(),
        });
    }
}
