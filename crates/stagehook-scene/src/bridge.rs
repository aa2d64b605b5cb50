//! Queues between the host page and the frame driver

use bevy::prelude::*;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use stagehook_core::{OutboundEvent, SceneConfig, Viewport};

/// Something the host page asked for
#[derive(Debug, Clone, PartialEq)]
pub enum HookMessage {
    /// A hook attached; build the scene with this configuration
    Mount(SceneConfig),
    /// An event from the bus, still undecoded
    Event { name: String, payload: Value },
    /// The hook went away; tear the scene down
    Unmount,
}

/// Shared inbound queue between the page callbacks and Bevy
#[derive(Resource, Default, Clone)]
pub struct PendingHookMessages(pub Arc<Mutex<Vec<HookMessage>>>);

impl PendingHookMessages {
    pub fn push(&self, message: HookMessage) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push(message);
        }
    }

    pub fn take(&self) -> Vec<HookMessage> {
        if let Ok(mut queue) = self.0.lock() {
            std::mem::take(&mut *queue)
        } else {
            Vec::new()
        }
    }
}

/// Events produced by the scene, waiting to be pushed to the server
#[derive(Resource, Default, Clone)]
pub struct PendingOutbound(pub Arc<Mutex<Vec<OutboundEvent>>>);

impl PendingOutbound {
    pub fn extend(&self, events: Vec<OutboundEvent>) {
        if events.is_empty() {
            return;
        }
        if let Ok(mut queue) = self.0.lock() {
            queue.extend(events);
        }
    }

    pub fn take(&self) -> Vec<OutboundEvent> {
        if let Ok(mut queue) = self.0.lock() {
            std::mem::take(&mut *queue)
        } else {
            Vec::new()
        }
    }
}

/// Size of the host page's viewport, used when `setSize` omits a dimension
#[derive(Resource, Debug, Clone, Copy)]
pub struct HostViewport(pub Viewport);

impl Default for HostViewport {
    fn default() -> Self {
        Self(Viewport::new(1280, 720))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_shared_between_clones() {
        let queue = PendingHookMessages::default();
        let page_side = queue.clone();
        page_side.push(HookMessage::Event {
            name: "removeObject".to_string(),
            payload: serde_json::json!({"name": "box"}),
        });
        page_side.push(HookMessage::Unmount);

        let taken = queue.take();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[1], HookMessage::Unmount);
        assert!(queue.take().is_empty());
    }
}
