//! Device registry for a single scan window.

use std::collections::HashSet;

use tracing::trace;

use super::transport::{Advertisement, PeripheralHandle};

/// Discovered peripherals in first-seen order, unique by id.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<PeripheralHandle>,
    seen: HashSet<String>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement.
    ///
    /// Unnamed advertisers and already-known ids are ignored. Returns the
    /// new handle when the advertiser was added.
    pub fn observe(&mut self, advertisement: &Advertisement) -> Option<PeripheralHandle> {
        let name = match advertisement.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => {
                trace!("Ignoring unnamed advertiser {}", advertisement.id);
                return None;
            }
        };

        if !self.seen.insert(advertisement.id.clone()) {
            return None;
        }

        let handle = PeripheralHandle::new(advertisement.id.clone(), Some(name.to_string()));
        self.devices.push(handle.clone());
        Some(handle)
    }

    /// All devices in discovery order.
    pub fn devices(&self) -> &[PeripheralHandle] {
        &self.devices
    }

    /// Look a device up by id.
    pub fn get(&self, id: &str) -> Option<&PeripheralHandle> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Check if an id has been seen.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.seen.clear();
    }
}
