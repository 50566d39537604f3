//! Common slot bookkeeping shared by both peers.
//!
//! A slot groups the interfaces of one peer-to-peer link. Interface config
//! must be applied before bind/connect; violating the ordering (or any
//! failed operation on the slot) marks the slot broken, after which only
//! `unlink` is accepted.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::core::Status;
use crate::net::{IfaceConfig, Interface};

/// Per-slot interface bookkeeping.
#[derive(Default)]
pub struct SlotCore {
    broken: bool,
    configs: HashMap<Interface, IfaceConfig>,
    taken: HashSet<Interface>,
}

impl SlotCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn mark_broken(&mut self) {
        if !self.broken {
            warn!("slot marked broken; only unlink is accepted now");
        }
        self.broken = true;
    }

    /// Apply interface options. Fails (and breaks the slot) when the
    /// interface is already bound.
    pub fn configure(&mut self, iface: Interface, config: IfaceConfig) -> Result<(), Status> {
        if self.broken {
            return Err(Status::BadConfig);
        }
        if self.taken.contains(&iface) {
            self.mark_broken();
            return Err(Status::BadConfig);
        }
        self.configs.insert(iface, config);
        Ok(())
    }

    /// Options configured for the interface, or defaults.
    pub fn iface_config(&self, iface: Interface) -> IfaceConfig {
        self.configs.get(&iface).copied().unwrap_or_default()
    }

    /// Reserve the interface for a bind/connect. Fails (and breaks the
    /// slot) when it is already taken.
    pub fn take(&mut self, iface: Interface) -> Result<(), Status> {
        if self.broken {
            return Err(Status::BadConfig);
        }
        if !self.taken.insert(iface) {
            self.mark_broken();
            return Err(Status::BadConfig);
        }
        Ok(())
    }

    pub fn is_taken(&self, iface: Interface) -> bool {
        self.taken.contains(&iface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_before_bind() {
        let mut slot = SlotCore::new();
        slot.configure(Interface::AudioSource, IfaceConfig::default())
            .unwrap();
        slot.take(Interface::AudioSource).unwrap();

        // configure after bind breaks the slot
        assert_eq!(
            slot.configure(Interface::AudioSource, IfaceConfig::default())
                .err(),
            Some(Status::BadConfig)
        );
        assert!(slot.is_broken());

        // a broken slot rejects everything
        assert_eq!(
            slot.take(Interface::AudioRepair).err(),
            Some(Status::BadConfig)
        );
    }

    #[test]
    fn test_double_bind_breaks() {
        let mut slot = SlotCore::new();
        slot.take(Interface::AudioSource).unwrap();
        assert_eq!(slot.take(Interface::AudioSource).err(), Some(Status::BadConfig));
        assert!(slot.is_broken());
    }
}
