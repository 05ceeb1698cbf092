use std::cell::OnceCell;

use crate::constants::{LinkSpeed, LinkWidth};
use crate::regs::{LinkCapabilities, LinkStatus};

/// Memoized link properties of one device.
///
/// Entries are filled lazily through `&self` and can only be dropped through `&mut self`, so a
/// device that is being mutated cannot hand out stale values to anyone else. Every mutating
/// operation on [`crate::PciDevice`] ends with [`DerivedCache::invalidate_all`].
#[derive(Debug, Default)]
pub struct DerivedCache {
    pub(crate) link_status: OnceCell<Option<LinkStatus>>,
    pub(crate) link_capabilities: OnceCell<Option<LinkCapabilities>>,
    pub(crate) max_speed: OnceCell<LinkSpeed>,
    pub(crate) max_width: OnceCell<LinkWidth>,
    pub(crate) link_speed: OnceCell<LinkSpeed>,
    pub(crate) link_width: OnceCell<LinkWidth>,
}

impl DerivedCache {
    pub fn invalidate_all(&mut self) {
        *self = Self::default();
    }

    /// Names of the properties currently memoized.
    pub fn cached(&self) -> Vec<&'static str> {
        let entries = [
            ("link_status", self.link_status.get().is_some()),
            ("link_capabilities", self.link_capabilities.get().is_some()),
            ("max_speed", self.max_speed.get().is_some()),
            ("max_width", self.max_width.get().is_some()),
            ("link_speed", self.link_speed.get().is_some()),
            ("link_width", self.link_width.get().is_some()),
        ];
        entries
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cached().is_empty()
    }
}
