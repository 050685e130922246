//! Live instance bookkeeping

use crate::reflect::{InstanceProxy, ProxyId};
use scriptbox_sdk::Host;
use std::collections::BTreeMap;

/// Proxies a domain keeps alive, split by attachment
///
/// Ordered by proxy id so broadcasts visit instances in creation order.
#[derive(Debug, Default)]
pub(crate) struct ExecutionRegistry {
    attached: BTreeMap<ProxyId, InstanceProxy>,
    plain: BTreeMap<ProxyId, InstanceProxy>,
}

impl ExecutionRegistry {
    pub(crate) fn insert(&mut self, proxy: InstanceProxy) {
        let map = if proxy.is_attached() {
            &mut self.attached
        } else {
            &mut self.plain
        };
        map.insert(proxy.id(), proxy);
    }

    pub(crate) fn remove(&mut self, id: ProxyId) -> Option<InstanceProxy> {
        self.attached.remove(&id).or_else(|| self.plain.remove(&id))
    }

    pub(crate) fn attached(&self) -> impl Iterator<Item = &InstanceProxy> {
        self.attached.values()
    }

    pub(crate) fn plain(&self) -> impl Iterator<Item = &InstanceProxy> {
        self.plain.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.attached.len() + self.plain.len()
    }

    /// Drop attached proxies whose component the host destroyed
    ///
    /// Returns the removed proxies; the caller marks them disposed.
    pub(crate) fn prune(&mut self, host: &dyn Host) -> Vec<InstanceProxy> {
        let dead: Vec<ProxyId> = self
            .attached
            .values()
            .filter(|p| p.component().map_or(true, |c| host.is_destroyed(c)))
            .map(InstanceProxy::id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.attached.remove(&id))
            .collect()
    }

    /// Empty the registry, returning everything it held
    pub(crate) fn drain(&mut self) -> Vec<InstanceProxy> {
        let mut all: Vec<InstanceProxy> = std::mem::take(&mut self.attached).into_values().collect();
        all.extend(std::mem::take(&mut self.plain).into_values());
        all
    }
}
