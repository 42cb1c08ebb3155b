//! Port signature map: matches provide-ports to require-ports by
//! `port_signature` string and records connector-change events on the
//! affected nodes (spec §3/§4.4). Grounded on `apx_router_t` /
//! `apx_portSignatureMap_t` in `examples/original_source/apx/common/`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::model::node::{ConnectorChange, NodeInstance};

/// A single port on a specific node, addressed by index.
#[derive(Clone)]
pub struct PortBinding {
    pub node: Arc<NodeInstance>,
    pub port_index: usize,
}

impl PortBinding {
    pub fn new(node: Arc<NodeInstance>, port_index: usize) -> Self {
        Self { node, port_index }
    }

    fn same_as(&self, other: &PortBinding) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.port_index == other.port_index
    }
}

/// One entry in the map: the currently-bound provide-port (if any), any
/// provide-ports waiting their turn, and every bound require-port.
#[derive(Default)]
struct SignatureMapEntry {
    provide: Option<PortBinding>,
    /// Providers that arrived while one was already bound. Earliest-bound
    /// wins: the front of this list becomes active when the active one
    /// disconnects.
    pending_provide: Vec<PortBinding>,
    require: Vec<PortBinding>,
}

/// Keyed by `ResolvedPort::port_signature`. One map per running server;
/// entries are created lazily and removed once both lists empty.
#[derive(Default)]
pub struct SignatureMap {
    entries: Mutex<HashMap<String, SignatureMapEntry>>,
}

impl SignatureMap {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a require-port under `signature`. If a provider is already
    /// bound, both sides immediately record a connector-change event.
    pub fn attach_require_port(&self, signature: &str, binding: PortBinding) {
        let mut entries = self.entries.lock().expect("signature map mutex poisoned");
        let entry = entries.entry(signature.to_string()).or_default();
        entry.require.push(binding.clone());

        if let Some(provide) = &entry.provide {
            binding.node.push_connector_change(ConnectorChange::RequireGainedProvider {
                require_port_index: binding.port_index,
                provide_node: provide.node.clone(),
                provide_port_index: provide.port_index,
            });
            provide.node.push_connector_change(ConnectorChange::ProvideGainedConsumer {
                provide_port_index: provide.port_index,
                require_node: binding.node.clone(),
                require_port_index: binding.port_index,
            });
        }
    }

    /// Attach a provide-port under `signature`. If the entry has no active
    /// provider, this one becomes active and every waiting require-port is
    /// notified as a single batch. Otherwise it is queued in
    /// `pending_provide` (earliest-bound-wins) and nothing is notified yet.
    pub fn attach_provide_port(&self, signature: &str, binding: PortBinding) {
        let mut entries = self.entries.lock().expect("signature map mutex poisoned");
        let entry = entries.entry(signature.to_string()).or_default();

        if entry.provide.is_some() {
            entry.pending_provide.push(binding);
            return;
        }

        entry.provide = Some(binding.clone());
        if !entry.require.is_empty() {
            let consumers: Vec<(Arc<NodeInstance>, usize)> = entry
                .require
                .iter()
                .map(|r| (r.node.clone(), r.port_index))
                .collect();
            binding.node.push_connector_change(ConnectorChange::ProvideGainedConsumers {
                provide_port_index: binding.port_index,
                consumers,
            });
            for require in &entry.require {
                require.node.push_connector_change(ConnectorChange::RequireGainedProvider {
                    require_port_index: require.port_index,
                    provide_node: binding.node.clone(),
                    provide_port_index: binding.port_index,
                });
            }
        }
    }

    /// Detach a require-port. Removes the entry entirely once both its
    /// lists are empty.
    pub fn disconnect_require_port(&self, signature: &str, binding: &PortBinding) {
        let mut entries = self.entries.lock().expect("signature map mutex poisoned");
        let Some(entry) = entries.get_mut(signature) else { return };
        entry.require.retain(|r| !r.same_as(binding));
        if entry.provide.is_none() && entry.require.is_empty() && entry.pending_provide.is_empty() {
            entries.remove(signature);
        }
    }

    /// Detach a provide-port. If it was the active binding, the earliest
    /// pending provider (if any) is promoted and every bound require-port is
    /// notified of the new provider via `RequireGainedProvider`.
    pub fn disconnect_provide_port(&self, signature: &str, binding: &PortBinding) {
        let mut entries = self.entries.lock().expect("signature map mutex poisoned");
        let Some(entry) = entries.get_mut(signature) else { return };

        let was_active = entry.provide.as_ref().is_some_and(|p| p.same_as(binding));
        if was_active {
            entry.provide = None;
            if !entry.pending_provide.is_empty() {
                let promoted = entry.pending_provide.remove(0);
                entry.provide = Some(promoted.clone());
                for require in &entry.require {
                    require.node.push_connector_change(ConnectorChange::RequireGainedProvider {
                        require_port_index: require.port_index,
                        provide_node: promoted.node.clone(),
                        provide_port_index: promoted.port_index,
                    });
                }
            }
        } else {
            entry.pending_provide.retain(|p| !p.same_as(binding));
        }

        if entry.provide.is_none() && entry.require.is_empty() && entry.pending_provide.is_empty() {
            entries.remove(signature);
        }
    }

    /// Copy a provide-port's current bytes into every require-port bound to
    /// the same signature (spec §1/§2: the router "fans out updates"). Used
    /// after a provide-port write, keyed by the port's own `port_signature`
    /// so callers never need to borrow the map's internals.
    pub fn route_provide_write(&self, signature: &str, bytes: &[u8]) -> crate::error::ApxResult<()> {
        let entries = self.entries.lock().expect("signature map mutex poisoned");
        let Some(entry) = entries.get(signature) else { return Ok(()) };
        for require in &entry.require {
            require.node.write_require_port_bytes(require.port_index, bytes)?;
        }
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("signature map mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::{DataElement, ElementKind};
    use crate::model::node::Node;
    use crate::model::port::{Port, PortDirection};

    fn node_with(name: &str, dir: PortDirection, port_name: &str) -> Arc<NodeInstance> {
        let mut node = Node::new(name);
        let port = Port::new(port_name, dir, DataElement::scalar(ElementKind::U16));
        match dir {
            PortDirection::Provide => node.provide_ports.push(port),
            PortDirection::Require => node.require_ports.push(port),
        }
        Arc::new(node.finalize().unwrap())
    }

    #[test]
    fn require_attaches_after_provide_notifies_both_sides() {
        let map = SignatureMap::new();
        let provider = node_with("Provider", PortDirection::Provide, "VehicleSpeed");
        let consumer = node_with("Consumer", PortDirection::Require, "VehicleSpeed");

        let sig = provider.provide_ports[0].port_signature.clone();
        map.attach_provide_port(&sig, PortBinding::new(provider.clone(), 0));
        map.attach_require_port(&sig, PortBinding::new(consumer.clone(), 0));

        let require_changes = consumer.take_connector_changes();
        assert_eq!(require_changes.len(), 1);
        assert!(matches!(require_changes[0], ConnectorChange::RequireGainedProvider { .. }));

        let provide_changes = provider.take_connector_changes();
        assert_eq!(provide_changes.len(), 1);
        assert!(matches!(provide_changes[0], ConnectorChange::ProvideGainedConsumer { .. }));
    }

    #[test]
    fn provide_attaches_after_requires_emits_batch() {
        let map = SignatureMap::new();
        let provider = node_with("Provider", PortDirection::Provide, "VehicleSpeed");
        let consumer_a = node_with("ConsumerA", PortDirection::Require, "VehicleSpeed");
        let consumer_b = node_with("ConsumerB", PortDirection::Require, "VehicleSpeed");
        let sig = provider.provide_ports[0].port_signature.clone();

        map.attach_require_port(&sig, PortBinding::new(consumer_a.clone(), 0));
        map.attach_require_port(&sig, PortBinding::new(consumer_b.clone(), 0));
        map.attach_provide_port(&sig, PortBinding::new(provider.clone(), 0));

        let provide_changes = provider.take_connector_changes();
        assert_eq!(provide_changes.len(), 1);
        match &provide_changes[0] {
            ConnectorChange::ProvideGainedConsumers { consumers, .. } => assert_eq!(consumers.len(), 2),
            _ => panic!("expected batch connector change"),
        }
        assert_eq!(consumer_a.take_connector_changes().len(), 1);
        assert_eq!(consumer_b.take_connector_changes().len(), 1);
    }

    #[test]
    fn second_provider_is_pending_until_first_disconnects() {
        let map = SignatureMap::new();
        let first = node_with("First", PortDirection::Provide, "VehicleSpeed");
        let second = node_with("Second", PortDirection::Provide, "VehicleSpeed");
        let consumer = node_with("Consumer", PortDirection::Require, "VehicleSpeed");
        let sig = first.provide_ports[0].port_signature.clone();

        map.attach_provide_port(&sig, PortBinding::new(first.clone(), 0));
        map.attach_require_port(&sig, PortBinding::new(consumer.clone(), 0));
        consumer.take_connector_changes();

        map.attach_provide_port(&sig, PortBinding::new(second.clone(), 0));
        // second provider is pending: no notification yet.
        assert!(consumer.take_connector_changes().is_empty());
        assert!(second.take_connector_changes().is_empty());

        map.disconnect_provide_port(&sig, &PortBinding::new(first.clone(), 0));
        let changes = consumer.take_connector_changes();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            ConnectorChange::RequireGainedProvider { provide_node, .. } => {
                assert!(Arc::ptr_eq(provide_node, &second))
            }
            _ => panic!("expected provider promotion"),
        }
    }

    #[test]
    fn route_provide_write_updates_bound_consumers() {
        let map = SignatureMap::new();
        let provider = node_with("Provider", PortDirection::Provide, "VehicleSpeed");
        let consumer = node_with("Consumer", PortDirection::Require, "VehicleSpeed");
        let sig = provider.provide_ports[0].port_signature.clone();
        map.attach_provide_port(&sig, PortBinding::new(provider.clone(), 0));
        map.attach_require_port(&sig, PortBinding::new(consumer.clone(), 0));

        provider.write_provide_port(0, &crate::model::value::Value::U64(0x1234)).unwrap();
        let bytes = provider.provide_port_bytes(0).unwrap();
        map.route_provide_write(&sig, &bytes).unwrap();

        assert_eq!(
            consumer.read_require_port(0).unwrap(),
            crate::model::value::Value::U64(0x1234)
        );
    }

    #[test]
    fn entry_removed_once_empty() {
        let map = SignatureMap::new();
        let provider = node_with("Provider", PortDirection::Provide, "VehicleSpeed");
        let sig = provider.provide_ports[0].port_signature.clone();
        map.attach_provide_port(&sig, PortBinding::new(provider.clone(), 0));
        assert_eq!(map.entry_count(), 1);
        map.disconnect_provide_port(&sig, &PortBinding::new(provider, 0));
        assert_eq!(map.entry_count(), 0);
    }
}
