//! Node: a named container of data types and ports declared in one
//! definition text (spec §3), and `NodeInstance`: the resolved, runtime
//! image of a node with its packed data buffers (spec §4.3). Grounded on
//! `apx_node_t` / `apx_nodeInstance_t` in
//! `examples/original_source/apx/common/`.

use std::sync::{Arc, Mutex};

use crate::error::{ApxResult, ErrorKind};
use crate::model::element::{DataElement, ElementKind, RecordField};
use crate::model::port::{Port, PortDirection, ResolvedPort};
use crate::model::value::Value;

/// One entry in a node's local type table. `name` is `Some` for named
/// types (`T_Foo`), `None` for anonymous types only reachable by index.
#[derive(Debug, Clone)]
pub struct TypeTableEntry {
    pub name: Option<String>,
    pub element: DataElement,
}

/// A node as produced by the parser: unresolved type references, ports in
/// declaration order, nothing compiled yet.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub types: Vec<TypeTableEntry>,
    pub provide_ports: Vec<Port>,
    pub require_ports: Vec<Port>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            provide_ports: Vec::new(),
            require_ports: Vec::new(),
        }
    }

    /// Resolve every port's data element against the type table, compile
    /// pack/unpack programs, and lay out the provide/require data buffers.
    pub fn finalize(self) -> ApxResult<NodeInstance> {
        let mut resolved_provide = Vec::with_capacity(self.provide_ports.len());
        let mut provide_offsets = Vec::with_capacity(self.provide_ports.len());
        let mut provide_len = 0u32;

        for port in self.provide_ports {
            let mut visiting = Vec::new();
            let element = resolve_element(&port.element, &self.types, &mut visiting)?;
            let resolved = Port { element, ..port }.resolve()?;
            provide_offsets.push(provide_len);
            provide_len = provide_len
                .checked_add(resolved.packed_size())
                .ok_or(ErrorKind::Memory)?;
            resolved_provide.push(resolved);
        }

        let mut resolved_require = Vec::with_capacity(self.require_ports.len());
        let mut require_offsets = Vec::with_capacity(self.require_ports.len());
        let mut require_len = 0u32;

        for port in self.require_ports {
            let mut visiting = Vec::new();
            let element = resolve_element(&port.element, &self.types, &mut visiting)?;
            let resolved = Port { element, ..port }.resolve()?;
            require_offsets.push(require_len);
            require_len = require_len
                .checked_add(resolved.packed_size())
                .ok_or(ErrorKind::Memory)?;
            resolved_require.push(resolved);
        }

        let mut provide_data = vec![0u8; provide_len as usize];
        for (i, port) in resolved_provide.iter().enumerate() {
            if let Some(init) = &port.init {
                let offset = provide_offsets[i] as usize;
                let size = port.packed_size() as usize;
                crate::vm::exec::pack(&port.program, &mut provide_data[offset..offset + size], init)?;
            }
        }

        let mut require_data = vec![0u8; require_len as usize];
        for (i, port) in resolved_require.iter().enumerate() {
            if let Some(init) = &port.init {
                let offset = require_offsets[i] as usize;
                let size = port.packed_size() as usize;
                crate::vm::exec::pack(&port.program, &mut require_data[offset..offset + size], init)?;
            }
        }

        Ok(NodeInstance {
            name: self.name,
            provide_ports: resolved_provide,
            require_ports: resolved_require,
            provide_offsets,
            require_offsets,
            provide_data: Mutex::new(provide_data),
            require_data: Mutex::new(require_data),
            provide_dirty: Mutex::new(Vec::new()),
            require_dirty: Mutex::new(Vec::new()),
            connector_changes: Mutex::new(Vec::new()),
        })
    }
}

/// A connector-change event recorded on a node by the port signature map
/// (spec §3 "connector-change table", §4.4).
#[derive(Clone)]
pub enum ConnectorChange {
    /// This node's require-port at `require_port_index` is now bound to a provider.
    RequireGainedProvider {
        require_port_index: usize,
        provide_node: Arc<NodeInstance>,
        provide_port_index: usize,
    },
    /// This node's provide-port at `provide_port_index` gained one consumer.
    ProvideGainedConsumer {
        provide_port_index: usize,
        require_node: Arc<NodeInstance>,
        require_port_index: usize,
    },
    /// This node's provide-port at `provide_port_index` gained its initial
    /// batch of consumers all at once (emitted when the provider binds to
    /// an entry that already has require-ports waiting).
    ProvideGainedConsumers {
        provide_port_index: usize,
        consumers: Vec<(Arc<NodeInstance>, usize)>,
    },
}

/// Substitute `RefById`/`RefByName` with the referenced type's element,
/// recursively, detecting cycles via the `visiting` stack of type indices.
fn resolve_element(
    el: &DataElement,
    types: &[TypeTableEntry],
    visiting: &mut Vec<usize>,
) -> ApxResult<DataElement> {
    match &el.kind {
        ElementKind::RefById(id) => {
            let idx = *id as usize;
            if visiting.contains(&idx) {
                return Err(ErrorKind::CyclicReference(format!("T[{}]", id)));
            }
            let target = types
                .get(idx)
                .ok_or_else(|| ErrorKind::NotFound(format!("type T[{}]", id)))?;
            visiting.push(idx);
            let mut resolved = resolve_element(&target.element, types, visiting)?;
            visiting.pop();
            if el.range.is_some() {
                resolved.range = el.range;
            }
            if el.array.is_some() {
                resolved.array = el.array;
            }
            Ok(resolved)
        }
        ElementKind::RefByName(name) => {
            let idx = types
                .iter()
                .position(|t| t.name.as_deref() == Some(name.as_str()))
                .ok_or_else(|| ErrorKind::NotFound(format!("type '{}'", name)))?;
            let by_id = DataElement {
                kind: ElementKind::RefById(idx as u32),
                range: el.range,
                array: el.array,
            };
            resolve_element(&by_id, types, visiting)
        }
        ElementKind::Record(fields) => {
            let mut resolved_fields = Vec::with_capacity(fields.len());
            for f in fields {
                resolved_fields.push(RecordField {
                    name: f.name.clone(),
                    element: resolve_element(&f.element, types, visiting)?,
                });
            }
            Ok(DataElement {
                kind: ElementKind::Record(resolved_fields),
                range: el.range,
                array: el.array,
            })
        }
        _ => Ok(el.clone()),
    }
}

/// The resolved, runtime image of a node: packed data buffers plus the
/// per-port offset/program tables needed to read and write them.
///
/// Buffers are guarded by `std::sync::Mutex`, not `tokio::sync::Mutex`:
/// pack/unpack is synchronous CPU work and the lock is never held across
/// an `.await`.
pub struct NodeInstance {
    pub name: String,
    pub provide_ports: Vec<ResolvedPort>,
    pub require_ports: Vec<ResolvedPort>,
    provide_offsets: Vec<u32>,
    require_offsets: Vec<u32>,
    provide_data: Mutex<Vec<u8>>,
    require_data: Mutex<Vec<u8>>,
    /// Indices of provide-ports written since the last `take_dirty_provide_ports`.
    provide_dirty: Mutex<Vec<usize>>,
    /// Indices of require-ports written since the last `take_dirty_require_ports`.
    require_dirty: Mutex<Vec<usize>>,
    /// Peer port instances added/removed since the last drain (spec §3/§4.4).
    connector_changes: Mutex<Vec<ConnectorChange>>,
}

impl NodeInstance {
    pub fn provide_port_index(&self, name: &str) -> Option<usize> {
        self.provide_ports.iter().position(|p| p.name == name)
    }

    pub fn require_port_index(&self, name: &str) -> Option<usize> {
        self.require_ports.iter().position(|p| p.name == name)
    }

    /// Pack `value` into the provide-port's slot and mark it dirty for the
    /// next connector-change sweep (spec §4.4).
    pub fn write_provide_port(&self, index: usize, value: &Value) -> ApxResult<()> {
        let port = self
            .provide_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("provide port index {}", index)))?;
        let offset = self.provide_offsets[index] as usize;
        let size = port.packed_size() as usize;
        let mut buf = self.provide_data.lock().expect("provide_data mutex poisoned");
        crate::vm::exec::pack(&port.program, &mut buf[offset..offset + size], value)?;
        drop(buf);
        self.provide_dirty.lock().expect("provide_dirty mutex poisoned").push(index);
        Ok(())
    }

    pub fn read_provide_port(&self, index: usize) -> ApxResult<Value> {
        let port = self
            .provide_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("provide port index {}", index)))?;
        let offset = self.provide_offsets[index] as usize;
        let size = port.packed_size() as usize;
        let buf = self.provide_data.lock().expect("provide_data mutex poisoned");
        crate::vm::exec::unpack(&port.program, &buf[offset..offset + size])
    }

    /// Pack `value` into the require-port's slot. Used when inbound RMF
    /// data for this port arrives.
    pub fn write_require_port(&self, index: usize, value: &Value) -> ApxResult<()> {
        let port = self
            .require_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("require port index {}", index)))?;
        let offset = self.require_offsets[index] as usize;
        let size = port.packed_size() as usize;
        let mut buf = self.require_data.lock().expect("require_data mutex poisoned");
        crate::vm::exec::pack(&port.program, &mut buf[offset..offset + size], value)
    }

    pub fn read_require_port(&self, index: usize) -> ApxResult<Value> {
        let port = self
            .require_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("require port index {}", index)))?;
        let offset = self.require_offsets[index] as usize;
        let size = port.packed_size() as usize;
        let buf = self.require_data.lock().expect("require_data mutex poisoned");
        crate::vm::exec::unpack(&port.program, &buf[offset..offset + size])
    }

    /// Raw packed bytes for a provide-port's slot, used when serializing an
    /// RMF write-data message for transmission.
    pub fn provide_port_bytes(&self, index: usize) -> ApxResult<Vec<u8>> {
        let port = self
            .provide_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("provide port index {}", index)))?;
        let offset = self.provide_offsets[index] as usize;
        let size = port.packed_size() as usize;
        let buf = self.provide_data.lock().expect("provide_data mutex poisoned");
        Ok(buf[offset..offset + size].to_vec())
    }

    /// Copy raw bytes received over the wire directly into a require-port's slot.
    pub fn write_require_port_bytes(&self, index: usize, bytes: &[u8]) -> ApxResult<()> {
        let port = self
            .require_ports
            .get(index)
            .ok_or_else(|| ErrorKind::NotFound(format!("require port index {}", index)))?;
        let offset = self.require_offsets[index] as usize;
        let size = port.packed_size() as usize;
        if bytes.len() != size {
            return Err(ErrorKind::MsgTooLarge {
                size: bytes.len(),
                max: size,
            });
        }
        let mut buf = self.require_data.lock().expect("require_data mutex poisoned");
        buf[offset..offset + size].copy_from_slice(bytes);
        drop(buf);
        self.require_dirty.lock().expect("require_dirty mutex poisoned").push(index);
        Ok(())
    }

    /// Whole-buffer snapshot of the `provide_data` aggregate, as published in
    /// a node's `.out` file (spec §4.7: "publish .out ... for provide-side").
    pub fn provide_data_snapshot(&self) -> Vec<u8> {
        self.provide_data.lock().expect("provide_data mutex poisoned").clone()
    }

    /// Copy raw bytes received over the wire into the `require_data`
    /// aggregate at a byte offset (the `.in` file address space), marking
    /// every require-port whose slot overlaps `[offset, offset+bytes.len())`
    /// dirty. Used by the file manager's write-handler sink for the whole
    /// aggregate file, as opposed to `write_require_port_bytes` which targets
    /// one already-known port.
    pub fn write_require_bytes(&self, offset: usize, bytes: &[u8]) -> ApxResult<Vec<usize>> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| ErrorKind::Internal("require buffer offset overflow".into()))?;
        let mut buf = self.require_data.lock().expect("require_data mutex poisoned");
        if end > buf.len() {
            return Err(ErrorKind::MsgTooLarge { size: end, max: buf.len() });
        }
        buf[offset..end].copy_from_slice(bytes);
        drop(buf);

        let mut touched = Vec::new();
        for (i, port) in self.require_ports.iter().enumerate() {
            let port_start = self.require_offsets[i] as usize;
            let port_end = port_start + port.packed_size() as usize;
            if port_start < end && offset < port_end {
                touched.push(i);
            }
        }
        self.require_dirty
            .lock()
            .expect("require_dirty mutex poisoned")
            .extend(touched.iter().copied());
        Ok(touched)
    }

    /// Drain and return provide-port indices written since the last call.
    pub fn take_dirty_provide_ports(&self) -> Vec<usize> {
        let mut dirty = self.provide_dirty.lock().expect("provide_dirty mutex poisoned");
        std::mem::take(&mut *dirty)
    }

    /// Drain and return require-port indices written since the last call.
    pub fn take_dirty_require_ports(&self) -> Vec<usize> {
        let mut dirty = self.require_dirty.lock().expect("require_dirty mutex poisoned");
        std::mem::take(&mut *dirty)
    }

    pub fn push_connector_change(&self, change: ConnectorChange) {
        self.connector_changes
            .lock()
            .expect("connector_changes mutex poisoned")
            .push(change);
    }

    pub fn take_connector_changes(&self) -> Vec<ConnectorChange> {
        let mut changes = self.connector_changes.lock().expect("connector_changes mutex poisoned");
        std::mem::take(&mut *changes)
    }

    pub fn provide_data_len(&self) -> usize {
        self.provide_data.lock().expect("provide_data mutex poisoned").len()
    }

    pub fn require_data_len(&self) -> usize {
        self.require_data.lock().expect("require_data mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::ElementKind;

    fn u16_port(name: &str, dir: PortDirection) -> Port {
        Port::new(name, dir, DataElement::scalar(ElementKind::U16))
    }

    #[test]
    fn finalize_lays_out_offsets_in_declaration_order() {
        let mut node = Node::new("TestNode");
        node.provide_ports.push(u16_port("A", PortDirection::Provide));
        node.provide_ports.push(u16_port("B", PortDirection::Provide));
        let instance = node.finalize().unwrap();
        assert_eq!(instance.provide_data_len(), 4);
        let idx_a = instance.provide_port_index("A").unwrap();
        let idx_b = instance.provide_port_index("B").unwrap();
        instance.write_provide_port(idx_a, &Value::U64(1)).unwrap();
        instance.write_provide_port(idx_b, &Value::U64(2)).unwrap();
        assert_eq!(instance.read_provide_port(idx_a).unwrap(), Value::U64(1));
        assert_eq!(instance.read_provide_port(idx_b).unwrap(), Value::U64(2));
    }

    #[test]
    fn write_marks_port_dirty() {
        let mut node = Node::new("TestNode");
        node.provide_ports.push(u16_port("A", PortDirection::Provide));
        let instance = node.finalize().unwrap();
        let idx = instance.provide_port_index("A").unwrap();
        instance.write_provide_port(idx, &Value::U64(5)).unwrap();
        assert_eq!(instance.take_dirty_provide_ports(), vec![idx]);
        assert!(instance.take_dirty_provide_ports().is_empty());
    }

    #[test]
    fn finalize_resolves_named_type_reference() {
        let mut node = Node::new("TestNode");
        node.types.push(TypeTableEntry {
            name: Some("T_Speed".into()),
            element: DataElement::scalar(ElementKind::U16),
        });
        node.provide_ports.push(Port::new(
            "VehicleSpeed",
            PortDirection::Provide,
            DataElement::scalar(ElementKind::RefByName("T_Speed".into())),
        ));
        let instance = node.finalize().unwrap();
        assert_eq!(instance.provide_data_len(), 2);
    }

    #[test]
    fn finalize_detects_cyclic_reference() {
        let mut node = Node::new("TestNode");
        node.types.push(TypeTableEntry {
            name: Some("T_A".into()),
            element: DataElement::scalar(ElementKind::RefById(1)),
        });
        node.types.push(TypeTableEntry {
            name: Some("T_B".into()),
            element: DataElement::scalar(ElementKind::RefById(0)),
        });
        node.provide_ports.push(Port::new(
            "P",
            PortDirection::Provide,
            DataElement::scalar(ElementKind::RefById(0)),
        ));
        assert!(node.finalize().is_err());
    }

    #[test]
    fn write_require_bytes_marks_overlapping_ports_dirty() {
        let mut node = Node::new("TestNode");
        node.require_ports.push(u16_port("A", PortDirection::Require));
        node.require_ports.push(u16_port("B", PortDirection::Require));
        let instance = node.finalize().unwrap();
        let touched = instance.write_require_bytes(2, &[0x01, 0x00]).unwrap();
        assert_eq!(touched, vec![1]);
        assert_eq!(instance.take_dirty_require_ports(), vec![1]);
    }

    #[test]
    fn require_port_bytes_round_trip() {
        let mut node = Node::new("TestNode");
        node.require_ports.push(u16_port("R", PortDirection::Require));
        let instance = node.finalize().unwrap();
        let idx = instance.require_port_index("R").unwrap();
        instance.write_require_port_bytes(idx, &[0x39, 0x30]).unwrap();
        assert_eq!(instance.read_require_port(idx).unwrap(), Value::U64(0x3039));
    }
}
