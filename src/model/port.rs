//! Port: a named, typed attachment point on a node, either providing or
//! requiring a data element (spec §3/§4.1). Grounded on `apx_portAttributes_t`
//! and `apx_portSpec_t` in `examples/original_source/apx/common/`.

use crate::error::{ApxResult, ErrorKind};
use crate::model::element::DataElement;
use crate::model::value::Value;
use crate::vm::program::Program;

/// Whether a port provides (publishes) or requires (subscribes to) data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Provide,
    Require,
}

/// A port as declared in node text, before `Node::finalize()` resolves
/// references and compiles the pack/unpack program.
#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
    pub element: DataElement,
    /// Initial value literal from the definition text (`=` attribute), if any.
    pub init: Option<Value>,
    /// Declared queue length (`apx_parameter` attribute grammar). Parsed and
    /// validated but not wired into delivery: the current core handles only
    /// the trivial depth-1 case, matching the reference implementation's
    /// actual (unqueued) connector behavior.
    pub queue_len: Option<u32>,
    /// True if this is a parameter port (`=` attribute flag `P`), excluded
    /// from signal routing statistics but otherwise packed/unpacked the same.
    pub is_parameter: bool,
}

/// A port after `Node::finalize()`: references resolved, program compiled.
#[derive(Debug, Clone)]
pub struct ResolvedPort {
    pub name: String,
    pub direction: PortDirection,
    pub element: DataElement,
    pub init: Option<Value>,
    pub queue_len: Option<u32>,
    pub is_parameter: bool,
    pub program: Program,
    /// The data element's canonical signature text alone (diagnostics).
    pub signature: String,
    /// `name + signature`: the key used by the port signature map (spec §3/§4.4).
    pub port_signature: String,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: PortDirection, element: DataElement) -> Self {
        Self {
            name: name.into(),
            direction,
            element,
            init: None,
            queue_len: None,
            is_parameter: false,
        }
    }

    /// Resolve this port: the element must already have all references
    /// resolved by the caller (`Node::finalize()` walks the type table first).
    ///
    /// Queued ports (`Q[n]` with `n > 0`) are rejected here: the parser
    /// accepts and stores `queue_len`, but no component delivers queued
    /// values, so a non-trivial queue depth would silently behave as if
    /// unqueued instead of failing loudly.
    pub fn resolve(self) -> ApxResult<ResolvedPort> {
        if let Some(n) = self.queue_len {
            if n > 0 {
                return Err(ErrorKind::InvalidArgument(format!(
                    "port '{}' declares queue_len {}, but queued ports are not implemented",
                    self.name, n
                )));
            }
        }
        let program = crate::vm::program::compile(&self.element)?;
        let element_signature = self.element.to_signature_string()?;
        let port_signature = format!("{}{}", self.name, element_signature);
        Ok(ResolvedPort {
            name: self.name,
            direction: self.direction,
            element: self.element,
            init: self.init,
            queue_len: self.queue_len,
            is_parameter: self.is_parameter,
            program,
            signature: element_signature,
            port_signature,
        })
    }
}

impl ResolvedPort {
    pub fn packed_size(&self) -> u32 {
        self.program.packed_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element::ElementKind;

    #[test]
    fn resolve_computes_program_and_signature() {
        let port = Port::new(
            "VehicleSpeed",
            PortDirection::Provide,
            DataElement::scalar(ElementKind::U16),
        );
        let resolved = port.resolve().unwrap();
        assert_eq!(resolved.packed_size(), 2);
        assert_eq!(resolved.signature, "S");
    }

    #[test]
    fn resolve_fails_on_unresolved_reference() {
        let port = Port::new(
            "Unresolved",
            PortDirection::Require,
            DataElement::scalar(ElementKind::RefByName("T_Foo".into())),
        );
        assert!(port.resolve().is_err());
    }

    #[test]
    fn resolve_rejects_nonzero_queue_len() {
        let mut port = Port::new(
            "Queued",
            PortDirection::Require,
            DataElement::scalar(ElementKind::U8),
        );
        port.queue_len = Some(4);
        assert!(port.resolve().is_err());
    }

    #[test]
    fn resolve_accepts_zero_queue_len() {
        let mut port = Port::new(
            "Unqueued",
            PortDirection::Require,
            DataElement::scalar(ElementKind::U8),
        );
        port.queue_len = Some(0);
        assert!(port.resolve().is_ok());
    }
}
