//! Data model: data elements, dynamic values, ports, and nodes (spec §3).

pub mod element;
pub mod node;
pub mod port;
pub mod value;

pub use element::{ArrayAttr, DataElement, ElementKind, Range, RecordField};
pub use node::{ConnectorChange, Node, NodeInstance, TypeTableEntry};
pub use port::{Port, PortDirection, ResolvedPort};
pub use value::Value;
