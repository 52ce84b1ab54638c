//! registry.rs
//! Dense columnar arena for expression nodes.

use serde::{Deserialize, Serialize};

use super::types::{NodeId, NodeKind, OpKind};

/// Node storage in columnar layout. Identity is the arena index; "same node"
/// checks are index comparisons, never structural equality.
///
/// Structure (`kinds`, argument topology) is immutable once a node is pushed.
/// Only the `values` column mutates afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    // Columnar arrays
    pub kinds: Vec<NodeKind>,

    // Topology (CSR): ordered argument lists
    pub args_flat: Vec<NodeId>,
    pub args_ranges: Vec<(u32, u32)>, // (start, count)

    /// Mutable evaluation state, kept apart from the immutable structure.
    /// Holds a Variable's current value and every node's last computed
    /// value. Never invalidated automatically.
    pub values: Vec<f64>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.kinds.len() }

    fn push_node(&mut self, kind: NodeKind, args: &[NodeId], value: f64) -> NodeId {
        let id = NodeId(self.kinds.len() as u32);

        let start = self.args_flat.len() as u32;
        let count = args.len() as u32;
        self.args_flat.extend_from_slice(args);
        self.args_ranges.push((start, count));

        self.kinds.push(kind);
        self.values.push(value);

        id
    }

    pub fn add_constant(&mut self, value: f64) -> NodeId {
        self.push_node(NodeKind::Constant(value), &[], value)
    }

    pub fn add_variable(&mut self, name: &str, value: f64) -> NodeId {
        self.push_node(NodeKind::Variable { name: name.to_string() }, &[], value)
    }

    pub fn add_function(&mut self, op: OpKind, args: &[NodeId]) -> NodeId {
        self.push_node(NodeKind::Function(op), args, 0.0)
    }

    #[inline(always)]
    pub fn get_args(&self, id: NodeId) -> &[NodeId] {
        let (start, count) = self.args_ranges[id.index()];
        &self.args_flat[start as usize..(start + count) as usize]
    }

    #[inline(always)]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.kinds[id.index()]
    }

    pub fn as_constant(&self, id: NodeId) -> Option<f64> {
        match self.kinds[id.index()] {
            NodeKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_variable(&self, id: NodeId) -> bool {
        matches!(self.kinds[id.index()], NodeKind::Variable { .. })
    }

    /// Display name used in errors and traces.
    pub fn label(&self, id: NodeId) -> String {
        match &self.kinds[id.index()] {
            NodeKind::Constant(v) => format!("{}", v),
            NodeKind::Variable { name } => name.clone(),
            NodeKind::Function(op) => op.symbol().to_string(),
        }
    }

    #[inline(always)]
    pub fn value(&self, id: NodeId) -> f64 {
        self.values[id.index()]
    }

    #[inline(always)]
    pub fn set_value(&mut self, id: NodeId, value: f64) {
        self.values[id.index()] = value;
    }

    /// Structural consistency check for registries that did not come out of
    /// this process's constructors (e.g. deserialized payloads). Column
    /// lengths must agree, argument ranges must stay inside the flat pool,
    /// and every argument id must refer to an existing node.
    pub fn validate(&self) -> Result<(), String> {
        let count = self.count();
        if self.args_ranges.len() != count || self.values.len() != count {
            return Err("column lengths disagree".to_string());
        }
        for (i, &(start, len)) in self.args_ranges.iter().enumerate() {
            let end = start as usize + len as usize;
            if end > self.args_flat.len() {
                return Err(format!("argument range of node {} out of bounds", i));
            }
        }
        for &arg in &self.args_flat {
            if arg.index() >= count {
                return Err(format!("dangling argument id {:?}", arg));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_stay_aligned() {
        let mut reg = Registry::new();
        let x = reg.add_variable("x", 2.0);
        let c = reg.add_constant(1.0);
        let f = reg.add_function(OpKind::Add, &[x, c]);

        assert_eq!(reg.count(), 3);
        assert_eq!(reg.get_args(f), &[x, c]);
        assert_eq!(reg.get_args(x), &[] as &[NodeId]);
        assert_eq!(reg.value(x), 2.0);
        assert_eq!(reg.as_constant(c), Some(1.0));
        assert!(reg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_argument() {
        let mut reg = Registry::new();
        let x = reg.add_variable("x", 0.0);
        reg.add_function(OpKind::Negate, &[x]);
        // Corrupt the topology the way a bad payload would.
        reg.args_flat[0] = NodeId::new(99);
        assert!(reg.validate().is_err());
    }
}
