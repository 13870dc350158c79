// vim: tw=80
//! Directed acyclic graphs of I/O operations.
//!
//! Every user access and every reconstruction pass is compiled into a
//! [`Dag`] before anything touches a disk.  Nodes hold single-purpose
//! operations from the [`nodefn`] library; edges encode all ordering
//! constraints.  The executor in [`exec`] fires a node as soon as its last
//! predecessor completes, so a DAG's width is its available parallelism.

use divbuf::DivBufShared;

pub mod build;
pub mod exec;
pub mod nodefn;
pub mod xor;

use nodefn::{BufId, NodeOp, NodeParams};

/// Index of a node within its [`Dag`].
pub type NodeId = usize;

pub(crate) struct DagNode {
    pub(crate) op: Option<NodeOp>,
    pub(crate) params: NodeParams,
    /// Successor edges, by node index.
    pub(crate) succs: Vec<NodeId>,
    /// Number of incoming edges.
    pub(crate) npreds: usize,
}

/// A compiled I/O graph, ready for [`exec::execute`].
///
/// Nodes are stored in an arena and referenced by index.  Edges may only
/// point from a lower index to a higher one, which makes cycles
/// unrepresentable and gives every `Dag` a ready-made topological order.
#[derive(Default)]
pub struct Dag {
    pub(crate) nodes: Vec<DagNode>,
    /// Scratch buffers owned by this graph, referenced by nodes via
    /// [`BufId`].
    pub(crate) bufs: Vec<DivBufShared>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed scratch buffer of `len` bytes.
    pub fn add_buf(&mut self, len: usize) -> BufId {
        self.bufs.push(DivBufShared::from(vec![0u8; len]));
        self.bufs.len() - 1
    }

    pub fn add_node(&mut self, op: NodeOp, params: NodeParams) -> NodeId {
        self.nodes.push(DagNode {
            op: Some(op),
            params,
            succs: Vec::new(),
            npreds: 0,
        });
        self.nodes.len() - 1
    }

    /// Order `from` before `to`.
    ///
    /// # Panics
    ///
    /// Edges must run forward through the arena.  Anything else would permit
    /// a cycle, so it panics.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        assert!(from < to, "edges must run forward through the arena");
        self.nodes[from].succs.push(to);
        self.nodes[to].npreds += 1;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use pretty_assertions::assert_eq;
    use super::{*, nodefn::*};

    #[test]
    fn arena_basics() {
        let mut dag = Dag::new();
        let a = dag.add_node(NodeOp::Null, NodeParams::default());
        let b = dag.add_node(NodeOp::Null, NodeParams::default());
        let t = dag.add_node(NodeOp::Terminate, NodeParams::default());
        dag.add_edge(a, b);
        dag.add_edge(b, t);
        dag.add_edge(a, t);
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.nodes[a].npreds, 0);
        assert_eq!(dag.nodes[b].npreds, 1);
        assert_eq!(dag.nodes[t].npreds, 2);
        assert_eq!(dag.nodes[a].succs, vec![b, t]);
    }

    #[test]
    #[should_panic(expected = "forward")]
    fn backward_edge() {
        let mut dag = Dag::new();
        let a = dag.add_node(NodeOp::Null, NodeParams::default());
        let b = dag.add_node(NodeOp::Null, NodeParams::default());
        dag.add_edge(b, a);
    }

    #[test]
    fn scratch_buffers_zeroed() {
        let mut dag = Dag::new();
        let id = dag.add_buf(64);
        assert!(dag.bufs[id].try_const().unwrap().iter().all(|b| *b == 0));
    }
}
// LCOV_EXCL_STOP
