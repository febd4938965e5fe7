// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rewire instructions computed by a topology transaction.

use crate::node::BackendNode;
use mediagraph_core::NodeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Disconnects sort before connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WireOp {
    Disconnect,
    Connect,
}

/// One (source, sink) instruction for the graphs of a stream.
#[derive(Clone)]
pub struct WireCall {
    pub op: WireOp,
    pub source: Arc<BackendNode>,
    pub sink: Arc<BackendNode>,
    /// Media object the edge is rooted in, if any.
    pub stream: Option<NodeId>,
    /// Hops from the root to `source`.
    pub depth: usize,
}

impl WireCall {
    pub fn key(&self) -> (WireOp, NodeId, NodeId) {
        (self.op, self.source.id(), self.sink.id())
    }
}

impl fmt::Debug for WireCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({} -> {}, stream={:?}, depth={})",
            self.op,
            self.source.id(),
            self.sink.id(),
            self.stream.map(|s| s.0),
            self.depth
        )
    }
}

/// Collapses duplicates and puts the calls in application order.
///
/// Disconnects come first, then deeper (further downstream) edges before
/// shallower ones. The sort is stable, so ties keep insertion order.
pub fn order_calls(calls: Vec<WireCall>) -> Vec<WireCall> {
    let mut seen = HashSet::new();
    let mut calls: Vec<WireCall> =
        calls.into_iter().filter(|call| seen.insert(call.key())).collect();
    calls.sort_by(|a, b| a.op.cmp(&b.op).then(b.depth.cmp(&a.depth)));
    calls
}

/// Outcome of a transaction, applied by the engine in one turn.
#[derive(Debug, Default)]
pub struct RewireBatch {
    pub calls: Vec<WireCall>,
    /// Terminal consumers of every stream whose wiring changed.
    pub endpoints: Vec<(NodeId, Vec<Arc<BackendNode>>)>,
    /// Nodes that must stay alive until the batch has been applied.
    pub keep_alive: Vec<Arc<BackendNode>>,
}

impl RewireBatch {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagraph_core::{NodeDescriptor, ObjectClass};

    fn node(id: u32) -> Arc<BackendNode> {
        Arc::new(BackendNode::new(NodeId(id), NodeDescriptor::for_class(ObjectClass::Effect), None))
    }

    fn call(
        op: WireOp,
        source: &Arc<BackendNode>,
        sink: &Arc<BackendNode>,
        depth: usize,
    ) -> WireCall {
        WireCall { op, source: source.clone(), sink: sink.clone(), stream: Some(NodeId(1)), depth }
    }

    #[test]
    fn test_downstream_edges_first() {
        let (a, b, c) = (node(1), node(2), node(3));
        let ordered = order_calls(vec![
            call(WireOp::Connect, &a, &b, 0),
            call(WireOp::Connect, &b, &c, 1),
        ]);
        let keys: Vec<_> = ordered.iter().map(WireCall::key).collect();
        assert_eq!(keys, vec![
            (WireOp::Connect, NodeId(2), NodeId(3)),
            (WireOp::Connect, NodeId(1), NodeId(2)),
        ]);
    }

    #[test]
    fn test_disconnects_first_and_duplicates_collapse() {
        let (a, b, c, d) = (node(1), node(2), node(3), node(4));
        let ordered = order_calls(vec![
            call(WireOp::Connect, &a, &b, 2),
            call(WireOp::Disconnect, &a, &c, 0),
            call(WireOp::Connect, &a, &d, 2),
            call(WireOp::Connect, &a, &b, 2),
            call(WireOp::Disconnect, &b, &c, 1),
        ]);
        let keys: Vec<_> = ordered.iter().map(WireCall::key).collect();
        assert_eq!(keys, vec![
            (WireOp::Disconnect, NodeId(2), NodeId(3)),
            (WireOp::Disconnect, NodeId(1), NodeId(3)),
            (WireOp::Connect, NodeId(1), NodeId(2)),
            (WireOp::Connect, NodeId(1), NodeId(4)),
        ]);
    }
}
