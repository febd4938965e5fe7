// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node arena and source→sink relations of a backend context.
//!
//! The topology lives on the façade side. Mutations are grouped into
//! transactions; committing one diffs the edge set against the snapshot taken
//! when the transaction opened and produces the ordered [`WireCall`]s the engine
//! applies to the graphs of the affected streams.

use crate::node::BackendNode;
use crate::wire::{order_calls, RewireBatch, WireCall, WireOp};
use indexmap::IndexSet;
use mediagraph_core::{MediaGraphError, NodeDescriptor, NodeId, ObjectClass, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

type Edge = (NodeId, NodeId);

struct NodeEntry {
    node: Arc<BackendNode>,
    /// Downstream nodes in connection order.
    sinks: Vec<NodeId>,
    /// Upstream node. Always `None` for the NullSink, which accepts many.
    source: Option<NodeId>,
}

#[derive(Default)]
struct ChangeSet {
    touched: IndexSet<NodeId>,
    snapshot: IndexSet<Edge>,
    /// Nodes released during the transaction, kept to resolve their old edges.
    removed: HashMap<NodeId, Arc<BackendNode>>,
    suspended: IndexSet<NodeId>,
}

/// Root and distance from the root of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    stream: Option<NodeId>,
    depth: usize,
}

/// Result of committing a transaction.
#[derive(Debug, Default)]
pub struct Commit {
    pub batch: RewireBatch,
    /// Streams suspended when the transaction opened and still alive.
    pub resume: Vec<NodeId>,
}

pub struct Topology {
    nodes: BTreeMap<NodeId, NodeEntry>,
    next_id: u32,
    null_sink: NodeId,
    change: Option<ChangeSet>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        let null_sink = NodeId(0);
        let null = BackendNode::new(null_sink, NodeDescriptor::for_class(ObjectClass::NullSink), None);
        let mut nodes = BTreeMap::new();
        nodes.insert(null_sink, NodeEntry { node: Arc::new(null), sinks: Vec::new(), source: None });
        Self { nodes, next_id: 1, null_sink, change: None }
    }

    pub const fn null_sink(&self) -> NodeId {
        self.null_sink
    }

    pub fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, node: Arc<BackendNode>) {
        self.nodes.insert(node.id(), NodeEntry { node, sinks: Vec::new(), source: None });
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<BackendNode>> {
        self.nodes.get(&id).map(|entry| entry.node.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn sinks(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.get(&id).map(|entry| entry.sinks.clone()).unwrap_or_default()
    }

    pub fn source_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|entry| entry.source)
    }

    pub const fn in_transaction(&self) -> bool {
        self.change.is_some()
    }

    fn lookup(&self, id: NodeId) -> Option<Arc<BackendNode>> {
        self.node(id).or_else(|| {
            self.change.as_ref().and_then(|change| change.removed.get(&id).cloned())
        })
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(&id).ok_or_else(|| MediaGraphError::Topology(format!("unknown node {id}")))
    }

    fn edges(&self) -> IndexSet<Edge> {
        self.nodes
            .iter()
            .flat_map(|(id, entry)| entry.sinks.iter().map(move |sink| (*id, *sink)))
            .collect()
    }

    fn upstream_map(&self, edges: &IndexSet<Edge>) -> HashMap<NodeId, NodeId> {
        edges
            .iter()
            .filter(|(_, sink)| *sink != self.null_sink)
            .map(|(source, sink)| (*sink, *source))
            .collect()
    }

    fn place(&self, upstream: &HashMap<NodeId, NodeId>, node: NodeId) -> Placement {
        let mut root = node;
        let mut depth = 0;
        while let Some(parent) = upstream.get(&root) {
            root = *parent;
            depth += 1;
            if depth > upstream.len() {
                break;
            }
        }
        let stream = self.lookup(root).filter(|n| n.is_media_source()).map(|n| n.id());
        Placement { stream, depth }
    }

    /// Media object whose graph `node` currently belongs to.
    pub fn stream_of(&self, node: NodeId) -> Option<NodeId> {
        let edges = self.edges();
        self.place(&self.upstream_map(&edges), node).stream
    }

    /// Opens a transaction, or extends the open one, over `nodes`.
    ///
    /// Returns the streams that must be suspended while the transaction is open.
    pub fn begin(&mut self, nodes: &[NodeId]) -> Vec<NodeId> {
        let streams: IndexSet<NodeId> =
            nodes.iter().filter_map(|node| self.stream_of(*node)).collect();
        let snapshot = if self.change.is_none() { self.edges() } else { IndexSet::new() };
        let change = self.change.get_or_insert_with(|| ChangeSet { snapshot, ..ChangeSet::default() });
        change.touched.extend(nodes.iter().copied());
        streams.into_iter().filter(|stream| change.suspended.insert(*stream)).collect()
    }

    fn touch(&mut self, nodes: &[NodeId]) {
        if let Some(change) = self.change.as_mut() {
            change.touched.extend(nodes.iter().copied());
        }
    }

    fn is_ancestor(&self, candidate: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut hops = 0;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            hops += 1;
            if hops > self.nodes.len() {
                return false;
            }
            current = self.source_of(id);
        }
        false
    }

    /// Relates `source` to `sink`.
    ///
    /// # Errors
    ///
    /// Fails when either node is unknown, when the capabilities or stream
    /// types do not fit, when `sink` already has an upstream, or when the edge
    /// would close a cycle.
    pub fn connect(&mut self, source: NodeId, sink: NodeId) -> Result<()> {
        let a = self.entry(source)?;
        let b = self.entry(sink)?;
        if sink == self.null_sink {
            return Err(MediaGraphError::Topology(
                "the null sink is managed by the backend".to_string(),
            ));
        }
        if !a.node.is_source() {
            return Err(MediaGraphError::Topology(format!("{source} cannot produce streams")));
        }
        if !b.node.is_sink() {
            return Err(MediaGraphError::Topology(format!("{sink} cannot consume streams")));
        }
        if a.sinks.contains(&sink) {
            return Err(MediaGraphError::Topology(format!("{source} is already connected to {sink}")));
        }
        if let Some(upstream) = b.source {
            return Err(MediaGraphError::Topology(format!(
                "{sink} is already fed by {upstream}"
            )));
        }
        if !a.node.output_stream_types().intersects(b.node.input_stream_types()) {
            return Err(MediaGraphError::Topology(format!(
                "{source} produces {:?} but {sink} accepts {:?}",
                a.node.output_stream_types(),
                b.node.input_stream_types()
            )));
        }
        if self.is_ancestor(sink, source) {
            return Err(MediaGraphError::Topology(format!(
                "connecting {source} to {sink} would create a cycle"
            )));
        }

        let null_sink = self.null_sink;
        if let Some(entry) = self.nodes.get_mut(&source) {
            if entry.sinks == [null_sink] {
                entry.sinks.clear();
            }
            entry.sinks.push(sink);
        }
        if let Some(entry) = self.nodes.get_mut(&sink) {
            entry.source = Some(source);
        }
        self.touch(&[source, sink]);
        tracing::debug!(%source, %sink, "Nodes related");
        Ok(())
    }

    /// Removes the relation between `source` and `sink`.
    ///
    /// # Errors
    ///
    /// Fails when the relation does not exist.
    pub fn disconnect(&mut self, source: NodeId, sink: NodeId) -> Result<()> {
        let related = self.nodes.get(&source).is_some_and(|entry| entry.sinks.contains(&sink));
        if !related {
            return Err(MediaGraphError::Topology(format!("{source} is not connected to {sink}")));
        }
        if let Some(entry) = self.nodes.get_mut(&source) {
            entry.sinks.retain(|id| *id != sink);
        }
        if sink != self.null_sink {
            if let Some(entry) = self.nodes.get_mut(&sink) {
                entry.source = None;
            }
        }
        self.touch(&[source, sink]);
        tracing::debug!(%source, %sink, "Nodes unrelated");
        Ok(())
    }

    /// Removes `node` and every relation it takes part in.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes and for the NullSink.
    pub fn remove(&mut self, node: NodeId) -> Result<Arc<BackendNode>> {
        if node == self.null_sink {
            return Err(MediaGraphError::Topology("the null sink cannot be released".to_string()));
        }
        let entry = self.entry(node)?;
        let upstream = entry.source;
        let downstream = entry.sinks.clone();

        if let Some(source) = upstream {
            self.disconnect(source, node)?;
        }
        for sink in downstream {
            self.disconnect(node, sink)?;
        }
        let entry = self.nodes.remove(&node).ok_or_else(|| {
            MediaGraphError::Topology(format!("unknown node {node}"))
        })?;
        if let Some(change) = self.change.as_mut() {
            change.removed.insert(node, entry.node.clone());
            change.touched.shift_remove(&node);
        }
        Ok(entry.node)
    }

    /// Closes the open transaction and computes its rewire batch.
    ///
    /// # Errors
    ///
    /// Fails when no transaction is open.
    pub fn commit(&mut self, nodes: &[NodeId]) -> Result<Commit> {
        self.touch(nodes);
        let Some(mut change) = self.change.take() else {
            return Err(MediaGraphError::Topology("no connection change in progress".to_string()));
        };

        self.cap_with_null_sink(&change.touched);

        // Keep released nodes resolvable while computing the calls.
        let removed = std::mem::take(&mut change.removed);
        self.change = Some(ChangeSet { removed, ..ChangeSet::default() });

        let old_edges = std::mem::take(&mut change.snapshot);
        let new_edges = self.edges();
        let old_up = self.upstream_map(&old_edges);
        let new_up = self.upstream_map(&new_edges);

        let mut calls = Vec::new();
        for edge in &old_edges {
            let before = self.place(&old_up, edge.0);
            let unchanged =
                new_edges.contains(edge) && self.place(&new_up, edge.0).stream == before.stream;
            if !unchanged {
                calls.extend(self.call(WireOp::Disconnect, *edge, before));
            }
        }
        for edge in &new_edges {
            let after = self.place(&new_up, edge.0);
            let unchanged =
                old_edges.contains(edge) && self.place(&old_up, edge.0).stream == after.stream;
            if !unchanged {
                calls.extend(self.call(WireOp::Connect, *edge, after));
            }
        }
        let calls = order_calls(calls);

        let streams: IndexSet<NodeId> = calls.iter().filter_map(|call| call.stream).collect();
        let endpoints = streams
            .into_iter()
            .filter(|stream| self.nodes.contains_key(stream))
            .map(|stream| (stream, self.endpoints(stream)))
            .collect();

        let mut keep_alive: Vec<Arc<BackendNode>> = Vec::new();
        for call in &calls {
            for node in [&call.source, &call.sink] {
                if !keep_alive.iter().any(|kept| kept.id() == node.id()) {
                    keep_alive.push(node.clone());
                }
            }
        }

        self.change = None;
        tracing::debug!(
            calls = calls.len(),
            suspended = change.suspended.len(),
            "Connection change committed"
        );
        Ok(Commit {
            batch: RewireBatch { calls, endpoints, keep_alive },
            resume: change
                .suspended
                .into_iter()
                .filter(|stream| self.nodes.contains_key(stream))
                .collect(),
        })
    }

    /// Wires every touched source without consumers to the NullSink.
    fn cap_with_null_sink(&mut self, touched: &IndexSet<NodeId>) {
        let null_sink = self.null_sink;
        for id in touched {
            let Some(entry) = self.nodes.get_mut(id) else {
                continue;
            };
            if *id == null_sink || !entry.node.is_source() || !entry.sinks.is_empty() {
                continue;
            }
            if entry.node.is_sink() && entry.source.is_none() {
                continue;
            }
            entry.sinks.push(null_sink);
            tracing::trace!(node = %id, "Capped with null sink");
        }
    }

    fn call(&self, op: WireOp, (source, sink): Edge, placement: Placement) -> Option<WireCall> {
        Some(WireCall {
            op,
            source: self.lookup(source)?,
            sink: self.lookup(sink)?,
            stream: placement.stream,
            depth: placement.depth,
        })
    }

    /// Terminal consumers reachable from `stream`.
    fn endpoints(&self, stream: NodeId) -> Vec<Arc<BackendNode>> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([stream]);
        while let Some(id) = queue.pop_front() {
            let Some(entry) = self.nodes.get(&id) else {
                continue;
            };
            if entry.node.is_endpoint() {
                found.push(entry.node.clone());
            }
            queue.extend(entry.sinks.iter().filter(|sink| **sink != self.null_sink));
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(topology: &mut Topology, class: ObjectClass) -> NodeId {
        let id = topology.allocate_id();
        topology.insert(Arc::new(BackendNode::new(id, NodeDescriptor::for_class(class), None)));
        id
    }

    fn keys(commit: &Commit) -> Vec<(WireOp, NodeId, NodeId)> {
        commit.batch.calls.iter().map(WireCall::key).collect()
    }

    #[test]
    fn test_new_media_object_is_capped() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        assert_eq!(t.begin(&[media]), vec![media]);
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };
        assert_eq!(t.sinks(media), vec![t.null_sink()]);
        assert_eq!(keys(&commit), vec![(WireOp::Connect, media, t.null_sink())]);
        assert_eq!(commit.batch.calls[0].stream, Some(media));
    }

    #[test]
    fn test_chain_applies_downstream_first() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        let fader = add(&mut t, ObjectClass::VolumeFader);
        let out = add(&mut t, ObjectClass::AudioOutput);

        t.begin(&[media, fader, out]);
        assert!(t.connect(media, fader).is_ok());
        assert!(t.connect(fader, out).is_ok());
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };

        assert_eq!(keys(&commit), vec![
            (WireOp::Connect, fader, out),
            (WireOp::Connect, media, fader),
        ]);
        assert_eq!(commit.batch.endpoints.len(), 1);
        assert_eq!(commit.batch.endpoints[0].1.iter().map(|n| n.id()).collect::<Vec<_>>(), vec![out]);
    }

    #[test]
    fn test_real_sink_replaces_null_and_disconnect_restores_it() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        let out = add(&mut t, ObjectClass::AudioOutput);
        let null = t.null_sink();
        t.begin(&[media]);
        assert!(t.commit(&[]).is_ok());

        t.begin(&[media, out]);
        assert!(t.connect(media, out).is_ok());
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };
        assert_eq!(t.sinks(media), vec![out]);
        assert_eq!(keys(&commit), vec![
            (WireOp::Disconnect, media, null),
            (WireOp::Connect, media, out),
        ]);

        t.begin(&[media, out]);
        assert!(t.disconnect(media, out).is_ok());
        assert!(t.commit(&[]).is_ok());
        assert_eq!(t.sinks(media), vec![null]);
    }

    #[test]
    fn test_relation_rules() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        let other = add(&mut t, ObjectClass::MediaSource);
        let video = add(&mut t, ObjectClass::VideoOutput);
        let vis = add(&mut t, ObjectClass::Visualization);
        let fader = add(&mut t, ObjectClass::VolumeFader);

        t.begin(&[]);
        assert!(t.connect(video, media).is_err());
        assert!(t.connect(media, t.null_sink()).is_err());
        assert!(t.connect(fader, video).is_err());
        assert!(t.connect(media, video).is_ok());
        assert!(t.connect(other, video).is_err());
        assert!(t.connect(media, vis).is_ok());
        assert!(t.connect(vis, fader).is_err());
        assert!(t.disconnect(other, video).is_err());
        assert!(t.commit(&[]).is_ok());
        assert!(t.commit(&[]).is_err());
    }

    #[test]
    fn test_subtree_moves_with_its_root() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        let fader = add(&mut t, ObjectClass::VolumeFader);
        let out = add(&mut t, ObjectClass::AudioOutput);

        t.begin(&[fader, out]);
        assert!(t.connect(fader, out).is_ok());
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };
        assert!(commit.batch.calls.iter().all(|call| call.stream.is_none()));

        t.begin(&[media, fader]);
        assert!(t.connect(media, fader).is_ok());
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };
        let connects: Vec<_> = commit
            .batch
            .calls
            .iter()
            .filter(|call| call.op == WireOp::Connect)
            .map(|call| (call.source.id(), call.sink.id(), call.stream))
            .collect();
        assert_eq!(connects, vec![(fader, out, Some(media)), (media, fader, Some(media))]);
    }

    #[test]
    fn test_remove_caps_upstream() {
        let mut t = Topology::new();
        let media = add(&mut t, ObjectClass::MediaSource);
        let out = add(&mut t, ObjectClass::AudioOutput);
        t.begin(&[media, out]);
        assert!(t.connect(media, out).is_ok());
        assert!(t.commit(&[]).is_ok());

        t.begin(&[out]);
        let removed = t.remove(out);
        assert!(removed.is_ok());
        let Ok(commit) = t.commit(&[]) else {
            panic!("commit failed");
        };
        assert_eq!(t.sinks(media), vec![t.null_sink()]);
        assert!(commit.batch.keep_alive.iter().any(|n| n.id() == out));
        assert!(t.node(out).is_none());
        assert!(t.remove(t.null_sink()).is_err());
    }
}
