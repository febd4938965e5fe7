// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory model of a native filter pipeline.
//!
//! A [`Pipeline`] is an arena of filters with typed ports. Native engines add
//! their own filters when opening a source; graphs add node filters, Tees and
//! the placeholder source. Filters may be detached from the running pipeline
//! without being destroyed, optionally keeping their connections.

use mediagraph_core::pins::{AllocatorProps, PortCardinality, PortDirection, PortSpec};
use mediagraph_core::types::MediaFormat;
use mediagraph_core::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(u32);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

/// Address of one port: filter, direction and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub filter: FilterId,
    pub direction: PortDirection,
    pub index: usize,
}

impl PortRef {
    pub const fn input(filter: FilterId, index: usize) -> Self {
        Self { filter, direction: PortDirection::Input, index }
    }

    pub const fn output(filter: FilterId, index: usize) -> Self {
        Self { filter, direction: PortDirection::Output, index }
    }
}

/// Who created a filter and therefore who is responsible for removing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterRole {
    /// Materialization of a backend node in this pipeline.
    Node(NodeId),
    /// Placeholder source standing in for the media object before a source is loaded.
    FakeSource,
    /// Fan-out adapter.
    Tee,
    /// Created by the native engine while opening a source.
    Native,
}

/// Run state shared by every attached filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Paused,
    Running,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unknown filter {0}")]
    UnknownFilter(FilterId),
    #[error("unknown port {0:?}")]
    UnknownPort(PortRef),
    #[error("port {0:?} has the wrong direction")]
    WrongDirection(PortRef),
    #[error("port {0:?} is already connected")]
    AlreadyConnected(PortRef),
    #[error("ports {0:?} and {1:?} are not connected to each other")]
    NotConnected(PortRef, PortRef),
    #[error("filter '{0}' is not stopped")]
    FilterNotStopped(String),
    #[error("filter '{0}' is not part of the pipeline")]
    NotAttached(String),
    #[error("no common format between {0:?} and {1:?}")]
    NoCommonFormat(PortRef, PortRef),
}

/// One live port of a filter.
#[derive(Debug, Clone)]
pub struct Port {
    spec: PortSpec,
    direction: PortDirection,
    peer: Option<PortRef>,
    format: Option<MediaFormat>,
    allocator: Option<AllocatorProps>,
}

impl Port {
    fn new(spec: PortSpec, direction: PortDirection) -> Self {
        Self { spec, direction, peer: None, format: None, allocator: None }
    }

    pub const fn direction(&self) -> PortDirection {
        self.direction
    }

    pub const fn connected_peer(&self) -> Option<PortRef> {
        self.peer
    }

    pub const fn negotiated_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    pub const fn allocator(&self) -> Option<AllocatorProps> {
        self.allocator
    }

    pub const fn spec(&self) -> &PortSpec {
        &self.spec
    }

    pub const fn is_connected(&self) -> bool {
        self.peer.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    role: FilterRole,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    attached: bool,
}

impl Filter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn role(&self) -> FilterRole {
        self.role
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn connected_output_count(&self) -> usize {
        self.outputs.iter().filter(|p| p.is_connected()).count()
    }

    fn ports_mut(&mut self, direction: PortDirection) -> &mut Vec<Port> {
        match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        }
    }

    /// Keeps exactly one unconnected instance of every dynamic output.
    fn normalize_dynamic_outputs(&mut self) {
        let Some(last) = self.outputs.last() else {
            return;
        };
        if last.spec.cardinality != PortCardinality::Dynamic {
            return;
        }
        if self.outputs.iter().all(Port::is_connected) {
            let spec = last.spec.clone();
            self.outputs.push(Port::new(spec, PortDirection::Output));
            return;
        }
        while self.outputs.len() > 1 {
            let n = self.outputs.len();
            if self.outputs[n - 1].is_connected() || self.outputs[n - 2].is_connected() {
                break;
            }
            self.outputs.pop();
        }
    }
}

/// Arena of filters plus the shared run state.
#[derive(Debug, Default)]
pub struct Pipeline {
    filters: BTreeMap<FilterId, Filter>,
    node_filters: HashMap<NodeId, FilterId>,
    next_id: u32,
    run_state: RunState,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and attaches a filter.
    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        role: FilterRole,
        inputs: &[PortSpec],
        outputs: &[PortSpec],
    ) -> FilterId {
        let id = FilterId(self.next_id);
        self.next_id += 1;
        let filter = Filter {
            name: name.into(),
            role,
            inputs: inputs.iter().cloned().map(|s| Port::new(s, PortDirection::Input)).collect(),
            outputs: outputs.iter().cloned().map(|s| Port::new(s, PortDirection::Output)).collect(),
            attached: true,
        };
        if let FilterRole::Node(node) = role {
            self.node_filters.insert(node, id);
        }
        tracing::trace!(filter = %id, name = %filter.name, ?role, "Filter added");
        self.filters.insert(id, filter);
        id
    }

    /// Disconnects every port and destroys the filter.
    pub fn remove_filter(&mut self, id: FilterId) -> Result<(), PipelineError> {
        self.disconnect_all(id)?;
        if let Some(filter) = self.filters.remove(&id) {
            if let FilterRole::Node(node) = filter.role {
                self.node_filters.remove(&node);
            }
            tracing::trace!(filter = %id, name = %filter.name, "Filter removed");
        }
        Ok(())
    }

    pub fn filter(&self, id: FilterId) -> Option<&Filter> {
        self.filters.get(&id)
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn node_filter(&self, node: NodeId) -> Option<FilterId> {
        self.node_filters.get(&node).copied()
    }

    pub fn filter_ids(&self) -> impl Iterator<Item = FilterId> + '_ {
        self.filters.keys().copied()
    }

    pub fn attached_filters(&self) -> BTreeSet<FilterId> {
        self.filters.iter().filter(|(_, f)| f.attached).map(|(id, _)| *id).collect()
    }

    pub fn count_role(&self, pred: impl Fn(FilterRole) -> bool) -> usize {
        self.filters.values().filter(|f| f.attached && pred(f.role)).count()
    }

    pub fn is_attached(&self, id: FilterId) -> bool {
        self.filters.get(&id).is_some_and(|f| f.attached)
    }

    /// Re-inserts a detached filter. Idempotent.
    pub fn attach(&mut self, id: FilterId) -> Result<bool, PipelineError> {
        let filter = self.filters.get_mut(&id).ok_or(PipelineError::UnknownFilter(id))?;
        let changed = !filter.attached;
        filter.attached = true;
        Ok(changed)
    }

    /// Takes a filter out of the running pipeline without destroying it.
    pub fn detach(&mut self, id: FilterId, keep_connections: bool) -> Result<(), PipelineError> {
        if !keep_connections {
            self.disconnect_all(id)?;
        }
        let filter = self.filters.get_mut(&id).ok_or(PipelineError::UnknownFilter(id))?;
        filter.attached = false;
        Ok(())
    }

    pub const fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    /// Formats and links of an attached filter are frozen while the
    /// pipeline is paused or running.
    fn filter_is_active(&self, filter: &Filter) -> bool {
        filter.attached && self.run_state != RunState::Stopped
    }

    pub fn port(&self, port: PortRef) -> Option<&Port> {
        let filter = self.filters.get(&port.filter)?;
        match port.direction {
            PortDirection::Input => filter.inputs.get(port.index),
            PortDirection::Output => filter.outputs.get(port.index),
        }
    }

    fn port_mut(&mut self, port: PortRef) -> Option<&mut Port> {
        self.filters.get_mut(&port.filter)?.ports_mut(port.direction).get_mut(port.index)
    }

    pub fn inputs(&self, id: FilterId) -> Vec<PortRef> {
        self.filters
            .get(&id)
            .map(|f| (0..f.inputs.len()).map(|i| PortRef::input(id, i)).collect())
            .unwrap_or_default()
    }

    pub fn outputs(&self, id: FilterId) -> Vec<PortRef> {
        self.filters
            .get(&id)
            .map(|f| (0..f.outputs.len()).map(|i| PortRef::output(id, i)).collect())
            .unwrap_or_default()
    }

    pub fn peer(&self, port: PortRef) -> Option<PortRef> {
        self.port(port).and_then(Port::connected_peer)
    }

    fn check_idle(&self, port: PortRef) -> Result<(), PipelineError> {
        let filter = self.filters.get(&port.filter).ok_or(PipelineError::UnknownFilter(port.filter))?;
        if self.filter_is_active(filter) {
            return Err(PipelineError::FilterNotStopped(filter.name.clone()));
        }
        Ok(())
    }

    fn negotiate(
        out_spec: &PortSpec,
        in_spec: &PortSpec,
        requested: Option<&MediaFormat>,
    ) -> Option<MediaFormat> {
        if let Some(format) = requested {
            return (out_spec.accepts(format) && in_spec.accepts(format)).then(|| format.clone());
        }
        out_spec
            .formats
            .iter()
            .find(|f| in_spec.accepts(f))
            .or_else(|| in_spec.formats.iter().find(|f| out_spec.accepts(f)))
            .cloned()
    }

    /// Connects `output` to `input`, negotiating a format and an allocator.
    ///
    /// # Errors
    ///
    /// Fails when either port is unknown or already connected, when either
    /// filter is paused, running or detached, or when no common format exists.
    pub fn connect(
        &mut self,
        output: PortRef,
        input: PortRef,
        format: Option<&MediaFormat>,
    ) -> Result<MediaFormat, PipelineError> {
        if output.direction != PortDirection::Output {
            return Err(PipelineError::WrongDirection(output));
        }
        if input.direction != PortDirection::Input {
            return Err(PipelineError::WrongDirection(input));
        }
        for port in [output, input] {
            self.check_idle(port)?;
            if let Some(filter) = self.filters.get(&port.filter) {
                if !filter.attached {
                    return Err(PipelineError::NotAttached(filter.name.clone()));
                }
            }
        }

        let out_port = self.port(output).ok_or(PipelineError::UnknownPort(output))?;
        let in_port = self.port(input).ok_or(PipelineError::UnknownPort(input))?;
        if out_port.is_connected() {
            return Err(PipelineError::AlreadyConnected(output));
        }
        if in_port.is_connected() {
            return Err(PipelineError::AlreadyConnected(input));
        }

        let negotiated = Self::negotiate(&out_port.spec, &in_port.spec, format)
            .ok_or(PipelineError::NoCommonFormat(output, input))?;
        let allocator = out_port.allocator.or(in_port.allocator).unwrap_or_default();

        for (port, peer) in [(output, input), (input, output)] {
            if let Some(p) = self.port_mut(port) {
                p.peer = Some(peer);
                p.format = Some(negotiated.clone());
                p.allocator = Some(allocator);
            }
        }
        if let Some(filter) = self.filters.get_mut(&output.filter) {
            filter.normalize_dynamic_outputs();
        }
        tracing::trace!(?output, ?input, format = %negotiated, "Ports connected");
        Ok(negotiated)
    }

    /// Breaks the link between `output` and `input`.
    ///
    /// # Errors
    ///
    /// Fails when the two ports are not peers or when either filter is paused
    /// or running.
    pub fn disconnect(&mut self, output: PortRef, input: PortRef) -> Result<(), PipelineError> {
        if self.peer(output) != Some(input) || self.peer(input) != Some(output) {
            return Err(PipelineError::NotConnected(output, input));
        }
        self.check_idle(output)?;
        self.check_idle(input)?;
        self.unlink(output, input);
        Ok(())
    }

    fn unlink(&mut self, output: PortRef, input: PortRef) {
        for port in [output, input] {
            if let Some(p) = self.port_mut(port) {
                p.peer = None;
                p.format = None;
            }
        }
        if let Some(filter) = self.filters.get_mut(&output.filter) {
            filter.normalize_dynamic_outputs();
        }
        tracing::trace!(?output, ?input, "Ports disconnected");
    }

    /// Disconnects every port of a filter regardless of run state.
    pub fn disconnect_all(&mut self, id: FilterId) -> Result<(), PipelineError> {
        let filter = self.filters.get(&id).ok_or(PipelineError::UnknownFilter(id))?;
        let links: Vec<(PortRef, PortRef)> = filter
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.peer.map(|peer| (peer, PortRef::input(id, i))))
            .chain(
                filter
                    .outputs
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| p.peer.map(|peer| (PortRef::output(id, i), peer))),
            )
            .collect();
        for (output, input) in links {
            self.unlink(output, input);
        }
        Ok(())
    }

    /// Every filter reachable downstream of `root`, excluding `root` itself.
    pub fn connected_filters(&self, root: FilterId) -> BTreeSet<FilterId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let Some(filter) = self.filters.get(&id) else {
                continue;
            };
            for peer in filter.outputs.iter().filter_map(Port::connected_peer) {
                if peer.filter != root && seen.insert(peer.filter) {
                    queue.push_back(peer.filter);
                }
            }
        }
        seen
    }

    /// Filters on the upstream path from `to` back to `from`, both excluded.
    ///
    /// Empty when `to` is not fed (through single-input links) by `from`.
    pub fn filter_chain(&self, from: FilterId, to: FilterId) -> Vec<FilterId> {
        let mut chain = Vec::new();
        let mut current = to;
        loop {
            let Some(upstream) = self
                .filters
                .get(&current)
                .and_then(|f| f.inputs.first())
                .and_then(Port::connected_peer)
                .map(|p| p.filter)
            else {
                return Vec::new();
            };
            if upstream == from {
                chain.reverse();
                return chain;
            }
            if chain.contains(&upstream) {
                return Vec::new();
            }
            chain.push(upstream);
            current = upstream;
        }
    }
}
