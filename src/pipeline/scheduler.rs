// pipeline/scheduler.rs — graph validation, execution order, message routing.
//
// The pipeline owns every node and every connection record. `init`
// validates the wiring and fixes the execution order; `run` executes one
// pass, routing messages through published cells keyed by (node, output
// port) and returning textures to the pool after each message's last
// consumer.
//
// ORDERING RULES (ties in the topological sort):
//   (a) nodes with no inputs come first,
//   (b) among ready nodes, insertion order wins,
//   (c) the export sink always goes last.
//
// RESOURCE DISCIPLINE:
// A message's textures stay valid until every consumer scheduled in this
// run has read them. Forwarding nodes (multiplexer, portal source) may
// republish a handle they received, so release is tracked per *handle*:
// each publish raises the handle's release step to the latest consumer of
// the publishing cell, and the handle returns to the pool when the run
// passes that step. Persistent textures ignore release entirely — the
// arena knows the difference.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gpu::{DeviceContext, TextureHandle};
use crate::keypoint::Keypoint;
use crate::pipeline::message::Message;
use crate::pipeline::node::Node;
use crate::pipeline::port::{Connection, InputRef, NodeId, OutputRef};

/// The user-visible result of one pipeline run, assembled by the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOutput {
    /// Pixels read back from the sink's input texture, row-major RGBA.
    Image {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    /// Keypoints decoded from the sink's input texture.
    Keypoints(Vec<Keypoint>),
}

/// A directed acyclic graph of nodes plus its execution machinery.
pub struct Pipeline {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    /// Topological order, fixed by `init`.
    order: Vec<usize>,
    initialized: bool,
    /// Guards against re-entrant runs (e.g. through a portal that loops
    /// back into this pipeline while it is mid-run).
    running: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            nodes: Vec::new(),
            connections: Vec::new(),
            order: Vec::new(),
            initialized: false,
            running: false,
        }
    }

    /// Add a node, taking ownership.
    ///
    /// # Errors
    /// [`Error::DuplicateNodeName`] if a node with this name exists.
    pub fn add(&mut self, node: Node) -> Result<NodeId> {
        if self.nodes.iter().any(|n| n.name == node.name) {
            return Err(Error::DuplicateNodeName(node.name.clone()));
        }
        self.invalidate();
        self.nodes.push(node);
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Connect an output port to an input port.
    ///
    /// Type compatibility is enforced here, at wiring time. An output may
    /// fan out to many inputs; an input accepts exactly one connection.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`], [`Error::PortAlreadyConnected`], or
    /// [`Error::IllegalOperation`] for unknown nodes or port names.
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<()> {
        let (from_node, from_port) = self.resolve_output(from)?;
        let (to_node, to_port) = self.resolve_input(to)?;

        let produced = self.nodes[from_node].outputs[from_port].kind;
        let expected = self.nodes[to_node].inputs[to_port].kind;
        if produced != expected {
            return Err(Error::TypeMismatch(format!(
                "{}.{} produces {:?}, {}.{} expects {:?}",
                self.nodes[from_node].name,
                from.port,
                produced,
                self.nodes[to_node].name,
                to.port,
                expected
            )));
        }
        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_node && c.to_port == to_port)
        {
            return Err(Error::PortAlreadyConnected(format!(
                "{}.{}",
                self.nodes[to_node].name, to.port
            )));
        }

        self.invalidate();
        self.connections.push(Connection {
            from_node,
            from_port,
            to_node,
            to_port,
        });
        Ok(())
    }

    /// Validate the graph and fix the execution order.
    ///
    /// # Errors
    /// [`Error::UnconnectedInput`], [`Error::NoSink`],
    /// [`Error::MultipleSinks`], or [`Error::Cycle`].
    pub fn init(&mut self) -> Result<()> {
        // Every input port wired.
        for (ni, node) in self.nodes.iter().enumerate() {
            for (pi, port) in node.inputs.iter().enumerate() {
                let wired = self
                    .connections
                    .iter()
                    .any(|c| c.to_node == ni && c.to_port == pi);
                if !wired {
                    return Err(Error::UnconnectedInput(format!(
                        "{}.{}",
                        node.name, port.name
                    )));
                }
            }
        }

        // Exactly one export sink.
        let mut sinks = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind.is_export_sink());
        let sink = match sinks.next() {
            None => return Err(Error::NoSink),
            Some((si, _)) => {
                if let Some((sj, _)) = sinks.next() {
                    return Err(Error::MultipleSinks(
                        self.nodes[si].name.clone(),
                        self.nodes[sj].name.clone(),
                    ));
                }
                si
            }
        };

        self.order = self.topological_order(sink)?;
        self.initialized = true;
        debug!(
            order = ?self.order.iter().map(|&i| self.nodes[i].name.as_str()).collect::<Vec<_>>(),
            "pipeline initialized"
        );
        Ok(())
    }

    /// Execute one pass and return the sink's result.
    ///
    /// Calls serialize through the `&mut` receiver, so back-to-back runs
    /// queue at the borrow in caller order. A run that observes another
    /// in flight (possible only through re-entrancy) fails with
    /// [`Error::Busy`].
    ///
    /// On error the pipeline is left consistent: outstanding scratch is
    /// reclaimed and pending reads are cancelled.
    pub fn run(&mut self, ctx: &mut DeviceContext) -> Result<SinkOutput> {
        if !self.initialized {
            return Err(Error::IllegalOperation(
                "run on an uninitialized pipeline".into(),
            ));
        }
        if self.running {
            return Err(Error::Busy);
        }
        self.running = true;
        let result = self.run_pass(ctx);
        self.running = false;
        if result.is_err() {
            ctx.abort_frame();
        }
        result
    }

    fn run_pass(&mut self, ctx: &mut DeviceContext) -> Result<SinkOutput> {
        ctx.begin_frame();

        // Published cells, one per output port.
        let mut cells: Vec<Vec<Option<Message>>> = self
            .nodes
            .iter()
            .map(|n| vec![None; n.outputs.len()])
            .collect();

        // Position of each node in the order.
        let mut pos = vec![0usize; self.nodes.len()];
        for (step, &ni) in self.order.iter().enumerate() {
            pos[ni] = step;
        }

        // Last consumer step of each cell; the producer's own step when
        // nothing consumes it.
        let mut cell_last: Vec<Vec<usize>> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(ni, n)| vec![pos[ni]; n.outputs.len()])
            .collect();
        for c in &self.connections {
            let consumer = pos[c.to_node];
            let last = &mut cell_last[c.from_node][c.from_port];
            *last = (*last).max(consumer);
        }

        // Handle -> step after which it may return to the pool.
        let mut release_at: HashMap<TextureHandle, usize> = HashMap::new();

        for step in 0..self.order.len() {
            let ni = self.order[step];

            // Gather this node's inputs from the published cells.
            let mut inputs: Vec<&Message> = Vec::with_capacity(self.nodes[ni].inputs.len());
            for pi in 0..self.nodes[ni].inputs.len() {
                let conn = self
                    .connections
                    .iter()
                    .find(|c| c.to_node == ni && c.to_port == pi)
                    .expect("validated at init");
                let message = cells[conn.from_node][conn.from_port]
                    .as_ref()
                    .ok_or_else(|| {
                        Error::IllegalOperation(format!(
                            "{}.{} read before its upstream wrote",
                            self.nodes[ni].name, self.nodes[ni].inputs[pi].name
                        ))
                    })?;
                if let Some(expect) = &self.nodes[ni].inputs[pi].expect {
                    if !message.satisfies(expect) {
                        return Err(Error::IllegalOperation(format!(
                            "message on {}.{} does not satisfy {:?}",
                            self.nodes[ni].name, self.nodes[ni].inputs[pi].name, expect
                        )));
                    }
                }
                inputs.push(message);
            }

            let produced = self.nodes[ni].kind.run(ctx, &inputs)?;

            if produced.len() != self.nodes[ni].outputs.len() {
                return Err(Error::IllegalOperation(format!(
                    "node '{}' produced {} message(s) for {} output port(s)",
                    self.nodes[ni].name,
                    produced.len(),
                    self.nodes[ni].outputs.len()
                )));
            }
            for (pi, message) in produced.into_iter().enumerate() {
                let declared = self.nodes[ni].outputs[pi].kind;
                if message.kind() != declared {
                    return Err(Error::IllegalOperation(format!(
                        "node '{}' published {:?} on {:?} port {}",
                        self.nodes[ni].name,
                        message.kind(),
                        declared,
                        self.nodes[ni].outputs[pi].name
                    )));
                }
                if let Some(handle) = message.texture() {
                    let entry = release_at.entry(handle).or_insert(0);
                    *entry = (*entry).max(cell_last[ni][pi]);
                }
                cells[ni][pi] = Some(message);
            }

            // Return textures whose last consumer just ran.
            release_at.retain(|&handle, &mut release_step| {
                if release_step == step {
                    ctx.release_scratch(handle);
                    false
                } else {
                    true
                }
            });
        }

        let leaked = ctx.end_frame();
        if leaked > 0 {
            warn!(leaked, "a node leaked scratch textures this run");
        }

        let sink = *self.order.last().expect("validated at init");
        self.nodes[sink].kind.take_export().ok_or_else(|| {
            Error::IllegalOperation(format!(
                "sink '{}' produced no export",
                self.nodes[sink].name
            ))
        })
    }

    /// Tear the pipeline down: cancel pending reads, free node-retained
    /// textures, and drop back to the uninitialized state.
    pub fn release(&mut self, ctx: &mut DeviceContext) {
        info!("releasing pipeline");
        ctx.cancel_reads();
        for node in &mut self.nodes {
            node.kind.release(ctx);
        }
        self.invalidate();
    }

    /// Node names in execution order. Available after `init`.
    pub fn execution_order(&self) -> Option<Vec<&str>> {
        self.initialized
            .then(|| self.order.iter().map(|&i| self.nodes[i].name()).collect())
    }

    fn invalidate(&mut self) {
        self.initialized = false;
        self.order.clear();
    }

    /// Kahn's algorithm with the documented tie-breaks.
    fn topological_order(&self, sink: usize) -> Result<Vec<usize>> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        for c in &self.connections {
            indegree[c.to_node] += 1;
        }

        let mut order = Vec::with_capacity(n);
        let mut done = vec![false; n];
        while order.len() < n {
            // Lowest-index ready node, deferring the sink while any other
            // node is ready.
            let ready = |i: usize| !done[i] && indegree[i] == 0;
            let next = (0..n)
                .filter(|&i| ready(i) && i != sink)
                .next()
                .or_else(|| ready(sink).then_some(sink));
            let Some(ni) = next else {
                // Nothing ready but nodes remain: a cycle.
                let stuck = (0..n).find(|&i| !done[i]).expect("nodes remain");
                return Err(Error::Cycle(self.nodes[stuck].name.clone()));
            };
            done[ni] = true;
            order.push(ni);
            for c in self.connections.iter().filter(|c| c.from_node == ni) {
                indegree[c.to_node] -= 1;
            }
        }
        Ok(order)
    }

    fn resolve_output(&self, r: OutputRef) -> Result<(usize, usize)> {
        let node = self
            .nodes
            .get(r.node.0)
            .ok_or_else(|| Error::IllegalOperation("unknown node in output ref".into()))?;
        let port = node
            .outputs
            .iter()
            .position(|p| p.name == r.port)
            .ok_or_else(|| {
                Error::IllegalOperation(format!("node '{}' has no output '{}'", node.name, r.port))
            })?;
        Ok((r.node.0, port))
    }

    fn resolve_input(&self, r: InputRef) -> Result<(usize, usize)> {
        let node = self
            .nodes
            .get(r.node.0)
            .ok_or_else(|| Error::IllegalOperation("unknown node in input ref".into()))?;
        let port = node
            .inputs
            .iter()
            .position(|p| p.name == r.port)
            .ok_or_else(|| {
                Error::IllegalOperation(format!("node '{}' has no input '{}'", node.name, r.port))
            })?;
        Ok((r.node.0, port))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
