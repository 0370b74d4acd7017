//! Render graph definition and compilation

use crate::error::{RenderError, RenderResult};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap};

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualTexture>,
    next_pass_id: u32,
    next_resource_id: u32,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
        }
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(
        &mut self,
        pass: P,
        screen_width: u32,
        screen_height: u32,
    ) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let kind = pass.kind();
        let mut boxed_pass = Box::new(pass);

        // Setup the pass
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
                screen_width,
                screen_height,
            };
            boxed_pass.setup(&mut ctx);
        }

        log::debug!(
            "Render graph: added '{}' ({} inputs, {} outputs)",
            name,
            inputs.len(),
            outputs.len()
        );
        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            kind,
            inputs,
            outputs,
        });

        id
    }

    /// Compile the graph - topological sort and resource lifetimes.
    ///
    /// Ready passes are taken in insertion order, so the same graph always
    /// compiles to the same order. A dependency cycle is a configuration error.
    pub fn compile(&self) -> RenderResult<CompiledGraph> {
        // A pass depends on another if it reads a resource that the other writes
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.pass_nodes.len()];
        for (r, reader) in self.pass_nodes.iter().enumerate() {
            for (w, writer) in self.pass_nodes.iter().enumerate() {
                if r == w {
                    continue;
                }
                if reader.inputs.iter().any(|i| writer.writes_resource(i.resource)) {
                    dependencies[r].insert(w);
                }
            }
        }

        // Kahn's algorithm, tracking the level each pass lands on
        let mut in_degree: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
        let mut level_of = vec![0usize; self.pass_nodes.len()];
        let mut ready: BTreeSet<usize> = (0..self.pass_nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.pass_nodes.len());

        while let Some(index) = ready.pop_first() {
            sorted.push(index);
            for (dependent, deps) in dependencies.iter().enumerate() {
                if deps.contains(&index) {
                    level_of[dependent] = level_of[dependent].max(level_of[index] + 1);
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if sorted.len() != self.pass_nodes.len() {
            let stuck: Vec<&str> = (0..self.pass_nodes.len())
                .filter(|i| !sorted.contains(i))
                .map(|i| self.pass_nodes[i].name.as_str())
                .collect();
            return Err(RenderError::InvalidConfig(format!(
                "render graph has a dependency cycle through {stuck:?}"
            )));
        }

        // Determine resource lifetimes
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();
        for (order, &index) in sorted.iter().enumerate() {
            let node = &self.pass_nodes[index];
            for access in node.inputs.iter().chain(node.outputs.iter()) {
                let lifetime = resource_lifetimes
                    .entry(access.resource)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });
                lifetime.last_use = order;
            }
        }

        let level_count = level_of.iter().copied().max().map_or(0, |m| m + 1);
        let mut levels = vec![Vec::new(); level_count];
        for &index in &sorted {
            levels[level_of[index]].push(self.pass_nodes[index].id);
        }

        Ok(CompiledGraph {
            pass_order: sorted.iter().map(|&i| self.pass_nodes[i].id).collect(),
            levels,
            resource_lifetimes,
        })
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualTexture] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get a pass as its concrete type
    pub fn pass<P: RenderPass + 'static>(&self, id: PassId) -> Option<&P> {
        self.get_pass(id)?.as_any().downcast_ref::<P>()
    }

    /// Get a resource by ID
    pub fn resource(&self, id: ResourceId) -> Option<&VirtualTexture> {
        self.resources.iter().find(|r| r.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled render graph with execution order and resource lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    /// Passes grouped by dependency depth; passes sharing a level are independent.
    pub levels: Vec<Vec<PassId>>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        if let Some(lifetime) = self.resource_lifetimes.get(&resource) {
            step >= lifetime.first_use && step <= lifetime.last_use
        } else {
            false
        }
    }

    /// Execution position of a pass
    pub fn position(&self, id: PassId) -> Option<usize> {
        self.pass_order.iter().position(|&p| p == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::PassKind;
    use crate::backend::types::{TextureFormat, TextureUsage};
    use std::any::Any;

    /// Writes one texture and optionally reads another.
    struct Node {
        name: &'static str,
        reads: Vec<ResourceId>,
        output: Option<ResourceId>,
        writes_existing: Option<ResourceId>,
    }

    impl Node {
        fn new(name: &'static str, reads: Vec<ResourceId>) -> Self {
            Self {
                name,
                reads,
                output: None,
                writes_existing: None,
            }
        }
    }

    impl RenderPass for Node {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> PassKind {
            PassKind::GBuffer
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            let output = ctx.create_texture_relative(
                self.name,
                TextureSize::Screen,
                TextureFormat::Rgba32Float,
                TextureUsage::TARGET,
            );
            ctx.write(output, ResourceUsage::RenderTarget);
            self.output = Some(output);
            if let Some(existing) = self.writes_existing {
                ctx.write(existing, ResourceUsage::RenderTarget);
            }
            for &read in &self.reads {
                ctx.read(read, ResourceUsage::TextureRead);
            }
        }

        fn encode(&self, _ctx: &mut PassEncodeContext) -> RenderResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn output(graph: &RenderGraph, id: PassId) -> ResourceId {
        graph.pass::<Node>(id).and_then(|n| n.output).unwrap()
    }

    #[test]
    fn test_independent_passes_share_a_level() {
        let mut graph = RenderGraph::new();
        let a = graph.add_pass(Node::new("a", vec![]), 4, 4);
        let b = graph.add_pass(Node::new("b", vec![]), 4, 4);
        let reads = vec![output(&graph, a), output(&graph, b)];
        let c = graph.add_pass(Node::new("c", reads), 4, 4);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order, vec![a, b, c]);
        assert_eq!(compiled.levels, vec![vec![a, b], vec![c]]);
        assert!(compiled.is_resource_alive(output(&graph, a), 2));
    }

    #[test]
    fn test_order_follows_dependencies_not_insertion() {
        let mut graph = RenderGraph::new();
        let producer = graph.add_pass(Node::new("producer", vec![]), 4, 4);
        let shared = output(&graph, producer);
        let consumer = graph.add_pass(Node::new("consumer", vec![shared]), 4, 4);
        let compiled = graph.compile().unwrap();
        assert!(compiled.position(producer) < compiled.position(consumer));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = RenderGraph::new();
        let a = graph.add_pass(Node::new("a", vec![]), 4, 4);
        let a_out = output(&graph, a);
        let b = graph.add_pass(Node::new("b", vec![a_out]), 4, 4);
        let b_out = output(&graph, b);
        let mut c = Node::new("c", vec![b_out]);
        c.writes_existing = Some(a_out);
        graph.add_pass(c, 4, 4);
        // b reads what c writes and c reads what d writes back into b's output.
        let mut d = Node::new("d", vec![a_out]);
        d.writes_existing = Some(b_out);
        graph.add_pass(d, 4, 4);
        assert!(matches!(graph.compile(), Err(RenderError::InvalidConfig(_))));
    }
}
