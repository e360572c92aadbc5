use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{FrameGraphError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassNode {
    pub name: String,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

/// Topology of one frame: resource nodes, the passes that read and write
/// them, and moves that alias one resource node onto another.
#[derive(Debug, Clone, Default)]
pub struct FrameGraph {
    resource_nodes: Vec<ResourceNode>,
    pass_nodes: Vec<PassNode>,
    moves: Vec<(usize, usize)>,
}

/// Lifecycle work the executor performs around one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassInfo {
    pub construct_resources: Vec<usize>,
    pub destruct_resources: Vec<usize>,
    pub move_resources: Vec<usize>,
}

impl PassInfo {
    pub fn is_empty(&self) -> bool {
        self.construct_resources.is_empty()
            && self.destruct_resources.is_empty()
            && self.move_resources.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledSchedule {
    pub sorted_passes: Vec<usize>,
    pub pass_to_order: HashMap<usize, usize>,
    pub pass_info: HashMap<usize, PassInfo>,
    pub moves_src_to_dst: HashMap<usize, usize>,
    /// Work for resource nodes no pass touches, run once before the first pass.
    pub prelude: PassInfo,
}

impl CompiledSchedule {
    pub fn num_passes(&self) -> usize {
        self.sorted_passes.len()
    }

    pub fn info(&self, pass: usize) -> Option<&PassInfo> {
        self.pass_info.get(&pass)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    Prelude,
    Pass(usize),
}

#[derive(Debug, Clone, Copy)]
struct ResourceLifetime {
    first_use: usize,
    last_use: usize,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource_node(&mut self, name: impl Into<String>) -> usize {
        self.resource_nodes.push(ResourceNode { name: name.into() });
        self.resource_nodes.len() - 1
    }

    pub fn register_pass_node(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<usize>,
        outputs: Vec<usize>,
    ) -> usize {
        self.pass_nodes.push(PassNode {
            name: name.into(),
            inputs,
            outputs,
        });
        self.pass_nodes.len() - 1
    }

    /// Declares that `dst` takes over `src`'s physical resource once every
    /// pass using `src` has run.
    pub fn register_move_node(&mut self, dst: usize, src: usize) {
        self.moves.push((src, dst));
    }

    pub fn resource_nodes(&self) -> &[ResourceNode] {
        &self.resource_nodes
    }

    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    pub fn pass_node(&self, pass: usize) -> Result<&PassNode> {
        self.pass_nodes
            .get(pass)
            .ok_or(FrameGraphError::PassNodeNotFound { index: pass })
    }

    /// `(src, dst)` pairs in declaration order.
    pub fn moves(&self) -> &[(usize, usize)] {
        &self.moves
    }

    pub fn compile(&self) -> Result<CompiledSchedule> {
        self.validate()?;

        let graph = self.build_dependency_graph();
        let execution_order = petgraph::algo::toposort(&graph, None)
            .map_err(|_| FrameGraphError::CyclicDependency)?;
        let sorted_passes: Vec<usize> = execution_order.iter().map(|&index| graph[index]).collect();

        let pass_to_order: HashMap<usize, usize> = sorted_passes
            .iter()
            .enumerate()
            .map(|(order, &pass)| (pass, order))
            .collect();
        let moves_src_to_dst: HashMap<usize, usize> = self.moves.iter().copied().collect();
        let moves_dst_to_src: HashMap<usize, usize> =
            self.moves.iter().map(|&(src, dst)| (dst, src)).collect();

        let lifetimes = self.compute_resource_lifetimes(&sorted_passes);
        let mut pass_info: HashMap<usize, PassInfo> = sorted_passes
            .iter()
            .map(|&pass| (pass, PassInfo::default()))
            .collect();
        let mut prelude = PassInfo::default();

        // Nodes no pass uses inherit their place from the nearest used node
        // up their move chain. `depth` counts the hops to it.
        let resolve_site = |mut node: usize| {
            let mut depth = 0;
            loop {
                if let Some(lifetime) = lifetimes.get(&node) {
                    return (Site::Pass(sorted_passes[lifetime.last_use]), depth);
                }
                match moves_dst_to_src.get(&node) {
                    Some(&src) if depth < self.moves.len() => {
                        node = src;
                        depth += 1;
                    }
                    _ => return (Site::Prelude, depth),
                }
            }
        };
        let mut chained_moves: Vec<(usize, usize, Site)> = Vec::new();

        for resource in 0..self.resource_nodes.len() {
            let moved_out = moves_src_to_dst.contains_key(&resource);
            let moved_in = moves_dst_to_src.get(&resource).copied();

            match lifetimes.get(&resource) {
                Some(lifetime) => {
                    let first = sorted_passes[lifetime.first_use];
                    let last = sorted_passes[lifetime.last_use];
                    if moved_in.is_none() {
                        Self::site_info(&mut pass_info, &mut prelude, Site::Pass(first))
                            .construct_resources
                            .push(resource);
                    }
                    let info = Self::site_info(&mut pass_info, &mut prelude, Site::Pass(last));
                    if moved_out {
                        info.move_resources.push(resource);
                    } else {
                        info.destruct_resources.push(resource);
                    }
                }
                None => {
                    if moved_in.is_none() {
                        prelude.construct_resources.push(resource);
                    }
                    let (site, depth) = resolve_site(resource);
                    if moved_out {
                        chained_moves.push((depth, resource, site));
                    } else {
                        Self::site_info(&mut pass_info, &mut prelude, site)
                            .destruct_resources
                            .push(resource);
                    }
                }
            }
        }

        // A node moves out only after its own incoming move at the same site.
        chained_moves.sort_by_key(|&(depth, resource, _)| (depth, resource));
        for (_, resource, site) in chained_moves {
            Self::site_info(&mut pass_info, &mut prelude, site)
                .move_resources
                .push(resource);
        }

        log::debug!(
            "Compiled frame graph: {} passes, {} resource nodes, {} moves",
            sorted_passes.len(),
            self.resource_nodes.len(),
            self.moves.len()
        );

        Ok(CompiledSchedule {
            sorted_passes,
            pass_to_order,
            pass_info,
            moves_src_to_dst,
            prelude,
        })
    }

    fn validate(&self) -> Result<()> {
        let num_resources = self.resource_nodes.len();
        let check = |index: usize| {
            if index < num_resources {
                Ok(())
            } else {
                Err(FrameGraphError::ResourceNodeNotFound { index })
            }
        };
        for pass in &self.pass_nodes {
            for &resource in pass.inputs.iter().chain(&pass.outputs) {
                check(resource)?;
            }
        }
        let mut destinations = HashMap::new();
        for &(src, dst) in &self.moves {
            check(src)?;
            check(dst)?;
            if destinations.insert(src, dst).is_some() {
                return Err(FrameGraphError::DuplicateMove { src });
            }
        }
        Ok(())
    }

    /// One graph node per pass. Edges order writers before readers, readers
    /// before the next writer, and every user of a move source before every
    /// user of its destination.
    fn build_dependency_graph(&self) -> DiGraph<usize, ()> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.pass_nodes.len())
            .map(|pass| graph.add_node(pass))
            .collect();

        let mut edges_to_add: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        let mut resource_writers: HashMap<usize, NodeIndex> = HashMap::new();
        let mut readers_since_write: HashMap<usize, Vec<NodeIndex>> = HashMap::new();
        let mut users: HashMap<usize, Vec<NodeIndex>> = HashMap::new();

        for (pass, pass_node) in self.pass_nodes.iter().enumerate() {
            let node_index = nodes[pass];

            for &read_resource in &pass_node.inputs {
                if let Some(&writer_index) = resource_writers.get(&read_resource)
                    && writer_index != node_index
                {
                    edges_to_add.push((writer_index, node_index));
                }
                readers_since_write
                    .entry(read_resource)
                    .or_default()
                    .push(node_index);
            }

            for &write_resource in &pass_node.outputs {
                if let Some(&writer_index) = resource_writers.get(&write_resource)
                    && writer_index != node_index
                {
                    edges_to_add.push((writer_index, node_index));
                }
                for reader_index in readers_since_write.remove(&write_resource).unwrap_or_default() {
                    if reader_index != node_index {
                        edges_to_add.push((reader_index, node_index));
                    }
                }
                resource_writers.insert(write_resource, node_index);
            }

            for &resource in pass_node.inputs.iter().chain(&pass_node.outputs) {
                users.entry(resource).or_default().push(node_index);
            }
        }

        let moves_dst_to_src: HashMap<usize, usize> =
            self.moves.iter().map(|&(src, dst)| (dst, src)).collect();
        for &(src, dst) in &self.moves {
            let Some(dst_users) = users.get(&dst) else {
                continue;
            };
            // Walk back through sources no pass uses to the one that feeds them.
            let mut src = src;
            for _ in 0..self.moves.len() {
                if users.contains_key(&src) {
                    break;
                }
                match moves_dst_to_src.get(&src) {
                    Some(&previous) => src = previous,
                    None => break,
                }
            }
            let Some(src_users) = users.get(&src) else {
                continue;
            };
            for &from in src_users {
                for &to in dst_users {
                    if from != to {
                        edges_to_add.push((from, to));
                    }
                }
            }
        }

        for (from, to) in edges_to_add {
            if !graph.contains_edge(from, to) {
                graph.add_edge(from, to, ());
            }
        }
        graph
    }

    fn compute_resource_lifetimes(&self, sorted_passes: &[usize]) -> HashMap<usize, ResourceLifetime> {
        let mut lifetimes: HashMap<usize, ResourceLifetime> = HashMap::new();
        for (order, &pass) in sorted_passes.iter().enumerate() {
            let pass_node = &self.pass_nodes[pass];
            for &resource in pass_node.inputs.iter().chain(&pass_node.outputs) {
                let lifetime = lifetimes.entry(resource).or_insert(ResourceLifetime {
                    first_use: order,
                    last_use: order,
                });
                lifetime.last_use = order;
            }
        }
        lifetimes
    }

    fn site_info<'a>(
        pass_info: &'a mut HashMap<usize, PassInfo>,
        prelude: &'a mut PassInfo,
        site: Site,
    ) -> &'a mut PassInfo {
        match site {
            Site::Prelude => prelude,
            Site::Pass(pass) => pass_info.entry(pass).or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_of(schedule: &CompiledSchedule, pass: usize) -> usize {
        schedule.pass_to_order[&pass]
    }

    #[test]
    fn linear_chain_constructs_at_first_use_and_destructs_after_last() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let b = graph.register_resource_node("B");
        let c = graph.register_resource_node("C");
        let p1 = graph.register_pass_node("scene", vec![], vec![a]);
        let p2 = graph.register_pass_node("blur", vec![a], vec![b]);
        let p3 = graph.register_pass_node("composite", vec![b, c], vec![c]);

        let schedule = graph.compile().unwrap();
        assert_eq!(schedule.sorted_passes, vec![p1, p2, p3]);

        assert_eq!(schedule.info(p1).unwrap().construct_resources, vec![a]);
        assert!(schedule.info(p1).unwrap().destruct_resources.is_empty());
        assert_eq!(schedule.info(p2).unwrap().construct_resources, vec![b]);
        assert_eq!(schedule.info(p2).unwrap().destruct_resources, vec![a]);
        assert_eq!(schedule.info(p3).unwrap().construct_resources, vec![c]);
        assert_eq!(schedule.info(p3).unwrap().destruct_resources, vec![b, c]);
        assert!(schedule.prelude.is_empty());
    }

    #[test]
    fn readers_run_before_the_next_writer() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let writer = graph.register_pass_node("write", vec![], vec![a]);
        let reader = graph.register_pass_node("read", vec![a], vec![]);
        let rewriter = graph.register_pass_node("rewrite", vec![], vec![a]);

        let schedule = graph.compile().unwrap();
        assert!(order_of(&schedule, writer) < order_of(&schedule, reader));
        assert!(order_of(&schedule, reader) < order_of(&schedule, rewriter));
        assert_eq!(schedule.info(rewriter).unwrap().destruct_resources, vec![a]);
    }

    #[test]
    fn moves_happen_after_the_source_is_last_used() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let b = graph.register_resource_node("B");
        let p1 = graph.register_pass_node("produce", vec![], vec![a]);
        let p2 = graph.register_pass_node("consume", vec![b], vec![]);
        graph.register_move_node(b, a);

        let schedule = graph.compile().unwrap();
        assert!(order_of(&schedule, p1) < order_of(&schedule, p2));
        assert_eq!(schedule.moves_src_to_dst.get(&a), Some(&b));

        let produce = schedule.info(p1).unwrap();
        assert_eq!(produce.construct_resources, vec![a]);
        assert_eq!(produce.move_resources, vec![a]);
        assert!(produce.destruct_resources.is_empty());

        let consume = schedule.info(p2).unwrap();
        assert!(consume.construct_resources.is_empty());
        assert_eq!(consume.destruct_resources, vec![b]);
    }

    #[test]
    fn unused_nodes_live_in_the_prelude() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let unused = graph.register_resource_node("unused");
        graph.register_pass_node("only", vec![], vec![a]);

        let schedule = graph.compile().unwrap();
        assert_eq!(schedule.prelude.construct_resources, vec![unused]);
        assert_eq!(schedule.prelude.destruct_resources, vec![unused]);
    }

    #[test]
    fn chained_moves_through_an_unused_node_share_the_source_site() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let b = graph.register_resource_node("B");
        let c = graph.register_resource_node("C");
        let consume = graph.register_pass_node("consume", vec![c], vec![]);
        let produce = graph.register_pass_node("produce", vec![], vec![a]);
        graph.register_move_node(c, b);
        graph.register_move_node(b, a);

        let schedule = graph.compile().unwrap();
        assert_eq!(schedule.sorted_passes, vec![produce, consume]);
        assert!(schedule.prelude.is_empty());

        let produce_info = schedule.info(produce).unwrap();
        assert_eq!(produce_info.construct_resources, vec![a]);
        assert_eq!(produce_info.move_resources, vec![a, b]);
        assert_eq!(schedule.info(consume).unwrap().destruct_resources, vec![c]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = FrameGraph::new();
        let a = graph.register_resource_node("A");
        let b = graph.register_resource_node("B");
        graph.register_pass_node("first", vec![b], vec![a]);
        graph.register_pass_node("second", vec![a], vec![b]);
        graph.register_move_node(b, a);

        assert!(matches!(
            graph.compile(),
            Err(FrameGraphError::CyclicDependency)
        ));
    }

    #[test]
    fn unknown_resources_are_rejected() {
        let mut graph = FrameGraph::new();
        graph.register_resource_node("A");
        graph.register_pass_node("broken", vec![7], vec![]);
        assert!(matches!(
            graph.compile(),
            Err(FrameGraphError::ResourceNodeNotFound { index: 7 })
        ));
        assert!(matches!(
            graph.pass_node(3),
            Err(FrameGraphError::PassNodeNotFound { index: 3 })
        ));
    }

    #[test]
    fn empty_graph_compiles_to_empty_schedule() {
        let schedule = FrameGraph::new().compile().unwrap();
        assert_eq!(schedule.num_passes(), 0);
        assert!(schedule.prelude.is_empty());
    }
}
