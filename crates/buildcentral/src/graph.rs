//! Dependency graph construction
//!
//! One [`BuildGraph`] exists per (architecture, variant). Nodes are the
//! packages reachable from the variant's groups, the host tools they need
//! when cross-compiling, and a synthetic root connected to every package
//! nothing else depends on.

use std::collections::{BTreeMap, HashMap, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::config::{Config, Group, Package};
use crate::{Error, Result};

/// Name of the synthetic "build everything" target
pub const BUILD_ALL: &str = "__all__";

/// Variant label of the host tool graph; host builds carry no variant
pub const HOST_TOOLS: &str = "__tools__";

/// A node in a [`BuildGraph`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// The synthetic root
    Root,
    /// A package of the graph's architecture
    Package(String),
    /// A host-architecture package used as a build-time tool
    HostTool(String),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Root => BUILD_ALL,
            Node::Package(name) | Node::HostTool(name) => name,
        }
    }
}

/// Edge kinds; edges point from a package to what it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Dependency,
    HostTool,
}

/// Acyclic dependency graph of one (architecture, variant)
#[derive(Debug, Clone)]
pub struct BuildGraph {
    arch: String,
    variant: String,
    graph: DiGraph<Node, EdgeKind>,
    indices: HashMap<Node, NodeIndex>,
    root: NodeIndex,
    /// Packages named by the variant's groups, first occurrence order
    realized: Vec<String>,
}

impl BuildGraph {
    /// Build and validate the graph of `variant` on `arch`
    pub fn build(config: &Config, arch: &str, variant: &str) -> Result<Self> {
        let empty = BTreeMap::new();
        let pool = config.packages.get(arch).unwrap_or(&empty);
        let groups = config.groups.get(arch).ok_or_else(|| {
            Error::graph(
                format!("No BUILD section for arch {}", arch),
                "Declare the architecture's groups in BUILD",
            )
        })?;
        if !groups.contains_key(variant) {
            return Err(Error::graph(
                format!("Variant {} is not declared for arch {}", variant, arch),
                "Pick one of the variants listed in BUILD for this architecture",
            ));
        }

        let realized = resolve_group(groups, pool, arch, variant)?;
        Self::assemble(config, arch, variant, realized)
    }

    /// Graph of the host packages cross builds use as tools, plus their
    /// dependencies. Every tool must be declared in the host pool.
    pub fn host_tools(config: &Config, tools: Vec<String>) -> Result<Self> {
        Self::assemble(config, &config.host, HOST_TOOLS, tools)
    }

    fn assemble(config: &Config, arch: &str, variant: &str, realized: Vec<String>) -> Result<Self> {
        let empty = BTreeMap::new();
        let pool = config.packages.get(arch).unwrap_or(&empty);
        let host_pool = config.packages.get(&config.host).unwrap_or(&empty);
        let is_host = config.is_host(arch);

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let root = graph.add_node(Node::Root);
        indices.insert(Node::Root, root);

        let mut queue = VecDeque::new();
        for name in &realized {
            insert_node(&mut graph, &mut indices, Node::Package(name.clone()));
            queue.push_back(name.clone());
        }

        while let Some(name) = queue.pop_front() {
            let current = indices[&Node::Package(name.clone())];
            let Some(package) = pool.get(&name) else {
                return Err(Error::UndefinedPackage {
                    arch: arch.to_string(),
                    variant: variant.to_string(),
                    package: name.clone(),
                    referenced_by: variant.to_string(),
                });
            };

            for dep in &package.dependencies {
                if !pool.contains_key(dep) {
                    return Err(Error::UndefinedPackage {
                        arch: arch.to_string(),
                        variant: variant.to_string(),
                        package: dep.clone(),
                        referenced_by: name.clone(),
                    });
                }
                let (dep_index, added) =
                    insert_node(&mut graph, &mut indices, Node::Package(dep.clone()));
                if added {
                    queue.push_back(dep.clone());
                }
                graph.update_edge(current, dep_index, EdgeKind::Dependency);
            }

            if is_host {
                continue;
            }
            for tool in &package.tools {
                if !host_pool.contains_key(tool) {
                    return Err(Error::UndefinedPackage {
                        arch: config.host.clone(),
                        variant: variant.to_string(),
                        package: tool.clone(),
                        referenced_by: name.clone(),
                    });
                }
                let (tool_index, _) =
                    insert_node(&mut graph, &mut indices, Node::HostTool(tool.clone()));
                graph.update_edge(current, tool_index, EdgeKind::HostTool);
            }
        }

        let cycles = find_cycles(&graph);
        if !cycles.is_empty() {
            return Err(Error::CircularDependency {
                arch: arch.to_string(),
                variant: variant.to_string(),
                cycles,
            });
        }

        let entry_points: Vec<_> = graph
            .node_indices()
            .filter(|&index| matches!(graph[index], Node::Package(_)))
            .filter(|&index| {
                graph
                    .neighbors_directed(index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();
        for index in entry_points {
            graph.add_edge(root, index, EdgeKind::Dependency);
        }

        tracing::debug!(
            arch,
            variant,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );

        Ok(BuildGraph {
            arch: arch.to_string(),
            variant: variant.to_string(),
            graph,
            indices,
            root,
            realized,
        })
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Packages named by the variant's groups
    pub fn realized_packages(&self) -> &[String] {
        &self.realized
    }

    /// Every package node, including dependencies outside the variant's groups
    pub fn packages(&self) -> Vec<&str> {
        self.graph
            .node_weights()
            .filter_map(|node| match node {
                Node::Package(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, package: &str) -> bool {
        self.indices.contains_key(&Node::Package(package.to_string()))
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn index_of(&self, package: &str) -> Option<NodeIndex> {
        if package == BUILD_ALL {
            return Some(self.root);
        }
        self.indices.get(&Node::Package(package.to_string())).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    /// Targets of `kind` edges leaving `index`, in declaration order
    pub fn neighbors(&self, index: NodeIndex, kind: EdgeKind) -> Vec<NodeIndex> {
        let mut targets: Vec<_> = self
            .graph
            .edges(index)
            .filter(|edge| *edge.weight() == kind)
            .map(|edge| edge.target())
            .collect();
        // petgraph yields the most recently added edge first
        targets.reverse();
        targets
    }

    /// Direct dependencies of `package`
    pub fn dependencies(&self, package: &str) -> Vec<&str> {
        self.named_neighbors(package, EdgeKind::Dependency)
    }

    /// Host tools `package` needs (always empty on the host architecture)
    pub fn tools(&self, package: &str) -> Vec<&str> {
        self.named_neighbors(package, EdgeKind::HostTool)
    }

    fn named_neighbors(&self, package: &str, kind: EdgeKind) -> Vec<&str> {
        match self.index_of(package) {
            Some(index) => self
                .neighbors(index, kind)
                .into_iter()
                .map(|n| self.graph[n].name())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Underlying petgraph graph
    pub fn graph(&self) -> &DiGraph<Node, EdgeKind> {
        &self.graph
    }
}

fn insert_node(
    graph: &mut DiGraph<Node, EdgeKind>,
    indices: &mut HashMap<Node, NodeIndex>,
    node: Node,
) -> (NodeIndex, bool) {
    if let Some(&index) = indices.get(&node) {
        return (index, false);
    }
    let index = graph.add_node(node.clone());
    indices.insert(node, index);
    (index, true)
}

/// Resolve a group to its package set by unioning its `BASE` groups.
///
/// Packages keep first-occurrence order. Undefined groups or packages and
/// `BASE` loops are errors.
pub fn resolve_group(
    groups: &BTreeMap<String, Group>,
    pool: &BTreeMap<String, Package>,
    arch: &str,
    name: &str,
) -> Result<Vec<String>> {
    let mut resolved: HashMap<&str, Vec<String>> = HashMap::new();
    let mut in_progress: Vec<&str> = Vec::new();
    let mut stack: Vec<(&str, &str)> = vec![(name, name)];

    while let Some(&(current, referenced_by)) = stack.last() {
        if resolved.contains_key(current) {
            stack.pop();
            continue;
        }
        let group = groups.get(current).ok_or_else(|| Error::UndefinedGroup {
            arch: arch.to_string(),
            group: current.to_string(),
            referenced_by: referenced_by.to_string(),
        })?;

        if in_progress.last() == Some(&current) {
            // Every base is resolved now
            let mut packages: Vec<String> = Vec::new();
            let bases = group.base.iter().flat_map(|base| &resolved[base.as_str()]);
            for package in bases.chain(&group.packages) {
                if !pool.contains_key(package) {
                    return Err(Error::UndefinedPackage {
                        arch: arch.to_string(),
                        variant: name.to_string(),
                        package: package.clone(),
                        referenced_by: current.to_string(),
                    });
                }
                if !packages.contains(package) {
                    packages.push(package.clone());
                }
            }
            resolved.insert(current, packages);
            in_progress.pop();
            stack.pop();
            continue;
        }

        in_progress.push(current);
        for base in group.base.iter().rev() {
            if let Some(pos) = in_progress.iter().position(|g| *g == base.as_str()) {
                let mut groups: Vec<String> =
                    in_progress[pos..].iter().map(|g| g.to_string()).collect();
                groups.push(base.clone());
                return Err(Error::GroupCycle {
                    arch: arch.to_string(),
                    groups,
                });
            }
            if !resolved.contains_key(base.as_str()) {
                stack.push((base.as_str(), current));
            }
        }
    }

    Ok(resolved.remove(name).unwrap_or_default())
}

/// Every simple dependency cycle, each closed on its smallest member
fn find_cycles(graph: &DiGraph<Node, EdgeKind>) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flat_map(|scc| simple_cycles(graph, &scc))
        .collect();
    cycles.sort();
    cycles
}

/// Simple cycles inside one strongly connected component.
///
/// Each cycle is found once, from its member with the smallest name: the
/// search from a start only walks members that sort after it.
fn simple_cycles(graph: &DiGraph<Node, EdgeKind>, scc: &[NodeIndex]) -> Vec<Vec<String>> {
    let mut members = scc.to_vec();
    members.sort_by(|a, b| graph[*a].name().cmp(graph[*b].name()));
    let rank: HashMap<NodeIndex, usize> =
        members.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut cycles = Vec::new();
    for (start_rank, &start) in members.iter().enumerate() {
        let successors = |node: NodeIndex| -> Vec<NodeIndex> {
            let mut next: Vec<NodeIndex> = graph
                .neighbors(node)
                .filter(|n| rank.get(n).is_some_and(|r| *r >= start_rank))
                .collect();
            next.sort_by_key(|n| rank[n]);
            next.dedup();
            next
        };

        let mut path = vec![start];
        let mut stack = vec![(successors(start), 0usize)];
        while let Some((next, cursor)) = stack.last_mut() {
            let Some(&node) = next.get(*cursor) else {
                stack.pop();
                path.pop();
                continue;
            };
            *cursor += 1;

            if node == start {
                let mut cycle: Vec<String> =
                    path.iter().map(|n| graph[*n].name().to_string()).collect();
                cycle.push(graph[start].name().to_string());
                cycles.push(cycle);
            } else if !path.contains(&node) {
                path.push(node);
                stack.push((successors(node), 0));
            }
        }
    }
    cycles
}

/// Graphs of every (architecture, variant), built once at load
#[derive(Debug, Clone, Default)]
pub struct GraphSet {
    graphs: HashMap<(String, String), BuildGraph>,
    /// Tools every cross-compiled graph needs, on the host architecture
    host_tools: Option<BuildGraph>,
}

impl GraphSet {
    /// Build the graph of every variant declared for every architecture
    pub fn build(config: &Config) -> Result<Self> {
        let mut graphs = HashMap::new();
        let mut tools: Vec<String> = Vec::new();
        for arch in &config.architectures {
            for variant in config.variants_for(arch) {
                let graph = BuildGraph::build(config, arch, &variant.name)?;
                for package in graph.packages() {
                    for tool in graph.tools(package) {
                        if !tools.iter().any(|t| t == tool) {
                            tools.push(tool.to_string());
                        }
                    }
                }
                graphs.insert((arch.clone(), variant.name.clone()), graph);
            }
        }

        let host_tools = if tools.is_empty() {
            None
        } else {
            Some(BuildGraph::host_tools(config, tools)?)
        };
        Ok(GraphSet { graphs, host_tools })
    }

    /// Host graph holding every tool of every cross-compiled graph
    pub fn host_tools(&self) -> Option<&BuildGraph> {
        self.host_tools.as_ref()
    }

    pub fn get(&self, arch: &str, variant: &str) -> Option<&BuildGraph> {
        self.graphs.get(&(arch.to_string(), variant.to_string()))
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}
