//! Build order resolution
//!
//! Orders are produced by an iterative post-order depth-first traversal over
//! dependency edges: a package is emitted only after everything it depends
//! on, and each package at most once. Host tools needed by a cross-compiled
//! order are resolved separately through the host tool graph, which does not
//! depend on the variant.

use std::collections::HashSet;

use petgraph::graph::NodeIndex;

use crate::graph::{BUILD_ALL, BuildGraph, EdgeKind, GraphSet};
use crate::{Error, Result};

/// What to resolve
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Requested packages; [`BUILD_ALL`] means every package
    pub packages: Vec<String>,
    /// Whether dependencies (and host tools) of the requested packages are
    /// included. Forced on when only [`BUILD_ALL`] is requested.
    pub include_dependencies: bool,
}

impl ResolveRequest {
    /// Everything in the graph
    pub fn all() -> Self {
        Self {
            packages: vec![BUILD_ALL.to_string()],
            include_dependencies: true,
        }
    }

    pub fn packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            include_dependencies: true,
        }
    }

    /// Build only the requested packages themselves
    pub fn without_dependencies(mut self) -> Self {
        self.include_dependencies = false;
        self
    }

    fn is_build_all(&self) -> bool {
        self.packages.len() == 1 && self.packages[0] == BUILD_ALL
    }
}

/// Resolved orders; the host tools are built first, on the host architecture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    pub host_tools: Vec<String>,
    pub target: Vec<String>,
}

impl BuildPlan {
    pub fn is_empty(&self) -> bool {
        self.host_tools.is_empty() && self.target.is_empty()
    }
}

/// Dependency-first order of everything reachable from `requested`
pub fn build_order(graph: &BuildGraph, requested: &[&str]) -> Result<Vec<String>> {
    let starts = requested
        .iter()
        .map(|name| {
            graph.index_of(name).ok_or_else(|| {
                Error::graph(
                    format!(
                        "Package {} is not part of {}/{}",
                        name,
                        graph.arch(),
                        graph.variant()
                    ),
                    "Run with --list to see the packages of this variant",
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut order = Vec::new();

    for start in starts {
        if !visited.insert(start) {
            continue;
        }
        let mut stack = vec![(start, graph.neighbors(start, EdgeKind::Dependency), 0usize)];

        while let Some((node, neighbors, next)) = stack.last_mut() {
            if *next < neighbors.len() {
                let neighbor = neighbors[*next];
                *next += 1;
                if visited.insert(neighbor) {
                    let neighbors = graph.neighbors(neighbor, EdgeKind::Dependency);
                    stack.push((neighbor, neighbors, 0));
                }
                continue;
            }

            let node = *node;
            stack.pop();
            if node != graph.root() {
                order.push(graph.node(node).name().to_string());
            }
        }
    }

    Ok(order)
}

/// Resolve `request` against the graph of `arch`/`variant`
pub fn resolve(
    graphs: &GraphSet,
    host: &str,
    arch: &str,
    variant: &str,
    request: &ResolveRequest,
) -> Result<BuildPlan> {
    let graph = graphs.get(arch, variant).ok_or_else(|| {
        Error::graph(
            format!("Variant {} is not available for arch {}", variant, arch),
            "Pick one of the variants listed by --info",
        )
    })?;

    let include_dependencies = request.include_dependencies || request.is_build_all();
    let requested: Vec<&str> = request.packages.iter().map(String::as_str).collect();
    let mut target = build_order(graph, &requested)?;

    if !include_dependencies {
        target.retain(|name| requested.contains(&name.as_str()));
        return Ok(BuildPlan {
            host_tools: Vec::new(),
            target,
        });
    }

    let host_tools = if arch == host {
        Vec::new()
    } else {
        tool_closure(graphs, host, graph, &target)?
    };

    Ok(BuildPlan { host_tools, target })
}

/// Host build order of every tool the packages of `order` need
fn tool_closure(
    graphs: &GraphSet,
    host: &str,
    graph: &BuildGraph,
    order: &[String],
) -> Result<Vec<String>> {
    let mut tools: Vec<&str> = Vec::new();
    for package in order {
        for tool in graph.tools(package) {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
    }
    if tools.is_empty() {
        return Ok(Vec::new());
    }

    let host_graph = graphs.host_tools().ok_or_else(|| {
        Error::graph(
            format!(
                "Host tools {} are needed but no host tool graph was built for {}",
                tools.join(", "),
                host
            ),
            "Declare the tool packages in PACKAGES for the host architecture",
        )
    })?;
    build_order(host_graph, &tools)
}
