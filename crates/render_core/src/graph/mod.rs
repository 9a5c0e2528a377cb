//! Render graph
//!
//! Execution order of pipelines is derived from the targets they read and
//! write instead of being maintained by hand. For every target:
//!
//! - writers run in declaration order (write-after-write edges),
//! - every reader runs after every writer.
//!
//! The order is a topological sort with ties broken by declaration index, so
//! a table that is already correctly ordered executes exactly as declared.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

use thiserror::Error;

use crate::pipelines::{PipelineDescriptor, RenderTargetId};

/// Render graph compilation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Read/write edges form a cycle
    #[error("pipelines form a dependency cycle: {}", pipelines.join(", "))]
    Cycle {
        /// Pipelines left unscheduled, in declaration order
        pipelines: Vec<String>,
    },

    /// A pipeline reads a target no pipeline writes
    #[error("pipeline {pipeline} reads {target}, which no pipeline writes")]
    MissingWriter {
        /// Reading pipeline
        pipeline: String,
        /// Unwritten target
        target: RenderTargetId,
    },

    /// Two pipelines share a name
    #[error("duplicate pipeline name {0}")]
    DuplicateName(String),
}

/// Compiled execution order and first-use information
#[derive(Debug, Clone)]
pub struct RenderGraph {
    names: Vec<String>,
    order: Vec<usize>,
    edges: BTreeSet<(usize, usize)>,
    first_writers: BTreeMap<RenderTargetId, usize>,
}

impl RenderGraph {
    /// Build edges and sort `descriptors`
    pub fn compile(descriptors: &[PipelineDescriptor]) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for descriptor in descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(GraphError::DuplicateName(descriptor.name.clone()));
            }
        }

        let mut writers: BTreeMap<RenderTargetId, Vec<usize>> = BTreeMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            for target in descriptor.writes() {
                writers.entry(target).or_default().push(index);
            }
        }

        let mut edges = BTreeSet::new();
        for chain in writers.values() {
            for pair in chain.windows(2) {
                edges.insert((pair[0], pair[1]));
            }
        }
        for (reader, descriptor) in descriptors.iter().enumerate() {
            let written = descriptor.writes();
            for target in descriptor.reads() {
                if written.contains(&target) {
                    continue;
                }
                let Some(chain) = writers.get(&target) else {
                    return Err(GraphError::MissingWriter {
                        pipeline: descriptor.name.clone(),
                        target,
                    });
                };
                edges.extend(chain.iter().filter(|&&w| w != reader).map(|&w| (w, reader)));
            }
        }

        let order = topological_order(descriptors.len(), &edges);
        if order.len() != descriptors.len() {
            let scheduled: HashSet<usize> = order.iter().copied().collect();
            return Err(GraphError::Cycle {
                pipelines: (0..descriptors.len())
                    .filter(|i| !scheduled.contains(i))
                    .map(|i| descriptors[i].name.clone())
                    .collect(),
            });
        }

        let mut first_writers = BTreeMap::new();
        for &index in &order {
            for target in descriptors[index].writes() {
                first_writers.entry(target).or_insert(index);
            }
        }

        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        log::info!(
            "Render graph compiled: {}",
            order.iter().map(|&i| names[i].as_str()).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            names,
            order,
            edges,
            first_writers,
        })
    }

    /// Declaration indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Pipeline names in execution order
    pub fn ordered_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// `(before, after)` dependency edges by declaration index
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    /// Pipeline writing `target` first in the frame
    pub fn first_writer(&self, target: RenderTargetId) -> Option<usize> {
        self.first_writers.get(&target).copied()
    }

    /// Whether `pipeline` is the first to write `target` in the frame
    pub fn is_first_use(&self, pipeline: usize, target: RenderTargetId) -> bool {
        self.first_writer(target) == Some(pipeline)
    }

    /// Targets `pipeline` writes first
    pub fn first_writes(&self, pipeline: usize) -> Vec<RenderTargetId> {
        self.first_writers
            .iter()
            .filter(|(_, writer)| **writer == pipeline)
            .map(|(&target, _)| target)
            .collect()
    }

    /// Every target written by some pipeline
    pub fn written_targets(&self) -> impl Iterator<Item = RenderTargetId> + '_ {
        self.first_writers.keys().copied()
    }

    /// Number of pipelines
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no pipelines
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Kahn's algorithm; the smallest ready index is scheduled first
fn topological_order(count: usize, edges: &BTreeSet<(usize, usize)>) -> Vec<usize> {
    let mut in_degree = vec![0_usize; count];
    let mut successors = vec![Vec::new(); count];
    for &(before, after) in edges {
        in_degree[after] += 1;
        successors[before].push(after);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &next in &successors[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::pipelines::standard_stages;

    fn pass(name: &str, reads: &[RenderTargetId], writes: RenderTargetId) -> PipelineDescriptor {
        PipelineDescriptor::fullscreen(name, "f.spv", writes).with_reads(reads)
    }

    #[test]
    fn standard_table_runs_in_declared_order() {
        let config = RendererConfig {
            shadow_map_slots: 2,
            ..RendererConfig::default()
        };
        let stages = standard_stages(&config);
        let graph = RenderGraph::compile(&stages).unwrap();
        assert_eq!(graph.order(), (0..stages.len()).collect::<Vec<_>>().as_slice());

        let names = graph.ordered_names();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("shadow_map_1") < position("direct_lighting"));
        assert!(position("vegetation_depth") < position("vegetation_color"));
        assert!(position("post_processing") < position("user_interface"));
    }

    #[test]
    fn reverse_declared_chain_is_reordered() {
        let stages = vec![
            pass("post", &[RenderTargetId::Lighting], RenderTargetId::Swapchain),
            pass("lighting", &[RenderTargetId::Scene], RenderTargetId::Lighting),
            pass("scene", &[], RenderTargetId::Scene),
        ];
        let graph = RenderGraph::compile(&stages).unwrap();
        assert_eq!(graph.ordered_names(), vec!["scene", "lighting", "post"]);
    }

    #[test]
    fn first_use_belongs_to_the_first_writer() {
        let stages = standard_stages(&RendererConfig::default());
        let graph = RenderGraph::compile(&stages).unwrap();
        let index = |name: &str| stages.iter().position(|s| s.name == name).unwrap();

        assert!(graph.is_first_use(index("terrain"), RenderTargetId::Scene));
        assert!(graph.is_first_use(index("terrain"), RenderTargetId::SceneDepth));
        assert!(!graph.is_first_use(index("scene_features"), RenderTargetId::Scene));
        assert!(graph.is_first_use(index("post_processing"), RenderTargetId::Swapchain));
        assert!(graph.first_writes(index("user_interface")).is_empty());
    }

    #[test]
    fn unwritten_read_is_reported() {
        let stages = vec![pass("lighting", &[RenderTargetId::Scene], RenderTargetId::Lighting)];
        let err = RenderGraph::compile(&stages).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingWriter {
                pipeline: "lighting".to_string(),
                target: RenderTargetId::Scene
            }
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let stages = vec![
            pass("a", &[RenderTargetId::Lighting], RenderTargetId::Scene),
            pass("b", &[RenderTargetId::Scene], RenderTargetId::Lighting),
        ];
        let err = RenderGraph::compile(&stages).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { pipelines } if pipelines.len() == 2));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let stages = vec![
            pass("a", &[], RenderTargetId::Scene),
            pass("a", &[], RenderTargetId::Lighting),
        ];
        assert_eq!(
            RenderGraph::compile(&stages).unwrap_err(),
            GraphError::DuplicateName("a".to_string())
        );
    }
}
