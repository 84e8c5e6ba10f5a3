use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::blueprint::BuildGraph;
use crate::error::BuildError;
use crate::node::{Handle, Kind};

/// One executed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: usize,
    pub kind: Kind,
    pub label: String,
}

/// A persistable execution log.
///
/// Handles are only meaningful within the graph that issued them, so each
/// entry also stores the node kind and label. Resolving a journal against a
/// graph checks both, which catches a journal recorded for a graph declared
/// differently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub entries: Vec<Entry>,
}

impl Journal {
    pub(crate) fn record(graph: &BuildGraph, log: &[Handle]) -> Self {
        let entries = log
            .iter()
            .map(|&handle| {
                let node = graph.node(handle);
                Entry {
                    index: handle.index().index(),
                    kind: node.kind(),
                    label: node.label().to_string(),
                }
            })
            .collect();

        Self { entries }
    }

    pub(crate) fn resolve(&self, graph: &BuildGraph) -> Result<Vec<Handle>, BuildError> {
        self.entries
            .iter()
            .map(|entry| {
                if entry.index >= graph.len() {
                    return Err(BuildError::Journal(format!(
                        "node {} is out of bounds (graph has {} nodes)",
                        entry.index,
                        graph.len()
                    )));
                }

                let handle = Handle(NodeIndex::new(entry.index));
                let node = graph.node(handle);

                if node.kind() != entry.kind || node.label() != entry.label {
                    return Err(BuildError::Journal(format!(
                        "node {} is {node}, expected {:?} '{}'",
                        entry.index, entry.kind, entry.label
                    )));
                }

                Ok(handle)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String, BuildError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(json)?)
    }
}
