use std::path::PathBuf;

use chrono::Utc;

use crate::error::Result;
use crate::integrity;
use crate::models::{Graph, GraphDefinition, GraphId, GraphPatch, UserId};
use crate::store::{Record, RecordStore};

impl Record for Graph {
    fn id(&self) -> u64 {
        self.graphid.0
    }
}

pub struct GraphStore {
    records: RecordStore<Graph>,
}

impl GraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            records: RecordStore::new(path, "graphs"),
        }
    }

    pub async fn list(&self) -> Result<Vec<Graph>> {
        self.records.list().await
    }

    pub async fn get(&self, id: GraphId) -> Result<Option<Graph>> {
        self.records.get(id.0).await
    }

    pub async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Graph>> {
        self.records.filter(|graph| graph.userid == owner).await
    }

    pub async fn add(&self, owner: UserId, definition: GraphDefinition) -> Result<Graph> {
        let graph = self
            .records
            .insert(move |id, _| {
                let now = Utc::now();
                Ok(Graph {
                    graphid: GraphId(id),
                    userid: owner,
                    name: definition.name,
                    description: definition.description,
                    created_at: now,
                    updated_at: now,
                    version: 1,
                    nodes: definition.nodes,
                    edges: definition.edges,
                })
            })
            .await?;

        tracing::info!(
            graphid = %graph.graphid,
            owner = %graph.userid,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "graph created"
        );
        Ok(graph)
    }

    /// Shallow merge of `patch` over the stored graph. `updated_at` is always
    /// refreshed; the merged node/edge set must still be consistent.
    pub async fn update(&self, id: GraphId, patch: GraphPatch) -> Result<Option<Graph>> {
        self.records
            .update(id.0, move |graph, _| {
                let GraphPatch {
                    name,
                    description,
                    version,
                    nodes,
                    edges,
                } = patch;
                let touches_structure = nodes.is_some() || edges.is_some();

                if let Some(name) = name {
                    graph.name = name;
                }
                if let Some(description) = description {
                    graph.description = description;
                }
                if let Some(version) = version {
                    graph.version = version;
                }
                if let Some(nodes) = nodes {
                    graph.nodes = nodes;
                }
                if let Some(edges) = edges {
                    graph.edges = edges;
                }
                if touches_structure {
                    integrity::ensure_graph_integrity(&graph.nodes, &graph.edges)?;
                }
                graph.updated_at = Utc::now();
                Ok(())
            })
            .await
    }

    pub async fn remove(&self, id: GraphId) -> Result<Option<Graph>> {
        self.records.remove(id.0).await
    }
}
