use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;
use crate::authz::store::{RelationStore, StoreTransaction};
use crate::authz::types::{Object, Relationship, TraversalRequest, TraversalResponseItem};

/// In-memory relation store: an insertion-ordered, deduplicated tuple list.
/// Implements the same contract as the PostgreSQL backend and is the test
/// double of choice. Writes apply immediately; transaction handles are
/// ambient no-ops.
#[derive(Default)]
pub struct MemoryRelationStore {
    rows: RwLock<Vec<Relationship>>,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn snapshot(&self) -> Vec<Relationship> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// The node a traversal step departs from, given the direction.
fn near(rel: &Relationship, forward: bool) -> &Object {
    if forward {
        &rel.resource
    } else {
        &rel.subject
    }
}

/// The node a traversal step arrives at.
fn far(rel: &Relationship, forward: bool) -> &Object {
    if forward {
        &rel.subject
    } else {
        &rel.resource
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn insert_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError> {
        if ctx.cancellation().is_cancelled() {
            return Err(AuthzError::Cancelled);
        }
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for rel in relationships {
            if !rows.contains(rel) {
                rows.push(rel.clone());
            }
        }
        Ok(())
    }

    async fn delete_bulk(
        &self,
        ctx: &RequestContext<'_>,
        relationships: &[Relationship],
    ) -> Result<(), AuthzError> {
        if ctx.cancellation().is_cancelled() {
            return Err(AuthzError::Cancelled);
        }
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.retain(|row| !relationships.contains(row));
        Ok(())
    }

    /// Breadth-first path enumeration. Bounded only by `stop_on_types`:
    /// callers needing finite results must stop on terminal types or keep
    /// the graph acyclic, exactly as with the recursive SQL backend.
    async fn list_paths(
        &self,
        ctx: &RequestContext<'_>,
        request: &TraversalRequest,
    ) -> Result<Vec<TraversalResponseItem>, AuthzError> {
        let rows = self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let forward = request.forward;

        // Seed with every edge leaving the start node, then extend each walk
        // until it reaches a stop type.
        let mut frontier: VecDeque<Vec<Relationship>> = rows
            .iter()
            .filter(|r| near(r, forward) == &request.start_on)
            .map(|r| vec![r.clone()])
            .collect();
        let mut walks: Vec<Vec<Relationship>> = Vec::new();

        while let Some(path) = frontier.pop_front() {
            if ctx.cancellation().is_cancelled() {
                return Err(AuthzError::Cancelled);
            }
            let Some(last) = path.last() else {
                continue;
            };
            let tail = far(last, forward).clone();
            let expand = !request.stop_on_types.contains(&tail.object_type);
            walks.push(path.clone());
            if expand {
                for r in rows.iter().filter(|r| near(r, forward) == &tail) {
                    let mut next = path.clone();
                    next.push(r.clone());
                    frontier.push_back(next);
                }
            }
        }

        // Endpoint filter, then grouping by (resource, subject) in
        // first-seen order.
        let mut items: Vec<TraversalResponseItem> = Vec::new();
        for path in walks {
            let Some(last) = path.last() else {
                continue;
            };
            let next = far(last, forward);
            let keep = if let Some(stop_on) = &request.stop_on {
                next == stop_on
            } else if !request.stop_on_types.is_empty() {
                request.stop_on_types.contains(&next.object_type)
            } else {
                true
            };
            if !keep {
                continue;
            }

            let (resource, subject) = if forward {
                (request.start_on.clone(), next.clone())
            } else {
                (next.clone(), request.start_on.clone())
            };
            match items
                .iter_mut()
                .find(|item| item.resource == resource && item.subject == subject)
            {
                Some(item) => item.paths.push(path),
                None => items.push(TraversalResponseItem {
                    resource,
                    subject,
                    paths: vec![path],
                }),
            }
        }

        Ok(items)
    }

    async fn begin(&self, _ctx: &RequestContext<'_>) -> Result<StoreTransaction, AuthzError> {
        Ok(StoreTransaction::ambient())
    }
}
