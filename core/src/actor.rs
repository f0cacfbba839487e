//! Actor assignment and dispatch for store collections.

use std::future::Future;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::join_all, stream};
use tracing::debug;

use crate::error::{Result, ShardError};
use crate::store::PartitionRef;

/// A long-lived worker that processes store-resident partitions.
pub trait StoreActor: Send + Sync + 'static {
    /// Address of the node the actor runs on.
    fn node_ip(&self) -> String;
}

/// Pick an actor for every ref. Actors on the ref's node are preferred,
/// least loaded first; otherwise the globally least loaded actor is used.
/// Ties go to the lowest index.
pub(crate) fn assign_actors(refs: &[PartitionRef], actor_nodes: &[String]) -> Result<Vec<usize>> {
    if actor_nodes.is_empty() {
        return Err(ShardError::InvalidArgument(
            "at least one actor is required".to_string(),
        ));
    }
    let mut load = vec![0usize; actor_nodes.len()];
    let assignment = refs
        .iter()
        .map(|r| {
            let local = (0..actor_nodes.len())
                .filter(|&i| actor_nodes[i] == r.node_ip)
                .min_by_key(|&i| (load[i], i));
            let chosen = local.unwrap_or_else(|| {
                (0..actor_nodes.len())
                    .min_by_key(|&i| (load[i], i))
                    .unwrap_or(0)
            });
            load[chosen] += 1;
            chosen
        })
        .collect();
    Ok(assignment)
}

/// Run `f` for every `(actor index, item)`, keeping item order in the
/// results.
///
/// With gang scheduling every call is spawned before any is awaited.
/// Otherwise calls are issued lazily as a stream with no more calls in
/// flight than there are actors.
pub(crate) async fn dispatch<A, I, F, Fut>(
    actors: &[Arc<A>],
    items: Vec<(usize, I)>,
    f: F,
    gang_scheduling: bool,
) -> Result<Vec<PartitionRef>>
where
    A: StoreActor,
    I: Send + 'static,
    F: Fn(Arc<A>, I) -> Fut,
    Fut: Future<Output = Result<PartitionRef>> + Send + 'static,
{
    debug!(
        calls = items.len(),
        actors = actors.len(),
        gang_scheduling,
        "dispatching actor calls"
    );
    if gang_scheduling {
        let handles: Vec<_> = items
            .into_iter()
            .map(|(actor, item)| tokio::spawn(f(actors[actor].clone(), item)))
            .collect();
        let mut refs = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            refs.push(joined??);
        }
        Ok(refs)
    } else {
        stream::iter(items)
            .map(|(actor, item)| f(actors[actor].clone(), item))
            .buffered(actors.len().max(1))
            .try_collect()
            .await
    }
}
