//! Configuration for a shards application.
//!
//! The cluster topology is described explicitly instead of being discovered
//! from a process-wide context, so every collection built from the same
//! [`ShardsConfig`] sees the same node and core counts.

use shards_common::CommonError;

/// A worker node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address reported by the node, used as the locality tag of partitions.
    pub ip: String,
    /// Number of CPU cores on the node.
    pub cores: usize,
}

impl NodeInfo {
    pub fn new(ip: impl Into<String>, cores: usize) -> Self {
        Self {
            ip: ip.into(),
            cores,
        }
    }
}

/// Configuration for collection execution
#[derive(Debug, Clone)]
pub struct ShardsConfig {
    /// Worker nodes. Partition `i` is placed on `nodes[i % nodes.len()]`.
    pub nodes: Vec<NodeInfo>,
    /// Materialize collections as soon as they are constructed.
    pub eager: bool,
    /// Maximum number of times a partition write is retried on a transient failure
    pub task_max_retries: u32,
    /// Maximum number of partitions held by the block cache
    pub block_cache_capacity: u64,
    /// Maximum number of shared values held by each node's replica cache
    pub replica_cache_capacity: u64,
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            nodes: vec![NodeInfo::new("127.0.0.1", num_cpus::get())],
            eager: false,
            task_max_retries: 3,
            block_cache_capacity: 10_000,
            replica_cache_capacity: 1_000,
        }
    }
}

impl ShardsConfig {
    /// A topology of `node_count` nodes with `cores_per_node` cores each.
    pub fn with_topology(mut self, node_count: usize, cores_per_node: usize) -> Self {
        self.nodes = (0..node_count.max(1))
            .map(|i| NodeInfo::new(format!("10.0.0.{}", i + 1), cores_per_node.max(1)))
            .collect();
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    pub fn with_task_max_retries(mut self, retries: u32) -> Self {
        self.task_max_retries = retries;
        self
    }

    pub fn with_block_cache_capacity(mut self, capacity: u64) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Load configuration from `SHARDS_*` environment variables, falling back
    /// to the defaults for unset variables.
    pub fn from_env() -> Result<Self, CommonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CommonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let nodes = parse_var::<usize>(&lookup, "SHARDS_NODES")?;
        let cores = parse_var::<usize>(&lookup, "SHARDS_CORES_PER_NODE")?;
        if nodes.is_some() || cores.is_some() {
            config = config.with_topology(
                nodes.unwrap_or(1),
                cores.unwrap_or_else(num_cpus::get),
            );
        }
        if let Some(eager) = parse_var::<bool>(&lookup, "SHARDS_EAGER")? {
            config.eager = eager;
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "SHARDS_TASK_MAX_RETRIES")? {
            config.task_max_retries = retries;
        }
        if let Some(capacity) = parse_var::<u64>(&lookup, "SHARDS_BLOCK_CACHE_CAPACITY")? {
            config.block_cache_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot schedule any partition.
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.nodes.is_empty() {
            return Err(CommonError::configuration_error(
                "at least one node is required",
            ));
        }
        if let Some(node) = self.nodes.iter().find(|n| n.cores == 0) {
            return Err(CommonError::configuration_error(format!(
                "node {} has no cores",
                node.ip
            )));
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of cores across the cluster; the default partition count
    /// of [`crate::ShardContext::partition`].
    pub fn total_cores(&self) -> usize {
        self.nodes.iter().map(|n| n.cores).sum::<usize>().max(1)
    }

    /// The node that hosts partition `index`.
    pub fn node_for_partition(&self, index: usize) -> &NodeInfo {
        &self.nodes[index % self.nodes.len()]
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, CommonError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CommonError::configuration_error(format!("{}={:?} is invalid: {}", key, raw, e))
        }),
    }
}
