//! Node Registry
//!
//! Maps cluster aliases to backend nodes and nodes back to their aliases.
//!
//! # Model
//!
//! Two positionally paired lists are read from configuration:
//!
//! ```text
//! nodes:    "http://es-east:9200;es-west:9200,prefix:arkime"
//! clusters: "east;west"
//!
//!   "east" ⇄ Node { url: "http://es-east:9200/", prefix: "" }
//!   "west" ⇄ Node { url: "http://es-west:9200/", prefix: "arkime_" }
//! ```
//!
//! The `Registry` is built once at startup and is never mutated afterwards,
//! so it can be cloned freely into every request.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// Separator every non-empty index prefix ends with.
pub const PREFIX_SEPARATOR: char = '_';

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Empty node list")]
    EmptyNodes,

    #[error("Empty cluster list")]
    EmptyClusters,

    #[error("The lengths of the node list ({nodes}) and the cluster list ({clusters}) do not match")]
    LengthMismatch { nodes: usize, clusters: usize },

    #[error("Invalid node spec {spec}: {reason}")]
    InvalidNode { spec: String, reason: String },

    #[error("Node configured more than once: {0}")]
    DuplicateNode(String),

    #[error("Cluster alias configured more than once: {0}")]
    DuplicateCluster(String),
}

/// A single backend search node
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Node {
    /// The node spec exactly as configured, used as the node identity
    address: String,
    url: Url,
    /// Index name prefix, empty or ending with `PREFIX_SEPARATOR`
    prefix: String,
}

impl Node {
    /// Parses a `host:port[,key:value,...]` node spec.
    pub fn parse(spec: &str) -> Result<Self, RegistryError> {
        let mut parts = spec.split(',');
        let base = parts.next().unwrap_or_default().trim();

        let with_scheme = if base.starts_with("http") {
            base.to_string()
        } else {
            format!("http://{base}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| RegistryError::InvalidNode {
            spec: spec.to_string(),
            reason: e.to_string(),
        })?;

        if url.host_str().is_none() {
            return Err(RegistryError::InvalidNode {
                spec: spec.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let mut prefix = String::new();
        for option in parts {
            match option.split_once(':') {
                Some(("prefix", value)) => {
                    prefix = value.trim().to_string();
                    if !prefix.is_empty() && !prefix.ends_with(PREFIX_SEPARATOR) {
                        prefix.push(PREFIX_SEPARATOR);
                    }
                }
                _ => {
                    tracing::warn!(host = ?url.host_str(), option = %option, "Ignoring unknown node option");
                }
            }
        }

        Ok(Self {
            address: spec.to_string(),
            url,
            prefix,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full URL for a path and query on this node.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.url.as_str().trim_end_matches('/'),
            path_and_query
        )
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }
}

/// Host and port of the node with any credentials left out, safe for logs.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => write!(f, "{host}:{port}"),
            None => write!(f, "{host}"),
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    /// Cluster alias to node, in configuration order
    cluster_to_node: IndexMap<String, Arc<Node>>,
    /// Node address to cluster alias
    node_to_cluster: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Builds the registry from positionally paired node specs and cluster aliases.
    pub fn new(nodes: Vec<String>, clusters: Vec<String>) -> Result<Self, RegistryError> {
        if nodes.is_empty() {
            return Err(RegistryError::EmptyNodes);
        }
        if clusters.is_empty() {
            return Err(RegistryError::EmptyClusters);
        }
        if nodes.len() != clusters.len() {
            return Err(RegistryError::LengthMismatch {
                nodes: nodes.len(),
                clusters: clusters.len(),
            });
        }

        let mut cluster_to_node = IndexMap::with_capacity(nodes.len());
        let mut node_to_cluster = HashMap::with_capacity(nodes.len());

        for (spec, cluster) in nodes.into_iter().zip(clusters) {
            let node = Arc::new(Node::parse(&spec)?);

            if spec.to_lowercase().contains(",http") {
                tracing::warn!(
                    node = %node,
                    "Node spec may be using a comma as a host delimiter, change to semicolon"
                );
            }

            if node_to_cluster.contains_key(node.address()) {
                return Err(RegistryError::DuplicateNode(spec));
            }
            if cluster_to_node.contains_key(&cluster) {
                return Err(RegistryError::DuplicateCluster(cluster));
            }

            node_to_cluster.insert(node.address().to_string(), cluster.clone());
            cluster_to_node.insert(cluster, node);
        }

        Ok(Self {
            inner: Arc::new(RegistryInner {
                cluster_to_node,
                node_to_cluster,
            }),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        Self::new(config.node_list(), config.cluster_list())
    }

    /// Cluster alias of the node with the given address
    pub fn cluster_for(&self, node_address: &str) -> Option<&str> {
        self.inner
            .node_to_cluster
            .get(node_address)
            .map(String::as_str)
    }

    /// Node bound to the given cluster alias
    pub fn node_for(&self, cluster: &str) -> Option<&Arc<Node>> {
        self.inner.cluster_to_node.get(cluster)
    }

    /// All nodes in configuration order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.inner.cluster_to_node.values()
    }

    /// All cluster aliases in configuration order
    pub fn clusters(&self) -> impl Iterator<Item = &String> {
        self.inner.cluster_to_node.keys()
    }

    /// The first configured node. It holds the data that is not federated,
    /// such as user records.
    pub fn primary(&self) -> Option<&Arc<Node>> {
        self.inner.cluster_to_node.first().map(|(_, node)| node)
    }

    pub fn len(&self) -> usize {
        self.inner.cluster_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cluster_to_node.is_empty()
    }
}
