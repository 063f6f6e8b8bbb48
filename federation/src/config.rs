use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty node list")]
    EmptyNodes,

    #[error("Empty cluster list")]
    EmptyClusters,

    #[error("The lengths of the node list ({nodes}) and the cluster list ({clusters}) do not match")]
    LengthMismatch { nodes: usize, clusters: usize },

    #[error("Health check interval cannot be 0")]
    InvalidHealthCheckInterval,

    #[error("Connection limit per scheme cannot be 0")]
    InvalidConnectionLimit,

    #[error("TLS client certificate and key must be configured together")]
    IncompleteClientIdentity,
}

/// Federation proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming search requests
    #[serde(default)]
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    /// Semicolon separated node specs, `host:port[,key:value,...]`
    pub nodes: String,
    /// Semicolon separated cluster aliases, paired positionally with `nodes`
    pub clusters: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Seconds between two health check cycles
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Maximum number of in-flight node requests per URL scheme
    #[serde(default = "default_max_connections_per_scheme")]
    pub max_connections_per_scheme: usize,
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_max_connections_per_scheme() -> usize {
    100
}

/// Splits a semicolon separated config list, dropping blank entries.
fn split_list(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn node_list(&self) -> Vec<String> {
        split_list(&self.nodes)
    }

    pub fn cluster_list(&self) -> Vec<String> {
        split_list(&self.clusters)
    }

    /// Validates the federation configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        let nodes = self.node_list();
        if nodes.is_empty() {
            return Err(ValidationError::EmptyNodes);
        }

        let clusters = self.cluster_list();
        if clusters.is_empty() {
            return Err(ValidationError::EmptyClusters);
        }

        if nodes.len() != clusters.len() {
            return Err(ValidationError::LengthMismatch {
                nodes: nodes.len(),
                clusters: clusters.len(),
            });
        }

        if self.health_check_interval_secs == 0 {
            return Err(ValidationError::InvalidHealthCheckInterval);
        }

        if self.max_connections_per_scheme == 0 {
            return Err(ValidationError::InvalidConnectionLimit);
        }

        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            return Err(ValidationError::IncompleteClientIdentity);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8200,
        }
    }
}

impl Listener {
    fn admin_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8201,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// TLS options for connections to the nodes
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TlsConfig {
    /// PEM encoded client certificate
    pub client_cert: Option<PathBuf>,
    /// PEM encoded PKCS#8 private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// Additional PEM encoded CA certificates to trust
    pub ca_trust_file: Option<PathBuf>,
    /// Disables certificate validation
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Timeout of a single request to a node
    pub request_timeout_secs: u64,
    /// Timeout of a single health check
    pub ping_timeout_secs: u64,
    /// Upper bound for one scatter-gather barrier. Unset waits for the slowest node.
    pub scatter_timeout_secs: Option<u64>,
    /// How long idle keep-alive connections stay in the pool
    pub pool_idle_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            ping_timeout_secs: 3,
            scatter_timeout_secs: None,
            pool_idle_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            listener: Listener::default(),
            admin_listener: Listener::admin_default(),
            nodes: "http://es1:9200;es2:9200,prefix:arkime".to_string(),
            clusters: "east;west".to_string(),
            tls: TlsConfig::default(),
            timeouts: Timeouts::default(),
            health_check_interval_secs: 60,
            max_connections_per_scheme: 100,
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 8200
admin_listener:
    host: "127.0.0.1"
    port: 8201
nodes: "http://es1:9200;https://es2:9200,prefix:arkime"
clusters: "east;west"
tls:
    ca_trust_file: /etc/multies/ca.pem
    insecure: true
timeouts:
    ping_timeout_secs: 2
    scatter_timeout_secs: 30
health_check_interval_secs: 30
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 8200);
        assert_eq!(config.node_list().len(), 2);
        assert_eq!(config.cluster_list(), vec!["east", "west"]);
        assert!(config.tls.insecure);
        assert_eq!(config.timeouts.ping_timeout_secs, 2);
        assert_eq!(config.timeouts.scatter_timeout_secs, Some(30));
        // Unset fields keep their defaults
        assert_eq!(config.timeouts.request_timeout_secs, 300);
        assert_eq!(config.max_connections_per_scheme, 100);
        assert_eq!(config.health_check_interval_secs, 30);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("nodes: es1:9200\nclusters: one\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener, Listener::default());
        assert_eq!(config.admin_listener.port, 8201);
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(!config.tls.insecure);
    }

    #[test]
    fn test_split_list_drops_blank_entries() {
        let mut config = base_config();
        config.nodes = " es1:9200 ;; es2:9200;".to_string();
        assert_eq!(config.node_list(), vec!["es1:9200", "es2:9200"]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = base_config();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config();
        config.nodes = "".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyNodes));

        let mut config = base_config();
        config.clusters = ";".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyClusters));

        let mut config = base_config();
        config.clusters = "east".to_string();
        assert_eq!(
            config.validate(),
            Err(ValidationError::LengthMismatch {
                nodes: 2,
                clusters: 1
            })
        );

        let mut config = base_config();
        config.health_check_interval_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidHealthCheckInterval)
        );

        let mut config = base_config();
        config.max_connections_per_scheme = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidConnectionLimit)
        );

        let mut config = base_config();
        config.tls.client_cert = Some("/etc/multies/client.pem".into());
        assert_eq!(
            config.validate(),
            Err(ValidationError::IncompleteClientIdentity)
        );
    }

    #[test]
    fn test_deserialization_errors() {
        // Missing node list
        assert!(serde_yaml::from_str::<Config>("clusters: one\n").is_err());

        // Invalid port type
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
nodes: es1:9200
clusters: one
listener: {host: "0.0.0.0", port: "not_a_number"}
"#
            )
            .is_err()
        );
    }
}
