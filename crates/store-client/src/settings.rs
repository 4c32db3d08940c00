//! # Connection Settings
//!
//! Shapes of the settings a store client is built from. Only structural
//! validation lives here; a malformed value is a configuration error and
//! must stop construction before anything subscribes.

use crate::error::StoreError;

/// Accepted connection string schemes.
pub const CONNECTION_SCHEMES: [&str; 2] = ["esdb://", "esdb+discover://"];

/// A host/port pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.address.trim().is_empty() {
            return Err(StoreError::Configuration(
                "endpoint address is empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(StoreError::Configuration(format!(
                "endpoint {} has port 0",
                self.address
            )));
        }
        Ok(())
    }
}

/// Cluster node the client prefers to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodePreference {
    #[default]
    Leader,
    Follower,
    Random,
}

/// Default user credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Transport security options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelCredentials {
    pub insecure: bool,
    pub root_certificate: Option<Vec<u8>>,
    pub private_key: Option<Vec<u8>>,
    pub cert_chain: Option<Vec<u8>>,
}

/// How to reach the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSettings {
    /// Connection string, parsed by the concrete client.
    ConnectionString { connection_string: String },
    /// A single node.
    SingleNode {
        endpoint: Endpoint,
        channel_credentials: Option<ChannelCredentials>,
        default_credentials: Option<Credentials>,
    },
    /// Gossip-seeded cluster.
    GossipCluster {
        endpoints: Vec<Endpoint>,
        node_preference: NodePreference,
        channel_credentials: Option<ChannelCredentials>,
        default_credentials: Option<Credentials>,
    },
    /// DNS-discovered cluster.
    DnsCluster {
        discover: Endpoint,
        node_preference: NodePreference,
        channel_credentials: Option<ChannelCredentials>,
        default_credentials: Option<Credentials>,
    },
}

impl ConnectionSettings {
    /// Shorthand for a connection string.
    #[must_use]
    pub fn connection_string(value: impl Into<String>) -> Self {
        Self::ConnectionString {
            connection_string: value.into(),
        }
    }

    /// Shorthand for an insecure single node without credentials.
    #[must_use]
    pub fn single_node(address: impl Into<String>, port: u16) -> Self {
        Self::SingleNode {
            endpoint: Endpoint::new(address, port),
            channel_credentials: None,
            default_credentials: None,
        }
    }

    /// Check the settings are structurally complete.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            Self::ConnectionString { connection_string } => {
                let value = connection_string.trim();
                if value.is_empty() {
                    return Err(StoreError::Configuration(
                        "connection string is empty".to_string(),
                    ));
                }
                if !CONNECTION_SCHEMES
                    .iter()
                    .any(|scheme| value.starts_with(scheme))
                {
                    return Err(StoreError::Configuration(format!(
                        "connection string must start with one of {CONNECTION_SCHEMES:?}"
                    )));
                }
                Ok(())
            }
            Self::SingleNode { endpoint, .. } => endpoint.validate(),
            Self::GossipCluster { endpoints, .. } => {
                if endpoints.is_empty() {
                    return Err(StoreError::Configuration(
                        "gossip cluster needs at least one seed endpoint".to_string(),
                    ));
                }
                endpoints.iter().try_for_each(Endpoint::validate)
            }
            Self::DnsCluster { discover, .. } => discover.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_schemes() {
        assert!(ConnectionSettings::connection_string("esdb://localhost:2113?tls=false")
            .validate()
            .is_ok());
        assert!(ConnectionSettings::connection_string("esdb+discover://cluster.dns:2113")
            .validate()
            .is_ok());
        assert!(matches!(
            ConnectionSettings::connection_string("http://localhost:2113").validate(),
            Err(StoreError::Configuration(_))
        ));
        assert!(ConnectionSettings::connection_string("   ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_single_node_requires_address_and_port() {
        assert!(ConnectionSettings::single_node("localhost", 2113)
            .validate()
            .is_ok());
        assert!(ConnectionSettings::single_node("", 2113).validate().is_err());
        assert!(ConnectionSettings::single_node("localhost", 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_gossip_requires_seeds() {
        let empty = ConnectionSettings::GossipCluster {
            endpoints: vec![],
            node_preference: NodePreference::Leader,
            channel_credentials: None,
            default_credentials: None,
        };
        assert!(empty.validate().is_err());

        let seeded = ConnectionSettings::GossipCluster {
            endpoints: vec![Endpoint::new("node1", 2113), Endpoint::new("node2", 2113)],
            node_preference: NodePreference::Follower,
            channel_credentials: None,
            default_credentials: None,
        };
        assert!(seeded.validate().is_ok());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "admin".into(),
            password: "changeit".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("changeit"));
    }
}
