//! Environment-driven agent configuration.

use std::collections::HashMap;
use std::net::SocketAddr;

use uuid::Uuid;

use crate::broker::transport::BrokerSettings;
use crate::error::{Error, Result};

/// Default port for the health/metrics server.
const DEFAULT_HEALTH_PORT: u16 = 8080;
/// Default vhost for control-plane-wide traffic.
const DEFAULT_COMMON_VHOST: &str = "common";

/// Agent configuration assembled from `EDGEBUS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerSettings,
    /// The cluster this agent serves; unset for the control-plane role.
    pub cluster_id: Option<Uuid>,
    pub health_addr: SocketAddr,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Read configuration from an explicit variable map (test seam).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            vars.get(key)
                .cloned()
                .ok_or_else(|| Error::Config(key.to_string()))
        };

        let port = vars
            .get("EDGEBUS_BROKER_PORT")
            .map(|value| value.parse::<u16>())
            .transpose()
            .map_err(|_| Error::Config("EDGEBUS_BROKER_PORT".to_string()))?
            .unwrap_or(5672);

        let cluster_id = vars
            .get("EDGEBUS_CLUSTER_ID")
            .map(|value| Uuid::parse_str(value))
            .transpose()
            .map_err(|_| Error::Config("EDGEBUS_CLUSTER_ID".to_string()))?;

        let health_port = vars
            .get("EDGEBUS_HEALTH_PORT")
            .map(|value| value.parse::<u16>())
            .transpose()
            .map_err(|_| Error::Config("EDGEBUS_HEALTH_PORT".to_string()))?
            .unwrap_or(DEFAULT_HEALTH_PORT);

        Ok(Self {
            broker: BrokerSettings {
                host: required("EDGEBUS_BROKER_HOST")?,
                port,
                username: required("EDGEBUS_BROKER_USERNAME")?,
                password: required("EDGEBUS_BROKER_PASSWORD")?,
                common_vhost: vars
                    .get("EDGEBUS_COMMON_VHOST")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_COMMON_VHOST.to_string()),
            },
            cluster_id,
            health_addr: SocketAddr::from(([0, 0, 0, 0], health_port)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("EDGEBUS_BROKER_HOST".to_string(), "broker".to_string()),
            ("EDGEBUS_BROKER_USERNAME".to_string(), "edge".to_string()),
            ("EDGEBUS_BROKER_PASSWORD".to_string(), "pw".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.common_vhost, "common");
        assert_eq!(config.cluster_id, None);
        assert_eq!(config.health_addr.port(), DEFAULT_HEALTH_PORT);
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let mut vars = base_vars();
        vars.remove("EDGEBUS_BROKER_HOST");
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, Error::Config(key) if key == "EDGEBUS_BROKER_HOST"));
    }

    #[test]
    fn test_cluster_id_parsed() {
        let mut vars = base_vars();
        let id = Uuid::new_v4();
        vars.insert("EDGEBUS_CLUSTER_ID".to_string(), id.to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.cluster_id, Some(id));
    }

    #[test]
    fn test_invalid_cluster_id_rejected() {
        let mut vars = base_vars();
        vars.insert("EDGEBUS_CLUSTER_ID".to_string(), "not-a-uuid".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut vars = base_vars();
        vars.insert("EDGEBUS_BROKER_PORT".to_string(), "fivesix".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }
}
