use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialError, CredentialOptions, Credentials};

pub const PRODUCTION_ADDRESS: &str = "api.push.apple.com";
pub const SANDBOX_ADDRESS: &str = "api.sandbox.push.apple.com";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_STREAMS_PER_ENDPOINT: usize = 100;

/// Connection options as written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Gateway host. Picked from `production` when unset.
    pub address: Option<String>,
    pub port: u16,
    pub production: bool,
    pub credentials: CredentialOptions,
    pub max_endpoints: usize,
    pub streams_per_endpoint: usize,
    /// How long a recipient may wait in the queue for a stream. Unset waits forever.
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Option<Duration>,
    /// How long a recipient may wait for its response once the stream is acquired.
    #[serde(with = "duration_ms")]
    pub exchange_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_PORT,
            production: false,
            credentials: CredentialOptions::default(),
            max_endpoints: 1,
            streams_per_endpoint: DEFAULT_STREAMS_PER_ENDPOINT,
            acquire_timeout: None,
            exchange_timeout: None,
        }
    }
}

impl ConnectionOptions {
    pub fn resolve(&self) -> Result<ConnectionConfig, CredentialError> {
        let address = match &self.address {
            Some(address) => address.clone(),
            None if self.production => PRODUCTION_ADDRESS.to_string(),
            None => SANDBOX_ADDRESS.to_string(),
        };
        Ok(ConnectionConfig {
            address,
            port: self.port,
            credentials: self.credentials.load()?,
            max_endpoints: self.max_endpoints.max(1),
            streams_per_endpoint: self.streams_per_endpoint.max(1),
            acquire_timeout: self.acquire_timeout,
            exchange_timeout: self.exchange_timeout,
        })
    }
}

/// Options after credential material has been loaded.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
    pub max_endpoints: usize,
    pub streams_per_endpoint: usize,
    pub acquire_timeout: Option<Duration>,
    pub exchange_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Value of the `:authority` pseudo header.
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
    /// Upper bound of concurrently open streams.
    pub fn stream_capacity(&self) -> usize {
        self.max_endpoints.saturating_mul(self.streams_per_endpoint)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address_follows_environment() {
        let sandbox = ConnectionOptions::default().resolve().unwrap();
        assert_eq!(sandbox.authority(), SANDBOX_ADDRESS);

        let production = ConnectionOptions {
            production: true,
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(production.authority(), PRODUCTION_ADDRESS);

        let custom = ConnectionOptions {
            address: Some("localhost".into()),
            port: 8443,
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(custom.authority(), "localhost:8443");
    }

    #[test]
    fn test_deserialize_options() {
        let options: ConnectionOptions = serde_json::from_value(serde_json::json!({
            "production": true,
            "max_endpoints": 2,
            "streams_per_endpoint": 0,
            "acquire_timeout": 1500,
        }))
        .unwrap();
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.acquire_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(options.exchange_timeout, None);
        let config = options.resolve().unwrap();
        assert_eq!(config.stream_capacity(), 2);
    }
}
