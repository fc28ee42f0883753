use std::time::Duration;

use crate::errors::ApnsError;

pub const PRODUCTION_ADDRESS: &str = "api.push.apple.com";
pub const SANDBOX_ADDRESS: &str = "api.sandbox.push.apple.com";
pub const DEFAULT_PORT: u16 = 443;

/// Client certificate material handed to the transport as-is
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    /// PKCS#12 bundle bytes
    pub pkcs12: Vec<u8>,
    pub passphrase: Option<String>,
}

/// Options passed verbatim to `Transport::connect`
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub port: u16,
    pub client_certificate: Option<ClientCertificate>,
    /// HTTP/2 PING interval; `None` leaves keep-alive to the transport
    pub keep_alive_interval: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            client_certificate: None,
            keep_alive_interval: None,
        }
    }
}

/// APNs Configuration
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    /// Gateway host used for `:authority` and for connecting
    pub address: String,
    pub production: bool,
    pub connect_options: ConnectOptions,
}

impl ApnsConfig {
    /// Create new APNs configuration pointing at the production or sandbox gateway
    pub fn new(production: bool) -> Self {
        let address = if production {
            PRODUCTION_ADDRESS
        } else {
            SANDBOX_ADDRESS
        };

        Self {
            address: address.to_string(),
            production,
            connect_options: ConnectOptions::default(),
        }
    }

    /// Override the gateway address (e.g. a local mock server)
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.connect_options.port = port;
        self
    }

    pub fn with_client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.connect_options.client_certificate = Some(certificate);
        self
    }

    /// Get APNs API endpoint based on environment
    pub fn endpoint(&self) -> &str {
        if self.production {
            PRODUCTION_ADDRESS
        } else {
            SANDBOX_ADDRESS
        }
    }

    /// `host` or `host:port` when the port is not the default
    pub fn authority(&self) -> String {
        if self.connect_options.port == DEFAULT_PORT {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.connect_options.port)
        }
    }

    /// Load configuration from `APNS_*` environment variables
    pub fn from_env() -> Result<Self, ApnsError> {
        let production = std::env::var("APNS_PRODUCTION")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|e| ApnsError::Config(format!("invalid APNS_PRODUCTION: {e}")))?;

        let mut config = Self::new(production);

        if let Ok(address) = std::env::var("APNS_ADDRESS") {
            config.address = address;
        }

        config.connect_options.port = std::env::var("APNS_PORT")
            .unwrap_or_else(|_| DEFAULT_PORT.to_string())
            .parse()
            .map_err(|e| ApnsError::Config(format!("invalid APNS_PORT: {e}")))?;

        config.connect_options.keep_alive_interval = match std::env::var("APNS_KEEP_ALIVE_SECS") {
            Ok(secs) => Some(Duration::from_secs(secs.parse().map_err(|e| {
                ApnsError::Config(format!("invalid APNS_KEEP_ALIVE_SECS: {e}"))
            })?)),
            Err(_) => None,
        };

        Ok(config)
    }
}
