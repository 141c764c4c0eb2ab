mod request_id;

use std::time::Duration;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::stream::RelayOptions;
use crate::transport::{GeminiEndpoint, HttpTransport};

use request_id::RelayIdSource;

/// Shared application state accessible to all handlers.
///
/// Immutable after construction apart from the request sequence.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub endpoint: GeminiEndpoint,
    request_ids: RelayIdSource,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, endpoint: GeminiEndpoint) -> Self {
        Self {
            config,
            transport,
            endpoint,
            request_ids: RelayIdSource::new(),
        }
    }

    /// Build the transport and endpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the upstream settings cannot be
    /// turned into a working client.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let endpoint = GeminiEndpoint::new(&config.upstream)?;
        let transport = HttpTransport::new(&config.server, endpoint.proxy())?;
        Ok(Self::new(config, transport, endpoint))
    }

    /// Label for the next relay operation, used to correlate log lines.
    #[must_use]
    pub fn next_request_id(&self) -> String {
        self.request_ids.next_id()
    }

    /// Number of relay ids handed out so far.
    #[must_use]
    pub fn requests_seen(&self) -> u64 {
        self.request_ids.issued()
    }

    #[must_use]
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            idle_timeout: self.config.relay.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}
