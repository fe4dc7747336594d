//! Server and shutdown-channel configuration.
//!
//! A [`ServerConfig`] is validated when it is built and never changes after
//! the managed server takes ownership of it.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::{Host, Url};

use crate::error::RunnerError;

/// Time in-flight requests get to finish before their connections are severed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Port the shutdown listener binds when none is configured.
pub const DEFAULT_SHUTDOWN_PORT: u16 = 8005;

/// Shared secret a shutdown request must carry when none is configured.
pub const DEFAULT_SHUTDOWN_TOKEN: &str = "SHUTDOWN";

/// Bound on reaching a prior instance and receiving its acknowledgement.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on waiting for an acknowledged prior instance to finish stopping.
/// Exceeds [`DEFAULT_GRACE_PERIOD`]; keep it above the prior instance's grace
/// period when either is changed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(45);

/// Where the shutdown listener lives and how requests authenticate.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Host the listener binds and requests connect to
    pub host: String,
    /// Listener port. `None` disables both the pre-start request and the listener.
    pub port: Option<u16>,
    /// Shared secret carried by shutdown requests
    token: Arc<SecretString>,
    /// Bound on connecting to a prior instance and reading its acknowledgement
    pub connect_timeout: Duration,
    /// Bound on waiting for an acknowledged instance to report it has stopped.
    /// Should exceed that instance's grace period.
    pub stop_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: Some(DEFAULT_SHUTDOWN_PORT),
            token: Arc::new(SecretString::from(DEFAULT_SHUTDOWN_TOKEN.to_string())),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl ShutdownConfig {
    /// A configuration with the listener and the pre-start request turned off.
    pub fn disabled() -> Self {
        Self {
            port: None,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Arc::new(SecretString::from(token.into()));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.port.is_some()
    }

    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Whether `candidate` is the configured shared secret.
    pub fn accepts_token(&self, candidate: &str) -> bool {
        self.token() == candidate
    }

    /// `host:port` of the shutdown endpoint, or `None` when disabled.
    pub fn address(&self) -> Option<String> {
        let port = self.port?;
        if self.host.contains(':') && !self.host.starts_with('[') {
            Some(format!("[{}]:{port}", self.host))
        } else {
            Some(format!("{}:{port}", self.host))
        }
    }
}

/// Immutable configuration of one managed server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Normalised base URI; the path always ends with `/`
    base_uri: Url,
    /// Ask the environment to open the base URI once the server is up
    pub open_browser: bool,
    /// Shutdown listener and pre-start request settings
    pub shutdown: ShutdownConfig,
    /// How long in-flight requests may run once shutdown begins
    pub grace_period: Duration,
    /// Also stop when the process receives Ctrl+C / SIGINT
    pub handle_ctrl_c: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_uri: Url::parse("http://localhost:8080/").expect("static URI is valid"),
            open_browser: false,
            shutdown: ShutdownConfig::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            handle_ctrl_c: true,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from a base URI such as `http://localhost:8080/api/`.
    pub fn new(base_uri: &str) -> Result<Self, RunnerError> {
        Ok(Self {
            base_uri: normalize_base_uri(base_uri)?,
            ..Self::default()
        })
    }

    /// Build a configuration from a host name, port and context path.
    pub fn from_parts(host: &str, port: u16, context: &str) -> Result<Self, RunnerError> {
        if host.trim().is_empty() {
            return Err(RunnerError::configuration("host name must not be empty"));
        }
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let context = context.trim_matches('/');
        let uri = if context.is_empty() {
            format!("http://{host}:{port}/")
        } else {
            format!("http://{host}:{port}/{context}/")
        };
        Self::new(&uri)
    }

    pub fn with_open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownConfig) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_shutdown_port(mut self, port: Option<u16>) -> Self {
        self.shutdown.port = port;
        self
    }

    pub fn with_ctrl_c(mut self, handle_ctrl_c: bool) -> Self {
        self.handle_ctrl_c = handle_ctrl_c;
        self
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Host to bind, without IPv6 brackets.
    pub fn bind_host(&self) -> String {
        match self.base_uri.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        }
    }

    pub fn port(&self) -> u16 {
        // Validated at construction, http always has a known default.
        self.base_uri.port_or_known_default().unwrap_or(80)
    }

    /// Path prefix the handler units are mounted under, always ending in `/`.
    pub fn base_path(&self) -> &str {
        self.base_uri.path()
    }

    /// URL of the generated API description document.
    pub fn description_uri(&self) -> String {
        description_uri(&self.base_uri)
    }
}

/// `<base>application.wadl` for any base URI ending in `/`.
pub fn description_uri(base_uri: &Url) -> String {
    format!("{base_uri}{DESCRIPTION_DOCUMENT}")
}

/// File name of the API description document under the base path.
pub const DESCRIPTION_DOCUMENT: &str = "application.wadl";

fn normalize_base_uri(raw: &str) -> Result<Url, RunnerError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| RunnerError::configuration(format!("malformed base URI '{raw}': {e}")))?;

    if url.scheme() != "http" {
        return Err(RunnerError::configuration(format!(
            "unsupported scheme '{}' in base URI '{raw}' (only http is served)",
            url.scheme()
        )));
    }
    if url.host().is_none() {
        return Err(RunnerError::configuration(format!("base URI '{raw}' has no host")));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(RunnerError::configuration(format!(
            "base URI '{raw}' must not carry credentials"
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(RunnerError::configuration(format!(
            "base URI '{raw}' must not carry a query or fragment"
        )));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
