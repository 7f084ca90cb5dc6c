use std::env;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::{CuOptError, Result};

/// How server certificates are checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerification {
    /// Accept any certificate
    Disabled,
    /// Standard CA verification
    SystemRoots,
    /// Trust the PEM certificate at this path in addition to the system roots
    Certificate(PathBuf),
}

/// What happens when the polling timeout runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBehavior {
    /// Fail with [`CuOptError::PollTimeout`]
    Raise,
    /// Return the pending envelope
    Return,
}

/// Client configuration, fixed for the lifetime of a client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    ip: String,
    port: u16,
    use_https: bool,
    self_signed_cert: Option<PathBuf>,
    insecure: bool,
    polling_interval: Duration,
    polling_timeout: Option<Duration>,
    request_excess_timeout: Option<Duration>,
    only_validate: bool,
    timeout_exception: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 5000,
            use_https: false,
            self_signed_cert: None,
            insecure: false,
            polling_interval: Duration::from_secs(1),
            polling_timeout: Some(Duration::from_secs(600)),
            request_excess_timeout: None,
            only_validate: false,
            timeout_exception: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CuOptError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(CuOptError::Config(format!(
                "{} has an invalid value: {}",
                key, raw
            ))),
        },
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `CUOPT_*` variables on top of the defaults.
    ///
    /// Recognized: `CUOPT_SERVER_IP`, `CUOPT_SERVER_PORT`, `CUOPT_USE_HTTPS`,
    /// `CUOPT_SELF_SIGNED_CERT`, `CUOPT_POLLING_INTERVAL` (seconds),
    /// `CUOPT_POLLING_TIMEOUT` (seconds, or `none` to poll forever),
    /// `CUOPT_TIMEOUT_EXCEPTION` and `CUOPT_ONLY_VALIDATE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(ip) = env::var("CUOPT_SERVER_IP") {
            config.ip = ip;
        }
        if let Some(port) = env_parse::<u16>("CUOPT_SERVER_PORT")? {
            config.port = port;
        }
        if let Some(use_https) = env_bool("CUOPT_USE_HTTPS")? {
            config.use_https = use_https;
        }
        if let Ok(cert) = env::var("CUOPT_SELF_SIGNED_CERT") {
            if !cert.is_empty() {
                config.self_signed_cert = Some(PathBuf::from(cert));
            }
        }
        if let Some(secs) = env_parse::<f64>("CUOPT_POLLING_INTERVAL")? {
            config.polling_interval = seconds("CUOPT_POLLING_INTERVAL", secs)?;
        }
        if let Ok(raw) = env::var("CUOPT_POLLING_TIMEOUT") {
            config.polling_timeout = if raw.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                let secs = env_parse::<f64>("CUOPT_POLLING_TIMEOUT")?.unwrap_or_default();
                Some(seconds("CUOPT_POLLING_TIMEOUT", secs)?)
            };
        }
        if let Some(raise) = env_bool("CUOPT_TIMEOUT_EXCEPTION")? {
            config.timeout_exception = raise;
        }
        if let Some(only_validate) = env_bool("CUOPT_ONLY_VALIDATE")? {
            config.only_validate = only_validate;
        }

        Ok(config)
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// Trust a self-signed certificate. Only used with HTTPS.
    pub fn with_self_signed_cert<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.self_signed_cert = Some(path.into());
        self
    }

    /// Skip certificate verification entirely.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// `None` polls until a terminal result arrives.
    pub fn with_polling_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.polling_timeout = timeout;
        self
    }

    /// Takes precedence over the polling timeout when set.
    #[deprecated(note = "use with_polling_timeout instead")]
    pub fn with_request_excess_timeout(mut self, timeout: Duration) -> Self {
        self.request_excess_timeout = Some(timeout);
        self
    }

    pub fn with_only_validate(mut self, only_validate: bool) -> Self {
        self.only_validate = only_validate;
        self
    }

    pub fn with_timeout_exception(mut self, raise: bool) -> Self {
        self.timeout_exception = raise;
        self
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Effective polling timeout
    pub fn polling_timeout(&self) -> Option<Duration> {
        self.request_excess_timeout.or(self.polling_timeout)
    }

    pub fn only_validate(&self) -> bool {
        self.only_validate
    }

    pub fn timeout_behavior(&self) -> TimeoutBehavior {
        if self.timeout_exception {
            TimeoutBehavior::Raise
        } else {
            TimeoutBehavior::Return
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    /// Verification mode derived from the HTTPS settings
    pub fn tls_verification(&self) -> TlsVerification {
        if !self.use_https || self.insecure {
            return TlsVerification::Disabled;
        }
        match &self.self_signed_cert {
            Some(path) => TlsVerification::Certificate(path.clone()),
            None => TlsVerification::SystemRoots,
        }
    }

    /// `{scheme}://{ip}:{port}/cuopt/request`
    pub fn endpoint(&self) -> Result<Url> {
        let raw = format!("{}://{}:{}/cuopt/request", self.scheme(), self.ip, self.port);
        Url::parse(&raw).map_err(|e| CuOptError::InvalidUrl(format!("{}: {}", raw, e)))
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CuOptError::Config(format!("{} must be a non-negative number", key)))
}
