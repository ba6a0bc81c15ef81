//! Security and process lifecycle configuration.

use std::fmt;
use std::path::PathBuf;

use super::parse::{env_bool, env_opt, env_or};
use super::ConfigError;

/// TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Path to TLS certificate chain (PEM format).
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format).
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Check if TLS is configured.
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            cert_path: env_opt("TLS_CERT").map(PathBuf::from),
            key_path: env_opt("TLS_KEY").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) => Err(ConfigError::Missing {
                key: "TLS_KEY".into(),
            }),
            (None, Some(_)) => Err(ConfigError::Missing {
                key: "TLS_CERT".into(),
            }),
            _ => Ok(()),
        }
    }
}

/// The single basic-auth credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    /// Parse "user:password".
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.split_once(':') {
            Some((user, password)) if !user.is_empty() => Ok(Self {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(ConfigError::invalid("AUTH", "expected user:password")),
        }
    }
}

// Password stays out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Whether to detach from the terminal after setup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetachMode {
    /// Stay in the foreground.
    #[default]
    Never,
    /// Always fork into the background.
    Always,
    /// Detach only when stdin is not a terminal.
    Auto,
}

impl DetachMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "" | "never" | "0" | "false" | "off" => Ok(DetachMode::Never),
            "always" | "1" | "true" | "on" => Ok(DetachMode::Always),
            "auto" => Ok(DetachMode::Auto),
            other => Err(ConfigError::invalid(
                "DAEMON",
                format!("expected never, always or auto, got '{}'", other),
            )),
        }
    }
}

/// Security and lifecycle configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// TLS material.
    pub tls: TlsConfig,
    /// Basic auth credential.
    pub auth: Option<Credential>,
    /// Realm announced in the WWW-Authenticate challenge.
    pub auth_realm: String,
    /// chroot into the document root after loading startup data.
    pub chroot: bool,
    /// User to switch to (name or numeric uid).
    pub run_as_user: Option<String>,
    /// Group to switch to (name or numeric gid).
    pub run_as_group: Option<String>,
    /// Daemon transition.
    pub detach: DetachMode,
    /// Pidfile path, opened before chroot.
    pub pid_file: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tls: TlsConfig::default(),
            auth: None,
            auth_realm: "webfs".to_string(),
            chroot: false,
            run_as_user: None,
            run_as_group: None,
            detach: DetachMode::Never,
            pid_file: None,
        }
    }
}

impl SecurityConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth = env_opt("AUTH").map(|v| Credential::parse(&v)).transpose()?;
        let auth_realm = env_or("AUTH_REALM", "webfs");
        if auth_realm.contains('"') {
            return Err(ConfigError::invalid("AUTH_REALM", "must not contain quotes"));
        }

        Ok(Self {
            tls: TlsConfig::from_env()?,
            auth,
            auth_realm,
            chroot: env_bool("CHROOT", false),
            run_as_user: env_opt("RUN_AS_USER"),
            run_as_group: env_opt("RUN_AS_GROUP"),
            detach: DetachMode::parse(&env_or("DAEMON", "never"))?,
            pid_file: env_opt("PID_FILE").map(PathBuf::from),
        })
    }

    /// Whether a privilege drop was requested.
    pub fn drops_privileges(&self) -> bool {
        self.run_as_user.is_some() || self.run_as_group.is_some()
    }
}
