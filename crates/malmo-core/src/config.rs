use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transport::Endpoint;
use crate::types::Space;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}
const fn default_max_wait_secs() -> u64 {
    180
}
const fn default_peek_interval_ms() -> u64 {
    100
}
const fn default_find_interval_ms() -> u64 {
    1000
}
const fn default_init_retry_ms() -> u64 {
    1000
}
const fn default_quit_interval_ms() -> u64 {
    100
}
const fn default_connect_attempts() -> u32 {
    5
}
const fn default_connect_backoff_ms() -> u64 {
    1000
}
const fn default_connect_backoff_max_ms() -> u64 {
    10_000
}
const fn default_resync_attempts() -> u32 {
    30
}
const fn default_resync_interval_secs() -> u64 {
    10
}
const fn default_exit_pause_secs() -> u64 {
    60
}
fn default_host() -> String {
    "127.0.0.1".into()
}
const fn default_port() -> u16 {
    9000
}
const fn default_port2() -> u16 {
    9000
}

// ---------------------------------------------------------------------------
// InstanceConfig
// ---------------------------------------------------------------------------

/// Endpoints of one MalmoEnv instance.
///
/// The primary (head) endpoint carries the session connection; the
/// secondary endpoint receives management requests such as `<Exit>`. For a
/// single instance both are usually the same address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub host2: Option<String>,
    #[serde(default = "default_port2")]
    pub port2: u16,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            host2: None,
            port2: default_port2(),
        }
    }
}

impl InstanceConfig {
    pub fn primary(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn secondary(&self) -> Endpoint {
        Endpoint::new(
            self.host2.clone().unwrap_or_else(|| self.host.clone()),
            self.port2,
        )
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Wait ceilings, poll intervals and retry budgets of the session protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Ceiling for the first observation and for server discovery (default: 3 min).
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Sleep between peeks while the first frame is not ready.
    #[serde(default = "default_peek_interval_ms")]
    pub peek_interval_ms: u64,

    /// Sleep between `<Find>` polls.
    #[serde(default = "default_find_interval_ms")]
    pub find_interval_ms: u64,

    /// Sleep before resending a refused mission init.
    #[serde(default = "default_init_retry_ms")]
    pub init_retry_ms: u64,

    /// Sleep between `<Quit/>` polls while draining an episode.
    #[serde(default = "default_quit_interval_ms")]
    pub quit_interval_ms: u64,

    /// Attempts for the initial connect-and-greet.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// First sleep between connect attempts; doubles up to the maximum.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,

    #[serde(default = "default_connect_backoff_max_ms")]
    pub connect_backoff_max_ms: u64,

    /// Status polls per endpoint during resync.
    #[serde(default = "default_resync_attempts")]
    pub resync_attempts: u32,

    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Pause after `<Exit>` while the service restarts.
    #[serde(default = "default_exit_pause_secs")]
    pub exit_pause_secs: u64,

    /// Optional read timeout on session sockets. `0` blocks forever.
    #[serde(default)]
    pub read_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
            peek_interval_ms: default_peek_interval_ms(),
            find_interval_ms: default_find_interval_ms(),
            init_retry_ms: default_init_retry_ms(),
            quit_interval_ms: default_quit_interval_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            connect_backoff_max_ms: default_connect_backoff_max_ms(),
            resync_attempts: default_resync_attempts(),
            resync_interval_secs: default_resync_interval_secs(),
            exit_pause_secs: default_exit_pause_secs(),
            read_timeout_secs: 0,
        }
    }
}

impl TimingConfig {
    /// Every sleep set to zero, for driving the protocol against scripted
    /// backends. Wait ceilings and attempt budgets keep their defaults.
    pub fn immediate() -> Self {
        Self {
            peek_interval_ms: 0,
            find_interval_ms: 0,
            init_retry_ms: 0,
            quit_interval_ms: 0,
            connect_backoff_ms: 0,
            connect_backoff_max_ms: 0,
            resync_interval_secs: 0,
            exit_pause_secs: 0,
            ..Self::default()
        }
    }

    pub const fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
    pub const fn peek_interval(&self) -> Duration {
        Duration::from_millis(self.peek_interval_ms)
    }
    pub const fn find_interval(&self) -> Duration {
        Duration::from_millis(self.find_interval_ms)
    }
    pub const fn init_retry(&self) -> Duration {
        Duration::from_millis(self.init_retry_ms)
    }
    pub const fn quit_interval(&self) -> Duration {
        Duration::from_millis(self.quit_interval_ms)
    }
    pub const fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
    pub const fn connect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_max_ms)
    }
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
    pub const fn exit_pause(&self) -> Duration {
        Duration::from_secs(self.exit_pause_secs)
    }
    pub const fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.read_timeout_secs))
        }
    }
}

// ---------------------------------------------------------------------------
// EnvConfig
// ---------------------------------------------------------------------------

/// Session configuration for one MalmoEnv environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Mission XML template.
    pub mission_file: PathBuf,

    /// Replacement for `$(MISSIONS_DIR)` inside the template. Defaults to the
    /// template's directory.
    #[serde(default)]
    pub missions_dir: Option<PathBuf>,

    /// Experiment identifier. A random UUID is generated when absent.
    #[serde(default)]
    pub experiment_id: Option<String>,

    /// Agent role (0..N-1); role 0 hosts the mission.
    #[serde(default)]
    pub role: u32,

    /// Episode counter start value.
    #[serde(default)]
    pub episode: u64,

    /// Exit and resync the service every N episodes. `0` disables.
    #[serde(default)]
    pub resync_period: u64,

    /// Step message options: `0` turn key and info, `1` turn key only,
    /// `2` info only, `3` neither.
    #[serde(default)]
    pub step_options: u8,

    /// Ask the backend to tick synchronously with steps.
    #[serde(default = "default_true")]
    pub synchronous: bool,

    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub action_space: Space,

    #[serde(default)]
    pub observation_space: Space,
}

impl EnvConfig {
    /// Minimal configuration for a mission template with default settings.
    pub fn new(mission_file: impl Into<PathBuf>) -> Self {
        Self {
            mission_file: mission_file.into(),
            missions_dir: None,
            experiment_id: None,
            role: 0,
            episode: 0,
            resync_period: 0,
            step_options: 0,
            synchronous: true,
            instance: InstanceConfig::default(),
            timing: TimingConfig::default(),
            action_space: Space::default(),
            observation_space: Space::default(),
        }
    }

    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_options > 3 {
            return Err(ConfigError::InvalidValue {
                field: "step_options".into(),
                message: format!("{} (must be 0..=3)", self.step_options),
            });
        }
        if self.timing.connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timing.connect_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.timing.resync_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timing.resync_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.instance.host.is_empty() {
            return Err(ConfigError::MissingField("instance.host".into()));
        }
        if self.instance.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "instance.port".into(),
                message: "must be nonzero".into(),
            });
        }
        if matches!(self.experiment_id.as_deref(), Some(id) if id.contains(':')) {
            return Err(ConfigError::InvalidValue {
                field: "experiment_id".into(),
                message: "must not contain ':'".into(),
            });
        }
        Ok(())
    }

    /// Directory substituted for `$(MISSIONS_DIR)`.
    pub fn resolved_missions_dir(&self) -> PathBuf {
        self.missions_dir.clone().unwrap_or_else(|| {
            self.mission_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        })
    }

    /// Load from TOML file. Relative paths resolve against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        if let Some(base) = path.parent() {
            if config.mission_file.is_relative() {
                config.mission_file = base.join(&config.mission_file);
            }
            if let Some(dir) = config.missions_dir.as_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_timing_matches_protocol_constants() {
        let t = TimingConfig::default();
        assert_eq!(t.max_wait(), Duration::from_secs(180));
        assert_eq!(t.resync_attempts, 30);
        assert_eq!(t.resync_interval(), Duration::from_secs(10));
        assert_eq!(t.exit_pause(), Duration::from_secs(60));
        assert_eq!(t.read_timeout(), None);
    }

    #[test]
    fn immediate_timing_keeps_budgets() {
        let t = TimingConfig::immediate();
        assert_eq!(t.peek_interval(), Duration::ZERO);
        assert_eq!(t.exit_pause(), Duration::ZERO);
        assert_eq!(t.max_wait(), Duration::from_secs(180));
        assert_eq!(t.connect_attempts, default_connect_attempts());
        assert_eq!(t.resync_attempts, 30);
    }

    #[test]
    fn new_config_is_valid() {
        EnvConfig::new("mission.xml").validate().unwrap();
    }

    #[test]
    fn rejects_bad_step_options() {
        let mut config = EnvConfig::new("mission.xml");
        config.step_options = 4;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "step_options"));
    }

    #[test]
    fn rejects_zero_connect_attempts() {
        let mut config = EnvConfig::new("mission.xml");
        config.timing.connect_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_colon_in_experiment_id() {
        let mut config = EnvConfig::new("mission.xml");
        config.experiment_id = Some("a:b".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn secondary_defaults_to_primary_host() {
        let instance = InstanceConfig {
            port2: 9001,
            ..InstanceConfig::default()
        };
        assert_eq!(instance.primary(), Endpoint::new("127.0.0.1", 9000));
        assert_eq!(instance.secondary(), Endpoint::new("127.0.0.1", 9001));
    }

    #[test]
    fn missions_dir_defaults_to_template_dir() {
        let config = EnvConfig::new("/opt/missions/navigate.xml");
        assert_eq!(config.resolved_missions_dir(), PathBuf::from("/opt/missions"));
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
mission_file = "navigate.xml"
role = 0
resync_period = 50
step_options = 2

[instance]
host = "10.0.0.5"
port = 9100
port2 = 9101

[timing]
max_wait_secs = 30

[action_space]
type = "dict"
[action_space.spaces.forward]
type = "enum"
values = ["0", "1"]
"#
        )
        .unwrap();

        let config = EnvConfig::from_file(&path).unwrap();
        assert_eq!(config.mission_file, dir.path().join("navigate.xml"));
        assert_eq!(config.resync_period, 50);
        assert_eq!(config.step_options, 2);
        assert!(config.synchronous);
        assert_eq!(config.instance.secondary(), Endpoint::new("10.0.0.5", 9101));
        assert_eq!(config.timing.max_wait_secs, 30);
        assert_eq!(config.timing.peek_interval_ms, 100);
        assert!(config.action_space.get("forward").is_some());
    }

    #[test]
    fn load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        std::fs::write(&path, "mission_file = \"m.xml\"\nstep_options = 9\n").unwrap();
        assert!(matches!(
            EnvConfig::from_file(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
