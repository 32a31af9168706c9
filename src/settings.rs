use {super::*, anyhow::Context, subcommand::server::ServerOptions};

/// TOML config file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: Option<ServerSection>,
    pub live_logs: Option<LiveLogsSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub heartbeat_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveLogsSection {
    pub enabled: Option<bool>,
    pub max_logs_in_memory: Option<usize>,
    pub send_recent_logs_on_connect: Option<bool>,
    pub include_exceptions: Option<bool>,
    pub include_stack_traces: Option<bool>,
    pub event_tag: Option<String>,
    pub timestamp_format: Option<String>,
    pub connection_timeout: Option<String>,
    pub write_timeout_ms: Option<u64>,
    pub subscriber_queue_capacity: Option<usize>,
    pub filter: Option<String>,
}

/// Unified settings struct with all resolved configuration
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,

    // Server settings
    pub server_address: Option<String>,
    pub server_port: Option<u16>,
    pub server_heartbeat_interval: Option<u64>,

    // Live log settings
    pub live_logs_enabled: Option<bool>,
    pub max_logs_in_memory: Option<usize>,
    pub send_recent_logs_on_connect: Option<bool>,
    pub include_exceptions: Option<bool>,
    pub include_stack_traces: Option<bool>,
    pub event_tag: Option<String>,
    pub timestamp_format: Option<String>,
    pub connection_timeout: Option<String>,
    pub write_timeout_ms: Option<u64>,
    pub subscriber_queue_capacity: Option<usize>,
    pub live_logs_filter: Option<String>,
}

impl Settings {
    /// Load settings from all sources with proper priority
    pub fn load(options: &Options, server: &ServerOptions) -> Result<Self> {
        let mut env = BTreeMap::<String, String>::new();

        for (var, value) in env::vars_os() {
            let Some(var) = var.to_str() else {
                continue;
            };

            let Some(key) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            env.insert(
                key.into(),
                value.into_string().map_err(|value| {
                    anyhow!(
                        "environment variable `{var}` not valid unicode: `{}`",
                        value.to_string_lossy()
                    )
                })?,
            );
        }

        Self::merge(options, server, env)
    }

    /// Merge all configuration sources
    pub fn merge(
        options: &Options,
        server: &ServerOptions,
        env: BTreeMap<String, String>,
    ) -> Result<Self> {
        let settings = Self::from_options(options, server);

        let settings = settings.or(Self::from_env(&env)?);

        let config = match Self::find_config_path(&settings) {
            Some(path) => Self::read_config(&path)?,
            None => Config::default(),
        };

        let settings = settings.or(Self::from_config(&config));

        let settings = settings.or_defaults();

        settings.validate()?;

        Ok(settings)
    }

    fn read_config(path: &std::path::Path) -> Result<Config> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to open config file `{}`", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to deserialize config file `{}`", path.display()))
    }

    fn find_config_path(settings: &Self) -> Option<PathBuf> {
        // 1. Explicit --config flag
        if let Some(path) = &settings.config {
            return Some(path.clone());
        }

        // 2. --config-dir/livelogs.toml
        if let Some(dir) = &settings.config_dir {
            let path = dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                return Some(path);
            }
        }

        if integration_test() {
            return None;
        }

        // 3. XDG config dir (~/.config/livelogs/livelogs.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("livelogs").join(CONFIG_FILE_NAME);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    pub fn from_options(options: &Options, server: &ServerOptions) -> Self {
        Self {
            config: options.config.clone(),
            config_dir: options.config_dir.clone(),
            server_address: server.address.clone(),
            server_port: server.port,
            server_heartbeat_interval: server.heartbeat_interval,
            live_logs_enabled: server.disable_live_logs.then_some(false),
            max_logs_in_memory: server.max_logs_in_memory,
            send_recent_logs_on_connect: server.send_recent_logs_on_connect,
            include_exceptions: server.include_exceptions,
            include_stack_traces: server.include_stack_traces,
            event_tag: server.event_tag.clone(),
            timestamp_format: server.timestamp_format.clone(),
            connection_timeout: server.connection_timeout.clone(),
            write_timeout_ms: server.write_timeout_ms,
            subscriber_queue_capacity: server.subscriber_queue_capacity,
            live_logs_filter: server.live_logs_filter.clone(),
        }
    }

    pub fn from_env(env: &BTreeMap<String, String>) -> Result<Self> {
        let get_bool = |key: &str| -> Result<Option<bool>> {
            env.get(key)
                .map(|value| match value.trim().to_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Ok(true),
                    "" | "0" | "false" | "no" | "off" => Ok(false),
                    _ => Err(anyhow!("`{value}` is not a boolean")),
                })
                .transpose()
                .with_context(|| {
                    format!("failed to parse environment variable {ENV_PREFIX}{key} as bool")
                })
        };

        let get_string = |key: &str| env.get(key).cloned();

        let get_path = |key: &str| env.get(key).map(PathBuf::from);

        let get_u16 = |key: &str| -> Result<Option<u16>> {
            env.get(key)
                .map(|int| int.parse::<u16>())
                .transpose()
                .with_context(|| {
                    format!("failed to parse environment variable {ENV_PREFIX}{key} as u16")
                })
        };

        let get_u64 = |key: &str| -> Result<Option<u64>> {
            env.get(key)
                .map(|int| int.parse::<u64>())
                .transpose()
                .with_context(|| {
                    format!("failed to parse environment variable {ENV_PREFIX}{key} as u64")
                })
        };

        let get_usize = |key: &str| -> Result<Option<usize>> {
            env.get(key)
                .map(|int| int.parse::<usize>())
                .transpose()
                .with_context(|| {
                    format!("failed to parse environment variable {ENV_PREFIX}{key} as usize")
                })
        };

        Ok(Self {
            config: get_path("CONFIG"),
            config_dir: get_path("CONFIG_DIR"),

            // Server
            server_address: get_string("SERVER_ADDRESS"),
            server_port: get_u16("SERVER_PORT")?,
            server_heartbeat_interval: get_u64("SERVER_HEARTBEAT_INTERVAL")?,

            // Live logs
            live_logs_enabled: get_bool("ENABLED")?,
            max_logs_in_memory: get_usize("MAX_LOGS_IN_MEMORY")?,
            send_recent_logs_on_connect: get_bool("SEND_RECENT_LOGS_ON_CONNECT")?,
            include_exceptions: get_bool("INCLUDE_EXCEPTIONS")?,
            include_stack_traces: get_bool("INCLUDE_STACK_TRACES")?,
            event_tag: get_string("EVENT_TAG"),
            timestamp_format: get_string("TIMESTAMP_FORMAT"),
            connection_timeout: get_string("CONNECTION_TIMEOUT"),
            write_timeout_ms: get_u64("WRITE_TIMEOUT_MS")?,
            subscriber_queue_capacity: get_usize("SUBSCRIBER_QUEUE_CAPACITY")?,
            live_logs_filter: get_string("FILTER"),
        })
    }

    pub fn from_config(config: &Config) -> Self {
        let server = config.server.as_ref();
        let live_logs = config.live_logs.as_ref();

        Self {
            config: None,
            config_dir: None,

            // Server
            server_address: server.and_then(|s| s.address.clone()),
            server_port: server.and_then(|s| s.port),
            server_heartbeat_interval: server.and_then(|s| s.heartbeat_interval),

            // Live logs
            live_logs_enabled: live_logs.and_then(|l| l.enabled),
            max_logs_in_memory: live_logs.and_then(|l| l.max_logs_in_memory),
            send_recent_logs_on_connect: live_logs.and_then(|l| l.send_recent_logs_on_connect),
            include_exceptions: live_logs.and_then(|l| l.include_exceptions),
            include_stack_traces: live_logs.and_then(|l| l.include_stack_traces),
            event_tag: live_logs.and_then(|l| l.event_tag.clone()),
            timestamp_format: live_logs.and_then(|l| l.timestamp_format.clone()),
            connection_timeout: live_logs.and_then(|l| l.connection_timeout.clone()),
            write_timeout_ms: live_logs.and_then(|l| l.write_timeout_ms),
            subscriber_queue_capacity: live_logs.and_then(|l| l.subscriber_queue_capacity),
            live_logs_filter: live_logs.and_then(|l| l.filter.clone()),
        }
    }

    /// Merge self with another Settings, self takes priority
    pub fn or(self, other: Self) -> Self {
        Self {
            config: self.config.or(other.config),
            config_dir: self.config_dir.or(other.config_dir),

            // Server
            server_address: self.server_address.or(other.server_address),
            server_port: self.server_port.or(other.server_port),
            server_heartbeat_interval: self
                .server_heartbeat_interval
                .or(other.server_heartbeat_interval),

            // Live logs
            live_logs_enabled: self.live_logs_enabled.or(other.live_logs_enabled),
            max_logs_in_memory: self.max_logs_in_memory.or(other.max_logs_in_memory),
            send_recent_logs_on_connect: self
                .send_recent_logs_on_connect
                .or(other.send_recent_logs_on_connect),
            include_exceptions: self.include_exceptions.or(other.include_exceptions),
            include_stack_traces: self.include_stack_traces.or(other.include_stack_traces),
            event_tag: self.event_tag.or(other.event_tag),
            timestamp_format: self.timestamp_format.or(other.timestamp_format),
            connection_timeout: self.connection_timeout.or(other.connection_timeout),
            write_timeout_ms: self.write_timeout_ms.or(other.write_timeout_ms),
            subscriber_queue_capacity: self
                .subscriber_queue_capacity
                .or(other.subscriber_queue_capacity),
            live_logs_filter: self.live_logs_filter.or(other.live_logs_filter),
        }
    }

    fn or_defaults(self) -> Self {
        let defaults = LiveLogsConfig::default();

        Self {
            config: self.config,
            config_dir: self.config_dir,

            // Server defaults
            server_address: Some(self.server_address.unwrap_or_else(|| "127.0.0.1".into())),
            server_port: Some(self.server_port.unwrap_or(DEFAULT_HTTP_PORT)),
            server_heartbeat_interval: self.server_heartbeat_interval,

            // Live log defaults
            live_logs_enabled: Some(self.live_logs_enabled.unwrap_or(defaults.enabled)),
            max_logs_in_memory: Some(
                self.max_logs_in_memory
                    .unwrap_or(defaults.max_logs_in_memory.get()),
            ),
            send_recent_logs_on_connect: Some(
                self.send_recent_logs_on_connect
                    .unwrap_or(defaults.send_recent_logs_on_connect),
            ),
            include_exceptions: Some(
                self.include_exceptions
                    .unwrap_or(defaults.include_exceptions),
            ),
            include_stack_traces: Some(
                self.include_stack_traces
                    .unwrap_or(defaults.include_stack_traces),
            ),
            event_tag: Some(
                self.event_tag
                    .unwrap_or_else(|| defaults.event_tag.to_string()),
            ),
            timestamp_format: Some(
                self.timestamp_format
                    .unwrap_or_else(|| defaults.timestamp_format.to_string()),
            ),
            connection_timeout: Some(
                self.connection_timeout
                    .unwrap_or_else(|| defaults.connection_timeout.to_string()),
            ),
            write_timeout_ms: Some(self.write_timeout_ms.unwrap_or(
                u64::try_from(defaults.write_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            subscriber_queue_capacity: Some(
                self.subscriber_queue_capacity
                    .unwrap_or(defaults.subscriber_queue_capacity.get()),
            ),
            live_logs_filter: Some(
                self.live_logs_filter
                    .unwrap_or_else(|| logs::DEFAULT_FILTER.into()),
            ),
        }
    }

    fn validate(&self) -> Result {
        self.live_logs_config()
            .context("invalid live log configuration")?;

        EnvFilter::try_new(self.live_logs_filter())
            .with_context(|| format!("invalid live log filter `{}`", self.live_logs_filter()))?;

        Ok(())
    }

    // Convenience accessors
    pub fn address(&self) -> &str {
        self.server_address.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn port(&self) -> u16 {
        self.server_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.server_heartbeat_interval
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    pub fn live_logs_filter(&self) -> &str {
        self.live_logs_filter
            .as_deref()
            .unwrap_or(logs::DEFAULT_FILTER)
    }

    pub fn live_logs_config(&self) -> Result<LiveLogsConfig, ConfigError> {
        let mut config = LiveLogsConfig::default();

        if let Some(enabled) = self.live_logs_enabled {
            config.enabled = enabled;
        }

        if let Some(send) = self.send_recent_logs_on_connect {
            config.send_recent_logs_on_connect = send;
        }

        if let Some(include) = self.include_exceptions {
            config.include_exceptions = include;
        }

        if let Some(include) = self.include_stack_traces {
            config.include_stack_traces = include;
        }

        if let Some(capacity) = self.max_logs_in_memory {
            config = config.max_logs_in_memory(capacity)?;
        }

        if let Some(capacity) = self.subscriber_queue_capacity {
            config = config.subscriber_queue_capacity(capacity)?;
        }

        if let Some(millis) = self.write_timeout_ms {
            config = config.write_timeout(Duration::from_millis(millis))?;
        }

        if let Some(tag) = &self.event_tag {
            config.event_tag = tag.parse()?;
        }

        if let Some(format) = &self.timestamp_format {
            config.timestamp_format = format.parse()?;
        }

        if let Some(timeout) = &self.connection_timeout {
            config.connection_timeout = timeout.parse()?;
        }

        Ok(config)
    }
}
