use {
	crate::{
		consts::{DEFAULT_CONCURRENT_HANDLERS, DEFAULT_STATE_TIMEOUT_SECS, DEFAULT_STATE_URL},
		errors::ConfigError,
	},
	common::{
		consts::*,
		logging::LoggingConfig,
		nsq::NsqSettings,
	},
	config::{Config, Environment, File},
	serde::{Deserialize, Serialize},
	std::{path::Path, time::Duration},
};

/// dispatcher 配置，启动时构造一次，之后只读
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
	pub logging: LoggingConfig,
	pub channel: String,
	pub topics: Vec<String>,
	pub nsqd_tcp_addresses: Vec<String>,
	pub lookupd_http_addresses: Vec<String>,
	pub max_in_flight: u64,
	pub concurrent_handlers: usize,
	pub max_attempts: u16,
	pub requeue_delay_ms: u64,
	pub max_requeue_delay_ms: u64,
	pub heartbeat_interval_ms: u64,
	pub lookupd_poll_interval_secs: u64,
	pub dial_timeout_secs: u64,
	pub state_url: String,
	pub state_timeout_secs: u64,
	/// 不设置时停机无限等待所有 worker 关闭
	pub drain_timeout_secs: Option<u64>,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			logging: LoggingConfig::default(),
			channel: String::new(),
			topics: Vec::new(),
			nsqd_tcp_addresses: Vec::new(),
			lookupd_http_addresses: Vec::new(),
			max_in_flight: NSQ_DEFAULT_MAX_IN_FLIGHT,
			concurrent_handlers: DEFAULT_CONCURRENT_HANDLERS,
			max_attempts: NSQ_DEFAULT_MAX_ATTEMPTS,
			requeue_delay_ms: NSQ_DEFAULT_REQUEUE_DELAY_MS,
			max_requeue_delay_ms: NSQ_DEFAULT_MAX_REQUEUE_DELAY_MS,
			heartbeat_interval_ms: NSQ_DEFAULT_HEARTBEAT_INTERVAL_MS,
			lookupd_poll_interval_secs: NSQ_DEFAULT_LOOKUPD_POLL_INTERVAL_SECS,
			dial_timeout_secs: NSQ_DEFAULT_DIAL_TIMEOUT_SECS,
			state_url: DEFAULT_STATE_URL.to_string(),
			state_timeout_secs: DEFAULT_STATE_TIMEOUT_SECS,
			drain_timeout_secs: None,
		}
	}
}

impl DispatcherConfig {
	pub fn nsq_settings(&self) -> NsqSettings {
		NsqSettings {
			nsqd_tcp_addresses: self.nsqd_tcp_addresses.clone(),
			lookupd_http_addresses: self.lookupd_http_addresses.clone(),
			max_in_flight: self.max_in_flight,
			concurrent_handlers: self.concurrent_handlers,
			max_attempts: self.max_attempts,
			requeue_delay: Duration::from_millis(self.requeue_delay_ms),
			max_requeue_delay: Duration::from_millis(self.max_requeue_delay_ms),
			heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
			lookupd_poll_interval: Duration::from_secs(self.lookupd_poll_interval_secs),
			dial_timeout: Duration::from_secs(self.dial_timeout_secs),
			user_agent: NSQ_USER_AGENT.to_string(),
			client_id_prefix: NSQ_CLIENT_ID_PREFIX.to_string(),
		}
	}

	pub fn drain_timeout(&self) -> Option<Duration> {
		self.drain_timeout_secs.map(Duration::from_secs)
	}

	pub fn state_timeout(&self) -> Duration {
		Duration::from_secs(self.state_timeout_secs)
	}
}

/// 读取配置文件，文件不存在时使用默认配置；环境变量覆盖文件中的值
pub fn load_config(config_path: &str) -> anyhow::Result<DispatcherConfig> {
	let mut builder = Config::builder();
	if Path::new(config_path).exists() {
		builder = builder.add_source(File::with_name(config_path).required(true));
	} else {
		println!("Config file {} not found, using defaults", config_path);
	}

	let config = builder
		.add_source(
			Environment::with_prefix(DISPATCHER_ENV_PREFIX)
				.separator(DISPATCHER_ENV_SEPARATOR)
				.try_parsing(true)
				.list_separator(",")
				.with_list_parse_key("topics")
				.with_list_parse_key("nsqd_tcp_addresses")
				.with_list_parse_key("lookupd_http_addresses"),
		)
		.build()?;

	let dispatcher_config: DispatcherConfig = config.try_deserialize()?;
	println!("Configuration: {:?}", dispatcher_config);
	Ok(dispatcher_config)
}

/// 启动前校验，任何一项不满足都不允许启动
pub fn check_config(config: &DispatcherConfig) -> Result<(), ConfigError> {
	if config.channel.is_empty() {
		return Err(ConfigError::MissingChannel);
	}
	if config.topics.is_empty() {
		return Err(ConfigError::MissingTopics);
	}
	match (config.nsqd_tcp_addresses.is_empty(), config.lookupd_http_addresses.is_empty()) {
		(true, true) => return Err(ConfigError::MissingTransport),
		(false, false) => return Err(ConfigError::ConflictingTransport),
		_ => {}
	}
	if config.concurrent_handlers == 0 {
		return Err(ConfigError::Invalid { field: "concurrent_handlers", reason: "must be at least 1".to_string() });
	}
	config.logging.check().map_err(|e| ConfigError::Invalid { field: "logging", reason: e.to_string() })?;
	Ok(())
}
