use thiserror::Error;

/// 启动前的配置校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("channel is required")]
	MissingChannel,

	#[error("at least one topic is required")]
	MissingTopics,

	#[error("nsqd_tcp_addresses or lookupd_http_addresses required")]
	MissingTransport,

	#[error("use nsqd_tcp_addresses or lookupd_http_addresses, not both")]
	ConflictingTransport,

	#[error("invalid {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatcherError {
	#[error("worker for topic {topic} failed to connect: {reason:#}")]
	Connect { topic: String, reason: anyhow::Error },
}
