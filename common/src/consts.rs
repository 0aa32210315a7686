/// dispatcher 默认配置文件路径
pub const DISPATCHER_CONFIG_PATH: &str = "./deploy/dispatcher.toml";

/// 覆盖配置项的环境变量前缀，嵌套字段用 `__` 分隔，例如 DISPATCHER__LOGGING__LEVEL
pub const DISPATCHER_ENV_PREFIX: &str = "DISPATCHER";
pub const DISPATCHER_ENV_SEPARATOR: &str = "__";

/// nsq 客户端标识
pub const NSQ_USER_AGENT: &str = concat!("dispatcher/", env!("CARGO_PKG_VERSION"));
pub const NSQ_CLIENT_ID_PREFIX: &str = "dispatcher";

/// 以下默认值与 go-nsq 保持一致
pub const NSQ_DEFAULT_MAX_IN_FLIGHT: u64 = 1;
pub const NSQ_DEFAULT_MAX_ATTEMPTS: u16 = 5;
pub const NSQ_DEFAULT_REQUEUE_DELAY_MS: u64 = 90_000;
pub const NSQ_DEFAULT_MAX_REQUEUE_DELAY_MS: u64 = 900_000;
pub const NSQ_DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const NSQ_DEFAULT_LOOKUPD_POLL_INTERVAL_SECS: u64 = 60;
pub const NSQ_DEFAULT_DIAL_TIMEOUT_SECS: u64 = 1;

/// 终止信号缓冲
pub const SIGNAL_BUFFER: usize = 4;
