/// 每个 worker 并发调用 handler 的任务数
pub const DEFAULT_CONCURRENT_HANDLERS: usize = 4;

/// 远端状态服务
pub const DEFAULT_STATE_URL: &str = "http://127.0.0.1:9094";
pub const DEFAULT_STATE_TIMEOUT_SECS: u64 = 10;
pub const STATE_EVENTS_PATH: &str = "events";

/// 客服 uid 长度
pub const STAFF_UID_LEN: usize = 19;
