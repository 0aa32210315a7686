use {
	crate::{consts::STATE_EVENTS_PATH, role::Role},
	anyhow::Context,
	reqwest::{Client, Url},
	serde::Serialize,
	serde_json::Value,
	std::time::Duration,
};

/// 提交给远端状态服务的事件
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent<'a> {
	pub role: Role,
	pub uid: &'a str,
	#[serde(rename = "type")]
	pub kind: &'a str,
	pub data: &'a Value,
}

/// 通过 HTTP 访问的远端状态服务
#[derive(Debug, Clone)]
pub struct RemoteState {
	http: Client,
	events_url: Url,
}

impl RemoteState {
	pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
		// 保证 join 追加路径而不是替换最后一段
		let base = if base_url.ends_with('/') { base_url.to_string() } else { format!("{}/", base_url) };
		let events_url = Url::parse(&base).with_context(|| format!("Invalid state url: {}", base_url))?.join(STATE_EVENTS_PATH)?;
		let http = Client::builder().timeout(timeout).connect_timeout(timeout).build()?;
		Ok(Self { http, events_url })
	}

	pub fn events_url(&self) -> &Url {
		&self.events_url
	}

	/// 非 2xx 视为失败，由调用方决定是否重试
	pub async fn apply(&self, event: &StateEvent<'_>) -> anyhow::Result<()> {
		let response = self.http.post(self.events_url.clone()).json(event).send().await.with_context(|| format!("Failed to reach state service at {}", self.events_url))?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(anyhow::anyhow!("State service rejected {} event for {}: {} {}", event.kind, event.uid, status, body));
		}
		Ok(())
	}
}
