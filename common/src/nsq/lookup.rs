use {
	reqwest::{Client, StatusCode, Url},
	serde::Deserialize,
	std::{collections::BTreeSet, time::Duration},
	tracing::{debug, warn},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Producer {
	pub broadcast_address: String,
	pub tcp_port: u16,
}

impl Producer {
	pub fn tcp_address(&self) -> String {
		format!("{}:{}", self.broadcast_address, self.tcp_port)
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupBody {
	#[serde(default)]
	pub producers: Vec<Producer>,
}

/// 旧版本 nsqlookupd 把结果包在 data 里
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LookupResponse {
	Wrapped { data: LookupBody },
	Plain(LookupBody),
}

impl LookupResponse {
	pub fn into_addresses(self) -> Vec<String> {
		let body = match self {
			LookupResponse::Wrapped { data } => data,
			LookupResponse::Plain(body) => body,
		};
		body.producers.iter().map(Producer::tcp_address).collect()
	}
}

/// 通过 nsqlookupd 查找某个 topic 的 nsqd 节点
#[derive(Debug, Clone)]
pub struct LookupClient {
	http: Client,
	addresses: Vec<String>,
}

impl LookupClient {
	pub fn new(addresses: Vec<String>, timeout: Duration) -> anyhow::Result<Self> {
		let http = Client::builder().timeout(timeout).connect_timeout(timeout).build()?;
		Ok(Self { http, addresses })
	}

	/// 合并所有 lookupd 的结果；只有全部 lookupd 都失败时才返回 Err
	pub async fn lookup(&self, topic: &str) -> anyhow::Result<Vec<String>> {
		let mut producers = BTreeSet::new();
		let mut last_error = None;
		let mut succeeded = 0;

		for address in &self.addresses {
			match self.query(address, topic).await {
				Ok(found) => {
					debug!("lookupd {} returned {} producers for topic {}", address, found.len(), topic);
					succeeded += 1;
					producers.extend(found);
				}
				Err(e) => {
					warn!("lookupd {} query for topic {} failed: {}", address, topic, e);
					last_error = Some(e);
				}
			}
		}

		match last_error {
			Some(e) if succeeded == 0 => Err(e),
			_ => Ok(producers.into_iter().collect()),
		}
	}

	async fn query(&self, address: &str, topic: &str) -> anyhow::Result<Vec<String>> {
		let url = lookup_url(address, topic)?;
		let response = self.http.get(url).header("Accept", "application/vnd.nsq; version=1.0").send().await?;

		// topic 还没有任何 producer
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(Vec::new());
		}
		let response = response.error_for_status()?;
		let body: LookupResponse = response.json().await?;
		Ok(body.into_addresses())
	}
}

/// 地址没有 scheme 时补上 http://
pub fn lookup_url(address: &str, topic: &str) -> anyhow::Result<Url> {
	let base = if address.starts_with("http://") || address.starts_with("https://") { address.to_string() } else { format!("http://{}", address) };
	let mut url = Url::parse(&base)?.join("/lookup")?;
	url.query_pairs_mut().append_pair("topic", topic);
	Ok(url)
}
