use {
	super::{
		conn::{ConnectionSettings, Delivery, NsqConnection},
		lookup::LookupClient,
		protocol::{ProtocolError, is_valid_name},
	},
	crate::subscription::{MessageHandler, Subscription, SubscriptionHandle, Transport},
	anyhow::Context,
	async_trait::async_trait,
	std::{collections::HashSet, sync::Arc, time::Duration},
	tokio::{
		sync::{Mutex, mpsc, watch},
		task::JoinSet,
	},
	tracing::{debug, error, info, warn},
	uuid::Uuid,
};

/// nsq 消费者参数
#[derive(Debug, Clone)]
pub struct NsqSettings {
	pub nsqd_tcp_addresses: Vec<String>,
	pub lookupd_http_addresses: Vec<String>,
	/// 每个 worker 所有连接合计的 RDY
	pub max_in_flight: u64,
	/// 每个 worker 并发调用 handler 的任务数
	pub concurrent_handlers: usize,
	/// 0 表示不限制
	pub max_attempts: u16,
	pub requeue_delay: Duration,
	pub max_requeue_delay: Duration,
	pub heartbeat_interval: Duration,
	pub lookupd_poll_interval: Duration,
	pub dial_timeout: Duration,
	pub user_agent: String,
	pub client_id_prefix: String,
}

impl NsqSettings {
	/// 第 attempts 次失败后的重新投递延迟
	pub fn requeue_delay_for(&self, attempts: u16) -> Duration {
		self.requeue_delay.saturating_mul(u32::from(attempts.max(1))).min(self.max_requeue_delay)
	}

	/// 每条连接分到的 RDY，至少为 1
	pub fn ready_per_connection(&self, connections: usize) -> u64 {
		(self.max_in_flight / connections.max(1) as u64).max(1)
	}

	fn connection_settings(&self) -> ConnectionSettings {
		ConnectionSettings {
			client_id: format!("{}-{}", self.client_id_prefix, Uuid::new_v4()),
			user_agent: self.user_agent.clone(),
			heartbeat_interval: self.heartbeat_interval,
			dial_timeout: self.dial_timeout,
		}
	}
}

/// 基于 nsqd TCP 协议的传输层
pub struct NsqTransport {
	settings: Arc<NsqSettings>,
	lookup: Option<LookupClient>,
}

impl NsqTransport {
	pub fn new(settings: NsqSettings) -> anyhow::Result<Self> {
		let lookup = if settings.lookupd_http_addresses.is_empty() { None } else { Some(LookupClient::new(settings.lookupd_http_addresses.clone(), settings.dial_timeout.max(Duration::from_secs(5)))?) };
		Ok(Self { settings: Arc::new(settings), lookup })
	}

	async fn resolve(&self, topic: &str) -> anyhow::Result<Vec<String>> {
		match &self.lookup {
			Some(lookup) => lookup.lookup(topic).await,
			None => Ok(self.settings.nsqd_tcp_addresses.clone()),
		}
	}
}

#[async_trait]
impl Transport for NsqTransport {
	async fn subscribe(&self, topic: &str, channel: &str, handler: Arc<dyn MessageHandler>) -> anyhow::Result<Subscription> {
		if !is_valid_name(topic) {
			return Err(ProtocolError::InvalidName(topic.to_string()).into());
		}
		if !is_valid_name(channel) {
			return Err(ProtocolError::InvalidName(channel.to_string()).into());
		}

		let addresses = self.resolve(topic).await.with_context(|| format!("Failed to resolve nsqd for topic {}", topic))?;
		if addresses.is_empty() {
			// lookupd 可达但 topic 还没有 producer，交给轮询去连接
			if self.lookup.is_none() {
				return Err(anyhow::anyhow!("No nsqd address configured for topic {}", topic));
			}
			info!("No nsqd producer for topic {} yet, waiting for lookupd", topic);
		}

		// 全部连上才算订阅成功，中途失败时已建立的连接随 Vec 一起关闭
		let connection_settings = self.settings.connection_settings();
		let mut connections = Vec::with_capacity(addresses.len());
		for address in &addresses {
			let conn = NsqConnection::connect(address, topic, channel, &connection_settings).await.with_context(|| format!("Failed to connect to nsqd {} for topic {}", address, topic))?;
			connections.push(conn);
		}

		let (subscription, handle) = Subscription::channel();
		let consumer = Consumer {
			topic: topic.to_string(),
			channel: channel.to_string(),
			settings: self.settings.clone(),
			connection_settings,
			lookup: self.lookup.clone(),
			handler,
		};
		tokio::spawn(consumer.run(connections, handle));
		Ok(subscription)
	}
}

/// 一个 topic/channel 订阅的后台监督任务
struct Consumer {
	topic: String,
	channel: String,
	settings: Arc<NsqSettings>,
	connection_settings: ConnectionSettings,
	lookup: Option<LookupClient>,
	handler: Arc<dyn MessageHandler>,
}

impl Consumer {
	/// 直连模式下最后一条连接关闭即结束；lookupd 模式下只在停止请求之后结束。
	/// 结束前等处理任务清空队列，再通知订阅已停止。
	async fn run(self, initial: Vec<NsqConnection>, handle: SubscriptionHandle) {
		let capacity = self.settings.max_in_flight.max(1) as usize;
		let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>(capacity);
		let delivery_rx = Arc::new(Mutex::new(delivery_rx));

		let mut handlers = JoinSet::new();
		for _ in 0..self.settings.concurrent_handlers.max(1) {
			handlers.spawn(handler_loop(self.topic.clone(), delivery_rx.clone(), self.handler.clone(), self.settings.clone()));
		}

		let mut connections = Connections {
			tasks: JoinSet::new(),
			connected: initial.iter().map(|conn| conn.addr().to_string()).collect(),
			ready: watch::Sender::new(self.settings.ready_per_connection(initial.len())),
		};
		for conn in initial {
			connections.spawn(conn, delivery_tx.clone(), handle.stop_signal());
		}

		let mut stop = handle.stop_signal();
		let mut stopping = handle.is_stop_requested();
		let poll_interval = self.settings.lookupd_poll_interval.max(Duration::from_secs(1));
		let mut poll = tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);

		loop {
			if connections.is_empty() && (self.lookup.is_none() || stopping) {
				break;
			}

			tokio::select! {
				Some(joined) = connections.tasks.join_next() => {
					match joined {
						Ok((addr, Ok(()))) => {
							info!("Connection to nsqd {} for topic {} closed", addr, self.topic);
							connections.remove(&self.settings, &addr, stopping);
						}
						Ok((addr, Err(e))) => {
							warn!("Connection to nsqd {} for topic {} lost: {}", addr, self.topic, e);
							connections.remove(&self.settings, &addr, stopping);
						}
						Err(e) => error!("Connection task for topic {} panicked: {}", self.topic, e),
					}
				}
				changed = stop.changed(), if !stopping => {
					if changed.is_err() || *stop.borrow_and_update() {
						stopping = true;
					}
				}
				_ = poll.tick(), if self.lookup.is_some() && !stopping => {
					self.discover(&mut connections, &delivery_tx, &handle).await;
				}
			}
		}

		drop(delivery_tx);
		while let Some(joined) = handlers.join_next().await {
			if let Err(e) = joined {
				error!("Handler task for topic {} panicked: {}", self.topic, e);
			}
		}

		info!("Consumer for {}/{} stopped", self.topic, self.channel);
		handle.mark_stopped();
	}

	/// 连接 lookupd 新发现的 nsqd，包括之前断开后重新出现的
	async fn discover(&self, connections: &mut Connections, deliveries: &mpsc::Sender<Delivery>, handle: &SubscriptionHandle) {
		let Some(lookup) = &self.lookup else { return };
		let addresses = match lookup.lookup(&self.topic).await {
			Ok(addresses) => addresses,
			Err(e) => {
				warn!("Periodic lookup for topic {} failed: {}", self.topic, e);
				return;
			}
		};

		for address in addresses {
			if connections.connected.contains(&address) || handle.is_stop_requested() {
				continue;
			}
			match NsqConnection::connect(&address, &self.topic, &self.channel, &self.connection_settings).await {
				Ok(conn) => connections.add(&self.settings, conn, deliveries.clone(), handle.stop_signal()),
				Err(e) => warn!("Failed to connect to discovered nsqd {} for topic {}: {}", address, self.topic, e),
			}
		}
	}
}

/// 一个订阅的所有连接，RDY 通过 watch 广播给每条连接
struct Connections {
	tasks: JoinSet<(String, Result<(), ProtocolError>)>,
	connected: HashSet<String>,
	ready: watch::Sender<u64>,
}

impl Connections {
	fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}

	/// 先调低已有连接的 RDY，再以新值启动这条连接
	fn add(&mut self, settings: &NsqSettings, conn: NsqConnection, deliveries: mpsc::Sender<Delivery>, stop: watch::Receiver<bool>) {
		self.connected.insert(conn.addr().to_string());
		self.set_ready(settings.ready_per_connection(self.connected.len()));
		self.spawn(conn, deliveries, stop);
	}

	fn spawn(&mut self, conn: NsqConnection, deliveries: mpsc::Sender<Delivery>, stop: watch::Receiver<bool>) {
		let ready = self.ready.subscribe();
		self.tasks.spawn(async move {
			let addr = conn.addr().to_string();
			let result = conn.run(ready, deliveries, stop).await;
			(addr, result)
		});
	}

	/// 停止过程中不再调整 RDY
	fn remove(&mut self, settings: &NsqSettings, addr: &str, stopping: bool) {
		self.connected.remove(addr);
		if !stopping && !self.connected.is_empty() {
			self.set_ready(settings.ready_per_connection(self.connected.len()));
		}
	}

	/// 值不变时不通知，避免重复发送 RDY
	fn set_ready(&self, ready: u64) {
		self.ready.send_if_modified(|current| {
			let modified = *current != ready;
			*current = ready;
			modified
		});
	}
}

async fn handler_loop(topic: String, deliveries: Arc<Mutex<mpsc::Receiver<Delivery>>>, handler: Arc<dyn MessageHandler>, settings: Arc<NsqSettings>) {
	loop {
		let delivery = {
			let mut rx = deliveries.lock().await;
			rx.recv().await
		};
		let Some(delivery) = delivery else { break };
		let attempts = delivery.message.attempts;

		if settings.max_attempts > 0 && attempts > settings.max_attempts {
			warn!("Message {} on topic {} exceeded {} attempts, giving up: {}", delivery.message.id_str(), topic, settings.max_attempts, String::from_utf8_lossy(&delivery.message.body));
			delivery.finish();
			continue;
		}

		match handler.handle_message(&delivery.message).await {
			Ok(()) => delivery.finish(),
			Err(e) => {
				let delay = settings.requeue_delay_for(attempts);
				warn!("Failed to handle message {} on topic {} (attempt {}): {:#}, requeue in {:?}", delivery.message.id_str(), topic, attempts, e, delay);
				delivery.requeue(delay);
			}
		}
	}
	debug!("Handler task for topic {} exited", topic);
}
