use {
	async_trait::async_trait,
	common::{
		nsq::Message,
		subscription::{MessageHandler, Subscription, SubscriptionHandle, Transport},
	},
	dispatcher::config::DispatcherConfig,
	std::{
		collections::{HashMap, HashSet},
		sync::{
			Arc, Mutex,
			atomic::{AtomicUsize, Ordering},
		},
		time::Duration,
	},
	tokio::sync::{oneshot, watch},
};

/// 不连 nsqd 的传输层，按 topic 控制订阅的行为
#[derive(Default)]
pub struct MockTransport {
	/// subscribe 被调用的 topic，按调用顺序
	attempts: Mutex<Vec<String>>,
	/// 订阅直接失败的 topic
	fail_topics: HashSet<String>,
	/// 收到停止请求后永远不关闭的 topic
	hang_topics: HashSet<String>,
	/// 收到停止请求到真正关闭之间的延迟
	stop_delay: Duration,
	/// 模拟连接断开
	drops: Mutex<HashMap<String, oneshot::Sender<()>>>,
	/// hang 住的订阅，丢弃 handle 会被当成已关闭
	hung: Mutex<Vec<SubscriptionHandle>>,
	stopped: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_on(mut self, topic: &str) -> Self {
		self.fail_topics.insert(topic.to_string());
		self
	}

	pub fn hang_on(mut self, topic: &str) -> Self {
		self.hang_topics.insert(topic.to_string());
		self
	}

	pub fn with_stop_delay(mut self, delay: Duration) -> Self {
		self.stop_delay = delay;
		self
	}

	pub fn attempts(&self) -> Vec<String> {
		self.attempts.lock().unwrap().clone()
	}

	/// 已经关闭的订阅数量
	pub fn stopped(&self) -> usize {
		self.stopped.load(Ordering::SeqCst)
	}

	/// 断开某个 topic 的连接，订阅随之关闭
	pub fn drop_connection(&self, topic: &str) {
		if let Some(tx) = self.drops.lock().unwrap().remove(topic) {
			let _ = tx.send(());
		}
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn subscribe(&self, topic: &str, _channel: &str, _handler: Arc<dyn MessageHandler>) -> anyhow::Result<Subscription> {
		self.attempts.lock().unwrap().push(topic.to_string());
		if self.fail_topics.contains(topic) {
			return Err(anyhow::anyhow!("connection refused for {}", topic));
		}

		let (subscription, handle) = Subscription::channel();
		if self.hang_topics.contains(topic) {
			self.hung.lock().unwrap().push(handle);
			return Ok(subscription);
		}

		let (drop_tx, drop_rx) = oneshot::channel();
		self.drops.lock().unwrap().insert(topic.to_string(), drop_tx);

		let stop_delay = self.stop_delay;
		let stopped = self.stopped.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = stop_requested(handle.stop_signal()) => {
					tokio::time::sleep(stop_delay).await;
				}
				_ = drop_rx => {}
			}
			stopped.fetch_add(1, Ordering::SeqCst);
			handle.mark_stopped();
		});

		Ok(subscription)
	}
}

async fn stop_requested(mut rx: watch::Receiver<bool>) {
	loop {
		let requested = *rx.borrow_and_update();
		if requested || rx.changed().await.is_err() {
			return;
		}
	}
}

/// 什么都不做的处理器，coordinator 测试不投递消息
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
	async fn handle_message(&self, _message: &Message) -> anyhow::Result<()> {
		Ok(())
	}
}

#[allow(dead_code)]
pub fn test_config(topics: &[&str]) -> DispatcherConfig {
	DispatcherConfig {
		channel: "c1".to_string(),
		topics: topics.iter().map(|topic| topic.to_string()).collect(),
		nsqd_tcp_addresses: vec!["127.0.0.1:4150".to_string()],
		..Default::default()
	}
}
