use {
	common::subscription::{MessageHandler, StopHandle, Transport},
	std::{
		fmt,
		sync::{
			Arc,
			atomic::{AtomicBool, Ordering},
		},
	},
	tokio::sync::mpsc,
	tracing::{debug, info},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "worker-{}", self.0)
	}
}

/// Connecting 只存在于 create 期间，对外可见的是后三个
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	Connecting,
	Running,
	Stopping,
	Stopped,
}

/// 一个 topic/channel 的订阅
pub struct Worker {
	id: WorkerId,
	topic: String,
	stop: StopHandle,
	stopped: Arc<AtomicBool>,
}

impl Worker {
	/// 建立订阅，并启动一个任务在订阅关闭后把 id 发给 coordinator（只发一次）
	pub async fn create(id: WorkerId, topic: &str, channel: &str, transport: &dyn Transport, handler: Arc<dyn MessageHandler>, stopped_tx: mpsc::UnboundedSender<WorkerId>) -> anyhow::Result<Self> {
		debug!("{} connecting to {}/{}", id, topic, channel);
		let subscription = transport.subscribe(topic, channel, handler).await?;
		let (stop, stopped_signal) = subscription.split();

		let stopped = Arc::new(AtomicBool::new(false));
		tokio::spawn({
			let stopped = stopped.clone();
			let topic = topic.to_string();
			async move {
				stopped_signal.wait().await;
				stopped.store(true, Ordering::Release);
				debug!("{} for topic {} stopped", id, topic);
				let _ = stopped_tx.send(id);
			}
		});

		info!("{} running for {}/{}", id, topic, channel);
		Ok(Self { id, topic: topic.to_string(), stop, stopped })
	}

	pub fn id(&self) -> WorkerId {
		self.id
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	pub fn state(&self) -> WorkerState {
		if self.stopped.load(Ordering::Acquire) {
			WorkerState::Stopped
		} else if self.stop.is_requested() {
			WorkerState::Stopping
		} else {
			WorkerState::Running
		}
	}

	/// 请求关闭订阅，可以重复调用
	pub fn stop(&self) {
		if self.stop.request() {
			info!("Stopping {} for topic {}", self.id, self.topic);
		}
	}
}
