use {
	crate::{
		config::DispatcherConfig,
		errors::DispatcherError,
		worker::{Worker, WorkerId},
	},
	common::{
		graceful::TerminationSignal,
		subscription::{MessageHandler, Transport},
	},
	std::{collections::HashMap, sync::Arc, time::Duration},
	tokio::{
		sync::mpsc,
		time::{Instant, sleep_until},
	},
	tracing::{error, info, warn},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
	/// 还没收到终止信号
	Running,
	/// 已经广播过停止请求，等待 worker 关闭
	Draining,
	Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
	/// 所有 worker 都已确认关闭
	Drained,
	/// 超过 drain 期限仍未关闭的 worker 的 topic
	Abandoned(Vec<String>),
}

/// 管理所有 worker 的生命周期
///
/// 存活 worker 集合只在 `run` 的事件循环里读写，其它任务只通过 channel 通知它。
pub struct Coordinator {
	workers: HashMap<WorkerId, Worker>,
	stopped_rx: mpsc::UnboundedReceiver<WorkerId>,
	drain_timeout: Option<Duration>,
	state: CoordinatorState,
}

impl Coordinator {
	/// 为每个 topic 创建一个 worker，任何一个失败时停掉已创建的 worker 再返回错误
	pub async fn start(config: &DispatcherConfig, transport: Arc<dyn Transport>, handler: Arc<dyn MessageHandler>) -> Result<Self, DispatcherError> {
		let (stopped_tx, mut stopped_rx) = mpsc::unbounded_channel();
		let mut workers = HashMap::with_capacity(config.topics.len());

		for (index, topic) in config.topics.iter().enumerate() {
			let id = WorkerId(index as u64);
			match Worker::create(id, topic, &config.channel, transport.as_ref(), handler.clone(), stopped_tx.clone()).await {
				Ok(worker) => {
					workers.insert(id, worker);
				}
				Err(reason) => {
					error!("Failed to create worker for topic {}: {:#}", topic, reason);
					drop(stopped_tx);
					stop_all(&workers);
					wait_stopped(&mut workers, &mut stopped_rx).await;
					return Err(DispatcherError::Connect { topic: topic.clone(), reason });
				}
			}
		}

		info!("Started {} workers on channel {}", workers.len(), config.channel);
		Ok(Self { workers, stopped_rx, drain_timeout: config.drain_timeout(), state: CoordinatorState::Running })
	}

	pub fn live_workers(&self) -> usize {
		self.workers.len()
	}

	pub fn state(&self) -> CoordinatorState {
		self.state
	}

	pub fn topics(&self) -> Vec<String> {
		let mut topics: Vec<String> = self.workers.values().map(|worker| worker.topic().to_string()).collect();
		topics.sort();
		topics
	}

	/// 事件循环：worker 关闭时移出集合，收到终止信号时向所有存活 worker 广播 stop。
	/// 集合为空是唯一的正常退出条件。
	pub async fn run(mut self, mut signals: mpsc::Receiver<TerminationSignal>) -> ShutdownOutcome {
		let mut signals_open = true;
		let mut deadline: Option<Instant> = None;

		loop {
			if self.workers.is_empty() {
				self.state = CoordinatorState::Terminated;
				info!("All workers stopped");
				return ShutdownOutcome::Drained;
			}

			tokio::select! {
				Some(id) = self.stopped_rx.recv() => {
					if let Some(worker) = self.workers.remove(&id) {
						info!("{} for topic {} stopped, {} workers left", id, worker.topic(), self.workers.len());
					}
				}
				signal = signals.recv(), if signals_open => {
					match signal {
						Some(signal) => self.on_signal(signal, &mut deadline),
						None => signals_open = false,
					}
				}
				_ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
					let topics = self.topics();
					warn!("Drain timeout reached, abandoning {} workers: {:?}", topics.len(), topics);
					self.state = CoordinatorState::Terminated;
					return ShutdownOutcome::Abandoned(topics);
				}
				else => {
					// 所有事件源都已关闭，剩下的 worker 不会再有通知
					let topics = self.topics();
					error!("No event source left while {} workers are live", topics.len());
					self.state = CoordinatorState::Terminated;
					return ShutdownOutcome::Abandoned(topics);
				}
			}
		}
	}

	fn on_signal(&mut self, signal: TerminationSignal, deadline: &mut Option<Instant>) {
		if self.state == CoordinatorState::Running {
			info!("Received {}, stopping {} workers", signal, self.workers.len());
			self.state = CoordinatorState::Draining;
			if let Some(timeout) = self.drain_timeout {
				*deadline = Some(Instant::now() + timeout);
			}
		} else {
			info!("Received {} while draining, re-sending stop to {} workers", signal, self.workers.len());
		}
		stop_all(&self.workers);
	}
}

fn stop_all(workers: &HashMap<WorkerId, Worker>) {
	for worker in workers.values() {
		worker.stop();
	}
}

/// 启动失败时清理已创建的 worker
async fn wait_stopped(workers: &mut HashMap<WorkerId, Worker>, stopped_rx: &mut mpsc::UnboundedReceiver<WorkerId>) {
	while !workers.is_empty() {
		match stopped_rx.recv().await {
			Some(id) => {
				workers.remove(&id);
			}
			None => break,
		}
	}
}
