use {
	crate::nsq::Message,
	async_trait::async_trait,
	std::sync::Arc,
	tokio::sync::{oneshot, watch},
};

/// 单条消息的业务处理
///
/// 同一个实例会被多个 worker、多个并发处理任务同时调用。
/// 返回 Err 时消息交给传输层重新投递。
#[async_trait]
pub trait MessageHandler: Send + Sync {
	async fn handle_message(&self, message: &Message) -> anyhow::Result<()>;
}

/// 消息队列传输层：订阅一个 topic/channel，返回可停止的订阅
#[async_trait]
pub trait Transport: Send + Sync {
	async fn subscribe(&self, topic: &str, channel: &str, handler: Arc<dyn MessageHandler>) -> anyhow::Result<Subscription>;
}

/// 订阅的消费方持有的一端
#[derive(Debug)]
pub struct Subscription {
	stop: StopHandle,
	stopped: Stopped,
}

/// 传输层持有的一端：观察停止请求，关闭后恰好通知一次
#[derive(Debug)]
pub struct SubscriptionHandle {
	stop_rx: watch::Receiver<bool>,
	stopped_tx: oneshot::Sender<()>,
}

impl Subscription {
	pub fn channel() -> (Subscription, SubscriptionHandle) {
		let (stop_tx, stop_rx) = watch::channel(false);
		let (stopped_tx, stopped_rx) = oneshot::channel();
		(Subscription { stop: StopHandle(Arc::new(stop_tx)), stopped: Stopped(stopped_rx) }, SubscriptionHandle { stop_rx, stopped_tx })
	}

	/// 请求关闭，可重复调用
	pub fn stop(&self) -> bool {
		self.stop.request()
	}

	pub fn split(self) -> (StopHandle, Stopped) {
		(self.stop, self.stopped)
	}
}

impl SubscriptionHandle {
	pub fn is_stop_requested(&self) -> bool {
		*self.stop_rx.borrow()
	}

	/// 停止请求的观察端，交给各个连接任务
	pub fn stop_signal(&self) -> watch::Receiver<bool> {
		self.stop_rx.clone()
	}

	/// 订阅已经真正关闭。消费 self，保证只通知一次
	pub fn mark_stopped(self) {
		let _ = self.stopped_tx.send(());
	}
}

#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
	/// 返回 true 表示这是第一次请求
	pub fn request(&self) -> bool {
		!self.0.send_replace(true)
	}

	pub fn is_requested(&self) -> bool {
		*self.0.borrow()
	}
}

#[derive(Debug)]
pub struct Stopped(oneshot::Receiver<()>);

impl Stopped {
	/// 等待订阅关闭。传输层没有调用 mark_stopped 就丢弃了 handle，同样视为已关闭
	pub async fn wait(self) {
		let _ = self.0.await;
	}
}
