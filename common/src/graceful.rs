use {
	std::fmt,
	tokio::sync::mpsc::{self, error::TrySendError},
	tracing::{debug, info},
};

/// 进程收到的终止信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
	Interrupt,
	Terminate,
}

impl fmt::Display for TerminationSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TerminationSignal::Interrupt => write!(f, "SIGINT"),
			TerminationSignal::Terminate => write!(f, "SIGTERM"),
		}
	}
}

/// 监听 SIGINT / SIGTERM，把每个系统信号转换成一条 TerminationSignal
///
/// 使用 `try_send` 投递，缓冲区满时丢弃多余的信号。
/// 必须在 tokio runtime 内调用。
pub fn spawn_signal_listener(buffer: usize) -> anyhow::Result<mpsc::Receiver<TerminationSignal>> {
	let (tx, rx) = mpsc::channel(buffer.max(1));

	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		let mut sigint = signal(SignalKind::interrupt())?;
		let mut sigterm = signal(SignalKind::terminate())?;

		tokio::spawn(async move {
			loop {
				let received = tokio::select! {
					v = sigint.recv() => v.map(|_| TerminationSignal::Interrupt),
					v = sigterm.recv() => v.map(|_| TerminationSignal::Terminate),
				};
				let Some(signal) = received else { break };
				if !forward(&tx, signal) {
					break;
				}
			}
		});
	}

	#[cfg(not(unix))]
	{
		tokio::spawn(async move {
			while tokio::signal::ctrl_c().await.is_ok() {
				if !forward(&tx, TerminationSignal::Interrupt) {
					break;
				}
			}
		});
	}

	Ok(rx)
}

/// 返回 false 表示接收端已经关闭，监听任务可以退出
fn forward(tx: &mpsc::Sender<TerminationSignal>, signal: TerminationSignal) -> bool {
	match tx.try_send(signal) {
		Ok(()) => {
			info!("Received {}, requesting shutdown", signal);
			true
		}
		Err(TrySendError::Full(_)) => {
			debug!("Signal buffer full, dropping {}", signal);
			true
		}
		Err(TrySendError::Closed(_)) => false,
	}
}
