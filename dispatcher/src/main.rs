use {
	clap::Parser,
	common::{
		consts::{DISPATCHER_CONFIG_PATH, SIGNAL_BUFFER},
		graceful,
	},
	dispatcher::{
		config,
		coordinator::{Coordinator, ShutdownOutcome},
		init,
	},
	tracing::{error, info},
};

#[derive(Debug, Parser)]
#[command(name = "dispatcher", about = "Consume nsq topics and dispatch messages to the state service")]
struct Args {
	/// 配置文件的路径
	#[arg(short = 'c', long = "config", default_value = DISPATCHER_CONFIG_PATH)]
	config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let config = config::load_config(&args.config)?;
	// 校验失败时日志还没有初始化，错误由 main 的返回值输出
	config::check_config(&config)?;
	init::init_logging(&config)?;

	// 先注册信号，启动期间收到的信号会在事件循环开始后处理
	let signals = graceful::spawn_signal_listener(SIGNAL_BUFFER)?;
	let transport = init::init_transport(&config)?;
	let handler = init::init_handler(&config)?;

	let coordinator = match Coordinator::start(&config, transport, handler).await {
		Ok(coordinator) => coordinator,
		Err(e) => {
			error!("Failed to start dispatcher: {}", e);
			return Err(e.into());
		}
	};

	info!("🚀 Dispatcher started, topics: {:?}", coordinator.topics());

	match coordinator.run(signals).await {
		ShutdownOutcome::Drained => {
			info!("Dispatcher stopped");
			Ok(())
		}
		ShutdownOutcome::Abandoned(topics) => {
			error!("Dispatcher exited with workers still running: {:?}", topics);
			Err(anyhow::anyhow!("{} workers did not stop in time", topics.len()))
		}
	}
}
