use {
	crate::{config::DispatcherConfig, handler::DispatchHandler, state::RemoteState},
	common::{
		nsq::NsqTransport,
		subscription::{MessageHandler, Transport},
	},
	std::sync::Arc,
	tracing::info,
};

/// 日志配置已经在 check_config 中校验过
pub fn init_logging(config: &DispatcherConfig) -> anyhow::Result<()> {
	common::logging::init_logging(&config.logging)
}

pub fn init_transport(config: &DispatcherConfig) -> anyhow::Result<Arc<dyn Transport>> {
	let transport = NsqTransport::new(config.nsq_settings())?;
	if config.lookupd_http_addresses.is_empty() {
		info!("Using nsqd {:?}", config.nsqd_tcp_addresses);
	} else {
		info!("Using nsqlookupd {:?}", config.lookupd_http_addresses);
	}
	Ok(Arc::new(transport))
}

pub fn init_handler(config: &DispatcherConfig) -> anyhow::Result<Arc<dyn MessageHandler>> {
	let state = RemoteState::new(&config.state_url, config.state_timeout())?;
	info!("Remote state service at {}", state.events_url());
	Ok(Arc::new(DispatchHandler::new(state)))
}
