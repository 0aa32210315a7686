use {
	crate::{
		role::Role,
		state::{RemoteState, StateEvent},
	},
	anyhow::Context,
	async_trait::async_trait,
	common::{nsq::Message, subscription::MessageHandler},
	serde::Deserialize,
	serde_json::Value,
	tracing::{debug, error},
};

/// topic 上的消息格式
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchMessage {
	#[serde(rename = "type")]
	pub kind: String,
	pub uid: String,
	#[serde(default)]
	pub data: Value,
}

/// 按发送方身份把消息转发给远端状态服务
pub struct DispatchHandler {
	state: RemoteState,
}

impl DispatchHandler {
	pub fn new(state: RemoteState) -> Self {
		Self { state }
	}
}

#[async_trait]
impl MessageHandler for DispatchHandler {
	async fn handle_message(&self, message: &Message) -> anyhow::Result<()> {
		// 解析失败的消息重试也不会成功，记录后直接确认
		let dispatch: DispatchMessage = match serde_json::from_slice(&message.body) {
			Ok(dispatch) => dispatch,
			Err(e) => {
				error!("Failed to deserialize dispatch message {}: {}", message.id_str(), e);
				return Ok(());
			}
		};

		let role = Role::from_uid(&dispatch.uid);
		debug!("Dispatching {} from {} {}", dispatch.kind, role, dispatch.uid);

		let event = StateEvent { role, uid: &dispatch.uid, kind: &dispatch.kind, data: &dispatch.data };
		self.state.apply(&event).await.with_context(|| format!("Failed to apply {} event from {}", dispatch.kind, dispatch.uid))
	}
}
