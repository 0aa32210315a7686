//! nsqd TCP 协议 V2 编解码
//!
//! 帧格式: `[size: u32 BE][frame_type: u32 BE][data]`，size 包含 frame_type 的 4 个字节。
//! 消息帧 data: `[timestamp: i64 BE][attempts: u16 BE][id: 16 bytes][body]`。

use {
	serde::Serialize,
	thiserror::Error,
	tokio::io::{AsyncRead, AsyncReadExt},
};

pub const MAGIC_V2: &[u8; 4] = b"  V2";

pub const FRAME_TYPE_RESPONSE: u32 = 0;
pub const FRAME_TYPE_ERROR: u32 = 1;
pub const FRAME_TYPE_MESSAGE: u32 = 2;

pub const RESPONSE_OK: &[u8] = b"OK";
pub const HEARTBEAT: &[u8] = b"_heartbeat_";
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

pub const MESSAGE_ID_LEN: usize = 16;
const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;

/// 单帧上限，超过视为协议错误
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const MAX_NAME_LEN: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to encode identify body: {0}")]
	Json(#[from] serde_json::Error),

	#[error("frame size {0} out of range")]
	FrameSize(u32),

	#[error("unknown frame type {0}")]
	FrameType(u32),

	#[error("message frame too short: {0} bytes")]
	ShortMessage(usize),

	#[error("nsqd returned error: {0}")]
	Remote(String),

	#[error("unexpected response: {0}")]
	UnexpectedResponse(String),

	#[error("invalid topic or channel name: {0:?}")]
	InvalidName(String),

	#[error("connection closed")]
	Closed,
}

pub type MessageId = [u8; MESSAGE_ID_LEN];

/// nsqd 投递的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub id: MessageId,
	pub attempts: u16,
	/// 纳秒时间戳
	pub timestamp: i64,
	pub body: Vec<u8>,
}

impl Message {
	pub fn id_str(&self) -> String {
		String::from_utf8_lossy(&self.id).into_owned()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	Response(Vec<u8>),
	Error(Vec<u8>),
	Message(Message),
}

impl Frame {
	pub fn is_heartbeat(&self) -> bool {
		matches!(self, Frame::Response(data) if data.as_slice() == HEARTBEAT)
	}

	pub fn is_close_wait(&self) -> bool {
		matches!(self, Frame::Response(data) if data.as_slice() == CLOSE_WAIT)
	}
}

/// 读取一帧，不是 cancel-safe 的，只能在独立的读任务中循环调用
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
	let size = reader.read_u32().await?;
	if !(4..=MAX_FRAME_SIZE).contains(&size) {
		return Err(ProtocolError::FrameSize(size));
	}
	let frame_type = reader.read_u32().await?;
	let mut data = vec![0u8; (size - 4) as usize];
	reader.read_exact(&mut data).await?;

	match frame_type {
		FRAME_TYPE_RESPONSE => Ok(Frame::Response(data)),
		FRAME_TYPE_ERROR => Ok(Frame::Error(data)),
		FRAME_TYPE_MESSAGE => Ok(Frame::Message(decode_message(&data)?)),
		other => Err(ProtocolError::FrameType(other)),
	}
}

pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
	if data.len() < MESSAGE_HEADER_LEN {
		return Err(ProtocolError::ShortMessage(data.len()));
	}
	let mut timestamp = [0u8; 8];
	timestamp.copy_from_slice(&data[0..8]);
	let mut attempts = [0u8; 2];
	attempts.copy_from_slice(&data[8..10]);
	let mut id = [0u8; MESSAGE_ID_LEN];
	id.copy_from_slice(&data[10..MESSAGE_HEADER_LEN]);

	Ok(Message { id, attempts: u16::from_be_bytes(attempts), timestamp: i64::from_be_bytes(timestamp), body: data[MESSAGE_HEADER_LEN..].to_vec() })
}

/// 按服务端格式编码一帧，nsqd 侧和测试用
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
	let (frame_type, data) = match frame {
		Frame::Response(data) => (FRAME_TYPE_RESPONSE, data.clone()),
		Frame::Error(data) => (FRAME_TYPE_ERROR, data.clone()),
		Frame::Message(message) => {
			let mut data = Vec::with_capacity(MESSAGE_HEADER_LEN + message.body.len());
			data.extend_from_slice(&message.timestamp.to_be_bytes());
			data.extend_from_slice(&message.attempts.to_be_bytes());
			data.extend_from_slice(&message.id);
			data.extend_from_slice(&message.body);
			(FRAME_TYPE_MESSAGE, data)
		}
	};
	let mut buf = Vec::with_capacity(8 + data.len());
	buf.extend_from_slice(&(data.len() as u32 + 4).to_be_bytes());
	buf.extend_from_slice(&frame_type.to_be_bytes());
	buf.extend_from_slice(&data);
	buf
}

/// IDENTIFY 命令的 JSON 体
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyBody {
	pub client_id: String,
	pub hostname: String,
	pub user_agent: String,
	/// 毫秒
	pub heartbeat_interval: i64,
	pub feature_negotiation: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
	Identify(IdentifyBody),
	Subscribe { topic: String, channel: String },
	Ready(u64),
	Finish(MessageId),
	Requeue { id: MessageId, delay_ms: u64 },
	Nop,
	Close,
}

impl Command {
	pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
		let buf = match self {
			Command::Identify(body) => {
				let json = serde_json::to_vec(body)?;
				let mut buf = b"IDENTIFY\n".to_vec();
				buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
				buf.extend_from_slice(&json);
				buf
			}
			Command::Subscribe { topic, channel } => format!("SUB {} {}\n", topic, channel).into_bytes(),
			Command::Ready(count) => format!("RDY {}\n", count).into_bytes(),
			Command::Finish(id) => {
				let mut buf = b"FIN ".to_vec();
				buf.extend_from_slice(id);
				buf.push(b'\n');
				buf
			}
			Command::Requeue { id, delay_ms } => {
				let mut buf = b"REQ ".to_vec();
				buf.extend_from_slice(id);
				buf.extend_from_slice(format!(" {}\n", delay_ms).as_bytes());
				buf
			}
			Command::Nop => b"NOP\n".to_vec(),
			Command::Close => b"CLS\n".to_vec(),
		};
		Ok(buf)
	}
}

/// topic / channel 命名规则: 1-64 个 `[.a-zA-Z0-9_-]`，可带 `#ephemeral` 后缀
pub fn is_valid_name(name: &str) -> bool {
	let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
	if name.is_empty() || name.len() > MAX_NAME_LEN || base.is_empty() {
		return false;
	}
	base.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}
