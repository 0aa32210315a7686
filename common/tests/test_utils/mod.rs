use {
	axum::{Json, Router, routing::get},
	common::{
		nsq::{
			Message, NsqSettings,
			protocol::{CLOSE_WAIT, Frame, HEARTBEAT, RESPONSE_OK, encode_frame},
		},
		subscription::MessageHandler,
	},
	std::{
		sync::{
			Arc, Mutex,
			atomic::{AtomicUsize, Ordering},
		},
		time::Duration,
	},
	tokio::{
		io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
		net::{TcpListener, TcpStream},
		sync::mpsc,
	},
};

/// 伪 nsqd 收到的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NsqdEvent {
	Identify(serde_json::Value),
	Subscribe { topic: String, channel: String },
	Ready(u64),
	Finish(String),
	Requeue { id: String, delay_ms: u64 },
	Nop,
	Close,
	Disconnected,
}

/// 每条连接的行为
#[derive(Debug, Clone, Default)]
pub struct NsqdScript {
	/// RDY 之后投递的消息 (attempts, body)
	pub messages: Vec<(u16, Vec<u8>)>,
	/// 投递完消息后发一次心跳
	pub heartbeat: bool,
	/// 投递完消息后直接断开
	pub drop_after_ready: bool,
}

pub struct FakeNsqd {
	pub addr: String,
	pub events: mpsc::UnboundedReceiver<NsqdEvent>,
}

impl FakeNsqd {
	pub async fn start(script: NsqdScript) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		let (events_tx, events) = mpsc::unbounded_channel();

		tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				tokio::spawn(serve(stream, script.clone(), events_tx.clone()));
			}
		});

		Self { addr, events }
	}

	/// 等待下一条满足条件的事件，跳过其它事件
	pub async fn wait_for(&mut self, predicate: impl Fn(&NsqdEvent) -> bool) -> NsqdEvent {
		tokio::time::timeout(Duration::from_secs(5), async {
			loop {
				let event = self.events.recv().await.expect("fake nsqd stopped");
				if predicate(&event) {
					return event;
				}
			}
		})
		.await
		.expect("timed out waiting for nsqd event")
	}
}

#[allow(dead_code)]
pub fn message_id(n: usize) -> String {
	format!("{:016}", n)
}

async fn serve(stream: TcpStream, script: NsqdScript, events: mpsc::UnboundedSender<NsqdEvent>) {
	let (reader, mut writer) = stream.into_split();
	let mut reader = BufReader::new(reader);

	let mut magic = [0u8; 4];
	if reader.read_exact(&mut magic).await.is_err() || &magic != b"  V2" {
		return;
	}

	loop {
		let mut line = Vec::new();
		match reader.read_until(b'\n', &mut line).await {
			Ok(0) | Err(_) => break,
			Ok(_) => {}
		}
		let line = String::from_utf8_lossy(&line).trim_end().to_string();
		let parts: Vec<&str> = line.split(' ').collect();

		match parts[0] {
			"IDENTIFY" => {
				let size = reader.read_u32().await.unwrap() as usize;
				let mut body = vec![0u8; size];
				reader.read_exact(&mut body).await.unwrap();
				let _ = events.send(NsqdEvent::Identify(serde_json::from_slice(&body).unwrap()));
				writer.write_all(&encode_frame(&Frame::Response(RESPONSE_OK.to_vec()))).await.unwrap();
			}
			"SUB" => {
				let _ = events.send(NsqdEvent::Subscribe { topic: parts[1].to_string(), channel: parts[2].to_string() });
				writer.write_all(&encode_frame(&Frame::Response(RESPONSE_OK.to_vec()))).await.unwrap();
			}
			"RDY" => {
				let _ = events.send(NsqdEvent::Ready(parts[1].parse().unwrap()));
				for (n, (attempts, body)) in script.messages.iter().enumerate() {
					let mut id = [0u8; 16];
					id.copy_from_slice(message_id(n).as_bytes());
					let message = Message { id, attempts: *attempts, timestamp: 1_700_000_000_000_000_000, body: body.clone() };
					writer.write_all(&encode_frame(&Frame::Message(message))).await.unwrap();
				}
				if script.heartbeat {
					writer.write_all(&encode_frame(&Frame::Response(HEARTBEAT.to_vec()))).await.unwrap();
				}
				if script.drop_after_ready {
					break;
				}
			}
			"FIN" => {
				let _ = events.send(NsqdEvent::Finish(parts[1].to_string()));
			}
			"REQ" => {
				let _ = events.send(NsqdEvent::Requeue { id: parts[1].to_string(), delay_ms: parts[2].parse().unwrap() });
			}
			"NOP" => {
				let _ = events.send(NsqdEvent::Nop);
			}
			"CLS" => {
				let _ = events.send(NsqdEvent::Close);
				let _ = writer.write_all(&encode_frame(&Frame::Response(CLOSE_WAIT.to_vec()))).await;
			}
			_ => {}
		}
	}

	let _ = events.send(NsqdEvent::Disconnected);
}

/// 伪 nsqlookupd，producer 列表可以在测试中途修改
#[allow(dead_code)]
pub struct FakeLookupd {
	pub addr: String,
	producers: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl FakeLookupd {
	pub async fn start(producers: Vec<String>) -> Self {
		let producers = Arc::new(Mutex::new(producers));
		let router = Router::new().route(
			"/lookup",
			get({
				let producers = producers.clone();
				move || {
					let producers: Vec<serde_json::Value> = producers
						.lock()
						.unwrap()
						.iter()
						.map(|addr| {
							let (host, port) = addr.rsplit_once(':').unwrap();
							serde_json::json!({"broadcast_address": host, "tcp_port": port.parse::<u16>().unwrap()})
						})
						.collect();
					async move { Json(serde_json::json!({"channels": [], "producers": producers})) }
				}
			}),
		);

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		tokio::spawn(async move {
			axum::serve(listener, router).await.unwrap();
		});
		Self { addr, producers }
	}

	pub fn set_producers(&self, producers: Vec<String>) {
		*self.producers.lock().unwrap() = producers;
	}
}

/// lookupd 模式，轮询间隔取最小值 1s
#[allow(dead_code)]
pub fn lookup_settings(lookupd_addr: &str) -> NsqSettings {
	let mut settings = test_settings(Vec::new());
	settings.lookupd_http_addresses = vec![lookupd_addr.to_string()];
	settings.lookupd_poll_interval = Duration::from_secs(1);
	settings
}

pub fn test_settings(nsqd_tcp_addresses: Vec<String>) -> NsqSettings {
	NsqSettings {
		nsqd_tcp_addresses,
		lookupd_http_addresses: Vec::new(),
		max_in_flight: 4,
		concurrent_handlers: 2,
		max_attempts: 5,
		requeue_delay: Duration::from_millis(1000),
		max_requeue_delay: Duration::from_millis(5000),
		heartbeat_interval: Duration::from_secs(30),
		lookupd_poll_interval: Duration::from_secs(60),
		dial_timeout: Duration::from_secs(1),
		user_agent: "dispatcher-test".to_string(),
		client_id_prefix: "test".to_string(),
	}
}

/// 记录收到的消息体，按需返回失败
pub struct RecordingHandler {
	pub calls: AtomicUsize,
	pub bodies: mpsc::UnboundedSender<Vec<u8>>,
	pub fail: bool,
}

#[allow(dead_code)]
impl RecordingHandler {
	pub fn new(fail: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
		let (bodies, rx) = mpsc::unbounded_channel();
		(Arc::new(Self { calls: AtomicUsize::new(0), bodies, fail }), rx)
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl MessageHandler for RecordingHandler {
	async fn handle_message(&self, message: &Message) -> anyhow::Result<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let _ = self.bodies.send(message.body.clone());
		if self.fail { Err(anyhow::anyhow!("handler failed")) } else { Ok(()) }
	}
}
