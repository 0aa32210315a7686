use {
	super::protocol::{Command, Frame, IdentifyBody, MAGIC_V2, Message, ProtocolError, RESPONSE_OK, read_frame},
	std::{io, time::Duration},
	tokio::{
		io::{AsyncWriteExt, BufReader},
		net::{
			TcpStream,
			tcp::{OwnedReadHalf, OwnedWriteHalf},
		},
		sync::{mpsc, watch},
	},
	tracing::{debug, error, info, warn},
};

/// 建立连接时的客户端参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub client_id: String,
	pub user_agent: String,
	pub heartbeat_interval: Duration,
	pub dial_timeout: Duration,
}

/// 投递给处理任务的一条消息，附带回 FIN / REQ 的通道
#[derive(Debug)]
pub struct Delivery {
	pub message: Message,
	responder: mpsc::UnboundedSender<Command>,
}

impl Delivery {
	pub fn new(message: Message, responder: mpsc::UnboundedSender<Command>) -> Self {
		Self { message, responder }
	}

	pub fn finish(self) {
		self.respond(Command::Finish(self.message.id));
	}

	pub fn requeue(self, delay: Duration) {
		self.respond(Command::Requeue { id: self.message.id, delay_ms: delay.as_millis() as u64 });
	}

	fn respond(&self, command: Command) {
		// 连接已经断开时 nsqd 会在超时后自动重新投递
		if self.responder.send(command).is_err() {
			debug!("Connection gone, response for message {} dropped", self.message.id_str());
		}
	}
}

/// 已经完成 IDENTIFY + SUB 握手的 nsqd 连接
pub struct NsqConnection {
	addr: String,
	reader: BufReader<OwnedReadHalf>,
	writer: OwnedWriteHalf,
}

impl NsqConnection {
	pub async fn connect(addr: &str, topic: &str, channel: &str, settings: &ConnectionSettings) -> Result<Self, ProtocolError> {
		let stream = tokio::time::timeout(settings.dial_timeout, TcpStream::connect(addr))
			.await
			.map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {} timed out", addr)))??;
		stream.set_nodelay(true)?;
		let (reader, writer) = stream.into_split();
		let mut conn = Self { addr: addr.to_string(), reader: BufReader::new(reader), writer };

		conn.writer.write_all(MAGIC_V2).await?;
		let identify = IdentifyBody {
			client_id: settings.client_id.clone(),
			hostname: settings.client_id.clone(),
			user_agent: settings.user_agent.clone(),
			heartbeat_interval: settings.heartbeat_interval.as_millis() as i64,
			feature_negotiation: false,
		};
		conn.send(&Command::Identify(identify)).await?;
		conn.expect_ok().await?;

		conn.send(&Command::Subscribe { topic: topic.to_string(), channel: channel.to_string() }).await?;
		conn.expect_ok().await?;

		info!("Subscribed to {}/{} on nsqd {}", topic, channel, addr);
		Ok(conn)
	}

	pub fn addr(&self) -> &str {
		&self.addr
	}

	async fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
		let buf = command.encode()?;
		self.writer.write_all(&buf).await?;
		Ok(())
	}

	async fn expect_ok(&mut self) -> Result<(), ProtocolError> {
		loop {
			match read_frame(&mut self.reader).await? {
				frame if frame.is_heartbeat() => self.send(&Command::Nop).await?,
				Frame::Response(data) if data.as_slice() == RESPONSE_OK => return Ok(()),
				Frame::Response(data) => return Err(ProtocolError::UnexpectedResponse(String::from_utf8_lossy(&data).into_owned())),
				Frame::Error(data) => return Err(ProtocolError::Remote(String::from_utf8_lossy(&data).into_owned())),
				Frame::Message(message) => return Err(ProtocolError::UnexpectedResponse(format!("message {} before subscribe finished", message.id_str()))),
			}
		}
	}

	/// 运行连接直到关闭
	///
	/// `ready` 的当前值作为初始 RDY，之后每次变化都重新发送。
	/// 收到停止请求后发送 CLS，等 CLOSE_WAIT 或对端断开；
	/// 返回前等待所有在途消息 FIN/REQ 完毕，写端随之关闭。
	/// 未请求停止时对端断开返回 Err。
	pub async fn run(self, mut ready: watch::Receiver<u64>, deliveries: mpsc::Sender<Delivery>, mut stop: watch::Receiver<bool>) -> Result<(), ProtocolError> {
		let Self { addr, mut reader, writer } = self;

		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
		let writer_task = tokio::spawn(write_loop(addr.clone(), writer, cmd_rx));

		// read_frame 不能被 select 取消，单独放一个任务
		let (frame_tx, mut frame_rx) = mpsc::channel(16);
		let reader_task = tokio::spawn(async move {
			loop {
				let frame = read_frame(&mut reader).await;
				let failed = frame.is_err();
				if frame_tx.send(frame).await.is_err() || failed {
					break;
				}
			}
		});

		let _ = cmd_tx.send(Command::Ready(*ready.borrow_and_update()));

		let mut ready_open = true;
		let mut closing = false;
		if *stop.borrow_and_update() {
			closing = true;
			let _ = cmd_tx.send(Command::Close);
		}

		let result = loop {
			tokio::select! {
				frame = frame_rx.recv() => {
					let frame = match frame {
						Some(Ok(frame)) => frame,
						Some(Err(ProtocolError::Io(e))) if closing && e.kind() == io::ErrorKind::UnexpectedEof => break Ok(()),
						Some(Err(e)) => break Err(e),
						None => break Err(ProtocolError::Closed),
					};
					match frame {
						frame if frame.is_heartbeat() => {
							let _ = cmd_tx.send(Command::Nop);
						}
						frame if frame.is_close_wait() => {
							info!("nsqd {} acknowledged close", addr);
							break Ok(());
						}
						Frame::Response(_) => {}
						Frame::Error(data) => {
							// E_FIN_FAILED 之类的错误不致命，记录后继续
							warn!("nsqd {} returned error: {}", addr, String::from_utf8_lossy(&data));
						}
						Frame::Message(message) => {
							if deliveries.send(Delivery::new(message, cmd_tx.clone())).await.is_err() {
								break Err(ProtocolError::Closed);
							}
						}
					}
				}
				changed = ready.changed(), if ready_open && !closing => {
					match changed {
						Ok(()) => {
							let count = *ready.borrow_and_update();
							debug!("Updating RDY to {} on nsqd {}", count, addr);
							let _ = cmd_tx.send(Command::Ready(count));
						}
						Err(_) => ready_open = false,
					}
				}
				changed = stop.changed(), if !closing => {
					if changed.is_err() || *stop.borrow_and_update() {
						debug!("Closing connection to nsqd {}", addr);
						closing = true;
						let _ = cmd_tx.send(Command::Close);
					}
				}
			}
		};

		drop(frame_rx);
		drop(cmd_tx);
		drop(deliveries);
		let _ = writer_task.await;
		reader_task.abort();
		result
	}
}

async fn write_loop(addr: String, mut writer: OwnedWriteHalf, mut commands: mpsc::UnboundedReceiver<Command>) {
	while let Some(command) = commands.recv().await {
		let buf = match command.encode() {
			Ok(buf) => buf,
			Err(e) => {
				error!("Failed to encode command for nsqd {}: {}", addr, e);
				continue;
			}
		};
		if let Err(e) = writer.write_all(&buf).await {
			warn!("Write to nsqd {} failed: {}", addr, e);
			break;
		}
	}
	let _ = writer.shutdown().await;
}
