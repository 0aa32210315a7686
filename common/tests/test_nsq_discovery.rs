//! 通过 nsqlookupd 发现 nsqd 的订阅测试

mod test_utils;

use {
	common::{
		nsq::NsqTransport,
		subscription::{MessageHandler, Transport},
	},
	std::{sync::Arc, time::Duration},
	test_utils::{FakeLookupd, FakeNsqd, NsqdEvent, NsqdScript, RecordingHandler, lookup_settings},
	tokio::net::TcpListener,
};

const WAIT: Duration = Duration::from_secs(5);

fn handler() -> Arc<dyn MessageHandler> {
	RecordingHandler::new(false).0
}

#[tokio::test]
async fn test_subscribe_through_lookupd() {
	let mut nsqd = FakeNsqd::start(NsqdScript::default()).await;
	let lookupd = FakeLookupd::start(vec![nsqd.addr.clone()]).await;
	let transport = NsqTransport::new(lookup_settings(&lookupd.addr)).unwrap();

	let subscription = transport.subscribe("chat", "dispatcher", handler()).await.unwrap();

	assert_eq!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Subscribe { .. })).await, NsqdEvent::Subscribe { topic: "chat".to_string(), channel: "dispatcher".to_string() });
	assert_eq!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Ready(_))).await, NsqdEvent::Ready(4));

	let (stop, stopped) = subscription.split();
	stop.request();
	assert_eq!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Close)).await, NsqdEvent::Close);
	tokio::time::timeout(WAIT, stopped.wait()).await.expect("subscription did not stop");
}

#[tokio::test]
async fn test_no_producer_yet_waits_for_lookupd() {
	let mut nsqd = FakeNsqd::start(NsqdScript::default()).await;
	let lookupd = FakeLookupd::start(Vec::new()).await;
	let transport = NsqTransport::new(lookup_settings(&lookupd.addr)).unwrap();

	let subscription = transport.subscribe("chat", "dispatcher", handler()).await.unwrap();
	assert!(tokio::time::timeout(Duration::from_millis(200), nsqd.events.recv()).await.is_err());

	// topic 第一次有 producer，下一轮轮询连上
	lookupd.set_producers(vec![nsqd.addr.clone()]);
	assert_eq!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Ready(_))).await, NsqdEvent::Ready(4));

	let (stop, stopped) = subscription.split();
	stop.request();
	tokio::time::timeout(WAIT, stopped.wait()).await.expect("subscription did not stop");
}

#[tokio::test]
async fn test_stop_without_producers_ends_subscription() {
	let lookupd = FakeLookupd::start(Vec::new()).await;
	let transport = NsqTransport::new(lookup_settings(&lookupd.addr)).unwrap();

	let subscription = transport.subscribe("chat", "dispatcher", handler()).await.unwrap();
	let (stop, stopped) = subscription.split();
	assert!(stop.request());

	tokio::time::timeout(WAIT, stopped.wait()).await.expect("subscription did not stop");
}

#[tokio::test]
async fn test_discovered_producer_rebalances_ready() {
	let mut first = FakeNsqd::start(NsqdScript::default()).await;
	let mut second = FakeNsqd::start(NsqdScript::default()).await;
	let lookupd = FakeLookupd::start(vec![first.addr.clone()]).await;
	let transport = NsqTransport::new(lookup_settings(&lookupd.addr)).unwrap();

	let subscription = transport.subscribe("chat", "dispatcher", handler()).await.unwrap();
	assert_eq!(first.wait_for(|e| matches!(e, NsqdEvent::Ready(_))).await, NsqdEvent::Ready(4));

	// 两条连接合计不超过 max_in_flight = 4
	lookupd.set_producers(vec![first.addr.clone(), second.addr.clone()]);
	assert_eq!(second.wait_for(|e| matches!(e, NsqdEvent::Ready(_))).await, NsqdEvent::Ready(2));
	assert_eq!(first.wait_for(|e| matches!(e, NsqdEvent::Ready(_))).await, NsqdEvent::Ready(2));

	let (stop, stopped) = subscription.split();
	stop.request();
	tokio::time::timeout(WAIT, stopped.wait()).await.expect("subscription did not stop");
}

#[tokio::test]
async fn test_lost_producer_is_reconnected() {
	let mut nsqd = FakeNsqd::start(NsqdScript { drop_after_ready: true, ..Default::default() }).await;
	let lookupd = FakeLookupd::start(vec![nsqd.addr.clone()]).await;
	let transport = NsqTransport::new(lookup_settings(&lookupd.addr)).unwrap();

	let subscription = transport.subscribe("chat", "dispatcher", handler()).await.unwrap();
	nsqd.wait_for(|e| matches!(e, NsqdEvent::Subscribe { .. })).await;
	assert_eq!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Disconnected)).await, NsqdEvent::Disconnected);

	// 连接断开后订阅仍然存活，下一轮轮询重新连上
	assert!(matches!(nsqd.wait_for(|e| matches!(e, NsqdEvent::Subscribe { .. })).await, NsqdEvent::Subscribe { .. }));

	let (stop, stopped) = subscription.split();
	stop.request();
	tokio::time::timeout(WAIT, stopped.wait()).await.expect("subscription did not stop");
}

#[tokio::test]
async fn test_unreachable_lookupd_fails_subscribe() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap().to_string();
	drop(listener);
	let transport = NsqTransport::new(lookup_settings(&addr)).unwrap();

	assert!(transport.subscribe("chat", "dispatcher", handler()).await.is_err());
}
