pub mod conn;
pub mod consumer;
pub mod lookup;
pub mod protocol;

pub use {
	consumer::{NsqSettings, NsqTransport},
	protocol::Message,
};
