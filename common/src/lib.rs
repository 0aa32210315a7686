pub mod consts;
pub mod graceful;
pub mod logging;
pub mod nsq;
pub mod subscription;
