pub mod config;
pub mod consts;
pub mod coordinator;
pub mod errors;
pub mod handler;
pub mod init;
pub mod role;
pub mod state;
pub mod worker;
