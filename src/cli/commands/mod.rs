pub mod auth;
pub mod logs;
pub mod module;
pub mod server;
