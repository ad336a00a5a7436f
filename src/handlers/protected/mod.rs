// handlers/protected/mod.rs - Handlers behind JWT authentication
//
// Route Prefix: /api/*
// Read handlers require `modules:read`, mutating handlers `modules:write`.

pub mod auth;
pub mod deploy;
pub mod form;
pub mod history;
pub mod lifecycle;
pub mod logs;
pub mod modules;
pub mod versions;
