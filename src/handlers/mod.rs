// handlers/mod.rs - Two-tier handler layout
//
// Public (no auth) → Protected (JWT auth, scope checked per handler)
pub mod protected; // /api/*
pub mod public; // /, /health, /auth/*
