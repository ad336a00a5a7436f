pub mod auth;
pub mod error_log;
pub mod response;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use error_log::record_errors;
pub use response::{ApiResponse, ApiResult};
