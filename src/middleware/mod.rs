// Middleware: CORS, per-session rate limiting, session extraction

pub mod cors;
pub mod rate_limiter;
pub mod session;

pub use cors::cors_layer;
pub use rate_limiter::{rate_limiter_middleware, SessionRateLimiter};
pub use session::CurrentSession;

pub const SESSION_HEADER: &str = "x-session-id";
