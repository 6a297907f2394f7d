//! Handler facade bridging inbound HTTP to the auth manager, plus the
//! OpenAI-compatible error envelope and the inbound routes.

mod error;
mod handler;
mod routes;

pub use error::{build_error_response_body, ErrorMessage};
pub use handler::ProxyHandler;
pub use routes::proxy_router;
