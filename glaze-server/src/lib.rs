pub mod auth;
pub mod error;
pub mod http;
pub mod state;
pub mod subsystems;

pub use http::{build_router, start_http_server};
pub use state::HttpState;
