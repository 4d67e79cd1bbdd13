//! # Reply Server
//!
//! HTTP front end over [`replygen_retrieval::ReplyEngine`]:
//!
//! - `GET /` serves the reply form
//! - `POST /generate_response` drafts a reply
//! - `GET /health` reports index statistics

pub mod handler;
pub mod routes;

pub use handler::{GenerateParams, GenerateResponse, HealthResponse, ReplyHandler};
pub use routes::{ApiError, router};
