//! `reqrun` is an HTTP client convenience layer: request builders, ordered
//! middleware and interception, and a bounded-concurrency queue with batch
//! lifecycle hooks, over a pluggable transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use reqrun::prelude::{Client, Configuration};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Todo {
//!     id: u64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::try_new(
//!         Configuration::for_base_url("https://api.example.com")
//!             .try_with_default_header("accept", "application/json")?,
//!     )?;
//!
//!     let todo: Todo = client
//!         .get("/todos/1")
//!         .query_pair("expand", "notes")
//!         .send_json()
//!         .await?;
//!
//!     println!("todo #{}: {}", todo.id, todo.title);
//!     Ok(())
//! }
//! ```
//!
//! # Queued Batches
//!
//! ```no_run
//! use reqrun::prelude::{Client, Configuration, FailureMode, Queue};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_new(Configuration::for_base_url("https://api.example.com"))?;
//! let queue = Queue::builder(client.clone())
//!     .max_concurrent(4)
//!     .failure_mode(FailureMode::CancelAll)
//!     .after_all(|failed| println!("batch done, failed={failed}"))
//!     .build();
//!
//! let handle = queue.enqueue(client.get("/todos/1").build()?);
//! let response = handle.outcome().await?;
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod config;
mod dispatch;
mod error;
mod interceptor;
mod middleware;
mod queue;
mod request;
mod response;
mod router;
mod transport;
mod util;

pub use crate::body::{BodyEncoding, MultipartPart, Params};
pub use crate::client::{Client, ClientBuilder};
pub use crate::config::{Configuration, StatusPolicy};
pub use crate::error::{Error, ErrorCode};
pub use crate::interceptor::{AttemptRecord, InterceptionAction, Interceptor};
pub use crate::middleware::RequestMiddleware;
pub use crate::queue::{
    AttemptError, AttemptView, FailureMode, Queue, QueueBuilder, RequestHandle, RequestInfo,
};
pub use crate::request::{Request, RequestBuilder, RequestState};
pub use crate::response::{ImageData, ImageFormat, Response, Transformer};
pub use crate::router::{Route, RouteConfiguration, Router};
pub use crate::transport::{
    HyperTransport, ProgressHandler, Transport, TransportFuture, TransportReply, TransportRequest,
};

pub type Result<T> = std::result::Result<T, Error>;

/// One-line import for the common surface.
pub mod prelude {
    pub use crate::body::{BodyEncoding, MultipartPart, Params};
    pub use crate::client::Client;
    pub use crate::config::{Configuration, StatusPolicy};
    pub use crate::error::{Error, ErrorCode};
    pub use crate::interceptor::{InterceptionAction, Interceptor};
    pub use crate::middleware::RequestMiddleware;
    pub use crate::queue::{FailureMode, Queue, RequestHandle};
    pub use crate::request::RequestState;
    pub use crate::response::Response;
    pub use crate::router::{Route, RouteConfiguration, Router};
}
