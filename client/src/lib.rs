//! # CrudSync Client
//!
//! Async session that binds the `crudsync-engine` cache and pending-change
//! log to a REST-style CRUD backend.
//!
//! ```rust,no_run
//! use crudsync_client::{Config, HttpTransport, Session};
//! use crudsync_engine::{Row, Value};
//!
//! # async fn run() -> crudsync_client::Result<()> {
//! let config = Config::new("https://api.example.com/crud.php")?.with_batch(true);
//! let session = Session::new(config.clone(), HttpTransport::new(&config));
//! session.connect().await?;
//!
//! session.load("/student", vec![]).await?;
//! let payload = Row::from([("name".to_string(), Value::from("Ann"))]);
//! session.create("/student", payload).await?;
//!
//! if let Err(errors) = session.submit_changes().await {
//!     eprintln!("{}", errors);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod inflight;
pub mod session;
mod submit;
pub mod transport;

pub use config::{BindingMode, Config, ConfigError};
pub use error::{ClientError, Result, TransportError};
pub use events::{EventBus, SessionEvent};
pub use http::HttpTransport;
pub use inflight::InFlight;
pub use session::{Cached, Fetched, Session};
pub use transport::{Request, Transport};
