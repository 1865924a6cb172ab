//! Marquee admin console client.
//!
//! # Purpose
//! Connects the [`marquee_cache::EntityCache`] to the console's REST API.
//! Reads are cached per query key. Writes change every cached view of the
//! edited entity at once, then either keep the server's answer or restore the
//! exact previous state and raise an error toast.
//!
//! # Layout
//! - [`remote`]: the REST seam, over HTTP or in memory.
//! - [`keys`]: the query key of every cached view.
//! - [`Console`]: typed reads and mutations.
//! - [`Notifier`]: where toasts for settled mutations go.
//!
//! # Example
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use marquee_client::{ClientConfig, Console, HttpRemote, TracingNotifier};
//! use marquee_common::Operator;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::from_env_or_yaml(None)?;
//! let remote = Arc::new(HttpRemote::new(&config)?);
//! let console = Console::new(&config, remote, Arc::new(TracingNotifier));
//!
//! let ops = console.collection::<Operator>();
//! let page = ops.list(&console.params(1)).await?;
//! if let Some(first) = page.items.first() {
//!     let outcome = ops.delete(&first.id).await?;
//!     println!("committed: {}", outcome.is_committed());
//! }
//! # Ok(())
//! # }
//! ```
mod config;
mod error;
pub mod keys;
mod notify;
pub mod remote;
mod resources;

pub use config::{ClientConfig, DEFAULT_API_URL, DEFAULT_PAGE_SIZE, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ClientError, ClientResult};
pub use notify::{Notifier, NotifyingListener, Toast, ToastLevel, ToastQueue, TracingNotifier};
pub use remote::{
    HttpRemote, InMemoryRemote, Method, RemoteError, RemoteRequest, RemoteSource, decode,
    seed_demo, unwrap_data,
};
pub use resources::{Collection, Console, NewNotification};
