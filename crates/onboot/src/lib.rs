//! # onboot
//!
//! Startup task supervisor for Rust services.
//!
//! Run one-shot boot work (cache warming, migrations, seeding) next to
//! long-running services, each under a restart policy, and watch every
//! status change through an observer you supply.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use onboot::{ChildSpec, LogObserver, RestartPolicy, Supervisor, SupervisorConfig, WorkResult};
//!
//! async fn warm_cache() -> WorkResult {
//!     Ok(())
//! }
//!
//! async fn migrate() -> WorkResult {
//!     Ok(())
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let specs = vec![
//!     ChildSpec::new("cache-warm", RestartPolicy::Never, warm_cache),
//!     ChildSpec::new("migrate", RestartPolicy::OnAbnormalExit, migrate)
//!         .critical()
//!         .retry_budget(5),
//! ];
//!
//! let handle = Supervisor::new(SupervisorConfig::default())
//!     .with_observer(LogObserver)
//!     .start(specs)
//!     .await
//!     .unwrap();
//!
//! let state = handle.wait_for("cache-warm").await;
//! println!("{:?}", state);
//! handle.shutdown().await.unwrap();
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod observer;
pub mod supervisor;
pub mod types;

pub use child::{BoxError, BoxFuture, ChildSpec, StartFn, WorkResult};
pub use config::{Escalation, SupervisorConfig};
pub use error::{ChildError, StartupError, SupervisorError};
pub use observer::{LogObserver, NoopObserver, Observer};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use types::*;
