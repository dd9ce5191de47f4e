//! Backend connection for NeoScaffold workflows.
//!
//! This crate connects a `neoscaffold-core` graph to an execution backend.
//!
//! # Modules
//!
//! ## Transport (`http`, `socket`)
//!
//! Authorized HTTP calls and the self-healing realtime socket:
//!
//! ```rust,ignore
//! use neoscaffold_client::{ApiClient, ClientSettings, MemoryStore, StoredSession};
//! use std::sync::Arc;
//!
//! let settings = ClientSettings::new("http://localhost:6166");
//! let session = Arc::new(StoredSession::new(Arc::new(MemoryStore::new()), None));
//! let api = ApiClient::new(&settings, session)?;
//! api.queue_prompt(&plan_json).await?;
//! ```
//!
//! ## Dispatch (`queue`)
//!
//! One dispatch loop at a time, newest plan first, stopping at the first
//! failure.
//!
//! ## Interventions (`interventions`)
//!
//! Breakpoints, stop points and restart points per workflow checksum.
//!
//! ## Workspace (`workspace`)
//!
//! Ties a graph to all of the above plus autosave:
//!
//! ```rust,ignore
//! use neoscaffold_client::{ClientSettings, FileStore, Workspace};
//! use neoscaffold_core::{ExtensionRegistry, HeadlessCanvas};
//! use std::sync::Arc;
//!
//! let settings = ClientSettings::default();
//! let store = Arc::new(FileStore::new(settings.state_dir.clone()));
//! let workspace = Arc::new(Workspace::new(
//!     settings,
//!     store,
//!     Arc::new(HeadlessCanvas::new()),
//!     ExtensionRegistry::new(),
//! )?);
//! workspace.start().await;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod interventions;
pub mod queue;
pub mod session;
pub mod socket;
pub mod storage;
pub mod workspace;

pub use config::{ClientSettings, ConfigLoader};
pub use error::{ClientError, Result};
pub use http::ApiClient;
pub use interventions::{InterventionController, InterventionRelay};
pub use queue::{DispatchReport, PlanDispatcher, QueueItem, QueueManager, QueueOutcome, QueueStatus};
pub use session::{Session, SessionHost, StoredSession};
pub use socket::{FrameSink, ReadyState, RealtimeChannel};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use workspace::{default_workflow, PrimaryAction, Workspace};
