//! DevOps Promote Library
//!
//! Trait-based promotion workflow for DevOps Center pipelines: request a
//! promotion, remember the job locally, watch it over the change-event
//! stream, and report the final state.
//!
//! # Design
//!
//! The workflow logic is not coupled to any transport or storage. You
//! implement [`DevopsBackend`] for the remote side (or use the bundled
//! [`DevopsClient`]) and pick a [`CacheStore`] for the local job cache.
//!
//! # Usage
//!
//! ```ignore
//! use devops_promote::{
//!     BaseOptions, ConsoleReporter, FileCacheStore, JobCache, OutputMode, PromoteArgs,
//!     PromotionVariant, PromotionWorkflow, WorkflowConfig, DEFAULT_TTL,
//! };
//!
//! let backend = MyBackend::new();
//! let cache = JobCache::new(FileCacheStore::new_default()?, DEFAULT_TTL);
//! let reporter = ConsoleReporter::new(OutputMode::Normal);
//! let workflow = PromotionWorkflow::new(&backend, &cache, &reporter, WorkflowConfig::default());
//!
//! let args = PromoteArgs {
//!     project_name: "Release".into(),
//!     branch_name: "uat".into(),
//!     base: BaseOptions::default(),
//!     wait: None,
//!     is_async: false,
//! };
//! let result = workflow.start(&PromotionVariant::start(false), &args).await?;
//! println!("{:?}", result.status);
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod output;
pub mod promotion;
pub mod status;
pub mod types;
pub mod workflow;

#[cfg(feature = "default-client")]
pub mod client;

pub use backend::DevopsBackend;
pub use cache::{CacheEntry, CachePayload, CacheStore, JobCache, MemoryCacheStore, DEFAULT_TTL};
pub use config::Config;
pub use error::{PromoteError, CONFLICT_ERROR_CODE};
pub use events::{ChangeEvent, EventSender, EventSubscription, ASYNC_OPERATION_CHANNEL};
pub use monitor::{JobSnapshot, JobWatch, MonitorOutcome};
pub use output::{render_report, render_result, ConsoleReporter, NullReporter, OutputMode, Reporter};
pub use promotion::{PromotionProtocol, PromotionVariant, RetryPolicy};
pub use status::{is_not_resumable, AsyncOperationStatus};
pub use types::*;
pub use workflow::{JobReport, JobSelector, PromoteArgs, PromotionWorkflow, WorkflowConfig};

#[cfg(feature = "file-storage")]
pub use cache::FileCacheStore;

#[cfg(feature = "default-client")]
pub use client::{DevopsClient, StreamingClient};
