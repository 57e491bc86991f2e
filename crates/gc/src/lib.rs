//! Garbage collection for the wharf artifact store.
//!
//! Storage objects are content addressed and shared across repositories.
//! A repository pass decides what is dead from tag history and the namespace
//! retention window, removes dead manifests and legacy images, recounts the
//! owners of the storage objects they referenced and reclaims those left with
//! none. Catalog changes commit before any bytes are deleted.
//!
//! Entry points live on [`GarbageCollector`]:
//! - [`collect`](GarbageCollector::collect) for one repository
//! - [`purge`](GarbageCollector::purge) to remove a repository outright
//! - [`find_repository_with_garbage`](GarbageCollector::find_repository_with_garbage)
//! - [`garbage_collect_storage`](GarbageCollector::garbage_collect_storage)
//!
//! [`GcWorker`] runs them periodically.

pub mod collector;
pub mod dereference;
pub mod error;
pub mod listener;
pub mod locks;
pub mod metrics;
mod purge;
pub mod reachability;
pub mod reclaim;
pub mod retention;
mod scanner;
pub mod uploads;
pub mod worker;

pub use collector::{CollectionReport, GarbageCollector};
pub use error::{GcError, GcResult};
pub use listener::{CleanupListener, ListenerId, RemovedImageStorage};
pub use retention::RetentionPolicy;
pub use uploads::UploadReap;
pub use worker::{GcWorker, PassSummary};
