//! Repository traits for catalog operations.

pub mod gc;
pub mod images;
pub mod labels;
pub mod manifests;
pub mod namespaces;
pub mod repositories;
pub mod storage;
pub mod tags;

pub use gc::{CatalogTransaction, GcRepo};
pub use images::ImageRepo;
pub use labels::LabelRepo;
pub use manifests::{ManifestRepo, NewLabel, NewManifest};
pub use namespaces::NamespaceRepo;
pub use repositories::RepositoryRepo;
pub use storage::StorageRepo;
pub use tags::TagRepo;
