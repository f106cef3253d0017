pub mod backend;
pub mod error;
mod locate;
pub mod models;
mod path;
pub mod search;

pub use crate::backend::ObjectStore;
pub use crate::locate::ObjectLocator;
pub use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags};
pub use crate::path::validate as validate_path;
pub use crate::search::{ObjectSearch, TagQuery};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn ObjectStore + Send + Sync>;
