pub mod executor;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod providers;
pub mod repository;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use harvest::{ExtentError, ExtractOptions};
pub use model::*;
pub use providers::{ContentProvider, ProviderConfig, ProviderError, ProviderRegistry};
pub use repository::RepositoryOrchestrator;
pub use traits::*;
