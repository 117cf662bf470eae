//! Concrete backends for the `routing` crate.
//!
//! - [`openai`]: OpenAI-compatible chat completions over `reqwest`
//! - [`profile`]: TOML/YAML profile bundles and the built-in Azure catalog
//! - [`client_pool`]: one HTTP client per endpoint
//!
//! Typical startup:
//!
//! ```rust,ignore
//! let service = providers::ProfileLoader::from_env().load()?.into_service()?;
//! let result = service.execute(&routing::TaskRequest::new("...")).await?;
//! ```

pub mod client_pool;
pub mod error;
pub mod openai;
pub mod profile;

pub use error::ProfileError;
pub use openai::{ApiStyle, ChatCompletionsBackend, Endpoint, Sampling};
pub use profile::{BackendSpec, LoadedProfile, ProfileBundle, ProfileFile, ProfileLoader};
