//! The weft engine.
//!
//! Turns declarative configuration trees into wired, initialized object
//! graphs. A [`Runtime`] owns every process-wide table (resource cache,
//! component registry, datastore table) so independent runtimes never share
//! state.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use weft_runtime::{ComponentDefinition, Runtime, RuntimeConfig};
//!
//! # async fn run() -> Result<(), weft_runtime::RuntimeError> {
//! let runtime = Runtime::new(RuntimeConfig::default());
//!
//! runtime.register(
//!     ComponentDefinition::builder("greeting")
//!         .version("1.0.0")
//!         .defaults(serde_json::json!({ "text": "hello" }))
//!         .build()?,
//! );
//!
//! // Children, resources and datasets named by dependency tuples are
//! // loaded and wired before anything is initialized.
//! let card = runtime
//!     .instantiate_json(
//!         "greeting@1.0.0",
//!         serde_json::json!({
//!             "body": ["@instantiate", "greeting@1.0.0", { "text": "nested" }],
//!             "style": ["@load", "card.css"]
//!         }),
//!     )
//!     .await?;
//! println!("{}", runtime.render(&card).await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datastore;
pub mod dependency;
pub mod error;
pub mod fetch;
pub mod instance;
pub mod loader;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod resource;
pub mod runtime;
pub mod script;
pub mod waitlist;

pub use config::RuntimeConfig;
pub use datastore::Datastore;
pub use dependency::{ComponentRef, Dependency};
pub use error::{LoadError, RuntimeError};
pub use fetch::{FetchRequest, Fetcher, FileFetcher, HttpFetcher, RoutingFetcher, StaticFetcher};
pub use instance::{Behavior, Instance, InstanceRef, PathSegment, Plain, Proxy, ProxyRef};
pub use loader::Loader;
pub use node::{Fields, Node};
pub use registry::{ComponentDefinition, Constructor, DefinitionBuilder, Registry};
pub use resource::{Resource, ResourceKind, ResourceSpec};
pub use runtime::{Runtime, RuntimeBuilder};
pub use script::{ComponentManifest, ManifestScriptHost, ScriptHost};

pub use weft_store::{Credentials, Dataset, DatastoreSettings, Session, StoreError};

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used at the trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
