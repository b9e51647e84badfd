//! Datastore backends for weft.
//!
//! A [`Store`] always keeps an in-memory [`LocalCache`] in front of at most one
//! other backend: the [`EmbeddedDatabase`] (one directory, one JSON file per
//! table) or a remote service reached over HTTP or a persistent socket.
//! Which combination a store uses is decided once, from its
//! [`DatastoreSettings`].
//!
//! This crate deals in plain JSON datasets. Resolving dependency tuples found
//! inside datasets is the runtime's job.

pub mod backend;
pub mod dataset;
pub mod embedded;
pub mod error;
pub mod local;
pub mod remote;
pub mod settings;
pub mod store;

pub use backend::{Backend, BackendFactory};
pub use dataset::{Dataset, generate_key, matches_query, merge_into};
pub use embedded::{EmbeddedDatabase, EmbeddedTable};
pub use error::StoreError;
pub use local::LocalCache;
pub use remote::{HttpTransport, RemoteBackend, SocketTransport, Transport};
pub use settings::{BackendKind, Credentials, DatastoreSettings, Session};
pub use store::Store;
