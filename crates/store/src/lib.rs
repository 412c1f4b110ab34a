//! Persistence and lifecycle for sessions, annotations and tenants.
//!
//! [`Store`] owns every mutation and emits exactly one event per change.
//! [`TenantStore`] layers per-user ownership and API-key management on top
//! of the same store and routes its events through the user-scoped bus.
//! Durability is delegated to a [`Backend`] chosen once by
//! [`open_backend`].

pub mod api_key;
pub mod backend;
pub mod store;
pub mod tenant;

pub use api_key::{generate_api_key, hash_api_key, is_valid_api_key_format};
pub use backend::{open_backend, Backend, BackendKind};
pub use store::Store;
pub use tenant::{CreatedApiKey, TenantStore};
