//! # API crate — client for the committee's REST server
//!
//! Everything that talks to the remote server goes through the [`RemoteApi`]
//! trait, so the sync engine and the desk can be exercised against an
//! in-process server in tests.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`HttpApi`] | `reqwest` implementation: JSON bodies, `Authorization: Bearer <token>` |
//! | [`MemoryApi`] | In-process server with the same status semantics, plus knobs to simulate outages |
//! | [`ApiError`] | `Network` (retry later), `Auth` (sign in again), `NotFound`, `Status`, `Decode` |
//!
//! ## Endpoints
//!
//! - `POST /api/login` → `{ success, token, role }`
//! - `GET|POST /api/{residents,aids,children,imports,exports}`
//! - `PUT|DELETE /api/<collection>/<id>`
//! - `GET /api/aids?resident_id=<id>`

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::{EntityType, RecordId, Role};

pub mod error;
mod http;
mod memory;

pub use error::{ApiError, Result};
pub use http::HttpApi;
pub use memory::MemoryApi;

/// Credentials returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Operations the client performs against the remote server.
///
/// Record payloads are plain JSON so one implementation serves every
/// [`EntityType`].
pub trait RemoteApi {
    fn login(&self, username: &str, password: &str) -> impl Future<Output = Result<Session>>;

    fn list(&self, token: &str, entity: EntityType) -> impl Future<Output = Result<Vec<Value>>>;

    /// Aids recorded for one resident.
    fn list_aids_for(
        &self,
        token: &str,
        resident: &RecordId,
    ) -> impl Future<Output = Result<Vec<Value>>>;

    /// Create a record and return the server's copy, carrying its id.
    fn create(
        &self,
        token: &str,
        entity: EntityType,
        payload: &Value,
    ) -> impl Future<Output = Result<Value>>;

    fn update(
        &self,
        token: &str,
        entity: EntityType,
        id: &RecordId,
        payload: &Value,
    ) -> impl Future<Output = Result<Value>>;

    fn delete(
        &self,
        token: &str,
        entity: EntityType,
        id: &RecordId,
    ) -> impl Future<Output = Result<()>>;

    /// Succeeds when the server answers at all.
    fn ping(&self) -> impl Future<Output = Result<()>>;
}
