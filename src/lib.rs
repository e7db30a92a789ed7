#[cfg(feature = "api")]
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod graphs;
pub mod integrity;
pub mod models;
pub mod store;
pub mod users;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppState, GraphBoardApp, HasAuthenticator, HasStores, router, routes};
    pub use crate::auth::{Authenticator, Identity};
    pub use crate::config::Config;
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::graphs::GraphStore;
    pub use crate::integrity::{ensure_graph_integrity, graph_integrity_violations};
    pub use crate::models::{
        CreateGraphPayload, CreateUserPayload, DataEnvelope, FailureEnvelope, Graph, GraphEdge,
        GraphId, GraphNode, PublicUser, UpdateGraphPayload, UpdateUserPayload, User, UserId,
    };
    pub use crate::store::{Record, RecordStore};
    pub use crate::users::UserStore;
}
