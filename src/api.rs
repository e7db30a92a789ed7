use std::any::Any;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, Identity};
use crate::config::Config;
use crate::error::{ErrorKind, LibError};
use crate::graphs::GraphStore;
use crate::models::{
    CreateGraphPayload, CreateUserPayload, DataEnvelope, FailureEnvelope, GraphId, LoginPayload,
    LoginResponse, LoginUser, SearchQuery, UpdateGraphPayload, UpdateUserPayload, UserId,
};
use crate::users::UserStore;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "graphboard api request failed");
        } else {
            tracing::warn!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "graphboard api request rejected");
        }
        (status, Json(FailureEnvelope::new(self.0.public))).into_response()
    }
}

pub trait HasStores {
    fn users(&self) -> Arc<UserStore>;
    fn graphs(&self) -> Arc<GraphStore>;
}

pub trait HasAuthenticator {
    fn authenticator(&self) -> Arc<Authenticator>;
}

pub trait GraphBoardApp: HasStores + HasAuthenticator {}

#[derive(Clone)]
pub struct AppState {
    users: Arc<UserStore>,
    graphs: Arc<GraphStore>,
    authenticator: Arc<Authenticator>,
}

impl AppState {
    pub fn new(users: UserStore, graphs: GraphStore, authenticator: Authenticator) -> Self {
        Self {
            users: Arc::new(users),
            graphs: Arc::new(graphs),
            authenticator: Arc::new(authenticator),
        }
    }

    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let authenticator =
            Authenticator::new(config.jwt_secret.as_bytes(), config.token_ttl_secs)?;
        Ok(Self::new(
            UserStore::new(config.users_path()),
            GraphStore::new(config.graphs_path()),
            authenticator,
        ))
    }
}

impl HasStores for AppState {
    fn users(&self) -> Arc<UserStore> {
        Arc::clone(&self.users)
    }

    fn graphs(&self) -> Arc<GraphStore> {
        Arc::clone(&self.graphs)
    }
}

impl HasAuthenticator for AppState {
    fn authenticator(&self) -> Arc<Authenticator> {
        Arc::clone(&self.authenticator)
    }
}

impl GraphBoardApp for AppState {}

impl<S> FromRequestParts<S> for Identity
where
    S: HasAuthenticator + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Ok(state.authenticator().verify_header(header)?)
    }
}

/// Request bodies accepted by the API, with the message returned when a body
/// cannot be parsed.
pub trait RequestPayload: DeserializeOwned + Send {
    const INVALID_MESSAGE: &'static str;
}

impl RequestPayload for CreateUserPayload {
    const INVALID_MESSAGE: &'static str =
        "Invalid user data. Please include fullname, email, username, and password.";
}

impl RequestPayload for UpdateUserPayload {
    const INVALID_MESSAGE: &'static str = "Invalid user update.";
}

impl RequestPayload for LoginPayload {
    const INVALID_MESSAGE: &'static str = "Please include email and password.";
}

impl RequestPayload for CreateGraphPayload {
    const INVALID_MESSAGE: &'static str =
        "Invalid graph data. Please include name, description, nodes, and edges.";
}

impl RequestPayload for UpdateGraphPayload {
    const INVALID_MESSAGE: &'static str = "Invalid graph update.";
}

impl RequestPayload for SearchQuery {
    const INVALID_MESSAGE: &'static str = "Invalid search query.";
}

/// JSON body extractor that reports malformed bodies as 400 envelopes.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: RequestPayload,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError(LibError::invalid_with_code(
                "invalid_body",
                T::INVALID_MESSAGE,
                anyhow!(rejection.body_text()),
            ))),
        }
    }
}

/// Query-string extractor with the same 400 envelope as [`ApiJson`].
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: RequestPayload,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError(LibError::invalid_with_code(
                "invalid_query",
                T::INVALID_MESSAGE,
                anyhow!(rejection.body_text()),
            ))),
        }
    }
}

fn parse_id<T>(raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| {
        AppError(LibError::invalid_with_code(
            "invalid_id",
            "Identifier must be a non-negative integer",
            anyhow!("could not parse id '{}': {}", raw, err),
        ))
    })
}

fn user_not_found(id: UserId) -> AppError {
    AppError(LibError::not_found(
        "User not found.",
        anyhow!("no user with id {}", id),
    ))
}

fn graph_not_found(id: GraphId) -> AppError {
    AppError(LibError::not_found(
        "Graph not found.",
        anyhow!("no graph with id {}", id),
    ))
}

async fn list_users_handler<S>(State(app): State<S>) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let users = app.users().list().await?;
    Ok(Json(DataEnvelope::list(users)))
}

async fn search_users_handler<S>(
    State(app): State<S>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let Some(q) = query.q else {
        return Err(AppError(LibError::invalid_with_code(
            "invalid_query",
            "search is required",
            anyhow!("missing q parameter"),
        )));
    };
    let users = app.users().search(&q).await?;
    Ok(Json(DataEnvelope::list(users)))
}

async fn get_user_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: UserId = parse_id(&raw_id)?;
    match app.users().get(id).await? {
        Some(user) => Ok(Json(DataEnvelope::one(user))),
        None => Err(user_not_found(id)),
    }
}

async fn create_user_handler<S>(
    State(app): State<S>,
    ApiJson(payload): ApiJson<CreateUserPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let new_user = payload.normalize()?;
    let user = app.users().add(new_user).await?;
    Ok(Json(DataEnvelope::one(user)))
}

async fn login_handler<S>(
    State(app): State<S>,
    ApiJson(payload): ApiJson<LoginPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let user = app
        .users()
        .authenticate(&payload.email, &payload.password)
        .await?;
    let token = app.authenticator().issue(user.userid)?;
    tracing::info!(userid = %user.userid, "user logged in");

    Ok(Json(LoginResponse {
        success: true,
        token,
        user: LoginUser {
            userid: user.userid,
            username: user.username,
        },
    }))
}

async fn update_user_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
    ApiJson(payload): ApiJson<UpdateUserPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: UserId = parse_id(&raw_id)?;
    let patch = payload.normalize(id)?;
    match app.users().update(id, patch).await? {
        Some(user) => Ok(Json(DataEnvelope::one(user))),
        None => Err(user_not_found(id)),
    }
}

async fn delete_user_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: UserId = parse_id(&raw_id)?;
    match app.users().remove(id).await? {
        Some(user) => Ok(Json(DataEnvelope::one(user))),
        None => Err(user_not_found(id)),
    }
}

async fn list_graphs_handler<S>(State(app): State<S>) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let graphs = app.graphs().list().await?;
    Ok(Json(DataEnvelope::list(graphs)))
}

async fn list_own_graphs_handler<S>(
    State(app): State<S>,
    identity: Identity,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let graphs = app.graphs().list_by_owner(identity.user_id).await?;
    Ok(Json(DataEnvelope::list(graphs)))
}

async fn get_graph_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: GraphId = parse_id(&raw_id)?;
    match app.graphs().get(id).await? {
        Some(graph) => Ok(Json(DataEnvelope::one(graph))),
        None => Err(graph_not_found(id)),
    }
}

async fn create_graph_handler<S>(
    State(app): State<S>,
    identity: Identity,
    ApiJson(payload): ApiJson<CreateGraphPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let definition = payload.normalize()?;
    let graph = app.graphs().add(identity.user_id, definition).await?;
    Ok(Json(DataEnvelope::one(graph)))
}

async fn update_graph_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
    ApiJson(payload): ApiJson<UpdateGraphPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: GraphId = parse_id(&raw_id)?;
    let patch = payload.normalize(id)?;
    match app.graphs().update(id, patch).await? {
        Some(graph) => Ok(Json(DataEnvelope::one(graph))),
        None => Err(graph_not_found(id)),
    }
}

async fn delete_graph_handler<S>(
    State(app): State<S>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let id: GraphId = parse_id(&raw_id)?;
    match app.graphs().remove(id).await? {
        Some(graph) => Ok(Json(DataEnvelope::one(graph))),
        None => Err(graph_not_found(id)),
    }
}

async fn fallback_not_found() -> AppError {
    AppError(LibError::not_found(
        "Resource not found.",
        anyhow!("no route matched and no front-end bundle is served"),
    ))
}

async fn method_not_allowed(request: Request) -> AppError {
    AppError(LibError::method_not_allowed(anyhow!(
        "{} is not routed for {}",
        request.method(),
        request.uri().path()
    )))
}

fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    AppError(LibError::message("Internal server error")).into_response()
}

pub fn routes<S>() -> Router<S>
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /api/users [GET,POST]");
    tracing::info!("Registering route /api/users/search [GET]");
    tracing::info!("Registering route /api/users/login [POST]");
    tracing::info!("Registering route /api/users/{{id}} [GET,PATCH,DELETE]");
    tracing::info!("Registering route /api/graphs [GET,POST]");
    tracing::info!("Registering route /api/graphs/user [GET]");
    tracing::info!("Registering route /api/graphs/{{id}} [GET,PATCH,DELETE]");

    Router::new()
        .route(
            "/api/users",
            get(list_users_handler::<S>).post(create_user_handler::<S>),
        )
        .route("/api/users/search", get(search_users_handler::<S>))
        .route("/api/users/login", post(login_handler::<S>))
        .route(
            "/api/users/{id}",
            get(get_user_handler::<S>)
                .patch(update_user_handler::<S>)
                .delete(delete_user_handler::<S>),
        )
        .route(
            "/api/graphs",
            get(list_graphs_handler::<S>).post(create_graph_handler::<S>),
        )
        .route("/api/graphs/user", get(list_own_graphs_handler::<S>))
        .route(
            "/api/graphs/{id}",
            get(get_graph_handler::<S>)
                .patch(update_graph_handler::<S>)
                .delete(delete_graph_handler::<S>),
        )
        .method_not_allowed_fallback(method_not_allowed)
}

/// Full application router: API routes, the single-page front-end as a
/// fallback, panic recovery and request tracing.
pub fn router<S>(state: S, static_dir: Option<&FsPath>) -> Router
where
    S: GraphBoardApp + Clone + Send + Sync + 'static,
{
    let api = routes::<S>();
    let api = match static_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Serving front-end bundle as fallback");
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => api.fallback(fallback_not_found),
    };

    api.layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
