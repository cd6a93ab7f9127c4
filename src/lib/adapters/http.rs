use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::core::{NewTodo, Todo, TodoError, TodoFilter, TodoId, TodoPatch};
use crate::storage::Storage;
use crate::transport::TlsConfig;

#[cfg(feature = "tracing")]
use tracing::{debug, error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for TodoError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            TodoError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            TodoError::NotFound(_) => (StatusCode::NOT_FOUND, "Todo not found".to_string()),
            TodoError::Storage(_) => {
                #[cfg(feature = "tracing")]
                error!(error = %self, "Request failed on storage");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub completed: Option<bool>,
    pub search: Option<String>,
}

impl ListParams {
    pub fn into_filter(self) -> Result<TodoFilter, TodoError> {
        match (self.completed, self.search) {
            (Some(_), Some(_)) => Err(TodoError::Validation(
                "Filter by completed or search, not both".into(),
            )),
            (Some(completed), None) => Ok(TodoFilter::Completed(completed)),
            (None, Some(term)) => Ok(TodoFilter::search(term)),
            (None, None) => Ok(TodoFilter::All),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTodoBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, TodoError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| TodoError::Validation(rejection.body_text()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, TodoError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| TodoError::Validation(rejection.body_text()))
}

pub async fn list_todos<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<Todo>>, TodoError> {
    let filter = query_params(params)?.into_filter()?;
    Ok(Json(storage.list(&filter).await?))
}

pub async fn list_completed<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
) -> Result<Json<Vec<Todo>>, TodoError> {
    Ok(Json(storage.list(&TodoFilter::Completed(true)).await?))
}

pub async fn list_incomplete<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
) -> Result<Json<Vec<Todo>>, TodoError> {
    Ok(Json(storage.list(&TodoFilter::Completed(false)).await?))
}

pub async fn search_todos<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<Todo>>, TodoError> {
    let params = query_params(params)?;
    Ok(Json(storage.list(&TodoFilter::search(params.q)).await?))
}

pub async fn get_todo<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, TodoError> {
    let id = id.parse::<TodoId>()?;
    storage
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| TodoError::NotFound(id.to_string()))
}

pub async fn create_todo<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    payload: Result<Json<CreateTodoBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Todo>), TodoError> {
    let body = json_body(payload)?;
    let input = NewTodo::new(body.title, body.description)?;
    let todo = storage.create(input).await?;
    #[cfg(feature = "tracing")]
    debug!(id = %todo.id, "Created todo");
    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn update_todo<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    Path(id): Path<String>,
    payload: Result<Json<TodoPatch>, JsonRejection>,
) -> Result<Json<Todo>, TodoError> {
    let id = id.parse::<TodoId>()?;
    let patch = json_body(payload)?;
    Ok(Json(storage.update(id, patch).await?))
}

pub async fn mark_completed<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, TodoError> {
    let id = id.parse::<TodoId>()?;
    Ok(Json(storage.set_completed(id, true).await?))
}

pub async fn mark_incomplete<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, TodoError> {
    let id = id.parse::<TodoId>()?;
    Ok(Json(storage.set_completed(id, false).await?))
}

pub async fn delete_todo<S: Storage + 'static>(
    State(storage): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, TodoError> {
    let id = id.parse::<TodoId>()?;
    if storage.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TodoError::NotFound(id.to_string()))
    }
}

async fn health_route() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

fn api_routes<S: Storage + 'static>() -> Router<Arc<S>> {
    Router::new()
        .route("/todos", get(list_todos::<S>).post(create_todo::<S>))
        .route("/todos/completed", get(list_completed::<S>))
        .route("/todos/incomplete", get(list_incomplete::<S>))
        .route("/todos/search", get(search_todos::<S>))
        .route(
            "/todos/{id}",
            get(get_todo::<S>)
                .put(update_todo::<S>)
                .patch(update_todo::<S>)
                .delete(delete_todo::<S>),
        )
        .route("/todos/{id}/complete", patch(mark_completed::<S>))
        .route("/todos/{id}/incomplete", patch(mark_incomplete::<S>))
}

/// Builds the full application over an explicitly constructed store.
pub fn app<S: Storage + 'static>(storage: Arc<S>) -> Router {
    let router = Router::new()
        .route("/health", get(health_route))
        .nest("/api", api_routes::<S>())
        .layer(CorsLayer::permissive());

    #[cfg(feature = "tracing")]
    let router = router.layer(tower_http::trace::TraceLayer::new_for_http().make_span_with(
        |request: &axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("http_request", method = ?request.method(), uri)
        },
    ));

    router.with_state(storage)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    pub async fn new<S: Storage + 'static>(
        storage: Arc<S>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.addr)
            .await
            .with_context(|| format!("failed to listen on {}", config.addr))?;
        Ok(Self {
            router: app(storage),
            listener,
            tls: config.tls.clone(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    pub async fn run(self) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        info!(addr = %self.local_addr()?, tls = self.tls.is_some(), "Todo API listening");

        match self.tls {
            Some(tls) => {
                let rustls = tls.load().await?;
                let listener = self.listener.into_std()?;
                listener.set_nonblocking(true)?;
                let handle = axum_server::Handle::new();
                tokio::spawn({
                    let handle = handle.clone();
                    async move {
                        shutdown_signal().await;
                        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                    }
                });
                axum_server::from_tcp_rustls(listener, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await
                    .context("received error from running TLS server")?;
            }
            None => {
                axum::serve(self.listener, self.router)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                    .context("received error from running server")?;
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        #[cfg(feature = "tracing")]
        info!("Shutdown signal received");
    }
}
