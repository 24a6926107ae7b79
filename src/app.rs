use crate::favorites::{FavoritesEvent, FavoritesStore, FileStorage};
use crate::models::MovieSummary;
use crate::query::{ListingQuery, ListingState, NavParams, QueryComposer};
use crate::tmdb::{CatalogApi, CatalogError, TmdbClient};
use crate::utils::{DetailView, MovieCard};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{collections::HashSet, env, net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const DEFAULT_ADDR: &str = "0.0.0.0:3146";
pub const CATALOG_CACHE_CONTROL: &str = "public, max-age=3600";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub favorites: Arc<FavoritesStore>,
    pub composer: QueryComposer,
}

pub async fn run_server() -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::from_env()?);
    let storage = FileStorage::from_env();
    info!("Favorites stored under {}", storage.dir().display());
    let favorites = Arc::new(FavoritesStore::new(Arc::new(storage)));
    let composer = QueryComposer::from_env()?;
    info!("Showing {} movies per page", composer.page_size());

    tokio::spawn(log_favorite_changes(favorites.subscribe()));

    let state = AppState {
        catalog,
        favorites,
        composer,
    };
    let app = build_router(state);

    let addr: SocketAddr = env::var("MARQUEE_ADDR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
        .parse()
        .context("MARQUEE_ADDR is not a valid socket address")?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/movies", get(list_movies))
        .route("/api/movies/:id", get(movie_detail))
        .route("/api/genres", get(list_genres))
        .route("/api/favorites", get(list_favorites))
        .route("/api/favorites/count", get(favorites_count))
        .route("/api/favorites/toggle", post(toggle_favorite))
        .route("/api/favorites/:id", get(favorite_status))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_movies(State(state): State<AppState>, Query(params): Query<NavParams>) -> Response {
    let query = ListingQuery::from_params(&params);
    let genres = match state.catalog.list_genres().await {
        Ok(g) => g,
        Err(e) => return catalog_error(e),
    };

    match state
        .composer
        .compose(state.catalog.as_ref(), &query, &genres)
        .await
    {
        ListingState::Ready(listing) => {
            let favorite_ids = on_favorites(&state, |f| {
                f.get_all().iter().map(|m| m.id).collect::<HashSet<i64>>()
            })
            .await
            .unwrap_or_else(|e| {
                error!("Favorites lookup failed: {}", e);
                HashSet::new()
            });
            let cards: Vec<MovieCard> = listing
                .movies
                .iter()
                .map(|m| MovieCard::new(m, &genres, favorite_ids.contains(&m.id)))
                .collect();
            (
                StatusCode::OK,
                [(header::CACHE_CONTROL, CATALOG_CACHE_CONTROL)],
                Json(json!({
                    "state": "ready",
                    "header": listing.header,
                    "genre_name": listing.genre_name,
                    "cards": cards,
                    "pagination": listing.pagination,
                })),
            )
                .into_response()
        }
        error_state @ ListingState::Error { .. } => {
            (StatusCode::BAD_GATEWAY, Json(error_state)).into_response()
        }
        other => (
            StatusCode::OK,
            [(header::CACHE_CONTROL, CATALOG_CACHE_CONTROL)],
            Json(other),
        )
            .into_response(),
    }
}

async fn movie_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.catalog.get_movie_detail(id).await {
        Ok(movie) => {
            let id = movie.id;
            let favorited = on_favorites(&state, move |f| f.contains(id))
                .await
                .unwrap_or_else(|e| {
                    error!("Favorites lookup failed: {}", e);
                    false
                });
            (
                StatusCode::OK,
                [(header::CACHE_CONTROL, CATALOG_CACHE_CONTROL)],
                Json(DetailView::new(movie, favorited)),
            )
                .into_response()
        }
        Err(e) => catalog_error(e),
    }
}

async fn list_genres(State(state): State<AppState>) -> Response {
    match state.catalog.list_genres().await {
        Ok(genres) => (
            StatusCode::OK,
            [(header::CACHE_CONTROL, CATALOG_CACHE_CONTROL)],
            Json(genres),
        )
            .into_response(),
        Err(e) => catalog_error(e),
    }
}

/// Favorites storage is blocking file I/O; keep it off the async workers.
async fn on_favorites<T, F>(state: &AppState, f: F) -> Result<T, JoinError>
where
    F: FnOnce(&FavoritesStore) -> T + Send + 'static,
    T: Send + 'static,
{
    let favorites = state.favorites.clone();
    tokio::task::spawn_blocking(move || f(&favorites)).await
}

fn favorites_failure(context: &str, e: impl std::fmt::Display) -> Response {
    error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"status": "error", "message": "Could not access favorites"})),
    )
        .into_response()
}

async fn list_favorites(State(state): State<AppState>) -> Response {
    match on_favorites(&state, |f| f.get_all()).await {
        Ok(favorites) => Json(favorites).into_response(),
        Err(e) => favorites_failure("Failed to list favorites", e),
    }
}

async fn favorites_count(State(state): State<AppState>) -> Response {
    match on_favorites(&state, |f| f.count()).await {
        Ok(count) => Json(json!({ "count": count })).into_response(),
        Err(e) => favorites_failure("Failed to count favorites", e),
    }
}

async fn favorite_status(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match on_favorites(&state, move |f| f.contains(id)).await {
        Ok(favorited) => Json(json!({ "id": id, "favorited": favorited })).into_response(),
        Err(e) => favorites_failure("Failed to read favorite status", e),
    }
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Json(movie): Json<MovieSummary>,
) -> Response {
    let id = movie.id;
    match on_favorites(&state, move |f| f.toggle(&movie)).await {
        Ok(Ok(favorited)) => Json(json!({ "id": id, "favorited": favorited })).into_response(),
        Ok(Err(e)) => {
            error!("Failed to toggle favorite {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Could not save favorites"})),
            )
                .into_response()
        }
        Err(e) => favorites_failure("Favorites toggle task failed", e),
    }
}

fn catalog_error(e: CatalogError) -> Response {
    let status = match e.status() {
        Some(404) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    };
    warn!("Catalog request failed: {}", e);
    (
        status,
        Json(json!({
            "status": "error",
            "message": e.to_string(),
            "retry": e.is_retryable(),
        })),
    )
        .into_response()
}

async fn log_favorite_changes(mut events: broadcast::Receiver<FavoritesEvent>) {
    loop {
        match events.recv().await {
            Ok(FavoritesEvent::Added(id)) => info!("Movie {} added to favorites", id),
            Ok(FavoritesEvent::Removed(id)) => info!("Movie {} removed from favorites", id),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Favorites listener skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
