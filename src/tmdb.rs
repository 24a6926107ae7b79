use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{
    CastMember, Credits, CrewMember, Genre, Image, Images, MovieDetail, MoviePage, MovieSummary,
    Video,
};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";
/// Freshness window applied to every catalog response.
pub const CACHE_TTL_SECS: i64 = 3600;
const UPSTREAM_PAGE_SIZE: u32 = 20;
const MAX_CACHE_ENTRIES: usize = 512;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable (status {status})")]
    Unavailable { status: u16 },
    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CatalogError::Unavailable { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether a manual "try again" makes sense for this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CatalogError::Decode(_))
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_movies(&self, page: u32) -> CatalogResult<MoviePage>;
    async fn search_movies(&self, term: &str, page: u32) -> CatalogResult<MoviePage>;
    async fn list_movies_by_genre(&self, genre_id: i64, page: u32) -> CatalogResult<MoviePage>;
    async fn get_movie_detail(&self, id: i64) -> CatalogResult<MovieDetail>;
    async fn list_genres(&self) -> CatalogResult<Vec<Genre>>;

    async fn resolve_genre_names(&self, ids: &[i64]) -> CatalogResult<Vec<String>> {
        let genres = self.list_genres().await?;
        Ok(genre_names(&genres, ids))
    }
}

/// Maps ids to names in input order, dropping ids the taxonomy doesn't know.
pub fn genre_names(genres: &[Genre], ids: &[i64]) -> Vec<String> {
    let lookup: HashMap<i64, &str> = genres.iter().map(|g| (g.id, g.name.as_str())).collect();
    ids.iter()
        .filter_map(|id| lookup.get(id).map(|name| name.to_string()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    token: String,
    cache: Arc<Mutex<HashMap<String, CachedBody>>>,
}

#[derive(Debug, Clone)]
struct CachedBody {
    body: String,
    expires_at: i64,
}

impl TmdbClient {
    pub fn from_env() -> Result<Self> {
        let token = env::var("TMDB_API_READ_TOKEN").context("TMDB_API_READ_TOKEN not set")?;
        let base_url = env::var("TMDB_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| TMDB_BASE.to_string());
        Self::new(token, base_url)
    }

    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let user_agent = format!("marquee/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CatalogResult<T> {
        let now = Utc::now().timestamp();
        if let Some(hit) = self.cached(path, now).await {
            debug!("Catalog cache hit for {}", path);
            return Ok(serde_json::from_str(&hit)?);
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("Fetching {}", path);
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            warn!("Catalog returned {} for {}", status, path);
            return Err(CatalogError::Unavailable {
                status: status.as_u16(),
            });
        }
        let text = res.text().await?;
        let parsed: T = serde_json::from_str(&text)?;
        self.store(path, text, now).await;
        Ok(parsed)
    }

    async fn cached(&self, path: &str, now: i64) -> Option<String> {
        let guard = self.cache.lock().await;
        guard
            .get(path)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.body.clone())
    }

    async fn store(&self, path: &str, body: String, now: i64) {
        let mut guard = self.cache.lock().await;
        if guard.len() >= MAX_CACHE_ENTRIES {
            guard.retain(|_, entry| entry.expires_at > now);
            if guard.len() >= MAX_CACHE_ENTRIES {
                guard.clear();
            }
        }
        guard.insert(
            path.to_string(),
            CachedBody {
                body,
                expires_at: now + CACHE_TTL_SECS,
            },
        );
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn list_movies(&self, page: u32) -> CatalogResult<MoviePage> {
        let raw: RawPage = self.get_json(&discover_path(page)).await?;
        Ok(raw.into_page(page))
    }

    async fn search_movies(&self, term: &str, page: u32) -> CatalogResult<MoviePage> {
        let raw: RawPage = self.get_json(&search_path(term, page)).await?;
        Ok(raw.into_page(page))
    }

    async fn list_movies_by_genre(&self, genre_id: i64, page: u32) -> CatalogResult<MoviePage> {
        let raw: RawPage = self.get_json(&genre_path(genre_id, page)).await?;
        Ok(raw.into_page(page))
    }

    async fn get_movie_detail(&self, id: i64) -> CatalogResult<MovieDetail> {
        let raw: RawDetail = self.get_json(&detail_path(id)).await?;
        Ok(raw.into_detail())
    }

    async fn list_genres(&self) -> CatalogResult<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreResponse {
            genres: Option<Vec<RawGenre>>,
        }

        let raw: GenreResponse = self.get_json(GENRES_PATH).await?;
        Ok(raw
            .genres
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawGenre::into_genre)
            .collect())
    }
}

const GENRES_PATH: &str = "/genre/movie/list";

fn discover_path(page: u32) -> String {
    format!("/discover/movie?page={page}")
}

fn search_path(term: &str, page: u32) -> String {
    format!(
        "/search/movie?query={}&page={page}",
        urlencoding::encode(term)
    )
}

fn genre_path(genre_id: i64, page: u32) -> String {
    format!("/discover/movie?with_genres={genre_id}&page={page}")
}

fn detail_path(id: i64) -> String {
    format!("/movie/{id}?append_to_response=credits,videos,images,similar")
}

// Wire shapes. Everything TMDB may omit or null is optional here and
// normalized on the way into the public models.

#[derive(Debug, Deserialize)]
struct RawPage {
    page: Option<u32>,
    results: Option<Vec<RawMovie>>,
    total_pages: Option<u32>,
    total_results: Option<u32>,
}

impl RawPage {
    fn into_page(self, requested: u32) -> MoviePage {
        let results: Vec<MovieSummary> = self
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawMovie::into_summary)
            .collect();
        let total_results = self.total_results.unwrap_or(results.len() as u32);
        let total_pages = self
            .total_pages
            .unwrap_or_else(|| total_results.div_ceil(UPSTREAM_PAGE_SIZE));
        MoviePage {
            page: self.page.unwrap_or(requested),
            results,
            total_pages,
            total_results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMovie {
    id: Option<i64>,
    title: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    vote_average: Option<f64>,
    overview: Option<String>,
    genre_ids: Option<Vec<i64>>,
}

impl RawMovie {
    fn into_summary(self) -> Option<MovieSummary> {
        Some(MovieSummary {
            id: self.id?,
            title: self.title.unwrap_or_default(),
            poster_path: non_empty(self.poster_path),
            backdrop_path: non_empty(self.backdrop_path),
            release_date: self.release_date.unwrap_or_default(),
            vote_average: rating(self.vote_average),
            overview: self.overview.unwrap_or_default(),
            genre_ids: self.genre_ids.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawGenre {
    id: Option<i64>,
    name: Option<String>,
}

impl RawGenre {
    fn into_genre(self) -> Option<Genre> {
        Some(Genre {
            id: self.id?,
            name: self.name?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    id: i64,
    title: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    vote_average: Option<f64>,
    overview: Option<String>,
    genres: Option<Vec<RawGenre>>,
    runtime: Option<u32>,
    status: Option<String>,
    tagline: Option<String>,
    credits: Option<RawCredits>,
    videos: Option<RawResults<RawVideo>>,
    images: Option<RawImages>,
    similar: Option<RawResults<RawMovie>>,
}

impl RawDetail {
    fn into_detail(self) -> MovieDetail {
        let credits = self.credits.map(RawCredits::into_credits).unwrap_or_default();
        let videos = self
            .videos
            .and_then(|v| v.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawVideo::into_video)
            .collect();
        let images = self.images.map(RawImages::into_images).unwrap_or_default();
        let similar = self
            .similar
            .and_then(|s| s.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawMovie::into_summary)
            .collect();

        MovieDetail {
            id: self.id,
            title: self.title.unwrap_or_default(),
            poster_path: non_empty(self.poster_path),
            backdrop_path: non_empty(self.backdrop_path),
            release_date: self.release_date.unwrap_or_default(),
            vote_average: rating(self.vote_average),
            overview: self.overview.unwrap_or_default(),
            genres: self
                .genres
                .unwrap_or_default()
                .into_iter()
                .filter_map(RawGenre::into_genre)
                .collect(),
            runtime: self.runtime,
            status: self.status.unwrap_or_default(),
            tagline: self.tagline.unwrap_or_default(),
            credits,
            videos,
            images,
            similar,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResults<T> {
    results: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
struct RawCredits {
    cast: Option<Vec<RawPerson>>,
    crew: Option<Vec<RawPerson>>,
}

impl RawCredits {
    fn into_credits(self) -> Credits {
        let cast = self
            .cast
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                Some(CastMember {
                    id: p.id?,
                    name: p.name?,
                    character: p.character.unwrap_or_default(),
                    profile_path: non_empty(p.profile_path),
                })
            })
            .collect();
        let crew = self
            .crew
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                Some(CrewMember {
                    id: p.id?,
                    name: p.name?,
                    job: p.job.unwrap_or_default(),
                    department: p.department.unwrap_or_default(),
                    profile_path: non_empty(p.profile_path),
                })
            })
            .collect();
        Credits { cast, crew }
    }
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    id: Option<i64>,
    name: Option<String>,
    character: Option<String>,
    job: Option<String>,
    department: Option<String>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    id: Option<String>,
    key: Option<String>,
    name: Option<String>,
    site: Option<String>,
    #[serde(rename = "type")]
    video_type: Option<String>,
}

impl RawVideo {
    fn into_video(self) -> Option<Video> {
        Some(Video {
            id: self.id.unwrap_or_default(),
            key: self.key?,
            name: self.name.unwrap_or_default(),
            site: self.site.unwrap_or_default(),
            video_type: self.video_type.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawImages {
    backdrops: Option<Vec<RawImage>>,
    posters: Option<Vec<RawImage>>,
}

impl RawImages {
    fn into_images(self) -> Images {
        let convert = |list: Option<Vec<RawImage>>| -> Vec<Image> {
            list.unwrap_or_default()
                .into_iter()
                .filter_map(|i| {
                    Some(Image {
                        file_path: i.file_path?,
                        aspect_ratio: i.aspect_ratio.unwrap_or_default(),
                        height: i.height.unwrap_or_default(),
                        width: i.width.unwrap_or_default(),
                    })
                })
                .collect()
        };
        Images {
            backdrops: convert(self.backdrops),
            posters: convert(self.posters),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawImage {
    file_path: Option<String>,
    aspect_ratio: Option<f64>,
    height: Option<u32>,
    width: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn rating(value: Option<f64>) -> f64 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 10.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_listing_paths() {
        assert_eq!(discover_path(3), "/discover/movie?page=3");
        assert_eq!(
            genre_path(28, 1),
            "/discover/movie?with_genres=28&page=1"
        );
        assert_eq!(
            search_path("the matrix & co", 2),
            "/search/movie?query=the%20matrix%20%26%20co&page=2"
        );
        assert_eq!(
            detail_path(603),
            "/movie/603?append_to_response=credits,videos,images,similar"
        );
    }

    #[test]
    fn normalizes_loose_listing_payload() {
        let value = json!({
            "page": 1,
            "results": [
                {
                    "id": 42,
                    "title": "Answer",
                    "poster_path": "",
                    "backdrop_path": null,
                    "vote_average": 11.5,
                    "genre_ids": [18]
                },
                { "title": "No id, dropped" }
            ],
            "total_results": 41
        });
        let raw: RawPage = serde_json::from_value(value).expect("page deserialize");
        let page = raw.into_page(1);
        assert_eq!(page.results.len(), 1);
        let movie = &page.results[0];
        assert_eq!(movie.id, 42);
        assert_eq!(movie.poster_path, None);
        assert_eq!(movie.release_date, "");
        assert_eq!(movie.vote_average, 10.0);
        assert_eq!(page.total_results, 41);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn empty_listing_payload_is_valid() {
        let raw: RawPage =
            serde_json::from_value(json!({ "results": [], "total_results": 0 })).unwrap();
        let page = raw.into_page(1);
        assert!(page.results.is_empty());
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn deserializes_appended_detail() {
        let value = json!({
            "id": 603,
            "title": "The Matrix",
            "poster_path": "/p.jpg",
            "release_date": "1999-03-30",
            "vote_average": 8.2,
            "overview": "Neo",
            "genres": [{ "id": 28, "name": "Action" }, { "id": 878 }],
            "runtime": 136,
            "status": "Released",
            "tagline": null,
            "credits": {
                "cast": [{ "id": 6384, "name": "Keanu Reeves", "character": "Neo" }],
                "crew": [{ "id": 9339, "name": "Lana Wachowski", "job": "Director", "department": "Directing" }]
            },
            "videos": { "results": [{ "id": "v1", "key": "abc", "name": "Trailer", "site": "YouTube", "type": "Trailer" }] },
            "images": { "backdrops": [{ "file_path": "/b.jpg", "aspect_ratio": 1.78, "height": 1080, "width": 1920 }] },
            "similar": { "results": [{ "id": 604, "title": "Reloaded" }] }
        });
        let raw: RawDetail = serde_json::from_value(value).expect("detail deserialize");
        let detail = raw.into_detail();
        assert_eq!(detail.genres, vec![Genre { id: 28, name: "Action".into() }]);
        assert_eq!(detail.runtime, Some(136));
        assert_eq!(detail.tagline, "");
        assert_eq!(detail.credits.cast[0].character, "Neo");
        assert_eq!(detail.credits.crew[0].job, "Director");
        assert_eq!(detail.videos[0].video_type, "Trailer");
        assert_eq!(detail.images.backdrops.len(), 1);
        assert!(detail.images.posters.is_empty());
        assert_eq!(detail.similar[0].id, 604);
    }

    #[test]
    fn detail_without_id_is_rejected() {
        let res: std::result::Result<RawDetail, _> =
            serde_json::from_value(json!({ "title": "Nameless" }));
        assert!(res.is_err());
    }

    #[test]
    fn genre_names_keep_order_and_drop_unknown() {
        let genres = vec![
            Genre { id: 28, name: "Action".into() },
            Genre { id: 18, name: "Drama".into() },
        ];
        assert_eq!(
            genre_names(&genres, &[18, 99, 28]),
            vec!["Drama".to_string(), "Action".to_string()]
        );
        assert!(genre_names(&genres, &[]).is_empty());
    }

    #[test]
    fn only_decode_failures_are_not_retryable() {
        let unavailable = CatalogError::Unavailable { status: 503 };
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.status(), Some(503));
        assert_eq!(unavailable.to_string(), "catalog unavailable (status 503)");

        let decode = CatalogError::Decode(serde_json::from_str::<u8>("x").unwrap_err());
        assert!(!decode.is_retryable());
        assert_eq!(decode.status(), None);
    }
}
