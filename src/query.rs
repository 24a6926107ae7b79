//! Turns navigational parameters into one catalog listing call and the view
//! state a listing page renders.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

use crate::models::{Genre, MoviePage, MovieSummary};
use crate::tmdb::{CatalogApi, CatalogResult};

/// The catalog does not reliably serve pages past this one.
pub const MAX_PAGE: u32 = 50;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const EMPTY_MESSAGE: &str = "No movies found";

/// Raw query-string parameters as they arrive from routing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavParams {
    pub page: Option<String>,
    pub q: Option<String>,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    page: u32,
    term: Option<String>,
    genre_id: Option<i64>,
}

impl ListingQuery {
    pub fn new(page: i64, term: Option<String>, genre_id: Option<i64>) -> Self {
        let term = term
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self {
            page: clamp_page(page),
            term,
            genre_id,
        }
    }

    /// Numbers are read from the leading digits ("2.5" is page 2). Text with
    /// no leading number falls back to the first page for `page` and is
    /// ignored for `genre`.
    pub fn from_params(params: &NavParams) -> Self {
        let page = params.page.as_deref().and_then(leading_int).unwrap_or(1);
        let genre_id = params.genre.as_deref().and_then(leading_int);
        Self::new(page, params.q.clone(), genre_id)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    pub fn genre_id(&self) -> Option<i64> {
        self.genre_id
    }

    pub fn with_page(&self, page: i64) -> Self {
        Self {
            page: clamp_page(page),
            ..self.clone()
        }
    }

    /// Search wins over a genre filter when both are present.
    pub fn request(&self) -> ListingRequest {
        match (&self.term, self.genre_id) {
            (Some(term), _) => ListingRequest::Search {
                term: term.clone(),
                page: self.page,
            },
            (None, Some(genre_id)) => ListingRequest::Genre {
                genre_id,
                page: self.page,
            },
            (None, None) => ListingRequest::Discover { page: self.page },
        }
    }
}

/// Optional sign followed by at least one digit, after leading whitespace.
/// Anything after the digits is ignored; overlong numbers saturate.
fn leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return None;
    }
    let value = digits.parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

pub fn clamp_page(requested: i64) -> u32 {
    requested.clamp(1, MAX_PAGE as i64) as u32
}

/// Display page count for `total_results`, capped for navigation.
pub fn total_display_pages(total_results: u32, page_size: usize) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = (total_results as u64).div_ceil(page_size as u64);
    pages.min(MAX_PAGE as u64) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingRequest {
    Discover { page: u32 },
    Search { term: String, page: u32 },
    Genre { genre_id: i64, page: u32 },
}

impl ListingRequest {
    pub async fn fetch(&self, catalog: &dyn CatalogApi) -> CatalogResult<MoviePage> {
        match self {
            ListingRequest::Discover { page } => catalog.list_movies(*page).await,
            ListingRequest::Search { term, page } => catalog.search_movies(term, *page).await,
            ListingRequest::Genre { genre_id, page } => {
                catalog.list_movies_by_genre(*genre_id, *page).await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub has_previous: bool,
    pub has_next: bool,
}

impl Pagination {
    pub fn new(current_page: u32, total_pages: u32) -> Self {
        Self {
            current_page,
            total_pages,
            has_previous: current_page > 1,
            has_next: current_page < total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub movies: Vec<MovieSummary>,
    pub header: Option<String>,
    pub genre_name: Option<String>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListingState {
    Loading,
    Empty { message: String },
    Error { message: String, retry: bool },
    Ready(Listing),
}

impl ListingState {
    pub fn empty() -> Self {
        ListingState::Empty {
            message: EMPTY_MESSAGE.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ListingState::Empty { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryComposer {
    page_size: usize,
}

impl Default for QueryComposer {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl QueryComposer {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn from_env() -> Result<Self> {
        match env::var("MOVIES_PER_PAGE") {
            Ok(raw) if !raw.trim().is_empty() => {
                let size: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("MOVIES_PER_PAGE is not a number: '{}'", raw))?;
                Ok(Self::new(size))
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Issues the single listing call for `query` and classifies the result.
    pub async fn compose(
        &self,
        catalog: &dyn CatalogApi,
        query: &ListingQuery,
        genres: &[Genre],
    ) -> ListingState {
        let request = query.request();
        debug!(?request, "Composing listing");
        match request.fetch(catalog).await {
            Ok(data) => self.build(query, data, genres),
            Err(e) => {
                warn!("Listing fetch failed: {}", e);
                ListingState::Error {
                    message: e.to_string(),
                    retry: e.is_retryable(),
                }
            }
        }
    }

    pub fn build(&self, query: &ListingQuery, data: MoviePage, genres: &[Genre]) -> ListingState {
        let movies: Vec<MovieSummary> = data.results.into_iter().take(self.page_size).collect();
        if movies.is_empty() {
            return ListingState::empty();
        }

        let genre_name = query
            .genre_id()
            .and_then(|id| genres.iter().find(|g| g.id == id))
            .map(|g| g.name.clone());
        let header = match (query.term(), &genre_name) {
            (Some(term), _) => Some(format!("Search results for \"{}\"", term)),
            (None, Some(name)) => Some(format!("Results for {}", name)),
            (None, None) => None,
        };
        let total_pages = total_display_pages(data.total_results, self.page_size);

        ListingState::Ready(Listing {
            movies,
            header,
            genre_name,
            pagination: Pagination::new(query.page(), total_pages),
        })
    }
}
