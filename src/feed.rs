//! Infinite-scroll listing: successive pages appended behind a single
//! in-flight guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::MovieSummary;
use crate::query::{total_display_pages, ListingQuery, MAX_PAGE};
use crate::tmdb::{CatalogApi, CatalogResult};

pub const FEED_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { page: u32, added: usize },
    /// A previous load has not resolved yet; nothing was requested.
    Busy,
    Exhausted,
    /// The feed was reset while this load was in flight; its result was dropped.
    Stale,
}

struct FeedState {
    query: ListingQuery,
    next_page: u32,
    movies: Vec<MovieSummary>,
    has_more: bool,
}

impl FeedState {
    fn fresh(query: ListingQuery) -> Self {
        Self {
            query,
            next_page: 1,
            movies: Vec::new(),
            has_more: true,
        }
    }
}

pub struct InfiniteFeed {
    catalog: Arc<dyn CatalogApi>,
    loading: AtomicBool,
    generation: AtomicU64,
    state: Mutex<FeedState>,
}

struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InfiniteFeed {
    pub fn new(catalog: Arc<dyn CatalogApi>, query: ListingQuery) -> Self {
        Self {
            catalog,
            loading: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            state: Mutex::new(FeedState::fresh(query.with_page(1))),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts over for new search/genre parameters.
    pub fn reset(&self, query: ListingQuery) {
        let mut state = self.state();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *state = FeedState::fresh(query.with_page(1));
    }

    pub async fn load_next(&self) -> CatalogResult<LoadOutcome> {
        if self.loading.swap(true, Ordering::AcqRel) {
            return Ok(LoadOutcome::Busy);
        }
        let _guard = LoadingGuard(&self.loading);

        let (request, page, generation) = {
            let state = self.state();
            if !state.has_more {
                return Ok(LoadOutcome::Exhausted);
            }
            let page = state.next_page;
            (
                state.query.with_page(page as i64).request(),
                page,
                self.generation.load(Ordering::Acquire),
            )
        };

        debug!(?request, "Loading feed page");
        let data = request.fetch(self.catalog.as_ref()).await?;

        // Generation only moves under the state lock, so this check holds
        // until the page is applied.
        let mut state = self.state();
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(LoadOutcome::Stale);
        }
        let added = data.results.len();
        if page == 1 {
            state.movies = data.results;
        } else {
            state.movies.extend(data.results);
        }
        let total_pages = total_display_pages(data.total_results, FEED_PAGE_SIZE);
        state.has_more = page < total_pages.min(MAX_PAGE);
        state.next_page = page + 1;
        Ok(LoadOutcome::Loaded { page, added })
    }

    pub fn movies(&self) -> Vec<MovieSummary> {
        self.state().movies.clone()
    }

    pub fn has_more(&self) -> bool {
        self.state().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Nothing to show and nothing pending: the "No movies found" case.
    pub fn is_empty(&self) -> bool {
        !self.is_loading() && self.state().movies.is_empty()
    }

    /// All pages consumed with at least one movie shown.
    pub fn reached_end(&self) -> bool {
        let state = self.state();
        !state.has_more && !state.movies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Genre, MovieDetail, MoviePage};
    use crate::tmdb::CatalogError;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct PagedCatalog {
        total_results: u32,
        calls: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl PagedCatalog {
        fn new(total_results: u32) -> Self {
            Self {
                total_results,
                calls: Mutex::new(Vec::new()),
                gate: None,
                fail: false,
            }
        }

        async fn page(&self, label: String, page: u32) -> CatalogResult<MoviePage> {
            self.calls.lock().unwrap().push(label);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(CatalogError::Unavailable { status: 500 });
            }
            let start = (page as i64 - 1) * 20;
            let remaining = (self.total_results as i64 - start).clamp(0, 20);
            Ok(MoviePage {
                page,
                results: (start..start + remaining)
                    .map(|id| MovieSummary {
                        id,
                        title: format!("Movie {id}"),
                        poster_path: None,
                        backdrop_path: None,
                        release_date: String::new(),
                        vote_average: 0.0,
                        overview: String::new(),
                        genre_ids: vec![],
                    })
                    .collect(),
                total_pages: self.total_results.div_ceil(20),
                total_results: self.total_results,
            })
        }
    }

    #[async_trait]
    impl CatalogApi for PagedCatalog {
        async fn list_movies(&self, page: u32) -> CatalogResult<MoviePage> {
            self.page(format!("discover:{page}"), page).await
        }
        async fn search_movies(&self, term: &str, page: u32) -> CatalogResult<MoviePage> {
            self.page(format!("search:{term}:{page}"), page).await
        }
        async fn list_movies_by_genre(&self, genre_id: i64, page: u32) -> CatalogResult<MoviePage> {
            self.page(format!("genre:{genre_id}:{page}"), page).await
        }
        async fn get_movie_detail(&self, _id: i64) -> CatalogResult<MovieDetail> {
            Err(CatalogError::Unavailable { status: 404 })
        }
        async fn list_genres(&self) -> CatalogResult<Vec<Genre>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn appends_pages_until_exhausted() {
        let catalog = Arc::new(PagedCatalog::new(45));
        let feed = InfiniteFeed::new(catalog.clone(), ListingQuery::new(1, None, None));

        assert_eq!(
            feed.load_next().await.unwrap(),
            LoadOutcome::Loaded { page: 1, added: 20 }
        );
        assert!(feed.has_more());
        feed.load_next().await.unwrap();
        assert_eq!(
            feed.load_next().await.unwrap(),
            LoadOutcome::Loaded { page: 3, added: 5 }
        );
        assert!(!feed.has_more());
        assert!(feed.reached_end());
        assert_eq!(feed.movies().len(), 45);
        assert_eq!(feed.load_next().await.unwrap(), LoadOutcome::Exhausted);
        assert_eq!(
            *catalog.calls.lock().unwrap(),
            vec!["discover:1", "discover:2", "discover:3"]
        );
    }

    #[tokio::test]
    async fn never_requests_beyond_page_fifty() {
        let catalog = Arc::new(PagedCatalog::new(100_000));
        let feed = InfiniteFeed::new(catalog.clone(), ListingQuery::new(1, None, Some(28)));
        while let LoadOutcome::Loaded { .. } = feed.load_next().await.unwrap() {}
        let calls = catalog.calls.lock().unwrap();
        assert_eq!(calls.len(), 50);
        assert_eq!(calls.last().map(String::as_str), Some("genre:28:50"));
    }

    #[tokio::test]
    async fn in_flight_guard_rejects_overlapping_loads() {
        let gate = Arc::new(Notify::new());
        let catalog = Arc::new(PagedCatalog {
            gate: Some(gate.clone()),
            ..PagedCatalog::new(60)
        });
        let feed = Arc::new(InfiniteFeed::new(
            catalog.clone(),
            ListingQuery::new(1, Some("dune".into()), None),
        ));

        let first = tokio::spawn({
            let feed = feed.clone();
            async move { feed.load_next().await }
        });
        while !feed.is_loading() {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.load_next().await.unwrap(), LoadOutcome::Busy);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { page: 1, added: 20 });
        assert!(!feed.is_loading());
        assert_eq!(*catalog.calls.lock().unwrap(), vec!["search:dune:1"]);
    }

    #[tokio::test]
    async fn zero_results_leaves_feed_empty() {
        let catalog = Arc::new(PagedCatalog::new(0));
        let feed = InfiniteFeed::new(catalog, ListingQuery::new(1, None, None));
        feed.load_next().await.unwrap();
        assert!(feed.is_empty());
        assert!(!feed.reached_end());
        assert_eq!(feed.load_next().await.unwrap(), LoadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn failure_clears_loading_flag() {
        let catalog = Arc::new(PagedCatalog {
            fail: true,
            ..PagedCatalog::new(10)
        });
        let feed = InfiniteFeed::new(catalog, ListingQuery::new(1, None, None));
        let err = feed.load_next().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(!feed.is_loading());
        assert!(feed.has_more());
    }

    #[tokio::test]
    async fn reset_starts_over_with_new_query() {
        let catalog = Arc::new(PagedCatalog::new(45));
        let feed = InfiniteFeed::new(catalog.clone(), ListingQuery::new(1, None, None));
        feed.load_next().await.unwrap();
        feed.load_next().await.unwrap();

        feed.reset(ListingQuery::new(7, Some("up".into()), None));
        assert!(feed.movies().is_empty());
        assert_eq!(
            feed.load_next().await.unwrap(),
            LoadOutcome::Loaded { page: 1, added: 20 }
        );
        assert_eq!(feed.movies().len(), 20);
        assert_eq!(catalog.calls.lock().unwrap().last().unwrap(), "search:up:1");
    }

    #[tokio::test]
    async fn reset_during_load_drops_stale_page() {
        let gate = Arc::new(Notify::new());
        let catalog = Arc::new(PagedCatalog {
            gate: Some(gate.clone()),
            ..PagedCatalog::new(45)
        });
        let feed = Arc::new(InfiniteFeed::new(
            catalog.clone(),
            ListingQuery::new(1, None, None),
        ));

        let pending = tokio::spawn({
            let feed = feed.clone();
            async move { feed.load_next().await }
        });
        while !feed.is_loading() {
            tokio::task::yield_now().await;
        }
        feed.reset(ListingQuery::new(1, Some("new".into()), None));
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Stale);
        assert!(feed.movies().is_empty());

        // The dropped page must not advance the new query past its first page.
        gate.notify_one();
        assert_eq!(
            feed.load_next().await.unwrap(),
            LoadOutcome::Loaded { page: 1, added: 20 }
        );
        assert_eq!(
            *catalog.calls.lock().unwrap(),
            vec!["discover:1", "search:new:1"]
        );
    }
}
