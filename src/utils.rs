use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{Genre, MovieDetail, MovieSummary};
use crate::tmdb::genre_names;

pub const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";
pub const POSTER_PLACEHOLDER: &str = "https://placehold.co/500x750";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosterSize {
    Card,
    Detail,
}

impl PosterSize {
    fn as_path(&self) -> &'static str {
        match self {
            PosterSize::Card => "w500",
            PosterSize::Detail => "w780",
        }
    }
}

pub fn poster_url(path: Option<&str>, size: PosterSize) -> String {
    match path.filter(|p| !p.is_empty()) {
        Some(p) => format!("{IMAGE_BASE}/{}{p}", size.as_path()),
        None => POSTER_PLACEHOLDER.to_string(),
    }
}

pub fn backdrop_url(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE}/original{p}"))
}

pub fn release_year(date: &str) -> String {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map(|d| d.year().to_string())
        .unwrap_or_else(|_| "N/A".to_string())
}

pub fn format_rating(vote_average: f64) -> String {
    format!("{:.1}", vote_average)
}

/// At most two genre names, or `N/A` when none resolve.
pub fn genre_line(names: &[String]) -> String {
    if names.is_empty() {
        return "N/A".to_string();
    }
    names
        .iter()
        .take(2)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" • ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieCard {
    pub id: i64,
    pub title: String,
    pub poster_url: String,
    pub year: String,
    pub rating: String,
    pub genres: String,
    pub favorited: bool,
}

impl MovieCard {
    pub fn new(movie: &MovieSummary, genres: &[Genre], favorited: bool) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            poster_url: poster_url(movie.poster_path.as_deref(), PosterSize::Card),
            year: release_year(&movie.release_date),
            rating: format_rating(movie.vote_average),
            genres: genre_line(&genre_names(genres, &movie.genre_ids)),
            favorited,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailView {
    #[serde(flatten)]
    pub movie: MovieDetail,
    pub poster_url: String,
    pub backdrop_url: Option<String>,
    pub year: String,
    pub rating: String,
    pub favorited: bool,
}

impl DetailView {
    pub fn new(movie: MovieDetail, favorited: bool) -> Self {
        Self {
            poster_url: poster_url(movie.poster_path.as_deref(), PosterSize::Detail),
            backdrop_url: backdrop_url(movie.backdrop_path.as_deref()),
            year: release_year(&movie.release_date),
            rating: format_rating(movie.vote_average),
            favorited,
            movie,
        }
    }
}
