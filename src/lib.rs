pub mod app;
pub mod favorites;
pub mod feed;
pub mod models;
pub mod query;
pub mod tmdb;
pub mod utils;
