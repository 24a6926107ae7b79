//! Run one composed listing or detail request against the live catalog and
//! print the result as pretty JSON.
//! Usage:
//!   cargo run --bin catalog_probe -- list [page]
//!   cargo run --bin catalog_probe -- search <term> [page]
//!   cargo run --bin catalog_probe -- genre <genre_id> [page]
//!   cargo run --bin catalog_probe -- detail <movie_id>
//!   cargo run --bin catalog_probe -- genres
//!   cargo run --bin catalog_probe -- feed [term]
//! Requires TMDB_API_READ_TOKEN in the environment (.env supported).

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use marquee::feed::{InfiniteFeed, LoadOutcome};
use marquee::query::{ListingQuery, QueryComposer};
use marquee::tmdb::{CatalogApi, TmdbClient};
use marquee::utils::DetailView;
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;

fn page_arg(arg: Option<&String>) -> Result<i64> {
    match arg {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("page must be a number, got '{}'", raw)),
        None => Ok(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("usage: catalog_probe <list|search|genre|detail|genres|feed> [args]");
    };

    let client = TmdbClient::from_env()?;
    let output: Value = match command.as_str() {
        "genres" => serde_json::to_value(client.list_genres().await?)?,
        "detail" => {
            let id: i64 = args
                .get(1)
                .context("detail needs a movie id")?
                .parse()
                .context("movie id must be a number")?;
            let detail = client.get_movie_detail(id).await?;
            serde_json::to_value(DetailView::new(detail, false))?
        }
        "list" | "search" | "genre" => {
            let query = match command.as_str() {
                "list" => ListingQuery::new(page_arg(args.get(1))?, None, None),
                "search" => {
                    let term = args.get(1).context("search needs a term")?.clone();
                    ListingQuery::new(page_arg(args.get(2))?, Some(term), None)
                }
                _ => {
                    let genre: i64 = args
                        .get(1)
                        .context("genre needs a genre id")?
                        .parse()
                        .context("genre id must be a number")?;
                    ListingQuery::new(page_arg(args.get(2))?, None, Some(genre))
                }
            };
            let genres = client.list_genres().await?;
            let state = QueryComposer::from_env()?
                .compose(&client, &query, &genres)
                .await;
            serde_json::to_value(state)?
        }
        "feed" => {
            let query = ListingQuery::new(1, args.get(1).cloned(), None);
            let feed = InfiniteFeed::new(Arc::new(client), query);
            let mut pages = Vec::new();
            loop {
                match feed.load_next().await? {
                    LoadOutcome::Loaded { page, added } => {
                        eprintln!("page {page}: +{added}");
                        pages.push(json!({ "page": page, "added": added }));
                    }
                    LoadOutcome::Exhausted => break,
                    other => bail!("unexpected feed outcome {:?}", other),
                }
            }
            json!({
                "pages": pages,
                "movies": feed.movies().len(),
                "reached_end": feed.reached_end(),
            })
        }
        other => bail!("unknown command '{}'", other),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
