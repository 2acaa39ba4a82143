//! Catalog search endpoint

use futures::{pin_mut, StreamExt};
use tokio_util::sync::CancellationToken;

use super::client::CatalogClient;
use super::error::ClassifiedError;
use super::pager::{PageFetcher, PageLoad};
use crate::models::{Item, SearchResponse};

/// What to search for. Fixed for the lifetime of a page sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub q: String,
    /// Listing status filter, e.g. `active`.
    pub status: Option<String>,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }
}

/// One offset/limit window of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub query: &'a SearchQuery,
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest<'_> {
    fn params(&self, site_id: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", self.query.q.clone()),
            ("offset", self.offset.to_string()),
            ("limit", self.limit.to_string()),
            ("site_id", site_id.to_string()),
        ];
        if let Some(ref status) = self.query.status {
            params.push(("status", status.clone()));
        }
        params
    }
}

/// Fetch one window of search results.
pub async fn search(
    client: &CatalogClient,
    request: &PageRequest<'_>,
) -> Result<SearchResponse, ClassifiedError> {
    let params = request.params(client.site_id());
    client.get_json("search", &params).await
}

/// Walk a search page by page and print it (stops after `max_pages`).
pub async fn print_search(fetcher: &PageFetcher, max_pages: usize) -> anyhow::Result<()> {
    let pages = fetcher.pages(None, CancellationToken::new()).take(max_pages);
    pin_mut!(pages);

    let mut shown = 0usize;
    while let Some(load) = pages.next().await {
        match load? {
            PageLoad::Page(page) => {
                for item in &page.items {
                    print_item_line(item);
                }
                shown += page.items.len();
                if page.next_key.is_none() {
                    println!("\n({} results, end of list)", shown);
                    return Ok(());
                }
            }
            PageLoad::Error(e) => {
                anyhow::bail!("Search failed after {} results: {}", shown, e);
            }
        }
    }

    println!("\n({} results shown, more available)", shown);
    Ok(())
}

fn print_item_line(item: &Item) {
    let price = match (item.price, item.currency_id.as_deref()) {
        (Some(p), Some(c)) => format!("{:.2} {}", p, c),
        (Some(p), None) => format!("{:.2}", p),
        _ => "-".to_string(),
    };
    println!(
        "{:<16} {:>14}  {}",
        item.id,
        price,
        item.title.as_deref().unwrap_or("(untitled)")
    );
}
