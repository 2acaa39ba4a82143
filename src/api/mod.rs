//! API client module for the catalog

pub mod authenticator;
pub mod client;
pub mod error;
pub mod items;
pub mod pager;
pub mod search;

use std::sync::Arc;

use anyhow::Result;

pub use authenticator::RequestAuthenticator;
pub use client::CatalogClient;
pub use error::{ClassifiedError, HttpErrorKind};
pub use pager::{Cancelled, LoadParams, PageFetcher, PageLoad, PagingConfig, PagingState};
pub use search::SearchQuery;

use crate::auth::Session;
use crate::config::Config;

fn catalog_client(config: &Config, session: &Session) -> Result<CatalogClient> {
    CatalogClient::new(
        &config.api_base,
        &config.site_id,
        RequestAuthenticator::new(session.coordinator.clone()),
    )
}

/// Search the catalog and print up to `max_pages` pages
pub async fn search(
    config: &Config,
    session: &Session,
    query: &str,
    status: Option<String>,
    max_pages: usize,
) -> Result<()> {
    let client = Arc::new(catalog_client(config, session)?);
    let query = SearchQuery::new(query).with_status(status.or_else(|| config.status.clone()));
    let fetcher = PageFetcher::new(client, query, config.paging());
    search::print_search(&fetcher, max_pages).await
}

/// Show a single item
pub async fn show_item(config: &Config, session: &Session, id: &str) -> Result<()> {
    items::show_item(&catalog_client(config, session)?, id).await
}

/// Show current user info
pub async fn whoami(config: &Config, session: &Session) -> Result<()> {
    items::whoami(&catalog_client(config, session)?).await
}
