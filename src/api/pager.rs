//! Offset-cursor pagination over the search endpoint
//!
//! [`PageFetcher`] turns "fetch the window at offset N" into a sequence of
//! [`PageResult`]s keyed by offset. Errors are returned as part of the load
//! result so callers can retry just the failed page. Cancellation is not an
//! error: it comes back as [`Cancelled`] and never as a page.
//!
//! The keys follow the `total` the server reports. If the server
//! under-reports (some catalog endpoints stop paging at a fixed depth), the
//! sequence ends where the server says it ends.

use std::sync::Arc;

use futures::stream::{self, Stream};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::client::CatalogClient;
use super::error::ClassifiedError;
use super::search::{self, PageRequest, SearchQuery};
use crate::models::{Item, PageResult};

/// The surrounding operation was cancelled before the page arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("page fetch cancelled")]
pub struct Cancelled;

/// Result of one page load.
#[derive(Debug, Clone, PartialEq)]
pub enum PageLoad<T> {
    Page(PageResult<T>),
    Error(ClassifiedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub page_size: u32,
    /// Size of the first load, to fill an initial viewport in one call.
    pub initial_load_size: u32,
    /// Offset used when a load has no key.
    pub default_offset: u32,
}

impl PagingConfig {
    pub fn new(page_size: u32, initial_load_size: u32) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            initial_load_size: initial_load_size.max(page_size),
            default_offset: 0,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self::new(20, 60)
    }
}

/// Parameters of a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub key: Option<u32>,
    pub load_size: u32,
}

/// Loaded pages plus the position the user is looking at.
#[derive(Debug, Clone, PartialEq)]
pub struct PagingState<T> {
    pub pages: Vec<PageResult<T>>,
    /// Index into the concatenated items of `pages`.
    pub anchor_position: Option<usize>,
    pub page_size: u32,
}

impl<T> PagingState<T> {
    /// Page holding the item at `position`, or the last non-empty page when
    /// the position lies past the loaded items.
    pub fn closest_page_to_position(&self, position: usize) -> Option<&PageResult<T>> {
        let mut start = 0usize;
        for page in &self.pages {
            let end = start + page.items.len();
            if position < end {
                return Some(page);
            }
            start = end;
        }
        self.pages.iter().rev().find(|p| !p.items.is_empty())
    }

    /// Offset to reload from so the anchor stays in view, or `None` to
    /// reload from the start.
    pub fn resume_key(&self) -> Option<u32> {
        let anchor = self.anchor_position?;
        let page = self.closest_page_to_position(anchor)?;
        resume_key(page, self.page_size)
    }
}

/// `prev_key + page_size` when there is a previous page, else
/// `next_key - page_size`, else `None`.
pub fn resume_key<T>(page: &PageResult<T>, page_size: u32) -> Option<u32> {
    page.prev_key
        .map(|prev| prev.saturating_add(page_size))
        .or_else(|| page.next_key.map(|next| next.saturating_sub(page_size)))
}

/// Pages through one search query.
pub struct PageFetcher {
    client: Arc<CatalogClient>,
    query: SearchQuery,
    config: PagingConfig,
}

impl PageFetcher {
    pub fn new(client: Arc<CatalogClient>, query: SearchQuery, config: PagingConfig) -> Self {
        Self {
            client,
            query,
            config,
        }
    }

    /// Load one page. A fired `cancel` aborts the in-flight request and
    /// returns `Err(Cancelled)`.
    pub async fn fetch_page(
        &self,
        params: LoadParams,
        cancel: &CancellationToken,
    ) -> Result<PageLoad<Item>, Cancelled> {
        let offset = params.key.unwrap_or(self.config.default_offset);
        let limit = params.load_size.max(1);
        let request = PageRequest {
            query: &self.query,
            offset,
            limit,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Page fetch at offset {} cancelled", offset);
                return Err(Cancelled);
            }
            result = search::search(&self.client, &request) => result,
        };

        Ok(match result {
            Ok(response) => {
                tracing::debug!(
                    "Loaded {} items at offset {} (total {})",
                    response.results.len(),
                    offset,
                    response.paging.total
                );
                PageLoad::Page(PageResult::from_window(
                    response.results,
                    offset,
                    limit,
                    response.paging.total,
                ))
            }
            Err(e) => {
                tracing::warn!("Page fetch at offset {} failed: {}", offset, e);
                PageLoad::Error(e)
            }
        })
    }

    /// Resume key for reloading around the anchor of `state`.
    pub fn refresh_key(&self, state: &PagingState<Item>) -> Option<u32> {
        state.resume_key()
    }

    /// Lazily load pages starting at `start`. The first load uses the
    /// initial load size, later ones the page size. The stream ends after a
    /// page without a next key, after an error page, or on cancellation.
    /// Call again with any key to restart.
    pub fn pages(
        &self,
        start: Option<u32>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<PageLoad<Item>, Cancelled>> + '_ {
        let first = LoadParams {
            key: start,
            load_size: self.config.initial_load_size,
        };

        stream::unfold(Some(first), move |params| {
            let cancel = cancel.clone();
            async move {
                let params = params?;
                let result = self.fetch_page(params, &cancel).await;
                let next = match &result {
                    Ok(PageLoad::Page(page)) => page.next_key.map(|key| LoadParams {
                        key: Some(key),
                        load_size: self.config.page_size,
                    }),
                    Ok(PageLoad::Error(_)) | Err(Cancelled) => None,
                };
                Some((result, next))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::authenticator::RequestAuthenticator;
    use crate::api::error::HttpErrorKind;
    use crate::auth::testing::{fixture, FakeExchange};
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Serves a catalog of `total` items, honouring offset/limit.
    struct CatalogResponder {
        total: u32,
    }

    impl Respond for CatalogResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let mut offset = 0u32;
            let mut limit = 10u32;
            for (key, value) in request.url.query_pairs() {
                match key.as_ref() {
                    "offset" => offset = value.parse().unwrap(),
                    "limit" => limit = value.parse().unwrap(),
                    _ => {}
                }
            }
            let end = (offset + limit).min(self.total);
            let results: Vec<serde_json::Value> = (offset.min(end)..end)
                .map(|i| serde_json::json!({"id": format!("ITEM-{}", i), "title": "thing"}))
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": results,
                "paging": {"total": self.total, "offset": offset, "limit": limit},
            }))
        }
    }

    async fn fetcher(server: &MockServer, config: PagingConfig) -> PageFetcher {
        let fx = fixture(FakeExchange::new(), None).await;
        let client = CatalogClient::new(
            &server.uri(),
            "US",
            RequestAuthenticator::new(fx.coordinator.clone()),
        )
        .unwrap();
        PageFetcher::new(Arc::new(client), SearchQuery::new("ipod"), config)
    }

    fn page(load: PageLoad<Item>) -> PageResult<Item> {
        match load {
            PageLoad::Page(p) => p,
            PageLoad::Error(e) => panic!("unexpected error page: {}", e),
        }
    }

    fn stub_page<T>(items: Vec<T>, prev_key: Option<u32>, next_key: Option<u32>) -> PageResult<T> {
        PageResult {
            items,
            prev_key,
            next_key,
        }
    }

    #[tokio::test]
    async fn test_stream_yields_every_item_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(CatalogResponder { total: 47 })
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::new(10, 30)).await;
        let loads: Vec<_> = fetcher.pages(None, CancellationToken::new()).collect().await;

        let pages: Vec<PageResult<Item>> = loads.into_iter().map(|l| page(l.unwrap())).collect();
        // 30 + 10 + 7
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].prev_key, None);
        assert_eq!(pages[0].next_key, Some(30));
        assert_eq!(pages[1].prev_key, Some(20));
        assert_eq!(pages[2].next_key, None);

        let ids: Vec<String> = pages
            .iter()
            .flat_map(|p| p.items.iter().map(|i| i.id.clone()))
            .collect();
        assert_eq!(ids.len(), 47);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 47);
    }

    #[tokio::test]
    async fn test_manual_paging_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(CatalogResponder { total: 40 })
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::new(20, 20)).await;
        let cancel = CancellationToken::new();
        let mut key = None;
        let mut seen = 0;
        loop {
            let params = LoadParams {
                key,
                load_size: 20,
            };
            let result = page(fetcher.fetch_page(params, &cancel).await.unwrap());
            seen += result.items.len();
            match result.next_key {
                Some(next) => key = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 40);
    }

    #[tokio::test]
    async fn test_refresh_reloads_around_anchor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(CatalogResponder { total: 60 })
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::new(20, 20)).await;
        let cancel = CancellationToken::new();
        let mut pages = Vec::new();
        for key in [None, Some(20), Some(40)] {
            let params = LoadParams { key, load_size: 20 };
            pages.push(page(fetcher.fetch_page(params, &cancel).await.unwrap()));
        }
        let state = PagingState {
            pages,
            anchor_position: Some(45),
            page_size: 20,
        };

        let key = fetcher.refresh_key(&state);
        assert_eq!(key, Some(40));

        let params = LoadParams { key, load_size: 20 };
        let reloaded = page(fetcher.fetch_page(params, &cancel).await.unwrap());
        assert_eq!(reloaded.items[0].id, "ITEM-40");
        assert_eq!(reloaded.prev_key, Some(20));
    }

    #[tokio::test]
    async fn test_empty_result_has_no_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(CatalogResponder { total: 0 })
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::default()).await;
        let load = fetcher
            .fetch_page(
                LoadParams {
                    key: None,
                    load_size: 60,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(load, PageLoad::Page(stub_page(vec![], None, None)));
    }

    #[tokio::test]
    async fn test_http_error_is_a_page_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::default()).await;
        let loads: Vec<_> = fetcher.pages(Some(40), CancellationToken::new()).collect().await;

        // The sequence stops at the failed page.
        assert_eq!(loads.len(), 1);
        match loads.into_iter().next().unwrap().unwrap() {
            PageLoad::Error(ClassifiedError::Http { status, kind, .. }) => {
                assert_eq!(status, 502);
                assert_eq!(kind, HttpErrorKind::Server);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_results_is_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::default()).await;
        let load = fetcher
            .fetch_page(
                LoadParams {
                    key: None,
                    load_size: 20,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(load, PageLoad::Error(ClassifiedError::EmptyBody));
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_error_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, PagingConfig::default()).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = fetcher
            .fetch_page(
                LoadParams {
                    key: None,
                    load_size: 20,
                },
                &cancel,
            )
            .await;
        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));

        let loads: Vec<_> = fetcher.pages(None, cancel).collect().await;
        assert_eq!(loads, vec![Err(Cancelled)]);
    }

    #[tokio::test]
    async fn test_authenticated_search_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer access-x"))
            .respond_with(CatalogResponder { total: 5 })
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(FakeExchange::new(), None).await;
        fx.store.save("access-x", "refresh-x").await.unwrap();
        let client = CatalogClient::new(
            &server.uri(),
            "US",
            RequestAuthenticator::new(fx.coordinator.clone()),
        )
        .unwrap();
        let fetcher = PageFetcher::new(
            Arc::new(client),
            SearchQuery::new("ipod"),
            PagingConfig::default(),
        );

        let load = fetcher
            .fetch_page(
                LoadParams {
                    key: None,
                    load_size: 60,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(page(load).items.len(), 5);
    }

    #[test]
    fn test_resume_key_prefers_prev() {
        let last = stub_page(vec![(); 20], Some(20), None);
        assert_eq!(resume_key(&last, 20), Some(40));
    }

    #[test]
    fn test_resume_key_falls_back_to_next() {
        let first = stub_page(vec![(); 60], None, Some(60));
        assert_eq!(resume_key(&first, 20), Some(40));
    }

    #[test]
    fn test_resume_key_none_without_neighbours() {
        let only = stub_page(vec![(); 3], None, None);
        assert_eq!(resume_key(&only, 20), None);
    }

    #[test]
    fn test_state_resume_key_uses_anchor() {
        let state = PagingState {
            pages: vec![
                stub_page(vec![(); 20], None, Some(20)),
                stub_page(vec![(); 20], Some(0), Some(40)),
                stub_page(vec![(); 20], Some(20), None),
            ],
            anchor_position: Some(45),
            page_size: 20,
        };
        assert_eq!(state.resume_key(), Some(40));

        let near_top = PagingState {
            anchor_position: Some(5),
            ..state.clone()
        };
        assert_eq!(near_top.resume_key(), Some(0));

        let past_end = PagingState {
            anchor_position: Some(500),
            ..state.clone()
        };
        assert_eq!(past_end.resume_key(), Some(40));

        let no_anchor = PagingState {
            anchor_position: None,
            ..state
        };
        assert_eq!(no_anchor.resume_key(), None);
    }

    #[test]
    fn test_paging_config_clamps() {
        let config = PagingConfig::new(0, 0);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.initial_load_size, 1);
        assert_eq!(PagingConfig::new(20, 5).initial_load_size, 20);
    }
}
