//! Page-fetch seam between the worker and the upstream client.

use async_trait::async_trait;
use url::Url;

use scrapingant_client::{CascadeClient, FetchError, FetchTransport};

/// A fetched page body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub body: String,
}

/// Capability the crawl worker needs: fetch a URL, get a document.
///
/// Implemented by the cascading upstream client in production and by mocks
/// in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

#[async_trait]
impl<T: FetchTransport> PageFetcher for CascadeClient<T> {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let doc = CascadeClient::fetch(self, url).await?;
        Ok(FetchedPage {
            url: doc.url,
            body: doc.body,
        })
    }
}
