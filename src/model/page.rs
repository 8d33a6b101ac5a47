use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    client::SpotifyClient,
    error::{Error, Result},
};

/// A page of items.
///
/// Pages link to their neighbours with absolute URLs in `next` and `previous`. Following a link is a plain GET through
/// the [SpotifyClient]; all of the cursor state lives in the server-returned URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    // cursor-based pages don't have an offset or a total
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    total: Option<usize>,
    next: Option<String>,
    #[serde(default)]
    previous: Option<String>,
}

/// Iterator over a page and every page after it. Each page after the first costs one request.
#[derive(Debug)]
pub struct PageIter<'a, T> {
    client: &'a SpotifyClient,
    first: Option<Page<T>>,
    next_url: Option<String>,
}

impl<T> Page<T> {
    /// Return the items in this page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Return the items in this page while consuming the page.
    pub fn take_items(self) -> Vec<T> {
        self.items
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

impl<T> Page<T>
where
    T: DeserializeOwned,
{
    /// Return the next page from this page, if it exists. No request is sent if it doesn't.
    pub fn next_page(&self, client: &SpotifyClient) -> Result<Option<Page<T>>> {
        self.next.as_deref().map(|url| fetch_page(client, url)).transpose()
    }

    /// Return the previous page from this page, if it exists. No request is sent if it doesn't.
    pub fn previous_page(&self, client: &SpotifyClient) -> Result<Option<Page<T>>> {
        self.previous.as_deref().map(|url| fetch_page(client, url)).transpose()
    }

    /// Iterate over this page and every page after it.
    pub fn pages(self, client: &SpotifyClient) -> PageIter<'_, T> {
        PageIter {
            client,
            first: Some(self),
            next_url: None,
        }
    }
}

impl<'a, T> Iterator for PageIter<'a, T>
where
    T: DeserializeOwned,
{
    type Item = Result<Page<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(page) = self.first.take() {
            self.next_url = page.next.clone();
            return Some(Ok(page));
        }

        let url = self.next_url.take()?;
        let page = fetch_page(self.client, &url);

        if let Ok(page) = &page {
            self.next_url = page.next.clone();
        }

        Some(page)
    }
}

fn fetch_page<T>(client: &SpotifyClient, url: &str) -> Result<Page<T>>
where
    T: DeserializeOwned,
{
    let response = client.get(url, &[])?;
    debug!("Got page from {}", url);

    // an empty response isn't a page either; let serde say so
    serde_json::from_value(response.unwrap_or(Value::Null)).map_err(Error::MalformedResponse)
}
