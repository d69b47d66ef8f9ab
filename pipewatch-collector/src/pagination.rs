use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::future::Future;

use pipewatch_statsd::metric;
use url::Url;

use crate::statsd::CollectorCounters;

/// Pointer to the next page of a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextPage {
    /// The listing is exhausted.
    End,
    /// A continuation token or absolute URL of the next page.
    Cursor(String),
    /// The upstream returned a next link that cannot be followed.
    Malformed(String),
}

/// One page of a listing.
#[derive(Clone, Debug)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Where the listing continues.
    pub next: NextPage,
}

impl<T> Page<T> {
    /// Creates a page from items and an optional continuation token.
    ///
    /// An empty token is treated as the end of the listing.
    pub fn with_token(items: Vec<T>, token: Option<String>) -> Self {
        let next = match token {
            Some(token) if !token.is_empty() => NextPage::Cursor(token),
            _ => NextPage::End,
        };

        Self { items, next }
    }

    /// Creates a page from items and an optional relative `next` link.
    ///
    /// The link is resolved against `base`. A link that does not parse or leaves the origin of
    /// `base` is [`NextPage::Malformed`], since following it would send the session elsewhere.
    pub fn with_link(items: Vec<T>, base: &Url, href: Option<&str>) -> Self {
        let next = match href {
            None | Some("") => NextPage::End,
            Some(href) => match base.join(href) {
                Ok(url) if url.origin() == base.origin() => NextPage::Cursor(url.into()),
                _ => NextPage::Malformed(href.to_owned()),
            },
        };

        Self { items, next }
    }
}

/// Why a listing returned partial results.
#[derive(Debug)]
pub enum IncompleteReason {
    /// More pages were announced after the page cap was reached.
    PageLimit(usize),
    /// The upstream returned a continuation token that was already followed.
    TokenLoop,
    /// The upstream returned a next link that cannot be followed.
    MalformedLink(String),
    /// Fetching a page failed.
    RequestFailed(Box<dyn Error + Send + Sync>),
}

impl IncompleteReason {
    /// Returns a short name of the reason for metrics and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PageLimit(_) => "page_limit",
            Self::TokenLoop => "token_loop",
            Self::MalformedLink(_) => "malformed_link",
            Self::RequestFailed(_) => "request_failed",
        }
    }
}

/// Signals that a listing stopped before the upstream reported its end.
#[derive(Debug)]
pub struct ListingIncomplete {
    /// The listing operation.
    pub listing: &'static str,
    /// Number of pages that were fetched successfully.
    pub pages: usize,
    /// Why the listing stopped.
    pub reason: IncompleteReason,
}

impl fmt::Display for ListingIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listing {} incomplete after {} pages: ", self.listing, self.pages)?;
        match &self.reason {
            IncompleteReason::PageLimit(limit) => write!(f, "page limit of {limit} reached"),
            IncompleteReason::TokenLoop => f.write_str("continuation token repeated"),
            IncompleteReason::MalformedLink(href) => write!(f, "malformed next link '{href}'"),
            IncompleteReason::RequestFailed(_) => f.write_str("request failed"),
        }
    }
}

impl Error for ListingIncomplete {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.reason {
            IncompleteReason::RequestFailed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// The accumulated items of a listing.
///
/// An incomplete listing is never the same as a verified empty one: callers check
/// [`incomplete`](Self::incomplete) before treating the items as the whole result.
#[derive(Debug)]
pub struct Listing<T> {
    items: Vec<T>,
    pages: usize,
    incomplete: Option<ListingIncomplete>,
}

impl<T> Listing<T> {
    /// Creates a complete listing from a single set of items.
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            pages: 1,
            incomplete: None,
        }
    }

    /// Creates a listing that failed before the first page.
    pub fn failed(listing: &'static str, error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            items: Vec::new(),
            pages: 0,
            incomplete: Some(ListingIncomplete {
                listing,
                pages: 0,
                reason: IncompleteReason::RequestFailed(error.into()),
            }),
        }
    }

    /// Creates a listing that stopped early with the given items.
    pub fn partial(items: Vec<T>, incomplete: ListingIncomplete) -> Self {
        Self {
            items,
            pages: incomplete.pages,
            incomplete: Some(incomplete),
        }
    }

    /// Returns the items fetched.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the listing and returns the items fetched.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Returns the number of pages fetched successfully.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Returns why the listing is incomplete, if it is.
    pub fn incomplete(&self) -> Option<&ListingIncomplete> {
        self.incomplete.as_ref()
    }

    /// Returns `true` if not a single page could be fetched.
    pub fn is_failed(&self) -> bool {
        self.pages == 0 && self.incomplete.is_some()
    }

    /// Splits the listing into its items and the incomplete signal.
    pub fn into_parts(self) -> (Vec<T>, Option<ListingIncomplete>) {
        (self.items, self.incomplete)
    }

    /// Converts all items, keeping completeness.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U> {
        Listing {
            items: self.items.into_iter().map(f).collect(),
            pages: self.pages,
            incomplete: self.incomplete,
        }
    }
}

/// Follows a listing from its first page until the upstream reports its end.
///
/// `fetch` is called with `None` for the first page and with the cursor of the previous page
/// afterwards. At most `max_pages` pages are fetched. The listing stops early and is marked
/// incomplete when the cap is reached while more pages are announced, when a cursor repeats, when
/// a next link is malformed, or when a page fails. Items fetched until then are kept.
pub async fn collect_pages<T, E, F, Fut>(
    listing: &'static str,
    max_pages: usize,
    mut fetch: F,
) -> Listing<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = None;
    let mut pages = 0;

    let reason = loop {
        if pages >= max_pages {
            break IncompleteReason::PageLimit(max_pages);
        }

        let page = match fetch(cursor.take()).await {
            Ok(page) => page,
            Err(error) => break IncompleteReason::RequestFailed(error.into()),
        };

        pages += 1;
        items.extend(page.items);

        match page.next {
            NextPage::End => {
                metric!(
                    counter(CollectorCounters::PagesFetched) += pages as i64,
                    listing = listing,
                );
                return Listing {
                    items,
                    pages,
                    incomplete: None,
                };
            }
            NextPage::Malformed(href) => break IncompleteReason::MalformedLink(href),
            NextPage::Cursor(next) => {
                if !seen.insert(next.clone()) {
                    break IncompleteReason::TokenLoop;
                }
                cursor = Some(next);
            }
        }
    };

    let incomplete = ListingIncomplete {
        listing,
        pages,
        reason,
    };

    pipewatch_log::warn!(
        listing,
        pages,
        items = items.len(),
        reason = incomplete.reason.name(),
        error = &incomplete as &dyn Error,
        "listing incomplete, keeping partial results",
    );
    metric!(
        counter(CollectorCounters::PagesFetched) += pages as i64,
        listing = listing,
    );
    metric!(
        counter(CollectorCounters::IncompleteListing) += 1,
        listing = listing,
        reason = incomplete.reason.name(),
    );

    Listing {
        items,
        pages,
        incomplete: Some(incomplete),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use similar_asserts::assert_eq;

    use super::*;

    fn page(items: &[u32], token: Option<&str>) -> Result<Page<u32>, io::Error> {
        Ok(Page::with_token(items.to_vec(), token.map(str::to_owned)))
    }

    #[tokio::test]
    async fn test_follows_tokens_to_end() {
        let listing = collect_pages("test", 10, |cursor| async move {
            match cursor.as_deref() {
                None => page(&[1, 2], Some("a")),
                Some("a") => page(&[3], Some("b")),
                Some("b") => page(&[4], None),
                Some(other) => panic!("unexpected cursor {other}"),
            }
        })
        .await;

        assert_eq!(listing.items(), [1, 2, 3, 4]);
        assert_eq!(listing.pages(), 3);
        assert!(listing.incomplete().is_none());
    }

    #[tokio::test]
    async fn test_empty_token_ends_listing() {
        let listing = collect_pages("test", 10, |_| async { page(&[1], Some("")) }).await;
        assert_eq!(listing.items(), [1]);
        assert!(listing.incomplete().is_none());
    }

    #[tokio::test]
    async fn test_repeated_token_stops() {
        let listing = collect_pages("test", 100, |_| async { page(&[1], Some("same")) }).await;

        assert_eq!(listing.items(), [1, 1]);
        let incomplete = listing.incomplete().unwrap();
        assert!(matches!(incomplete.reason, IncompleteReason::TokenLoop));
        assert!(!listing.is_failed());
    }

    #[tokio::test]
    async fn test_page_cap_with_fresh_tokens() {
        let mut counter = 0;
        let listing = collect_pages("test", 5, |_| {
            counter += 1;
            let value = counter;
            async move { page(&[value], Some(&format!("token-{value}"))) }
        })
        .await;

        assert_eq!(listing.pages(), 5);
        assert_eq!(listing.items(), [1, 2, 3, 4, 5]);
        assert_eq!(
            listing.incomplete().unwrap().to_string(),
            "listing test incomplete after 5 pages: page limit of 5 reached"
        );
    }

    #[tokio::test]
    async fn test_failed_page_keeps_partial_items() {
        let listing = collect_pages("test", 10, |cursor| async move {
            match cursor {
                None => page(&[1, 2], Some("a")),
                Some(_) => Err(io::Error::other("connection reset")),
            }
        })
        .await;

        assert_eq!(listing.items(), [1, 2]);
        let incomplete = listing.incomplete().unwrap();
        assert_eq!(incomplete.reason.name(), "request_failed");
        assert!(incomplete.source().is_some());
        assert!(!listing.is_failed());
    }

    #[tokio::test]
    async fn test_first_page_failure_is_failed() {
        let listing: Listing<u32> = collect_pages("test", 10, |_| async {
            Err::<Page<u32>, _>(io::Error::other("unreachable"))
        })
        .await;

        assert!(listing.items().is_empty());
        assert!(listing.is_failed());
    }

    #[test]
    fn test_link_resolution() {
        let base = Url::parse("https://console.example.com/api/v1/dags?limit=300").unwrap();

        let page = Page::<u32>::with_link(vec![], &base, Some("/api/v1/dags?limit=300&offset=300"));
        assert_eq!(
            page.next,
            NextPage::Cursor("https://console.example.com/api/v1/dags?limit=300&offset=300".into())
        );

        let page = Page::<u32>::with_link(vec![], &base, None);
        assert_eq!(page.next, NextPage::End);

        let page = Page::<u32>::with_link(vec![], &base, Some("https://evil.example.org/next"));
        assert!(matches!(page.next, NextPage::Malformed(_)));

        let page = Page::<u32>::with_link(vec![], &base, Some("http://[::1"));
        assert!(matches!(page.next, NextPage::Malformed(_)));
    }

    #[tokio::test]
    async fn test_malformed_link_stops() {
        let base = Url::parse("https://console.example.com/").unwrap();
        let listing = collect_pages("dags", 10, |_| {
            let page = Page::with_link(vec![1], &base, Some("//other.example.com/x"));
            async move { Ok::<_, io::Error>(page) }
        })
        .await;

        assert_eq!(listing.items(), [1]);
        assert_eq!(listing.incomplete().unwrap().reason.name(), "malformed_link");
    }
}
