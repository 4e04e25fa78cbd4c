//! The scrape-and-normalize pipeline.
//!
//! Module map (reading order):
//! - `url_resolver`: canonicalize a work URL into a [`models::WorkIdentity`]
//! - `models`: the book data model
//! - `metadata`: series-page parse into [`models::BookMetadata`]
//! - `toc`: paginated chapter-listing walk into ordered stubs
//! - `assets`: book-scoped, memoized image fetch
//! - `footnotes`: inline footnote markup to anchor/aside pairs
//! - `chapter`: single chapter page into a loaded [`models::Chapter`]
//! - `assembler`: the staged build of one complete [`models::Book`]

pub mod assembler;
pub mod assets;
pub mod chapter;
pub mod footnotes;
pub mod metadata;
pub mod models;
pub mod toc;
pub mod url_resolver;

use thiserror::Error;

use crate::base_system::http::HttpError;
use models::WorkIdentity;

#[derive(Debug, Error)]
pub enum Error {
    /// No provider pattern matches the URL. The batch skips this URL and
    /// continues with the rest.
    #[error("no provider recognizes url: {0}")]
    UnrecognizedUrl(String),

    /// A page fetch failed after the transport exhausted its retries.
    /// Aborts the current book only.
    #[error("fetch of {url} failed")]
    Fetch {
        url: String,
        #[source]
        source: HttpError,
    },

    /// A chapter-listing page fetch failed; the whole walk is abandoned.
    #[error("chapter listing page {page} failed")]
    Pagination {
        page: u32,
        #[source]
        source: HttpError,
    },

    /// An embedded asset fetch failed; the owning chapter's load aborts.
    #[error("asset fetch of {url} failed")]
    Asset {
        url: String,
        #[source]
        source: HttpError,
    },

    /// An expected DOM anchor is missing. Fatal to the book being loaded.
    #[error("parse anomaly: {0}")]
    ParseAnomaly(String),

    /// A stage ran before its prerequisites. Programming error, not a
    /// user-facing condition.
    #[error("prerequisite violated: {0}")]
    Prerequisite(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A source-site provider: a URL predicate paired with an identity resolver.
pub struct Provider {
    pub name: &'static str,
    pub can_handle: fn(&str) -> bool,
    pub resolve: fn(&str) -> Result<WorkIdentity>,
}

/// Queried in order; first match wins.
pub const PROVIDERS: &[Provider] = &[Provider {
    name: "scribblehub",
    can_handle: url_resolver::can_handle,
    resolve: url_resolver::resolve,
}];

/// Resolve a work URL through the provider registry.
pub fn resolve_url(url: &str) -> Result<WorkIdentity> {
    for provider in PROVIDERS {
        if (provider.can_handle)(url) {
            return (provider.resolve)(url);
        }
    }
    Err(Error::UnrecognizedUrl(url.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_first_match_wins() {
        let identity =
            resolve_url("https://www.scribblehub.com/series/421502/reborn-as-a-baby/").expect("resolve");
        assert_eq!(identity.numeric_id, 421502);
    }

    #[test]
    fn unmatched_url_is_reported() {
        let err = resolve_url("https://example.org/not-a-work").unwrap_err();
        assert!(matches!(err, Error::UnrecognizedUrl(_)));
    }
}
