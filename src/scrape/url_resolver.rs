//! Work URL classification and canonicalization.
//!
//! Two URL shapes identify a work:
//! - series:  `{root}/series/{id}/{slug}/`
//! - chapter: `{root}/read/{id}-{slug}/chapter/{chapter_id}`
//!
//! Either resolves to the same canonical series form; slug and numeric id
//! come straight out of the matched groups.

use regex::Regex;
use std::sync::OnceLock;

use super::models::WorkIdentity;
use super::{Error, Result};

static RE_SERIES: OnceLock<Regex> = OnceLock::new();
static RE_CHAPTER: OnceLock<Regex> = OnceLock::new();

fn re_series() -> &'static Regex {
    RE_SERIES.get_or_init(|| {
        Regex::new(r"(?P<root>https?://[^/]+)/series/(?P<id>\d+)/(?P<slug>[a-z0-9-]*)")
            .expect("compile RE_SERIES")
    })
}

fn re_chapter() -> &'static Regex {
    RE_CHAPTER.get_or_init(|| {
        Regex::new(r"(?P<root>https?://[^/]+)/read/(?P<id>\d+)-(?P<slug>[^/]+?)/chapter/\d+")
            .expect("compile RE_CHAPTER")
    })
}

pub fn can_handle(url: &str) -> bool {
    re_series().is_match(url) || re_chapter().is_match(url)
}

/// Canonicalize a series or chapter URL into a [`WorkIdentity`].
pub fn resolve(url: &str) -> Result<WorkIdentity> {
    let caps = re_series()
        .captures(url)
        .or_else(|| re_chapter().captures(url))
        .ok_or_else(|| Error::UnrecognizedUrl(url.to_string()))?;

    let root = &caps["root"];
    let id = &caps["id"];
    let slug = &caps["slug"];
    let numeric_id = id
        .parse::<u64>()
        .map_err(|_| Error::UnrecognizedUrl(url.to_string()))?;

    Ok(WorkIdentity {
        canonical_series_url: format!("{root}/series/{id}/{slug}/"),
        slug: slug.to_string(),
        numeric_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_url_resolves() {
        let identity =
            resolve("https://www.scribblehub.com/series/421502/reborn-as-a-baby/").expect("resolve");
        assert_eq!(
            identity.canonical_series_url,
            "https://www.scribblehub.com/series/421502/reborn-as-a-baby/"
        );
        assert_eq!(identity.slug, "reborn-as-a-baby");
        assert_eq!(identity.numeric_id, 421502);
    }

    #[test]
    fn chapter_url_reconstructs_series_form() {
        let identity = resolve(
            "https://www.scribblehub.com/read/421502-reborn-as-a-baby/chapter/12345",
        )
        .expect("resolve");
        assert_eq!(
            identity.canonical_series_url,
            "https://www.scribblehub.com/series/421502/reborn-as-a-baby/"
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let first = resolve(
            "https://www.scribblehub.com/read/421502-reborn-as-a-baby/chapter/12345",
        )
        .expect("first");
        let second = resolve(&first.canonical_series_url).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn unrelated_url_is_rejected() {
        assert!(matches!(
            resolve("https://www.scribblehub.com/profile/1234/someone/"),
            Err(Error::UnrecognizedUrl(_))
        ));
    }
}
