//! Data model for one scraped work.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use time::PrimitiveDateTime;
use time::macros::format_description;

use crate::base_system::safe_fs_name;

use super::{Error, Result};

/// Canonical identity of a work. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkIdentity {
    /// Always of the form `{root}/series/{id}/{slug}/`.
    pub canonical_series_url: String,
    pub slug: String,
    pub numeric_id: u64,
}

/// Series-page metadata, populated in one pass. Only `languages` mutates
/// afterwards: it accumulates chapter observations until the book is
/// finalized.
#[derive(Debug, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub publisher: String,
    /// Empty string when the page declares no cover.
    pub cover_url: String,
    pub published_at: PrimitiveDateTime,
    pub description_html: String,
    pub description_text: String,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub rights: String,
    /// Language codes in order of first appearance. Duplicates are allowed
    /// here; deduplication happens at book finalization.
    pub languages: Vec<String>,
    pub expected_chapter_count: u32,
}

/// A chapter's listing-page record. `index` and `published_at` are only
/// available from the series TOC, never from the chapter page itself, so
/// they stay optional until the walker injects them.
#[derive(Debug, Clone)]
pub struct ChapterStub {
    pub source_url: String,
    pub index: Option<u32>,
    pub title: String,
    pub published_at: Option<PrimitiveDateTime>,
}

impl ChapterStub {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            index: None,
            title: String::new(),
            published_at: None,
        }
    }
}

/// A fully loaded chapter.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub index: u32,
    pub title: String,
    pub published_at: PrimitiveDateTime,
    pub source_url: String,
    pub html: String,
    pub languages: Vec<String>,
    /// Keys into the book-wide asset table, not owned copies.
    pub asset_refs: BTreeSet<String>,
}

/// An embedded binary resource, content-addressed by its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub source_url: String,
    pub content: Vec<u8>,
    /// `static/{stable_id}{ext}`.
    pub relative_path: String,
    pub mime_type: String,
    /// Hex SHA-1 digest of the UTF-8 source URL.
    pub stable_id: String,
}

/// The assembled work: metadata, ordered chapters, and the union of every
/// chapter's assets.
#[derive(Debug, Clone)]
pub struct Book {
    pub identity: WorkIdentity,
    pub metadata: BookMetadata,
    pub cover_image: Vec<u8>,
    /// Sorted strictly ascending by index.
    pub chapters: Vec<Chapter>,
    pub assets: BTreeMap<String, AssetRecord>,
}

impl Book {
    /// `{author} - {title}.epub`, sanitized for the filesystem.
    pub fn output_filename(&self) -> String {
        safe_fs_name(
            &format!("{} - {}.epub", self.metadata.author, self.metadata.title),
            "_",
            200,
        )
    }

    pub fn primary_language(&self) -> Option<&str> {
        self.metadata.languages.first().map(String::as_str)
    }

    /// Every language after the primary. Assumes `languages` was deduplicated
    /// at finalization.
    pub fn secondary_languages(&self) -> &[String] {
        if self.metadata.languages.is_empty() {
            &[]
        } else {
            &self.metadata.languages[1..]
        }
    }
}

/// Deduplicate a language list preserving first-appearance order.
pub fn dedup_languages(languages: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for lang in languages {
        let trimmed = lang.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Parse the site's fixed listing date format, `MMM D, YYYY hh:mm A`
/// (for example `Mar 3, 2021 05:09 PM`).
pub fn parse_site_date(value: &str) -> Result<PrimitiveDateTime> {
    let format = format_description!(
        "[month repr:short] [day padding:none], [year] [hour repr:12 padding:zero]:[minute] [period]"
    );
    PrimitiveDateTime::parse(value.trim(), &format)
        .map_err(|err| Error::ParseAnomaly(format!("bad date '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_dates_parse() {
        let parsed = parse_site_date("Mar 3, 2021 05:09 PM").expect("parse");
        assert_eq!(parsed.year(), 2021);
        assert_eq!(parsed.hour(), 17);
        assert_eq!(parsed.minute(), 9);
    }

    #[test]
    fn double_digit_days_parse() {
        let parsed = parse_site_date("Dec 31, 2019 12:00 AM").expect("parse");
        assert_eq!(parsed.day(), 31);
        assert_eq!(parsed.hour(), 0);
    }

    #[test]
    fn garbage_dates_are_anomalies() {
        assert!(matches!(
            parse_site_date("yesterday-ish"),
            Err(Error::ParseAnomaly(_))
        ));
    }

    #[test]
    fn language_dedup_keeps_first_appearance() {
        let langs = vec![
            "en".to_string(),
            "en".to_string(),
            "fr".to_string(),
            "en".to_string(),
        ];
        assert_eq!(dedup_languages(&langs), vec!["en", "fr"]);
    }
}
