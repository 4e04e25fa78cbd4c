//! Series-page metadata extraction.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::base_system::http::Transport;
use crate::base_system::textfix::fix_text;

use super::models::{BookMetadata, WorkIdentity, parse_site_date};
use super::{Error, Result};

const DEFAULT_PUBLISHER: &str = "Scribble Hub";
const UPDATED_PREFIX: &str = "Last updated: ";

struct Selectors {
    og_url: Selector,
    og_title: Selector,
    og_image: Selector,
    og_site_name: Selector,
    twitter_creator: Selector,
    last_updated: Selector,
    description: Selector,
    genre: Selector,
    tag: Selector,
    chapter_count: Selector,
    copyright_img: Selector,
    lang_attr: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            og_url: Selector::parse(r#"meta[property="og:url"]"#).expect("og:url selector"),
            og_title: Selector::parse(r#"meta[property="og:title"]"#).expect("og:title selector"),
            og_image: Selector::parse(r#"meta[property="og:image"]"#).expect("og:image selector"),
            og_site_name: Selector::parse(r#"meta[property="og:site_name"]"#)
                .expect("og:site_name selector"),
            twitter_creator: Selector::parse(r#"meta[name="twitter:creator"]"#)
                .expect("twitter:creator selector"),
            last_updated: Selector::parse(r#"span[title^="Last updated: "]"#)
                .expect("last-updated selector"),
            description: Selector::parse(".wi_fic_desc").expect("description selector"),
            genre: Selector::parse(".fic_genre").expect("genre selector"),
            tag: Selector::parse(".stag").expect("tag selector"),
            chapter_count: Selector::parse(".cnt_toc").expect("chapter-count selector"),
            copyright_img: Selector::parse("div.sb_content.copyright img")
                .expect("copyright selector"),
            lang_attr: Selector::parse("[lang]").expect("lang selector"),
        }
    }
}

pub struct MetadataExtractor<'a> {
    transport: &'a dyn Transport,
    selectors: Selectors,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            selectors: Selectors::new(),
        }
    }

    /// Fetch and parse the series landing page.
    pub fn load(&self, identity: &WorkIdentity) -> Result<BookMetadata> {
        let url = &identity.canonical_series_url;
        let response = self.transport.get(url).map_err(|source| Error::Fetch {
            url: url.clone(),
            source,
        })?;
        let doc = Html::parse_document(&response.text());

        // Declared vs. computed canonical URL: mismatch is worth a warning
        // but never fatal.
        if let Some(declared) = self.meta_content(&doc, &self.selectors.og_url)
            && declared != *url
        {
            warn!("metadata url mismatch: computed {url}, page declares {declared}");
        }

        let title = self
            .meta_content(&doc, &self.selectors.og_title)
            .ok_or_else(|| Error::ParseAnomaly("og:title meta tag missing".into()))?;
        let cover_url = self
            .meta_content(&doc, &self.selectors.og_image)
            .unwrap_or_default();
        let author = self
            .meta_content(&doc, &self.selectors.twitter_creator)
            .ok_or_else(|| Error::ParseAnomaly("twitter:creator meta tag missing".into()))?;
        let publisher = self
            .meta_content(&doc, &self.selectors.og_site_name)
            .unwrap_or_else(|| DEFAULT_PUBLISHER.to_string());

        let published_at = self.extract_updated_date(&doc)?;
        let (description_html, description_text) = self.extract_description(&doc)?;
        let expected_chapter_count = self.extract_chapter_count(&doc)?;
        let rights = self.extract_rights(&doc);

        let genres = doc
            .select(&self.selectors.genre)
            .map(|el| fix_text(&element_text(el)).into_owned())
            .filter(|s| !s.is_empty())
            .collect();
        let tags = doc
            .select(&self.selectors.tag)
            .map(|el| fix_text(&element_text(el)).into_owned())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(BookMetadata {
            title: fix_text(&title).into_owned(),
            author: fix_text(&author).into_owned(),
            publisher: fix_text(&publisher).into_owned(),
            cover_url,
            published_at,
            description_html,
            description_text,
            genres,
            tags,
            rights,
            languages: collect_languages(&doc, &self.selectors.lang_attr),
            expected_chapter_count,
        })
    }

    fn meta_content(&self, doc: &Html, selector: &Selector) -> Option<String> {
        doc.select(selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn extract_updated_date(&self, doc: &Html) -> Result<time::PrimitiveDateTime> {
        let span = doc
            .select(&self.selectors.last_updated)
            .next()
            .ok_or_else(|| Error::ParseAnomaly("last-updated span missing".into()))?;
        let title = span.value().attr("title").unwrap_or_default();
        parse_site_date(title.trim_start_matches(UPDATED_PREFIX))
    }

    fn extract_description(&self, doc: &Html) -> Result<(String, String)> {
        let el = doc
            .select(&self.selectors.description)
            .next()
            .ok_or_else(|| Error::ParseAnomaly("description block missing".into()))?;
        let html = fix_text(el.inner_html().trim()).into_owned();
        let text = fix_text(&element_text(el)).into_owned();
        Ok((html, text))
    }

    fn extract_chapter_count(&self, doc: &Html) -> Result<u32> {
        let el = doc
            .select(&self.selectors.chapter_count)
            .next()
            .ok_or_else(|| Error::ParseAnomaly("chapter counter missing".into()))?;
        let text = element_text(el);
        first_integer(&text)
            .ok_or_else(|| Error::ParseAnomaly(format!("chapter counter unreadable: '{text}'")))
    }

    /// The rights string lives in the copyright block as the text
    /// immediately following the `img` whose class contains `copy`.
    fn extract_rights(&self, doc: &Html) -> String {
        for img in doc.select(&self.selectors.copyright_img) {
            let is_copy_marker = img
                .value()
                .attr("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c.contains("copy")));
            if !is_copy_marker {
                continue;
            }
            if let Some(text) = img
                .next_sibling()
                .and_then(|node| node.value().as_text().map(|t| t.to_string()))
            {
                let cleaned = fix_text(text.trim()).into_owned();
                if !cleaned.is_empty() {
                    return cleaned;
                }
            }
        }
        String::new()
    }
}

/// Every `lang` attribute value on the page, in document order. Duplicates
/// survive; the book assembler deduplicates at finalization.
pub(crate) fn collect_languages(doc: &Html, selector: &Selector) -> Vec<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr("lang"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join("").trim().to_string()
}

/// First integer in the text. Counters above 999 come grouped
/// (`1,234` or with a thin/no-break space), so separators between digit
/// runs are part of the number.
fn first_integer(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if digits.is_empty() {
            continue;
        } else if matches!(c, ',' | '\u{a0}' | '\u{2009}' | '\u{202f}') {
            continue;
        } else {
            break;
        }
    }
    digits.parse().ok()
}
