//! Single chapter extraction.

use std::collections::BTreeSet;

use scraper::{Html, Selector};
use tracing::debug;

use crate::base_system::http::Transport;
use crate::base_system::textfix::fix_text;

use super::assets::AssetFetcher;
use super::footnotes::rewrite_footnotes;
use super::metadata::{collect_languages, element_text};
use super::models::{Chapter, ChapterStub};
use super::{Error, Result};

pub struct ChapterExtractor<'a> {
    transport: &'a dyn Transport,
    title: Selector,
    content: Selector,
    image: Selector,
    lang_attr: Selector,
}

impl<'a> ChapterExtractor<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            title: Selector::parse(".chapter-title").expect("chapter title selector"),
            content: Selector::parse(".chp_raw").expect("chapter content selector"),
            image: Selector::parse("#chp_contents img[src]").expect("chapter image selector"),
            lang_attr: Selector::parse("[lang]").expect("lang selector"),
        }
    }

    /// Load a chapter from its stub. The stub must already carry the index
    /// and date injected by the TOC walk; they do not exist on the chapter
    /// page, and loading without them is a programming error.
    pub fn load(&self, stub: &ChapterStub, assets: &mut AssetFetcher<'_>) -> Result<Chapter> {
        let index = stub
            .index
            .ok_or(Error::Prerequisite("chapter index not injected by TOC walk"))?;
        let published_at = stub
            .published_at
            .ok_or(Error::Prerequisite("chapter date not injected by TOC walk"))?;

        let response = self
            .transport
            .get(&stub.source_url)
            .map_err(|source| Error::Fetch {
                url: stub.source_url.clone(),
                source,
            })?;
        let doc = Html::parse_document(&response.text());

        let languages = collect_languages(&doc, &self.lang_attr);

        let title = self
            .doc_title(&doc)
            .ok_or_else(|| Error::ParseAnomaly("chapter title missing".into()))?;
        let mut html = self
            .doc_content(&doc)
            .ok_or_else(|| Error::ParseAnomaly("chapter content block missing".into()))?;

        // Resolve every embedded image through the shared fetcher and point
        // its src at the local relative path. The fetcher dedups across the
        // whole book, so repeats are free.
        let mut asset_refs = BTreeSet::new();
        for src in self.image_sources(&doc) {
            let record = assets.fetch(&src)?;
            html = rewrite_src_attr(&html, &src, &record.relative_path);
            asset_refs.insert(src);
        }

        html = rewrite_footnotes(&html);
        // Mojibake repair runs last, after all structural rewriting.
        html = fix_text(&html).into_owned();

        debug!("loaded chapter {index}: {title}");
        Ok(Chapter {
            index,
            title,
            published_at,
            source_url: stub.source_url.clone(),
            html,
            languages,
            asset_refs,
        })
    }

    fn doc_title(&self, doc: &Html) -> Option<String> {
        doc.select(&self.title)
            .next()
            .map(|el| fix_text(&element_text(el)).into_owned())
            .filter(|s| !s.is_empty())
    }

    fn doc_content(&self, doc: &Html) -> Option<String> {
        doc.select(&self.content)
            .next()
            .map(|el| el.inner_html().trim().to_string())
    }

    /// Distinct image URLs in the content region, in first-appearance order.
    fn image_sources(&self, doc: &Html) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut sources = Vec::new();
        for img in doc.select(&self.image) {
            if let Some(src) = img.value().attr("src") {
                if seen.insert(src.to_string()) {
                    sources.push(src.to_string());
                }
            }
        }
        sources
    }
}

/// Replace `src="{url}"` with the local path, covering both the raw URL and
/// its `&amp;`-escaped serialization.
fn rewrite_src_attr(html: &str, url: &str, relative_path: &str) -> String {
    let replacement = format!("src=\"{relative_path}\"");
    let mut out = html.replace(&format!("src=\"{url}\""), &replacement);
    if url.contains('&') {
        let escaped = url.replace('&', "&amp;");
        out = out.replace(&format!("src=\"{escaped}\""), &replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::models::parse_site_date;
    use crate::scrape::testing::StubTransport;

    const CHAPTER_URL: &str = "https://www.scribblehub.com/read/100-mystory/chapter/1";
    const IMG_URL: &str = "https://cdn.example.com/maps/world.png";

    fn chapter_page(body: &str) -> String {
        format!(
            concat!(
                "<html lang=\"en\"><body>",
                "<div class=\"chapter-title\">The Beginning</div>",
                "<div id=\"chp_contents\"><div class=\"chp_raw\">{body}</div></div>",
                "</body></html>",
            ),
            body = body
        )
    }

    fn loaded_stub() -> ChapterStub {
        ChapterStub {
            source_url: CHAPTER_URL.to_string(),
            index: Some(1),
            title: "The Beginning".to_string(),
            published_at: Some(parse_site_date("Jan 1, 2021 08:00 AM").expect("date")),
        }
    }

    #[test]
    fn stub_without_index_is_a_prerequisite_violation() {
        let transport = StubTransport::new();
        let mut assets = AssetFetcher::new(&transport);
        let extractor = ChapterExtractor::new(&transport);

        let mut stub = loaded_stub();
        stub.index = None;
        assert!(matches!(
            extractor.load(&stub, &mut assets),
            Err(Error::Prerequisite(_))
        ));

        let mut stub = loaded_stub();
        stub.published_at = None;
        assert!(matches!(
            extractor.load(&stub, &mut assets),
            Err(Error::Prerequisite(_))
        ));
        // Preconditions are checked before any network traffic.
        assert!(transport.hits.lock().expect("hits").is_empty());
    }

    #[test]
    fn content_and_images_are_extracted() {
        let body = format!("<p>Look:</p><img src=\"{IMG_URL}\"/><p>Done.</p>");
        let transport = StubTransport::new()
            .with_page(CHAPTER_URL, chapter_page(&body).into_bytes())
            .with_page(IMG_URL, b"pngbytes".to_vec());
        let mut assets = AssetFetcher::new(&transport);
        let chapter = ChapterExtractor::new(&transport)
            .load(&loaded_stub(), &mut assets)
            .expect("load");

        assert_eq!(chapter.index, 1);
        assert_eq!(chapter.title, "The Beginning");
        assert_eq!(chapter.languages, vec!["en"]);
        assert_eq!(chapter.asset_refs.len(), 1);
        assert!(chapter.asset_refs.contains(IMG_URL));
        // src now points at the local relative path.
        assert!(!chapter.html.contains(IMG_URL));
        let record = &assets.into_records()[IMG_URL];
        assert!(chapter.html.contains(&record.relative_path));
    }

    #[test]
    fn missing_asset_aborts_the_chapter() {
        let body = format!("<p>Look:</p><img src=\"{IMG_URL}\"/>");
        let transport =
            StubTransport::new().with_page(CHAPTER_URL, chapter_page(&body).into_bytes());
        let mut assets = AssetFetcher::new(&transport);
        let err = ChapterExtractor::new(&transport)
            .load(&loaded_stub(), &mut assets)
            .unwrap_err();
        assert!(matches!(err, Error::Asset { .. }));
    }

    #[test]
    fn missing_content_block_is_a_parse_anomaly() {
        let page = "<html><body><div class=\"chapter-title\">T</div></body></html>";
        let transport = StubTransport::new().with_page(CHAPTER_URL, page.as_bytes().to_vec());
        let mut assets = AssetFetcher::new(&transport);
        let err = ChapterExtractor::new(&transport)
            .load(&loaded_stub(), &mut assets)
            .unwrap_err();
        assert!(matches!(err, Error::ParseAnomaly(_)));
    }

    #[test]
    fn footnotes_are_rewritten_during_load() {
        let body = concat!(
            "<p>text<span class=\"modern-footnotes-footnote\" data-mfn=\"1\">",
            "<a href=\"#\">1</a></span>",
            "<span class=\"modern-footnotes-footnote__note\" data-mfn=\"1\">a note</span>",
            "</p><p>end</p>",
        );
        let transport =
            StubTransport::new().with_page(CHAPTER_URL, chapter_page(body).into_bytes());
        let mut assets = AssetFetcher::new(&transport);
        let chapter = ChapterExtractor::new(&transport)
            .load(&loaded_stub(), &mut assets)
            .expect("load");
        assert!(chapter.html.contains("<aside id=\"note-1\""));
        assert!(chapter.html.contains("Footnotes"));
    }
}
