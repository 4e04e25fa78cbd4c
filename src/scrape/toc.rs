//! Chapter-listing pagination.
//!
//! The listing endpoint serves fixed pages of 15 entries over a form POST.
//! Pages are fetched 1..=ceil(expected / 15); the concatenated result is
//! re-sorted by index before return, since neither the page responses nor
//! the fetch order guarantee anything.

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::base_system::http::Transport;
use crate::base_system::textfix::fix_text;

use super::models::{ChapterStub, WorkIdentity, parse_site_date};
use super::{Error, Result};

pub const PAGE_SIZE: u32 = 15;
const LISTING_ACTION: &str = "wi_getreleases_pagination";

pub struct TocWalker<'a> {
    transport: &'a dyn Transport,
    entry: Selector,
    link: Selector,
    date_span: Selector,
}

impl<'a> TocWalker<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            entry: Selector::parse("li.toc_w").expect("toc entry selector"),
            link: Selector::parse("a").expect("toc link selector"),
            date_span: Selector::parse("span[title]").expect("toc date selector"),
        }
    }

    /// Enumerate every chapter stub for the work, sorted by index ascending.
    pub fn walk(
        &self,
        identity: &WorkIdentity,
        expected_chapter_count: u32,
    ) -> Result<Vec<ChapterStub>> {
        let endpoint = format!(
            "{}wp-admin/admin-ajax.php",
            identity.canonical_series_url
        );
        let page_count = expected_chapter_count.div_ceil(PAGE_SIZE).max(1);
        debug!(
            "walking {page_count} listing page(s) for {} chapter(s)",
            expected_chapter_count
        );

        let mut stubs = Vec::with_capacity(expected_chapter_count as usize);
        for page in 1..=page_count {
            let fields = [
                ("action", LISTING_ACTION.to_string()),
                ("pagenum", page.to_string()),
                ("mypostid", identity.numeric_id.to_string()),
            ];
            let response = self
                .transport
                .post_form(&endpoint, &fields)
                .map_err(|source| Error::Pagination { page, source })?;
            self.parse_page(&response.text(), &mut stubs)?;
        }

        stubs.sort_by_key(|stub| stub.index);
        self.check_ordering(&stubs, expected_chapter_count);
        Ok(stubs)
    }

    fn parse_page(&self, body: &str, stubs: &mut Vec<ChapterStub>) -> Result<()> {
        let fragment = Html::parse_fragment(body);
        for entry in fragment.select(&self.entry) {
            let index = entry
                .value()
                .attr("order")
                .and_then(|order| order.trim().parse::<u32>().ok())
                .ok_or_else(|| {
                    Error::ParseAnomaly("listing entry without numeric order".into())
                })?;

            let link = entry.select(&self.link).next().ok_or_else(|| {
                Error::ParseAnomaly("listing entry without chapter link".into())
            })?;
            let source_url = link
                .value()
                .attr("href")
                .map(str::to_string)
                .ok_or_else(|| Error::ParseAnomaly("chapter link without href".into()))?;
            let title = fix_text(&super::metadata::element_text(link)).into_owned();

            let date_title = entry
                .select(&self.date_span)
                .next()
                .and_then(|span| span.value().attr("title"))
                .ok_or_else(|| Error::ParseAnomaly("listing entry without date".into()))?;
            let published_at = parse_site_date(date_title)?;

            stubs.push(ChapterStub {
                source_url,
                index: Some(index),
                title,
                published_at: Some(published_at),
            });
        }
        Ok(())
    }

    fn check_ordering(&self, stubs: &[ChapterStub], expected: u32) {
        if stubs.len() as u32 != expected {
            warn!(
                "listing produced {} stub(s), series page promised {expected}",
                stubs.len()
            );
        }
        for window in stubs.windows(2) {
            if window[0].index == window[1].index {
                warn!("duplicate chapter index {:?} in listing", window[0].index);
            }
        }
    }
}
