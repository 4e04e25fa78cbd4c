//! Staged assembly of one book.
//!
//! The stages run in a fixed order: metadata, then chapters, then
//! finalization. Each stage checks that the previous one ran, and each runs
//! at most once. Running a stage out of order is a programming error and
//! reported as such rather than silently reordered.

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::base_system::http::Transport;

use super::assets::AssetFetcher;
use super::chapter::ChapterExtractor;
use super::metadata::MetadataExtractor;
use super::models::{Book, BookMetadata, Chapter, WorkIdentity, dedup_languages};
use super::toc::TocWalker;
use super::{Error, Result, resolve_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    MetadataLoaded,
    ChaptersLoaded,
}

pub struct BookAssembler<'a> {
    transport: &'a dyn Transport,
    identity: WorkIdentity,
    stage: Stage,
    metadata: Option<BookMetadata>,
    cover_image: Vec<u8>,
    chapters: Vec<Chapter>,
    assets: AssetFetcher<'a>,
}

impl<'a> BookAssembler<'a> {
    /// Resolve the URL and prepare an empty assembly.
    pub fn new(transport: &'a dyn Transport, url: &str) -> Result<Self> {
        let identity = resolve_url(url)?;
        info!("assembling {}", identity.canonical_series_url);
        Ok(Self {
            transport,
            identity,
            stage: Stage::Empty,
            metadata: None,
            cover_image: Vec::new(),
            chapters: Vec::new(),
            assets: AssetFetcher::new(transport),
        })
    }

    pub fn identity(&self) -> &WorkIdentity {
        &self.identity
    }

    pub fn metadata(&self) -> Option<&BookMetadata> {
        self.metadata.as_ref()
    }

    /// Stage one: series-page metadata and the cover image.
    pub fn load_metadata(&mut self) -> Result<()> {
        if self.stage != Stage::Empty {
            return Err(Error::Prerequisite("metadata already loaded"));
        }

        let metadata = MetadataExtractor::new(self.transport).load(&self.identity)?;
        if metadata.cover_url.is_empty() {
            warn!("no cover image declared for {}", metadata.title);
        } else {
            let response =
                self.transport
                    .get(&metadata.cover_url)
                    .map_err(|source| Error::Fetch {
                        url: metadata.cover_url.clone(),
                        source,
                    })?;
            self.cover_image = response.body;
        }

        info!(
            "metadata loaded: '{}' by {} ({} chapter(s) expected)",
            metadata.title, metadata.author, metadata.expected_chapter_count
        );
        self.metadata = Some(metadata);
        self.stage = Stage::MetadataLoaded;
        Ok(())
    }

    /// Stage two: walk the chapter listing, load every chapter, and fold the
    /// chapters' language observations back into the metadata.
    pub fn load_chapters(&mut self, bar: Option<&ProgressBar>) -> Result<()> {
        if self.stage != Stage::MetadataLoaded {
            return Err(Error::Prerequisite(
                "chapters require loaded metadata, exactly once",
            ));
        }
        let metadata = self
            .metadata
            .as_mut()
            .ok_or(Error::Prerequisite("metadata absent in MetadataLoaded stage"))?;

        let stubs =
            TocWalker::new(self.transport).walk(&self.identity, metadata.expected_chapter_count)?;
        if let Some(bar) = bar {
            bar.set_length(stubs.len() as u64);
        }

        let extractor = ChapterExtractor::new(self.transport);
        for stub in &stubs {
            let chapter = extractor.load(stub, &mut self.assets)?;
            debug!("chapter {} has {} asset(s)", chapter.index, chapter.asset_refs.len());
            metadata.languages.extend(chapter.languages.iter().cloned());
            self.chapters.push(chapter);
            if let Some(bar) = bar {
                bar.inc(1);
            }
        }

        // Stub order is already ascending, but chapter loads must not be
        // trusted to preserve it.
        self.chapters.sort_by_key(|chapter| chapter.index);
        self.stage = Stage::ChaptersLoaded;
        Ok(())
    }

    /// Stage three: seal the book. Languages are deduplicated here, first
    /// appearance wins, so the series page's own language stays primary.
    pub fn finalize(self) -> Result<Book> {
        if self.stage != Stage::ChaptersLoaded {
            return Err(Error::Prerequisite("finalize requires loaded chapters"));
        }
        let mut metadata = self
            .metadata
            .ok_or(Error::Prerequisite("metadata absent in ChaptersLoaded stage"))?;
        metadata.languages = dedup_languages(&metadata.languages);
        let assets = self.assets.into_records();

        info!(
            "finalized '{}': {} chapter(s), {} asset(s)",
            metadata.title,
            self.chapters.len(),
            assets.len()
        );
        Ok(Book {
            identity: self.identity,
            metadata,
            cover_image: self.cover_image,
            chapters: self.chapters,
            assets,
        })
    }
}
