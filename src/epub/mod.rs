//! EPUB container output.

mod writer;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::scrape::models::Book;

pub use writer::EpubWriter;

/// Sink for a finished book. The production implementation writes an EPUB
/// container; tests can substitute their own.
pub trait ContainerWriter {
    /// Write the book into `out_dir` and return the path of the file written.
    fn write(&self, book: &Book, out_dir: &Path) -> Result<PathBuf>;
}
