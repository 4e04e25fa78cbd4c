//! EPUB 3 writer.
//!
//! Most metadata goes through `epub-builder`. The fields its API cannot
//! express (the source identifier, rights, publisher, publication date, and
//! secondary languages) are injected afterwards by rewriting `content.opf`
//! inside the generated zip.

use std::fs;
use std::io::{Cursor, Read as _, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Result;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use time::macros::format_description;
use tracing::info;

use crate::scrape::assets::mime_and_ext_from_url;
use crate::scrape::models::Book;

use super::ContainerWriter;

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.5; }
p { margin: 0 0 .8em 0; }
h1, h2 { font-weight: 600; }
img { max-width: 100%; height: auto; }
aside[epub|type='footnote'] { font-size: .9em; margin: .4em 0; }
.intro-meta { color: #555; font-size: .9em; }";

#[derive(Default)]
pub struct EpubWriter;

impl EpubWriter {
    pub fn new() -> Self {
        Self
    }

    fn build(&self, book: &Book) -> Result<Vec<u8>> {
        let zip = ZipLibrary::new().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let mut builder = EpubBuilder::new(zip).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        builder.epub_version(EpubVersion::V30);
        builder.set_uuid(uuid::Uuid::new_v4());

        let meta = &book.metadata;
        builder.metadata("title", meta.title.as_str()).ok();
        builder.metadata("author", meta.author.as_str()).ok();
        builder.metadata("toc_name", meta.title.as_str()).ok();
        if let Some(lang) = book.primary_language() {
            builder.metadata("lang", lang).ok();
        }
        if !meta.description_text.is_empty() {
            builder
                .metadata("description", meta.description_text.as_str())
                .ok();
        }
        for subject in meta.genres.iter().chain(meta.tags.iter()) {
            builder.metadata("subject", subject.as_str()).ok();
        }
        builder.metadata("generator", "scribblehub-epub").ok();

        if !book.cover_image.is_empty() {
            let (mime, ext) = mime_and_ext_from_url(&meta.cover_url);
            builder
                .add_cover_image(
                    format!("cover{ext}"),
                    Cursor::new(book.cover_image.clone()),
                    mime,
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }

        builder
            .stylesheet(Cursor::new(STYLESHEET))
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        for record in book.assets.values() {
            builder
                .add_resource(
                    &record.relative_path,
                    Cursor::new(record.content.clone()),
                    &record.mime_type,
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }

        builder
            .add_content(
                EpubContent::new("intro.xhtml", Cursor::new(intro_page(book)))
                    .title(meta.title.as_str())
                    .reftype(ReferenceType::TitlePage),
            )
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let lang = book.primary_language().unwrap_or("en").to_string();
        for chapter in &book.chapters {
            let file_name = format!("chapter{}.xhtml", chapter.index);
            builder
                .add_content(
                    EpubContent::new(
                        file_name,
                        Cursor::new(wrap_chapter_html(&chapter.title, &chapter.html, &lang)),
                    )
                    .title(chapter.title.as_str())
                    .reftype(ReferenceType::Text),
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }

        let mut buffer = Vec::new();
        builder
            .generate(&mut buffer)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        fixup_opf_metadata(buffer, book)
    }
}

impl ContainerWriter for EpubWriter {
    fn write(&self, book: &Book, out_dir: &Path) -> Result<PathBuf> {
        let bytes = self.build(book)?;
        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(book.output_filename());
        fs::write(&path, bytes)?;
        info!("wrote {}", path.display());
        Ok(path)
    }
}

/// Rewrite `content.opf` inside the generated zip, appending the metadata
/// entries `epub-builder` has no API for.
fn fixup_opf_metadata(epub_bytes: Vec<u8>, book: &Book) -> Result<Vec<u8>> {
    let extra = extra_opf_entries(book);

    let reader = Cursor::new(epub_bytes);
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| anyhow::anyhow!("failed to read generated epub: {e}"))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| anyhow::anyhow!("zip entry read error: {e}"))?;
        let name = entry.name().to_string();
        let compression = entry.compression();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.push((name, compression, data));
    }
    drop(archive);

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut out);
        for (name, compression, data) in entries {
            let options = zip::write::FileOptions::default().compression_method(compression);
            writer
                .start_file(&name, options)
                .map_err(|e| anyhow::anyhow!("zip write error: {e}"))?;

            if name.ends_with("content.opf") {
                let text = String::from_utf8(data)
                    .map_err(|e| anyhow::anyhow!("content.opf is not utf-8: {e}"))?;
                let fixed = text.replace("</metadata>", &format!("{extra}</metadata>"));
                writer.write_all(fixed.as_bytes())?;
            } else {
                writer.write_all(&data)?;
            }
        }
        writer
            .finish()
            .map_err(|e| anyhow::anyhow!("zip finish error: {e}"))?;
    }
    Ok(out.into_inner())
}

fn extra_opf_entries(book: &Book) -> String {
    let meta = &book.metadata;
    let date_format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

    let mut extra = String::new();
    extra.push_str(&format!(
        "<dc:identifier>url:{}</dc:identifier>\n",
        xml_escape(&book.identity.canonical_series_url)
    ));
    extra.push_str(&format!(
        "<dc:rights>{}</dc:rights>\n",
        xml_escape(rights_statement(meta.published_at.year(), &meta.author, &meta.rights).trim())
    ));
    extra.push_str(&format!(
        "<dc:publisher>{}</dc:publisher>\n",
        xml_escape(&meta.publisher)
    ));
    if let Ok(date) = meta.published_at.format(&date_format) {
        extra.push_str(&format!("<dc:date>{date}</dc:date>\n"));
    }
    for lang in book.secondary_languages() {
        extra.push_str(&format!("<dc:language>{}</dc:language>\n", xml_escape(lang)));
    }
    extra
}

fn rights_statement(year: i32, author: &str, rights: &str) -> String {
    format!("Copyright © {year} {author} {rights}")
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn intro_page(book: &Book) -> String {
    let meta = &book.metadata;
    let body = format!(
        "<h1>{title}</h1>\n<p class=\"intro-meta\">by {author}</p>\n\
         <p class=\"intro-meta\"><a href=\"{url}\">{url}</a></p>\n{description}",
        title = xml_escape(&meta.title),
        author = xml_escape(&meta.author),
        url = xml_escape(&book.identity.canonical_series_url),
        description = meta.description_html
    );
    wrap_chapter_html(&meta.title, &body, book.primary_language().unwrap_or("en"))
}

fn wrap_chapter_html(title: &str, body: &str, lang: &str) -> String {
    let escaped_title = xml_escape(title);
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" \
         xmlns:epub=\"http://www.idpf.org/2007/ops\" \
         lang=\"{lang}\" xml:lang=\"{lang}\">\n  <head>\n    <title>{escaped_title}</title>\n    \
         <link href=\"stylesheet.css\" rel=\"stylesheet\" type=\"text/css\"/>\n  </head>\n  \
         <body><h1>{escaped_title}</h1>\n{body}\n  </body>\n</html>"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::io::Read as _;

    use super::*;
    use crate::scrape::models::{
        AssetRecord, Book, BookMetadata, Chapter, WorkIdentity, parse_site_date,
    };

    fn sample_book() -> Book {
        let published_at = parse_site_date("Mar 3, 2021 05:09 PM").expect("date");
        Book {
            identity: WorkIdentity {
                canonical_series_url: "https://www.scribblehub.com/series/100/mystory/".into(),
                slug: "mystory".into(),
                numeric_id: 100,
            },
            metadata: BookMetadata {
                title: "My Story".into(),
                author: "An Author".into(),
                publisher: "Scribble Hub".into(),
                cover_url: "https://cdn.example.com/cover.jpg".into(),
                published_at,
                description_html: "<p>A fine tale.</p>".into(),
                description_text: "A fine tale.".into(),
                genres: vec!["Fantasy".into()],
                tags: vec!["magic".into()],
                rights: "All rights reserved".into(),
                languages: vec!["en".into(), "fr".into()],
                expected_chapter_count: 1,
            },
            cover_image: b"jpegbytes".to_vec(),
            chapters: vec![Chapter {
                index: 1,
                title: "The Beginning".into(),
                published_at,
                source_url: "https://www.scribblehub.com/read/100-mystory/chapter/1".into(),
                html: "<p>Words.</p><img src=\"static/abc.png\"/>".into(),
                languages: vec!["en".into()],
                asset_refs: BTreeSet::from(["https://cdn.example.com/a.png".to_string()]),
            }],
            assets: BTreeMap::from([(
                "https://cdn.example.com/a.png".to_string(),
                AssetRecord {
                    source_url: "https://cdn.example.com/a.png".into(),
                    content: b"pngbytes".to_vec(),
                    relative_path: "static/abc.png".into(),
                    mime_type: "image/png".into(),
                    stable_id: "abc".into(),
                },
            )]),
        }
    }

    fn read_entry(epub: &[u8], suffix: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(epub.to_vec())).expect("zip");
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).expect("entry");
            if entry.name().ends_with(suffix) {
                let mut text = String::new();
                entry.read_to_string(&mut text).expect("read");
                return text;
            }
        }
        panic!("no zip entry ends with {suffix}");
    }

    fn entry_names(epub: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(epub.to_vec())).expect("zip");
        (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect()
    }

    #[test]
    fn opf_carries_the_injected_metadata() {
        let book = sample_book();
        let bytes = EpubWriter::new().build(&book).expect("build");
        let opf = read_entry(&bytes, "content.opf");

        assert!(opf.contains("url:https://www.scribblehub.com/series/100/mystory/"));
        assert!(opf.contains("<dc:rights>Copyright © 2021 An Author All rights reserved</dc:rights>"));
        assert!(opf.contains("<dc:publisher>Scribble Hub</dc:publisher>"));
        assert!(opf.contains("<dc:date>2021-03-03T17:09:00Z</dc:date>"));
        // Primary via epub-builder, secondary injected.
        assert!(opf.contains(">en<"));
        assert!(opf.contains("<dc:language>fr</dc:language>"));
    }

    #[test]
    fn container_holds_chapters_assets_and_cover() {
        let book = sample_book();
        let bytes = EpubWriter::new().build(&book).expect("build");
        let names = entry_names(&bytes);

        assert!(names.iter().any(|n| n.ends_with("intro.xhtml")));
        assert!(names.iter().any(|n| n.ends_with("chapter1.xhtml")));
        assert!(names.iter().any(|n| n.ends_with("static/abc.png")));
        assert!(names.iter().any(|n| n.ends_with("cover.jpg")));

        let chapter = read_entry(&bytes, "chapter1.xhtml");
        assert!(chapter.contains("<h1>The Beginning</h1>"));
        assert!(chapter.contains("static/abc.png"));
    }

    #[test]
    fn write_places_the_file_under_the_out_dir() {
        let book = sample_book();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = EpubWriter::new().write(&book, dir.path()).expect("write");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("An Author - My Story.epub")
        );
        assert!(path.exists());
    }

    #[test]
    fn rights_line_shape() {
        assert_eq!(
            rights_statement(2021, "A", "B"),
            "Copyright © 2021 A B"
        );
        assert_eq!(
            rights_statement(2021, "A", "").trim(),
            "Copyright © 2021 A"
        );
    }
}
