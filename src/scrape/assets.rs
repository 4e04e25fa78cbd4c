//! Deduplicated asset fetch.
//!
//! One fetcher lives for the duration of a single book assembly; its
//! memoization table is the book's asset table in the making. Assets are
//! addressed by source URL, not by content bytes, so two chapters that embed
//! the same image URL share one record and one network call.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::base_system::http::Transport;

use super::models::AssetRecord;
use super::{Error, Result};

pub struct AssetFetcher<'a> {
    transport: &'a dyn Transport,
    records: BTreeMap<String, AssetRecord>,
}

impl<'a> AssetFetcher<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            records: BTreeMap::new(),
        }
    }

    /// Fetch an asset, or return the already-fetched record for its URL.
    pub fn fetch(&mut self, url: &str) -> Result<&AssetRecord> {
        if !self.records.contains_key(url) {
            let response = self.transport.get(url).map_err(|source| Error::Asset {
                url: url.to_string(),
                source,
            })?;

            let stable_id = sha1_hex(url);
            let (mime_type, ext) = mime_and_ext_from_url(url);
            let record = AssetRecord {
                source_url: url.to_string(),
                content: response.body,
                relative_path: format!("static/{stable_id}{ext}"),
                mime_type: mime_type.to_string(),
                stable_id,
            };
            self.records.insert(url.to_string(), record);
        }

        Ok(&self.records[url])
    }

    /// Hand the accumulated records to the book.
    pub fn into_records(self) -> BTreeMap<String, AssetRecord> {
        self.records
    }
}

pub(crate) fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Guess MIME type and extension from the URL path, ignoring any query.
pub(crate) fn mime_and_ext_from_url(url: &str) -> (&'static str, &'static str) {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    let ext = match path.rsplit_once('.') {
        Some((_, tail)) if !tail.contains('/') => tail,
        _ => return ("application/octet-stream", ""),
    };
    match ext {
        "jpg" => ("image/jpeg", ".jpg"),
        "jpeg" => ("image/jpeg", ".jpeg"),
        "png" => ("image/png", ".png"),
        "gif" => ("image/gif", ".gif"),
        "webp" => ("image/webp", ".webp"),
        "svg" => ("image/svg+xml", ".svg"),
        "bmp" => ("image/bmp", ".bmp"),
        _ => ("application/octet-stream", ""),
    }
}
