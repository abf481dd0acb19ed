//! Fixtures shared by the unit tests: zip builders and an in-memory transport.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use zip::write::SimpleFileOptions;

use crate::github::{HttpResponse, Transport, TransportError};

pub(crate) enum EntryKind {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

pub(crate) struct ZipEntrySpec {
    name: String,
    kind: EntryKind,
    mode: Option<u32>,
}

impl ZipEntrySpec {
    pub(crate) fn file(name: &str, contents: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::File(contents.to_vec()),
            mode: None,
        }
    }

    pub(crate) fn dir(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Dir,
            mode: None,
        }
    }

    pub(crate) fn symlink(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: EntryKind::Symlink(target.to_string()),
            mode: None,
        }
    }

    pub(crate) fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

pub(crate) fn zip_bytes(entries: &[ZipEntrySpec]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for entry in entries {
        let mut options = SimpleFileOptions::default();
        if let Some(mode) = entry.mode {
            options = options.unix_permissions(mode);
        }
        match &entry.kind {
            EntryKind::File(contents) => {
                writer.start_file(entry.name.as_str(), options).unwrap();
                writer.write_all(contents).unwrap();
            }
            EntryKind::Dir => writer.add_directory(entry.name.as_str(), options).unwrap(),
            EntryKind::Symlink(target) => writer
                .add_symlink(entry.name.as_str(), target.as_str(), options)
                .unwrap(),
        }
    }
    writer.finish().unwrap().into_inner()
}

pub(crate) fn write_zip(dir: &Path, name: &str, entries: &[ZipEntrySpec]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, zip_bytes(entries)).unwrap();
    path
}

/// Serves scripted metadata responses and in-memory downloads.
#[derive(Default)]
pub(crate) struct FakeTransport {
    scripted: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    gets: AtomicUsize,
    downloads: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue responses for `url`; the last one repeats once the queue drains.
    pub(crate) fn respond(&self, url: &str, status: u16, body: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(HttpResponse {
                status,
                body: Bytes::from(body.to_string()),
            });
    }

    pub(crate) fn serve_file(&self, url: &str, contents: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), contents);
    }

    pub(crate) fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.lock().unwrap();
        let queue = scripted.get_mut(url).ok_or_else(|| TransportError::Status {
            url: url.to_string(),
            status: 599,
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        };
        Ok(response)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
        self.downloads.lock().unwrap().push(url.to_string());
        let contents = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: url.to_string(),
                status: 404,
            })?;
        std::fs::write(dest, contents)?;
        Ok(())
    }
}

/// JSON body of a GitHub release with the given assets.
pub(crate) fn release_json(tag: &str, assets: &[(&str, &str)]) -> String {
    let assets: Vec<_> = assets
        .iter()
        .map(|(name, url)| serde_json::json!({ "name": name, "browser_download_url": url }))
        .collect();
    serde_json::json!({ "tag_name": tag, "assets": assets }).to_string()
}
