//! Temporary on-disk copies of uploaded files.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_.-]").unwrap();
}

/// Reduces a client-supplied filename to a safe single path component:
/// directories are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed and leading dots are stripped.
pub fn secure_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    UNSAFE_CHARS
        .replace_all(&joined, "")
        .trim_start_matches('.')
        .trim_matches('_')
        .to_string()
}

/// Lowercase extension of `filename`, if it has one.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// A staged upload. The file is removed when this value is dropped, on
/// success and error paths alike.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
}

impl StagedFile {
    pub async fn write(dir: &Path, filename: &str, body: Bytes) -> anyhow::Result<Self> {
        let dir = dir.to_path_buf();
        let suffix = format!("-{}", filename);
        tokio::task::spawn_blocking(move || -> anyhow::Result<Self> {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create upload folder {}", dir.display()))?;
            let mut file = tempfile::Builder::new()
                .prefix("upload-")
                .suffix(&suffix)
                .tempfile_in(&dir)
                .context("create temporary file")?;
            file.write_all(&body).context("write temporary file")?;
            file.flush().context("flush temporary file")?;
            debug!(path = %file.path().display(), bytes = body.len(), "file staged");
            Ok(Self { file })
        })
        .await?
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        debug!(path = %self.file.path().display(), "removing temporary file");
    }
}
