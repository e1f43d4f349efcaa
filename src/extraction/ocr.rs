//! Text recognition over receipt files via AWS Textract.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_textract::{
    primitives::Blob,
    types::{Block, BlockType, Document},
    Client,
};
use tracing::debug;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the recognized text of the file, one line per row.
    async fn extract_text(&self, path: &Path) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct TextractExtractor {
    client: Client,
}

impl TextractExtractor {
    pub fn new(shared: &SdkConfig) -> Self {
        Self {
            client: Client::new(shared),
        }
    }
}

#[async_trait]
impl TextExtractor for TextractExtractor {
    async fn extract_text(&self, path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read staged file {}", path.display()))?;

        let out = self
            .client
            .detect_document_text()
            .document(Document::builder().bytes(Blob::new(bytes)).build())
            .send()
            .await
            .context("textract detect_document_text")?;

        let text = join_lines(out.blocks());
        debug!(chars = text.len(), "textract returned text");
        Ok(text)
    }
}

/// Concatenates `LINE` blocks; words and pages are skipped.
pub(crate) fn join_lines(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| b.block_type() == Some(&BlockType::Line))
        .filter_map(|b| b.text())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
