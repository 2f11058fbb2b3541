use std::path::Path;

use futures::future::BoxFuture;
use tracing::debug;

use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::ArtifactSink;

/// Writes artifacts to the local filesystem, creating parent directories.
#[derive(Debug, Default, Clone)]
pub struct FsArtifactSink;

impl FsArtifactSink {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactSink for FsArtifactSink {
    fn write<'a>(&'a self, path: &'a Path, content: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let wrap = |e: std::io::Error| QaforgeError::ArtifactWrite {
                path: path.display().to_string(),
                message: e.to_string(),
            };
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
            }
            tokio::fs::write(path, content).await.map_err(wrap)?;
            debug!(path = %path.display(), bytes = content.len(), "Artifact written");
            Ok(())
        })
    }

    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(tokio::fs::read_to_string(path).await?) })
    }
}
