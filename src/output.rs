//! Output filesystem capability and the emit primitive.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::PrerenderError;

/// Where rendered pages are persisted.
///
/// `create_dir_all` must succeed when the directory already exists: sibling
/// routes create their shared parents concurrently.
#[async_trait]
pub trait OutputFileSystem: Send + Sync {
    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// The real disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskOutput;

#[async_trait]
impl OutputFileSystem for DiskOutput {
    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }
}

/// Write `content` to `path`, creating missing parent directories and
/// replacing any existing file.
pub async fn emit(
    fs: &dyn OutputFileSystem,
    path: &Path,
    content: &str,
) -> Result<(), PrerenderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs.create_dir_all(parent)
            .await
            .map_err(|source| output_error(parent, source))?;
    }

    fs.write_file(path, content.as_bytes())
        .await
        .map_err(|source| output_error(path, source))
}

fn output_error(path: &Path, source: io::Error) -> PrerenderError {
    PrerenderError::Output {
        path: PathBuf::from(path),
        source,
    }
}
