//! Body persistence.
//!
//! Whole responses go through [`write_body`], which knows about spider mode,
//! the aggregate output document (including stdout), delete-after, and
//! server-supplied mtimes. Piece downloads go through [`write_part`], which
//! positions by absolute offset and never truncates.

use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use filetime::FileTime;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use quarry_core::config::Config;
use quarry_core::error::Result;

/// Persist one response body.
///
/// `append` selects resume semantics (206 responses); otherwise the file is
/// truncated and, when the server sent `Last-Modified`, the local mtime is
/// set from it.
pub async fn write_body(
    cfg: &Config,
    local_filename: Option<&Path>,
    body: &[u8],
    append: bool,
    last_modified: Option<SystemTime>,
) -> Result<()> {
    if cfg.spider {
        return Ok(());
    }

    if let Some(output) = &cfg.output_document {
        if output == "-" {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(body)?;
            return Ok(());
        }
        if cfg.delete_after {
            return Ok(());
        }
        tracing::info!("append to '{output}'");
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(output)
            .await?;
        file.write_all(body).await?;
        return Ok(());
    }

    let Some(path) = local_filename else {
        return Ok(());
    };
    tracing::info!("saving '{}'", path.display());

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;
    file.write_all(body).await?;
    drop(file);

    if !append {
        if let Some(modified) = last_modified {
            if let Err(e) = filetime::set_file_mtime(path, FileTime::from_system_time(modified)) {
                tracing::warn!("failed to set file date on '{}': {e}", path.display());
            }
        }
    }

    Ok(())
}

/// Write a piece at its absolute offset, creating the file as needed.
pub async fn write_part(path: &Path, position: u64, body: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await?;
    file.seek(std::io::SeekFrom::Start(position)).await?;
    file.write_all(body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn cfg() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn test_truncate_write_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let stamp = UNIX_EPOCH + Duration::from_secs(1_000_000_000);

        write_body(&cfg(), Some(&path), b"hello", false, Some(stamp))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.modified().unwrap(), stamp);

        // truncate replaces
        write_body(&cfg(), Some(&path), b"xy", false, None)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"xy");
    }

    #[tokio::test]
    async fn test_append_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hel").unwrap();

        write_body(&cfg(), Some(&path), b"lo", true, None)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_spider_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let c = Config {
            spider: true,
            ..cfg()
        };
        write_body(&c, Some(&path), b"hello", false, None)
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_output_document_appends_across_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("all.out");
        let c = Config {
            output_document: Some(out.to_string_lossy().into_owned()),
            ..cfg()
        };
        write_body(&c, None, b"one", false, None).await.unwrap();
        write_body(&c, None, b"two", false, None).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn test_write_part_positions_absolutely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");

        write_part(&path, 5, b"world").await.unwrap();
        write_part(&path, 0, b"hello").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"helloworld");
    }
}
