//! Derive the local filesystem path for a URI.
//!
//! Mirrors the classic wget layout rules: optional directory prefix, scheme
//! and host segments, `--cut-dirs`, and the escaped path plus query. Parent
//! directories are created here so the writer can open the file directly.

use std::path::{Path, PathBuf};

use url::Url;

use quarry_core::config::{Config, FileNameRestriction};
use quarry_core::error::{Error, Result};

/// Fallback name for URIs whose path ends in `/`.
const INDEX_NAME: &str = "index.html";

/// Compute the local path for `uri` without touching the filesystem.
///
/// `None` when bodies go elsewhere (spider mode or an aggregate output
/// document).
pub fn map_uri(cfg: &Config, uri: &Url) -> Result<Option<PathBuf>> {
    if cfg.spider || cfg.has_output_document() {
        return Ok(None);
    }

    let mut directories = cfg.recursive;
    if !cfg.directories {
        directories = false;
    }
    if cfg.force_directories {
        directories = true;
    }

    let mut name = String::new();

    if let Some(prefix) = &cfg.directory_prefix {
        name.push_str(&prefix.to_string_lossy());
        name.push('/');
    }

    if directories {
        if cfg.protocol_directories && !uri.scheme().is_empty() {
            name.push_str(uri.scheme());
            name.push('/');
        }
        if cfg.host_directories {
            if let Some(host) = uri.host_str() {
                name.push_str(host);
            }
        }
        push_cut_path(&mut name, uri.path(), cfg.cut_directories);
        if name.ends_with('/') {
            name.push_str(INDEX_NAME);
        }
        if let Some(query) = uri.query() {
            name.push('?');
            name.push_str(query);
        }
    } else {
        let basename = uri
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .unwrap_or("");
        if basename.is_empty() {
            name.push_str(INDEX_NAME);
        } else {
            name.push_str(basename);
        }
        if let Some(query) = uri.query() {
            name.push('?');
            name.push_str(query);
        }
    }

    // never write outside the tree: leading slashes become relative
    let name = name.trim_start_matches('/').to_string();
    let name = match cfg.restrict_file_names {
        FileNameRestriction::None => name,
        FileNameRestriction::Lowercase => name.to_lowercase(),
        FileNameRestriction::Uppercase => name.to_uppercase(),
    };

    // relative segments must have been normalized away during URI parsing
    if Path::new(&name)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Filesystem {
            kind: "InvalidPath".to_string(),
            message: format!("unexpected relative path '{name}'"),
        });
    }

    Ok(Some(PathBuf::from(name)))
}

/// Append the escaped path, stripping `cut` leading directory components.
///
/// When more components are cut than exist, only the basename survives.
fn push_cut_path(name: &mut String, path: &str, cut: u32) {
    if cut == 0 {
        name.push_str(path);
        return;
    }
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let cut = cut as usize;
    if segments.len() > cut + 1 {
        for segment in &segments[cut..] {
            name.push('/');
            name.push_str(segment);
        }
    } else {
        name.push('/');
        name.push_str(segments.last().unwrap_or(&""));
    }
}

/// Compute the local path and prepare its parent directories.
///
/// Returns `None` for sinks that need no path (spider, output document,
/// delete-after); delete-after still creates the directories, matching the
/// original behavior.
pub fn local_filename(cfg: &Config, uri: &Url) -> Result<Option<PathBuf>> {
    let Some(path) = map_uri(cfg, uri)? else {
        return Ok(None);
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::from_io(&e))?;
            tracing::debug!("mkdir {}", parent.display());
        }
    }

    if cfg.delete_after {
        return Ok(None);
    }

    tracing::debug!("local filename = '{}'", path.display());
    Ok(Some(path))
}
