//! Runtime configuration.
//!
//! The CLI parser produces this struct once at startup; everything past the
//! composition root sees it behind an `Arc` and treats it as immutable.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// How local file names are restricted (`--restrict-file-names`).
///
/// Only the case transforms actually rewrite paths; the other modes are
/// accepted for compatibility and currently change nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileNameRestriction {
    /// Leave names as the escaped URI forms produce them.
    #[default]
    None,
    /// Lower-case every path component.
    Lowercase,
    /// Upper-case every path component.
    Uppercase,
}

impl FileNameRestriction {
    /// Parse the option value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "lowercase" => Ok(Self::Lowercase),
            "uppercase" => Ok(Self::Uppercase),
            // accepted for wget compatibility, no effect on this platform
            "unix" | "windows" | "nocontrol" | "ascii" => Ok(Self::None),
            other => Err(Error::config(format!(
                "unknown restrict-file-names mode '{other}'"
            ))),
        }
    }
}

/// All recognized options and their defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Enable link following.
    pub recursive: bool,
    /// Allow recursion to leave the initial host set.
    pub span_hosts: bool,
    /// Directory creation in local paths (negated by `--no-directories`).
    pub directories: bool,
    /// Force directory creation even without recursion.
    pub force_directories: bool,
    /// Include the host segment in local paths.
    pub host_directories: bool,
    /// Prepend the scheme segment to local paths.
    pub protocol_directories: bool,
    /// Strip this many leading path segments.
    pub cut_directories: u32,
    /// Prefix prepended to all local paths.
    pub directory_prefix: Option<PathBuf>,
    /// Write all bodies to this file (append); `-` means stdout.
    pub output_document: Option<String>,
    /// Do not persist bodies.
    pub delete_after: bool,
    /// Resume with a `Range` request starting at the local size.
    pub continue_download: bool,
    /// Conditional GET with `If-Modified-Since`.
    pub timestamping: bool,
    /// Size of the worker pool.
    pub num_threads: usize,
    /// Redirect chain limit.
    pub max_redirect: u32,
    /// Request connection reuse.
    pub keep_alive: bool,
    /// Send and store cookies.
    pub cookies: bool,
    /// Serialize the cookie jar here at shutdown.
    pub save_cookies: Option<PathBuf>,
    /// Include session cookies when saving.
    pub keep_session_cookies: bool,
    /// Override the User-Agent header.
    pub user_agent: Option<String>,
    /// Print response status and headers to the log.
    pub server_response: bool,
    /// Fetch but do not write bodies.
    pub spider: bool,
    /// Suppress the `Pragma: no-cache` request header.
    pub cache: bool,
    /// Dump the blacklist at exit.
    pub debug: bool,
    /// Local file name restriction mode.
    pub restrict_file_names: FileNameRestriction,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recursive: false,
            span_hosts: false,
            directories: true,
            force_directories: false,
            host_directories: true,
            protocol_directories: false,
            cut_directories: 0,
            directory_prefix: None,
            output_document: None,
            delete_after: false,
            continue_download: false,
            timestamping: false,
            num_threads: 5,
            max_redirect: 3,
            keep_alive: false,
            cookies: true,
            save_cookies: None,
            keep_session_cookies: false,
            user_agent: None,
            server_response: false,
            spider: false,
            cache: false,
            debug: false,
            restrict_file_names: FileNameRestriction::None,
        }
    }
}

impl Config {
    /// Reject impossible option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::config("num-threads must be at least 1"));
        }
        if self.continue_download && self.output_document.as_deref() == Some("-") {
            return Err(Error::config(
                "cannot continue a download that goes to stdout",
            ));
        }
        if self.continue_download && self.timestamping {
            return Err(Error::config(
                "continue and timestamping cannot be combined",
            ));
        }
        Ok(())
    }

    /// Whether bodies are written to one aggregate document.
    #[must_use]
    pub const fn has_output_document(&self) -> bool {
        self.output_document.is_some()
    }
}
