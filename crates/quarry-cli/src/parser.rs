//! Command-line surface.
//!
//! Long option names follow the wget lineage so existing muscle memory
//! works; `to_config` folds the negated flags into the positive settings the
//! engine uses.

use std::path::PathBuf;

use clap::Parser;

use quarry_core::config::{Config, FileNameRestriction};
use quarry_core::error::Result;

/// Recursive multi-source downloader.
#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Retrieve files over HTTP, recursively and from multiple mirrors")]
#[command(version)]
pub struct Cli {
    /// URIs to retrieve.
    #[arg(required = true, value_name = "URI")]
    pub uris: Vec<String>,

    /// Enable link following.
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Allow recursion to leave the initial host set.
    #[arg(short = 'H', long)]
    pub span_hosts: bool,

    /// Never create directories.
    #[arg(long)]
    pub no_directories: bool,

    /// Always create directories, even without recursion.
    #[arg(short = 'x', long)]
    pub force_directories: bool,

    /// Omit the host segment from local paths.
    #[arg(long)]
    pub no_host_directories: bool,

    /// Prepend the scheme segment to local paths.
    #[arg(long)]
    pub protocol_directories: bool,

    /// Strip this many leading path components.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub cut_directories: u32,

    /// Prefix for all local paths.
    #[arg(short = 'P', long, value_name = "PREFIX")]
    pub directory_prefix: Option<PathBuf>,

    /// Write all bodies to this file; `-` means stdout.
    #[arg(short = 'O', long, value_name = "FILE")]
    pub output_document: Option<String>,

    /// Do not persist bodies.
    #[arg(long)]
    pub delete_after: bool,

    /// Resume partially downloaded files.
    #[arg(short = 'c', long = "continue")]
    pub continue_download: bool,

    /// Only re-download files newer than the local copy.
    #[arg(short = 'N', long)]
    pub timestamping: bool,

    /// Size of the worker pool.
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub num_threads: usize,

    /// Redirect chain limit.
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub max_redirect: u32,

    /// Ask servers to keep connections open.
    #[arg(long)]
    pub keep_alive: bool,

    /// Disable cookies.
    #[arg(long)]
    pub no_cookies: bool,

    /// Save the cookie jar here at exit.
    #[arg(long, value_name = "FILE")]
    pub save_cookies: Option<PathBuf>,

    /// Include session cookies when saving.
    #[arg(long)]
    pub keep_session_cookies: bool,

    /// Override the User-Agent header.
    #[arg(short = 'U', long, value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Print server response headers.
    #[arg(short = 'S', long)]
    pub server_response: bool,

    /// Fetch but do not write bodies.
    #[arg(long)]
    pub spider: bool,

    /// Allow cached responses (drops `Pragma: no-cache`).
    #[arg(long)]
    pub cache: bool,

    /// Verbose output plus a blacklist dump at exit.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Restrict characters in local file names.
    #[arg(long, value_name = "MODE")]
    pub restrict_file_names: Option<String>,
}

impl Cli {
    /// Build the engine configuration.
    pub fn to_config(&self) -> Result<Config> {
        let restrict_file_names = match &self.restrict_file_names {
            Some(mode) => FileNameRestriction::parse(mode)?,
            None => FileNameRestriction::None,
        };
        Ok(Config {
            recursive: self.recursive,
            span_hosts: self.span_hosts,
            directories: !self.no_directories,
            force_directories: self.force_directories,
            host_directories: !self.no_host_directories,
            protocol_directories: self.protocol_directories,
            cut_directories: self.cut_directories,
            directory_prefix: self.directory_prefix.clone(),
            output_document: self.output_document.clone(),
            delete_after: self.delete_after,
            continue_download: self.continue_download,
            timestamping: self.timestamping,
            num_threads: self.num_threads,
            max_redirect: self.max_redirect,
            keep_alive: self.keep_alive,
            cookies: !self.no_cookies,
            save_cookies: self.save_cookies.clone(),
            keep_session_cookies: self.keep_session_cookies,
            user_agent: self.user_agent.clone(),
            server_response: self.server_response,
            spider: self.spider,
            cache: self.cache,
            debug: self.debug,
            restrict_file_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let cli = Cli::parse_from(["quarry", "http://example.org/"]);
        let cfg = cli.to_config().unwrap();
        let defaults = Config::default();
        assert_eq!(cfg.num_threads, defaults.num_threads);
        assert_eq!(cfg.max_redirect, defaults.max_redirect);
        assert_eq!(cfg.directories, defaults.directories);
        assert_eq!(cfg.cookies, defaults.cookies);
    }

    #[test]
    fn test_negated_flags() {
        let cli = Cli::parse_from([
            "quarry",
            "--no-directories",
            "--no-host-directories",
            "--no-cookies",
            "http://example.org/",
        ]);
        let cfg = cli.to_config().unwrap();
        assert!(!cfg.directories);
        assert!(!cfg.host_directories);
        assert!(!cfg.cookies);
    }

    #[test]
    fn test_continue_flag_spelling() {
        let cli = Cli::parse_from(["quarry", "--continue", "http://example.org/f.iso"]);
        assert!(cli.continue_download);
    }

    #[test]
    fn test_uris_required() {
        assert!(Cli::try_parse_from(["quarry", "--recursive"]).is_err());
    }

    #[test]
    fn test_bad_restriction_rejected() {
        let cli = Cli::parse_from([
            "quarry",
            "--restrict-file-names",
            "klingon",
            "http://example.org/",
        ]);
        assert!(cli.to_config().is_err());
    }
}
