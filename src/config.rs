//! Configuration types for smb-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Share URL parsing

use crate::error::{ConfigError, SessionError};
use crate::walker::WalkOptions;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable session count
const MAX_SESSIONS: usize = 256;

/// Chunk size limits
const MIN_CHUNK_SIZE: usize = 1;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default read buffer, one SMB2 credit worth of data
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Regex for parsing share URLs (after backslashes are folded to slashes)
static SHARE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: smb://server[:port][/share[/path]] or //server/share/path
    Regex::new(r"^(?:smb:)?//([^:/\s]+)(?::(\d+))?(?:/([^/\s]+))?(/.*)?$")
        .expect("Invalid share URL regex")
});

/// Concurrent SMB share walker
#[derive(Parser, Debug, Clone)]
#[command(
    name = "smb-walker",
    version,
    about = "Walk an SMB share with several sessions and read every file",
    long_about = "Recursively lists every directory under a share path and reads every file \
                  to end-of-stream, using several independent sessions at once.\n\n\
                  Shares are served from local directories given with --mount.",
    after_help = "EXAMPLES:\n    \
        smb-walker smb://localhost/public/ --mount public=/srv/public\n    \
        smb-walker smb://localhost/public/ --mount public=/srv/public -s 4 -j 64\n    \
        smb-walker smb://localhost/public/ --mount public=/srv/public --expect-files 128\n    \
        smb-walker '\\\\localhost\\public' --mount public=/srv/public --exclude '\\.tmp$'"
)]
pub struct CliArgs {
    /// Share path to walk (smb://server/share/path or \\server\share\path)
    #[arg(value_name = "URL")]
    pub url: String,

    /// Serve a share from a local directory (NAME=DIR, can be repeated)
    #[arg(short = 'm', long = "mount", value_name = "NAME=DIR", action = clap::ArgAction::Append)]
    pub mounts: Vec<String>,

    /// Number of independent sessions walking the root
    #[arg(short = 's', long, default_value_t = default_sessions(), value_name = "NUM")]
    pub sessions: usize,

    /// Read buffer size in bytes
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHUNK_SIZE, value_name = "BYTES")]
    pub chunk_size: usize,

    /// Maximum concurrently running jobs (unbounded fan-out if not set)
    #[arg(short = 'j', long, value_name = "NUM")]
    pub max_in_flight: Option<usize>,

    /// Maximum directory depth (unlimited if not set)
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<usize>,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Wait for exactly this many file completions instead of self-counting
    #[arg(long, value_name = "COUNT")]
    pub expect_files: Option<u64>,

    /// Give up waiting for completion after this many seconds
    #[arg(long, value_name = "SECS")]
    pub wait_timeout: Option<u64>,

    /// Run each session's operations one at a time
    #[arg(long)]
    pub serialize: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (show per-path errors)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_sessions() -> usize {
    num_cpus::get().clamp(1, 8)
}

/// Parsed share URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareUrl {
    /// Server hostname or IP
    pub server: String,

    /// Optional port (default is 445)
    pub port: Option<u16>,

    /// Share name (None addresses the server root)
    pub share: Option<String>,

    /// Path within the share, starting with '/' (may be empty)
    pub path: String,
}

impl ShareUrl {
    /// Parse a share URL string
    ///
    /// Accepts formats:
    /// - smb://server
    /// - smb://server/share/path
    /// - smb://server:port/share
    /// - \\server\share\path
    /// - //server/share/path
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let trimmed = url.trim();
        let folded = trimmed.replace('\\', "/");

        let caps = SHARE_URL_REGEX
            .captures(&folded)
            .ok_or_else(|| SessionError::InvalidUrl {
                url: trimmed.to_string(),
                reason: "Expected format: smb://server/share/path or \\\\server\\share".into(),
            })?;

        let server = caps
            .get(1)
            .ok_or_else(|| SessionError::InvalidUrl {
                url: trimmed.to_string(),
                reason: "Missing server".into(),
            })?
            .as_str()
            .to_string();

        let port = match caps.get(2) {
            Some(m) => Some(m.as_str().parse::<u16>().map_err(|_| SessionError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("Invalid port '{}'", m.as_str()),
            })?),
            None => None,
        };

        let share = caps.get(3).map(|m| m.as_str().to_string());
        let path = caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default();

        Ok(Self {
            server,
            port,
            share,
            path,
        })
    }

    /// The server part, e.g. `smb://host:1445`
    pub fn server_root(&self) -> String {
        match self.port {
            Some(p) => format!("smb://{}:{}", self.server, p),
            None => format!("smb://{}", self.server),
        }
    }

    /// Components of the path inside the share, empty segments dropped
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// The directory URL the walk starts from
    ///
    /// Always ends in '/', because children are composed by appending
    /// their names directly.
    pub fn walk_root(&self) -> String {
        let mut root = self.server_root();
        root.push('/');
        if let Some(share) = &self.share {
            root.push_str(share);
            root.push('/');
            for segment in self.segments() {
                root.push_str(segment);
                root.push('/');
            }
        }
        root
    }

    /// Format for display
    pub fn to_display_string(&self) -> String {
        self.walk_root()
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Parsed share URL
    pub url: ShareUrl,

    /// Local directories serving shares
    pub mounts: Vec<(String, PathBuf)>,

    /// Number of independent sessions
    pub session_count: usize,

    /// Read buffer size in bytes
    pub chunk_size: usize,

    /// Concurrency ceiling (None = unbounded fan-out)
    pub max_in_flight: Option<usize>,

    /// Maximum traversal depth
    pub max_depth: Option<usize>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Caller-computed number of file completions to wait for
    pub expected_files: Option<u64>,

    /// Completion wait timeout
    pub wait_timeout: Option<Duration>,

    /// Force one-at-a-time session operations
    pub serialize_sessions: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl WalkConfig {
    /// Configuration with defaults for walking `url`
    pub fn new(url: ShareUrl) -> Self {
        Self {
            url,
            mounts: Vec::new(),
            session_count: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: None,
            max_depth: None,
            exclude_patterns: Vec::new(),
            expected_files: None,
            wait_timeout: None,
            serialize_sessions: false,
            show_progress: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let url = ShareUrl::parse(&args.url)?;

        // Validate session count
        if args.sessions == 0 || args.sessions > MAX_SESSIONS {
            return Err(ConfigError::InvalidSessionCount {
                count: args.sessions,
                max: MAX_SESSIONS,
            });
        }

        // Validate chunk size
        if args.chunk_size < MIN_CHUNK_SIZE || args.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                size: args.chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }

        // Validate concurrency ceiling
        if let Some(limit) = args.max_in_flight {
            if limit == 0 {
                return Err(ConfigError::InvalidInFlightLimit { limit });
            }
        }

        let mounts = args
            .mounts
            .iter()
            .map(|m| parse_mount(m))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(share) = &url.share {
            if !mounts.iter().any(|(name, _)| name.eq_ignore_ascii_case(share)) {
                return Err(ConfigError::InvalidMount {
                    mount: share.clone(),
                    reason: "share is not mounted; pass --mount NAME=DIR".to_string(),
                });
            }
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            url,
            mounts,
            session_count: args.sessions,
            chunk_size: args.chunk_size,
            max_in_flight: args.max_in_flight,
            max_depth: args.max_depth,
            exclude_patterns,
            expected_files: args.expect_files,
            wait_timeout: args.wait_timeout.map(Duration::from_secs),
            serialize_sessions: args.serialize,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Walker options derived from this configuration
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            chunk_size: self.chunk_size,
            max_in_flight: self.max_in_flight,
            max_depth: self.max_depth,
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }
}

/// Parse a `NAME=DIR` mount argument
fn parse_mount(mount: &str) -> Result<(String, PathBuf), ConfigError> {
    let (name, dir) = mount.split_once('=').ok_or_else(|| ConfigError::InvalidMount {
        mount: mount.to_string(),
        reason: "expected NAME=DIR".to_string(),
    })?;

    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(ConfigError::InvalidMount {
            mount: mount.to_string(),
            reason: "share name must be a single non-empty component".to_string(),
        });
    }

    let dir = PathBuf::from(dir);
    if !dir.is_dir() {
        return Err(ConfigError::InvalidMount {
            mount: mount.to_string(),
            reason: format!("'{}' is not a directory", dir.display()),
        });
    }

    Ok((name.to_string(), dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str) -> CliArgs {
        CliArgs::parse_from(["smb-walker", url])
    }

    #[test]
    fn test_parse_share_url_standard() {
        let url = ShareUrl::parse("smb://server.local/public").unwrap();
        assert_eq!(url.server, "server.local");
        assert_eq!(url.share.as_deref(), Some("public"));
        assert_eq!(url.path, "");
        assert_eq!(url.port, None);
    }

    #[test]
    fn test_parse_share_url_with_path_and_port() {
        let url = ShareUrl::parse("smb://server:1445/public/data/sub/").unwrap();
        assert_eq!(url.server, "server");
        assert_eq!(url.port, Some(1445));
        assert_eq!(url.share.as_deref(), Some("public"));
        assert_eq!(url.path, "/data/sub/");
        assert_eq!(url.walk_root(), "smb://server:1445/public/data/sub/");
    }

    #[test]
    fn test_parse_server_root() {
        let url = ShareUrl::parse("smb://localhost").unwrap();
        assert_eq!(url.share, None);
        assert_eq!(url.walk_root(), "smb://localhost/");

        let url = ShareUrl::parse("smb://localhost/").unwrap();
        assert_eq!(url.share, None);
        assert_eq!(url.walk_root(), "smb://localhost/");
    }

    #[test]
    fn test_parse_unc_format() {
        let url = ShareUrl::parse(r"\\fileserver\public\docs").unwrap();
        assert_eq!(url.server, "fileserver");
        assert_eq!(url.share.as_deref(), Some("public"));
        assert_eq!(url.walk_root(), "smb://fileserver/public/docs/");
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(ShareUrl::parse("invalid").is_err());
        assert!(ShareUrl::parse("nfs://server/export").is_err());
        assert!(ShareUrl::parse("smb://server:99999/share").is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut a = args("smb://localhost");
        a.sessions = 0;
        assert!(matches!(
            WalkConfig::from_args(a),
            Err(ConfigError::InvalidSessionCount { .. })
        ));

        let mut a = args("smb://localhost");
        a.chunk_size = 0;
        assert!(matches!(
            WalkConfig::from_args(a),
            Err(ConfigError::InvalidChunkSize { .. })
        ));

        let mut a = args("smb://localhost");
        a.max_in_flight = Some(0);
        assert!(matches!(
            WalkConfig::from_args(a),
            Err(ConfigError::InvalidInFlightLimit { .. })
        ));

        let mut a = args("smb://localhost");
        a.exclude_patterns = vec!["(".into()];
        assert!(matches!(
            WalkConfig::from_args(a),
            Err(ConfigError::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_config_requires_mounted_share() {
        let a = args("smb://localhost/public/");
        assert!(matches!(
            WalkConfig::from_args(a),
            Err(ConfigError::InvalidMount { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let mut a = args("smb://localhost/public/");
        a.mounts = vec![format!("public={}", dir.path().display())];
        let config = WalkConfig::from_args(a).unwrap();
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].0, "public");
    }

    #[test]
    fn test_parse_mount_rejects_bad_values() {
        assert!(parse_mount("public").is_err());
        assert!(parse_mount("=/tmp").is_err());
        assert!(parse_mount("a/b=/tmp").is_err());
        assert!(parse_mount("public=/definitely/not/here").is_err());
    }
}
