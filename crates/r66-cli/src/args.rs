//! Command-line arguments
//!
//! The launcher accepts the historical single-dash, case-insensitive flags
//! (`-to`, `-statusFile`, `-elapseWaarp`, ...). They are rewritten to clap
//! long options by [`normalize`] before parsing.

use crate::config::{ClientEnvironment, ConfigError, split_list};
use clap::Parser;
use r66_spool::{SpoolConfig, TransferMode};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Legacy flag (lowercased) → clap long name, and whether it takes a value
const LEGACY_FLAGS: &[(&str, &str, bool)] = &[
    ("to", "to", true),
    ("name", "name", true),
    ("directory", "directory", true),
    ("rule", "rule", true),
    ("statusfile", "statusfile", true),
    ("stopfile", "stopfile", true),
    ("info", "info", true),
    ("md5", "md5", false),
    ("block", "block", true),
    ("nolog", "nolog", false),
    ("submit", "submit", false),
    ("direct", "direct", false),
    ("recursive", "recursive", false),
    ("regex", "regex", true),
    ("waarp", "waarp", true),
    ("elapse", "elapse", true),
    ("elapsewaarp", "elapse-waarp", true),
    ("parallel", "parallel", false),
    ("sequential", "sequential", false),
    ("limitparallel", "limit-parallel", true),
    ("verbose", "verbose", false),
    ("debug", "debug", false),
];

/// Spooled directory daemon launcher
#[derive(Parser, Debug)]
#[command(name = "spooled-directory")]
#[command(author, version, about, long_about = None)]
#[command(args_override_self = true)]
pub struct Cli {
    /// XML configuration file
    pub config: PathBuf,

    /// Remote hosts (comma separated)
    #[arg(long)]
    pub to: Option<String>,

    /// Daemon name
    #[arg(long)]
    pub name: Option<String>,

    /// Directories to watch (comma separated)
    #[arg(long)]
    pub directory: Option<String>,

    /// Transfer rule
    #[arg(long)]
    pub rule: Option<String>,

    /// Status file
    #[arg(long)]
    pub statusfile: Option<PathBuf>,

    /// Stop file
    #[arg(long)]
    pub stopfile: Option<PathBuf>,

    /// Transfer information
    #[arg(long)]
    pub info: Option<String>,

    /// Compute and verify MD5 of every file
    #[arg(long)]
    pub md5: bool,

    /// Transfer block size
    #[arg(long, value_parser = clap::value_parser!(u32).range(100..))]
    pub block: Option<u32>,

    /// Delete task rows of successful transfers
    #[arg(long)]
    pub nolog: bool,

    /// Queue transfers in the task database (default)
    #[arg(long, overrides_with = "direct")]
    pub submit: bool,

    /// Transfer immediately
    #[arg(long, overrides_with = "submit")]
    pub direct: bool,

    /// Watch sub-directories
    #[arg(long)]
    pub recursive: bool,

    /// File name filter
    #[arg(long)]
    pub regex: Option<String>,

    /// Observer hosts for status heartbeats (comma separated)
    #[arg(long)]
    pub waarp: Option<String>,

    /// Delay between scans in ms
    #[arg(long)]
    pub elapse: Option<u64>,

    /// Delay between heartbeats in ms
    #[arg(long)]
    pub elapse_waarp: Option<u64>,

    /// Run transfers in parallel (default)
    #[arg(long, overrides_with = "sequential")]
    pub parallel: bool,

    /// Run one transfer at a time
    #[arg(long, overrides_with = "parallel")]
    pub sequential: bool,

    /// Maximum parallel transfers (0 for one per CPU)
    #[arg(long)]
    pub limit_parallel: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    pub debug: bool,
}

/// Rewrite legacy `-flag` arguments to `--long-flag`.
///
/// The program name and values following a value-taking flag are left alone.
pub fn normalize<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut expects_value = false;

    for (index, arg) in args.into_iter().enumerate() {
        if index == 0 || expects_value {
            expects_value = false;
            out.push(arg);
            continue;
        }
        let legacy = arg
            .to_str()
            .and_then(|s| s.strip_prefix('-'))
            .filter(|s| !s.starts_with('-'))
            .and_then(|s| {
                let lower = s.to_ascii_lowercase();
                LEGACY_FLAGS
                    .iter()
                    .find(|(name, _, _)| *name == lower)
                    .map(|(_, long, takes_value)| (*long, *takes_value))
            });
        match legacy {
            Some((long, takes_value)) => {
                expects_value = takes_value;
                out.push(OsString::from(format!("--{long}")));
            }
            None => out.push(arg),
        }
    }
    out
}

impl Cli {
    /// Whether any single-instance daemon setting was given.
    pub fn has_daemon_flags(&self) -> bool {
        self.to.is_some()
            || self.directory.is_some()
            || self.rule.is_some()
            || self.statusfile.is_some()
            || self.stopfile.is_some()
    }

    /// Build the single-instance daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] listing every mandatory flag absent.
    pub fn to_config(&self, env: &ClientEnvironment) -> Result<SpoolConfig, ConfigError> {
        let hosts = self.to.as_deref().map(split_list).unwrap_or_default();
        let directories: Vec<PathBuf> = self
            .directory
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let mut missing = Vec::new();
        if hosts.is_empty() {
            missing.push("-to");
        }
        if self.rule.is_none() {
            missing.push("-rule");
        }
        if directories.is_empty() {
            missing.push("-directory");
        }
        if self.statusfile.is_none() {
            missing.push("-statusfile");
        }
        if self.stopfile.is_none() {
            missing.push("-stopfile");
        }
        let (Some(rule), Some(status_file), Some(stop_file), true) = (
            self.rule.as_deref(),
            self.statusfile.as_deref(),
            self.stopfile.as_deref(),
            missing.is_empty(),
        ) else {
            return Err(ConfigError::Missing(missing.join(", ")));
        };

        let mut config = SpoolConfig::new(directories, status_file, stop_file, rule, hosts);
        config.name = match &self.name {
            Some(name) => name.clone(),
            None => SpoolConfig::default_name(&env.host_id, &config.directories),
        };
        config.recursive = self.recursive;
        config.regex = self.regex.clone();
        config.md5 = self.md5;
        config.nolog = self.nolog;
        config.mode = if self.direct {
            TransferMode::Direct
        } else {
            TransferMode::Submit
        };
        config.parallel = !self.sequential;
        config.shutdown_timeout = env.timeout;

        if let Some(info) = &self.info {
            config.file_info = info.clone();
        }
        if let Some(block) = self.block.or(env.block_size) {
            config.block_size = block;
        }
        if let Some(ms) = self.elapse {
            config.elapse = Duration::from_millis(ms);
        }
        if let Some(ms) = self.elapse_waarp {
            config.elapse_waarp = Duration::from_millis(ms);
        }
        if let Some(limit) = self.limit_parallel {
            config.limit_parallel = limit;
        }
        if let Some(observers) = &self.waarp {
            config.waarp_hosts = split_list(observers);
        }
        Ok(config)
    }
}
