//! Runtime configuration.
//!
//! Fixed settings come from the CLI ([`crate::args::Args`]); the data
//! files (`motd.txt`, the agreement, `proxies.txt`, `badwords.txt`) are
//! re-readable at runtime so a SIGHUP can swap them without dropping
//! sessions.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::args::Args;
use crate::censor::Censor;

/// Protocol version advertised in the banner.
pub const SERVER_VERSION: &str = "0.40";

/// Settings fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub nat_port: u16,
    pub latest_spring_version: String,
    pub sql_url: String,
    pub max_threads: u32,
    pub censor_enabled: bool,
    pub sighup_reload: bool,
    pub log_output: Option<PathBuf>,
    pub agreement_path: PathBuf,
    pub motd_path: PathBuf,
    pub badwords_path: PathBuf,
    pub proxies_path: Option<PathBuf>,
    /// Sender address for verification mail; `None` disables verification.
    pub mail_from: Option<String>,
}

impl Config {
    /// Derive the fixed configuration from parsed CLI arguments.
    pub fn from_args(args: &Args) -> Self {
        Self {
            port: args.port,
            nat_port: args.nat_port.unwrap_or(args.port + 1),
            latest_spring_version: args.latest_spring_version.clone(),
            sql_url: args.sql_url.clone(),
            max_threads: args.max_threads,
            censor_enabled: !args.no_censor,
            sighup_reload: args.sighup,
            log_output: args.output.clone(),
            agreement_path: args.agreement.clone(),
            motd_path: PathBuf::from("motd.txt"),
            badwords_path: PathBuf::from("badwords.txt"),
            proxies_path: args.proxies.clone(),
            mail_from: args.mail_from.clone(),
        }
    }
}

/// File-backed settings reloaded on SIGHUP.
#[derive(Debug, Clone, Default)]
pub struct HotConfig {
    /// MOTD lines sent after the banner.
    pub motd: Vec<String>,
    /// Agreement lines sent to unconfirmed accounts.
    pub agreement: Vec<String>,
    /// Proxy addresses trusted to rewrite the observed source IP.
    pub trusted_proxies: HashSet<IpAddr>,
    /// Username / channel profanity predicate.
    pub censor: Censor,
}

impl HotConfig {
    /// Read every data file. Missing files degrade to empty defaults.
    pub fn load(config: &Config) -> Self {
        let motd = read_lines(&config.motd_path);
        let agreement = read_lines(&config.agreement_path);
        if agreement.is_empty() {
            warn!(path = %config.agreement_path.display(), "Agreement file missing or empty");
        }

        let mut trusted_proxies = HashSet::new();
        if let Some(path) = &config.proxies_path {
            for line in read_lines(path) {
                match line.parse::<IpAddr>() {
                    Ok(ip) => {
                        trusted_proxies.insert(ip);
                    }
                    Err(_) => warn!(entry = %line, "Ignoring unparseable proxy entry"),
                }
            }
            info!(count = trusted_proxies.len(), "Loaded trusted proxies");
        }

        Self {
            motd,
            agreement,
            trusted_proxies,
            censor: Censor::load(&config.badwords_path),
        }
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(data) => data
            .lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}
