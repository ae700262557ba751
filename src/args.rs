//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

/// Multi-user game lobby server.
#[derive(Parser, Debug, Clone)]
#[command(name = "uberd", version, about)]
pub struct Args {
    /// Port the lobby server listens on.
    #[arg(short = 'p', long, default_value_t = 8200)]
    pub port: u16,

    /// UDP port advertised for NAT traversal (defaults to port + 1).
    #[arg(short = 'n', long = "natport")]
    pub nat_port: Option<u16>,

    /// Write log output to this file instead of stderr.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Reload data files on SIGHUP.
    #[arg(short = 'u', long = "sighup")]
    pub sighup: bool,

    /// Latest engine version advertised in the banner.
    #[arg(short = 'v', long = "latestspringversion", default_value = "*")]
    pub latest_spring_version: String,

    /// Database worker threads (advisory; sqlite forces one writer).
    #[arg(short = 'm', long = "maxthreads", default_value_t = 25)]
    pub max_threads: u32,

    /// SQL database URL for user, channel and ban storage.
    #[arg(short = 's', long = "sqlurl", default_value = "sqlite://server.db")]
    pub sql_url: String,

    /// Disable censoring of usernames and censored channels.
    #[arg(short = 'c', long = "no-censor")]
    pub no_censor: bool,

    /// Path to the agreement file sent to registering clients.
    #[arg(short = 'a', long = "agreement", default_value = "agreement.rtf")]
    pub agreement: PathBuf,

    /// Path to proxies.txt: hosts trusted to pass the real IP through local_ip.
    #[arg(long = "proxies")]
    pub proxies: Option<PathBuf>,

    /// Read additional command-line arguments from a file.
    #[arg(short = 'g', long = "loadargs")]
    pub load_args: Option<PathBuf>,

    /// Sender address for verification mail; enables email verification.
    #[arg(long = "mail-from")]
    pub mail_from: Option<String>,
}

impl Args {
    /// Parse the process arguments, expanding `--loadargs <file>` into
    /// whitespace-separated extra arguments appended after the CLI ones.
    pub fn load() -> Self {
        let args = Args::parse();
        let Some(path) = &args.load_args else {
            return args;
        };
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let mut argv: Vec<String> = std::env::args().collect();
                argv.extend(data.split_whitespace().map(String::from));
                Args::parse_from(argv)
            }
            Err(e) => {
                eprintln!("Failed to read {}: {e}", path.display());
                args
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["uberd"]);
        assert_eq!(args.port, 8200);
        assert_eq!(args.nat_port, None);
        assert_eq!(args.latest_spring_version, "*");
        assert!(!args.no_censor);
        assert_eq!(args.sql_url, "sqlite://server.db");
    }

    #[test]
    fn short_and_long_flags() {
        let args = Args::parse_from([
            "uberd", "-p", "8300", "-n", "8301", "-c", "--sqlurl", "sqlite://:memory:",
        ]);
        assert_eq!(args.port, 8300);
        assert_eq!(args.nat_port, Some(8301));
        assert!(args.no_censor);
        assert_eq!(args.sql_url, "sqlite://:memory:");
    }
}
