//! Command-line surface (spec §6).

use std::path::PathBuf;

use clap::Parser;

/// Multi-worker async HTTP gateway front-end.
#[derive(Debug, Parser)]
#[command(name = "pubseqd", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub config: PathBuf,

    /// Path to write the process pid to.
    #[arg(long = "pidfile", value_name = "PATH")]
    pub pidfile: Option<PathBuf>,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(long = "nodaemon", default_value_t = false)]
    pub nodaemon: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_config_flag() {
        let cli = Cli::parse_from(["pubseqd", "--config", "/etc/pubseqd.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/pubseqd.toml"));
        assert!(!cli.nodaemon);
    }

    #[test]
    fn parses_nodaemon_and_pidfile() {
        let cli = Cli::parse_from([
            "pubseqd",
            "--config",
            "cfg.toml",
            "--nodaemon",
            "--pidfile",
            "/run/pubseqd.pid",
        ]);
        assert!(cli.nodaemon);
        assert_eq!(cli.pidfile, Some(PathBuf::from("/run/pubseqd.pid")));
    }
}
