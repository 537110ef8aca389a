use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "open-live-cli",
    version,
    about = "Listen to a Bilibili Open Live room and print chat messages as JSON lines",
    long_about = None
)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "OPEN_LIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Room identity code (overrides the config file)
    #[arg(short = 'k', long, env = "OPEN_LIVE_ROOM_KEY")]
    pub room_key: Option<String>,

    /// Open Live application id
    #[arg(long, env = "OPEN_LIVE_APP_ID")]
    pub app_id: Option<i64>,

    /// Gateway API base, e.g. https://api1.blive.chat (discovered when unset)
    #[arg(long, env = "OPEN_LIVE_API_BASE")]
    pub api_base: Option<String>,

    /// Directory for daily-rotated log files
    #[arg(long, env = "OPEN_LIVE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Pretty-print each message instead of one JSON object per line
    #[arg(long)]
    pub pretty: bool,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "open-live-cli",
            "-k",
            "ABC123",
            "--app-id",
            "42",
            "--api-base",
            "https://gw.example",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.room_key.as_deref(), Some("ABC123"));
        assert_eq!(args.app_id, Some(42));
        assert_eq!(args.api_base.as_deref(), Some("https://gw.example"));
        assert!(args.verbose);
        assert!(!args.quiet);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["open-live-cli", "-v", "-q"]).is_err());
    }
}
