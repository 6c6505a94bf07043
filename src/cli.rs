use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cavalcade", about = "Terminal spectrum visualizer driven by cava")]
pub struct Cli {
    /// Audio files to load into the player (MP3, FLAC, OGG, WAV, M4A)
    pub files: Vec<PathBuf>,

    /// Start audio playing on launch
    #[arg(short, long)]
    pub play: bool,

    /// Restore previous player session
    #[arg(short, long)]
    pub restore: bool,

    /// Log level filter (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(short = 'd', long)]
    pub log_level: Option<String>,

    /// Config file (default: <config dir>/cavalcade/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run the visualizer without the audio player
    #[arg(long)]
    pub no_player: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_files() {
        let cli = Cli::parse_from(["cavalcade", "-p", "-d", "debug", "a.mp3", "b.flac"]);
        assert!(cli.play);
        assert!(!cli.restore);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.files, vec![PathBuf::from("a.mp3"), PathBuf::from("b.flac")]);
    }

    #[test]
    fn defaults_are_empty() {
        let cli = Cli::parse_from(["cavalcade"]);
        assert!(cli.files.is_empty());
        assert!(cli.config.is_none());
        assert!(!cli.no_player);
    }
}
