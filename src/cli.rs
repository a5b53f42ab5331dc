use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stemgroove", about = "Rhythmic performance analysis of separated drum stems")]
pub struct Cli {
    /// Drum stem as LABEL=PATH (e.g. kick=stems/kick.wav). Repeatable.
    #[arg(long = "stem", value_name = "LABEL=PATH", value_parser = parse_stem)]
    pub stems: Vec<(String, PathBuf)>,

    /// Bass track to measure the kit against
    #[arg(long)]
    pub bass: Option<PathBuf>,

    /// Tempo in BPM. Estimated from the stems when omitted.
    #[arg(long)]
    pub tempo: Option<f64>,

    /// Musical key (e.g. "C", "F#m"). Estimated when omitted.
    #[arg(long)]
    pub key: Option<String>,

    /// Style label carried into the report
    #[arg(long)]
    pub style: Option<String>,

    /// Report file (JSON). Printed to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (default: stemgroove.toml or ~/.config/stemgroove/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Abandon a stem whose decode takes longer than this many seconds
    #[arg(long)]
    pub decode_timeout: Option<f64>,

    /// Single-line JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}

fn parse_stem(s: &str) -> Result<(String, PathBuf), String> {
    let (label, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LABEL=PATH, got '{}'", s))?;
    let label = label.trim();
    if label.is_empty() || path.is_empty() {
        return Err(format!("expected LABEL=PATH, got '{}'", s));
    }
    Ok((label.to_string(), PathBuf::from(path)))
}
