use std::path::PathBuf;

use clap::{Parser, Subcommand};
use renderer::RenderDimensions;

#[derive(Parser, Debug)]
#[command(
    name = "vidtex",
    author,
    version,
    about = "Video texture renderer diagnostics",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect render configuration files.
    Config(ConfigCommand),
    /// Drive a player on the headless backend and print a JSON report.
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Parse and validate a configuration file.
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the effective configuration (defaults filled in) as TOML.
    Show {
        #[arg(long, value_name = "FILE", env = "VIDTEX_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Render configuration; built-in defaults when omitted.
    #[arg(long, value_name = "FILE", env = "VIDTEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Frames the simulated decoder produces before the first resize and after each one.
    #[arg(long, value_name = "COUNT", default_value_t = 3)]
    pub frames: u32,

    /// Decoder size change (e.g. `1920x1080`); repeat for a sequence.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub resize: Vec<RenderDimensions>,

    /// Share resources with a host context (offscreen pass only).
    #[arg(long)]
    pub shared: bool,

    /// Make buffer swaps fail once this many have succeeded.
    #[arg(long, value_name = "COUNT")]
    pub fail_after_swaps: Option<u64>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_dimensions(value: &str) -> Result<RenderDimensions, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid width".to_string())?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid height".to_string())?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok(RenderDimensions::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimensions() {
        assert_eq!(
            parse_dimensions("1920x1080").unwrap(),
            RenderDimensions::new(1920, 1080)
        );
        assert_eq!(parse_dimensions(" 64 X 32 ").unwrap(), RenderDimensions::new(64, 32));
        assert!(parse_dimensions("1920").is_err());
        assert!(parse_dimensions("0x10").is_err());
        assert!(parse_dimensions("wide x tall").is_err());
    }

    #[test]
    fn simulate_accepts_repeated_resizes() {
        let cli = Cli::try_parse_from([
            "vidtex", "simulate", "--frames", "5", "--resize", "320x240", "--resize", "1280x720",
            "--shared",
        ])
        .expect("parse");
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.frames, 5);
        assert_eq!(
            args.resize,
            vec![RenderDimensions::new(320, 240), RenderDimensions::new(1280, 720)]
        );
        assert!(args.shared);
        assert_eq!(args.fail_after_swaps, None);
    }

    #[test]
    fn config_check_requires_a_file() {
        assert!(Cli::try_parse_from(["vidtex", "config", "check"]).is_err());
    }
}
