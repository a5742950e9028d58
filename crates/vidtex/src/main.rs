mod cli;
mod options;
mod report;
mod run;

use std::path::Path;

use anyhow::Result;
use cli::{Command, ConfigAction};

fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Command::Config(config_cmd) => handle_config_command(config_cmd.action),
        Command::Simulate(args) => run::simulate(args),
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { file } => run_config_check(&file),
        ConfigAction::Show { config } => run_config_show(config.as_deref()),
    }
}

fn run_config_check(file: &Path) -> Result<()> {
    let config = run::load_config(Some(file))?;
    run::initialise_tracing(config.log_filter());

    let options = options::render_options(&config);
    println!("{} is valid", file.display());
    for line in options::describe(&options) {
        println!("  {line}");
    }
    Ok(())
}

fn run_config_show(path: Option<&Path>) -> Result<()> {
    let config = run::load_config(path)?;
    run::initialise_tracing(config.log_filter());
    print!("{}", config.to_toml_string()?);
    Ok(())
}
