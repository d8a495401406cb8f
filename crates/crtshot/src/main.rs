mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::{Command, DefaultsAction};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Capture(args) => run::capture(args),
        Command::Render(args) => run::render(args),
        Command::Defaults(defaults) => match defaults.action {
            DefaultsAction::Where => run::defaults_where(),
            DefaultsAction::Dump => run::defaults_dump(),
        },
    }
}
