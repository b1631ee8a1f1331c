use anyhow::Result as AnyResult;
use clap::{Parser, Subcommand, ValueEnum};

use duct::{cmd, Expression};

#[derive(Debug, Subcommand)]
pub enum Subcommands {
    /// Runs unit and doc tests on the host.
    Test,

    /// Checks the driver for errors on a bare-metal target.
    Check {
        /// Which logging backend to enable.
        logging: Option<Logging>,
    },

    /// Builds the documentation.
    Doc {
        /// Whether to open the documentation in a browser.
        #[clap(long)]
        open: bool,
    },

    /// Runs extra checks (rustfmt, clippy) with every logging backend.
    ExtraCheck,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Logging {
    #[default]
    None,
    Log,
    Defmt,
}

impl Logging {
    const ALL: [Logging; 3] = [Logging::None, Logging::Log, Logging::Defmt];

    fn feature(&self) -> Option<&str> {
        match self {
            Logging::None => None,
            Logging::Log => Some("--features=log"),
            Logging::Defmt => Some("--features=defmt"),
        }
    }
}

#[derive(Debug, Parser)]
#[clap(about, version, propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub subcommand: Subcommands,
}

const EMBEDDED_TARGET: &str = "--target=thumbv7em-none-eabihf";

fn cargo(args: &[&str]) -> Expression {
    println!("🛠️  Running command: cargo {}", args.join(" "));

    cmd("cargo", args)
}

fn with_logging<'a>(mut args: Vec<&'a str>, logging: &'a Logging) -> Vec<&'a str> {
    args.extend(logging.feature());
    args
}

fn checks(logging: Logging) -> AnyResult<()> {
    let args = with_logging(vec!["check", "-p", "ds2438", EMBEDDED_TARGET], &logging);
    cargo(&args).run()?;

    Ok(())
}

fn docs(open: bool) -> AnyResult<()> {
    let mut args = vec!["doc", "-p", "ds2438", "--no-deps"];

    if open {
        args.push("--open");
    }

    cargo(&args).run()?;

    Ok(())
}

fn extra_checks() -> AnyResult<()> {
    cargo(&["fmt", "--check"]).run()?;

    for logging in Logging::ALL {
        let args = with_logging(
            vec!["clippy", "-p", "ds2438", EMBEDDED_TARGET, "--", "-D", "warnings"],
            &logging,
        );
        cargo(&args).run()?;
    }

    Ok(())
}

fn test() -> AnyResult<()> {
    cargo(&["test", "-p", "ds2438"]).run()?;
    cargo(&["test", "-p", "ds2438", "--features=log"]).run()?;

    Ok(())
}

fn main() -> AnyResult<()> {
    let cli = Cli::parse();

    match cli.subcommand {
        Subcommands::Test => test(),
        Subcommands::Check { logging } => checks(logging.unwrap_or_default()),
        Subcommands::Doc { open } => docs(open),
        Subcommands::ExtraCheck => extra_checks(),
    }
}
