use clap::Parser;
use cli_args::Args;
use color_eyre::eyre;
use is_terminal::IsTerminal;

mod cli_args;
mod interactive;
mod util;

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    interactive::chat(&args)
}
