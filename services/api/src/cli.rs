use crate::report::{run_position, run_status, PositionArgs, StatusArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use leaseboost_market::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "LeaseBoost Market",
    about = "Position a commercial rent against market comparables",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Compute the market position of a single property
    Position(PositionArgs),
    /// Load the comparables dataset and print cache freshness
    Status(StatusArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Position(args) => run_position(args).await,
        Command::Status(args) => run_status(args).await,
    }
}
