use clap::Parser;

/// Local sync engine for the lumosnap photographer client.
#[derive(Debug, Parser)]
#[command(name = "lumosnap-sync", version)]
struct Cli {
    /// Start without showing a window (equivalent on all platforms).
    #[arg(long)]
    hidden: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = lumosnap_sync::run(cli.hidden) {
        tracing::error!(?err, "lumosnap-sync crashed");
        std::process::exit(1);
    }
}
