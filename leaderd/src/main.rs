use clap::Parser;

use leaderd::{initialize_stdout_logging, App, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !cli.version() {
        initialize_stdout_logging();
    }
    let mut app = App::new(cli)?;
    app.run().await
}
