use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Logs go to stderr so streamed answers stay clean on stdout.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = parley_cli::Cli::parse();
    let streaming = matches!(&cli.command, parley_cli::Commands::Complete(args) if args.stream);

    match parley_cli::run(cli).await {
        Ok(output) => {
            if streaming {
                println!();
            }
            if !output.text.is_empty() {
                println!("{}", output.text);
            }
            if let Some(total) = output.total_tokens {
                eprintln!("{} {total}", "tokens:".dimmed());
            }
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red());
            std::process::exit(1);
        }
    }
}
