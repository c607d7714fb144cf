use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "sandpit")]
#[command(about = "Sandpit - workspace editing and sandboxed code execution server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Config file; defaults to config/sandpit.toml when present
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Compile and run a source file once
    Run {
        file: PathBuf,

        #[arg(short, long)]
        lang: String,

        /// File whose contents are fed to the program's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List supported languages and their toolchains
    Languages,

    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            workspace,
        } => {
            commands::serve::execute(config, host, port, workspace).await?;
        }
        Commands::Run {
            file,
            lang,
            stdin,
            timeout,
            config,
        } => {
            commands::run::execute(file, lang, stdin, timeout, config).await?;
        }
        Commands::Languages => {
            commands::languages::execute();
        }
        Commands::Version => {
            println!("sandpit {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
