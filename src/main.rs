// Operator CLI for backend config secrets.
//
// Key material comes from FLOW_SECRETS_KEY / FLOW_SECRETS_NEXT_KEY (see
// `flow_config_vault::config`). Logs go to stderr and never include
// plaintext secrets or key bytes.

use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use flow_config_vault::{PostgresConfigRepository, PostgresStorage, Result, VaultConfig};

/// Encrypt, inspect and rotate backend config secrets.
#[derive(Parser, Debug)]
#[command(name = "flow-config-vault")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt plaintext read from stdin under the current key.
    Seal,

    /// Decrypt an envelope read from stdin (prints `{}` if it cannot be opened).
    Open,

    /// Show the epoch and fingerprint of each configured key.
    Keys,

    /// Create or upgrade the database schema.
    Migrate,

    /// Re-encrypt every stored config under the current key.
    Reseal,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flow_config_vault=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = VaultConfig::from_env()?;

    match command {
        Commands::Seal => {
            let plaintext = read_stdin().await?;
            let envelope = config.cipher().encrypt(&plaintext)?;
            write_stdout(&envelope).await
        }
        Commands::Open => {
            let envelope = read_stdin().await?;
            let plaintext = config.cipher().decrypt(&envelope);
            write_stdout(&plaintext).await
        }
        Commands::Keys => {
            let keys = config.key_ring.describe();
            if keys.is_empty() {
                println!("no keys configured");
            }
            for key in keys {
                println!("{}", key);
            }
            Ok(())
        }
        Commands::Migrate => {
            let storage = PostgresStorage::connect(config.require_database_url()?).await?;
            storage.migrate().await
        }
        Commands::Reseal => {
            let storage = PostgresStorage::connect(config.require_database_url()?).await?;
            let repo = PostgresConfigRepository::new(storage, config.cipher());
            let report = repo.reseal_all().await?;
            println!("{}", report);
            Ok(())
        }
    }
}

async fn read_stdin() -> Result<String> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(strip_line_terminator(&input).to_string())
}

/// Drop the single line terminator a shell pipe appends; anything before it
/// is part of the value.
fn strip_line_terminator(input: &str) -> &str {
    input
        .strip_suffix("\r\n")
        .or_else(|| input.strip_suffix('\n'))
        .unwrap_or(input)
}

async fn write_stdout(value: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}\n", value).as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_terminator_removes_only_one() {
        assert_eq!(strip_line_terminator("{}\n"), "{}");
        assert_eq!(strip_line_terminator("{}\r\n"), "{}");
        assert_eq!(strip_line_terminator("{}"), "{}");
        assert_eq!(strip_line_terminator("line\n\n"), "line\n");
        assert_eq!(strip_line_terminator("line\r\n\r\n"), "line\r\n");
        assert_eq!(strip_line_terminator(""), "");
    }
}
