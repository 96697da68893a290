//! rudb CLI - run cardinality-checked queries against PostgreSQL
//!
//! - `uri`: print the (redacted) connection URI
//! - `ping`: connect and run the liveness probe
//! - `query`: run one statement with a declared row expectation
//! - `tx`: run several statements in one transaction

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rudb_core::{Cardinality, DatabaseConfig, DbError, JsonRow, Param, PgClient};
use tracing::{debug, info};

mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "rudb",
    author,
    version,
    about = "Run cardinality-checked PostgreSQL queries",
    long_about = "Connect with DATABASE_* variables (or a TOML file with a [database] table), \
                  run parameterized SQL, and fail when the row count breaks the declared expectation."
)]
struct Cli {
    /// Debug logging; also logs every statement the client sends
    #[arg(long, global = true)]
    debug: bool,

    /// TOML file with a [database] table (defaults to DATABASE_* variables)
    #[arg(long, global = true, env = "RUDB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the connection URI with the password masked
    Uri,
    /// Connect, run the liveness probe and disconnect
    Ping,
    /// Run one statement and print its rows as JSON
    Query(QueryArgs),
    /// Run statements in a single transaction (rolled back if any fails)
    Tx(TxArgs),
}

#[derive(Parser, Debug)]
struct QueryArgs {
    /// Expected row count: none, one, one-or-none, one-or-many or any
    #[arg(long, short = 'e', default_value = "any")]
    expect: Cardinality,

    /// Positional parameter ($1, $2, ...); quote with '' to force text
    #[arg(long = "param", short = 'p', value_name = "VALUE")]
    params: Vec<String>,

    /// SQL statement
    sql: String,
}

#[derive(Parser, Debug)]
struct TxArgs {
    /// Parameter bound to every statement, in order
    #[arg(long = "param", short = 'p', value_name = "VALUE")]
    params: Vec<String>,

    /// SQL statements, executed in order
    #[arg(required = true)]
    statements: Vec<String>,
}

fn load_config(cli: &Cli) -> Result<DatabaseConfig> {
    let config = match &cli.config {
        Some(path) => DatabaseConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DatabaseConfig::from_env().context("Failed to read DATABASE_* variables")?,
    };
    let debug = cli.debug || config.debug;
    Ok(config.with_debug(debug))
}

fn parse_params(raw: &[String]) -> Vec<Param> {
    raw.iter().map(|value| Param::parse_literal(value)).collect()
}

fn render_rows(rows: &[JsonRow]) -> Result<String> {
    serde_json::to_string_pretty(rows).context("Failed to serialize rows")
}

async fn connect(config: DatabaseConfig) -> Result<PgClient> {
    let client = PgClient::postgres(config);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", client.config().redacted_uri()))?;
    Ok(client)
}

async fn run_ping(config: DatabaseConfig) -> Result<()> {
    let uri = config.redacted_uri();
    let client = connect(config).await?;
    client.release().await;
    println!("ok {uri}");
    Ok(())
}

async fn run_query(config: DatabaseConfig, args: QueryArgs) -> Result<()> {
    let client = connect(config).await?;
    let params = parse_params(&args.params);

    let result = client
        .query::<JsonRow>(&args.sql, &params, args.expect)
        .await;
    let affected = client.affected_rows();
    client.release().await;

    let rows = result.with_context(|| format!("Query failed (expected {})", args.expect))?;
    println!("{}", render_rows(&rows)?);
    eprintln!("{affected} row(s)");
    Ok(())
}

async fn run_tx(config: DatabaseConfig, args: TxArgs) -> Result<()> {
    let client = connect(config).await?;
    let params = parse_params(&args.params);
    let statements = args.statements;

    let result = client
        .transaction(move |tx| {
            Box::pin(async move {
                let mut total = 0;
                for sql in &statements {
                    tx.query_any::<JsonRow>(sql, &params).await?;
                    debug!(rows = tx.affected_rows(), "{}", sql);
                    total += tx.affected_rows();
                }
                Ok::<_, DbError>((statements.len(), total))
            })
        })
        .await;
    client.release().await;

    let (count, total) = result.context("Transaction rolled back")?;
    info!(statements = count, "committed");
    println!("committed {count} statement(s), {total} row(s) returned");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_setup::init(&tracing_setup::TracingConfig { debug: cli.debug }).ok();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Uri => println!("{}", config.redacted_uri()),
        Commands::Ping => run_ping(config).await?,
        Commands::Query(args) => run_query(config, args).await?,
        Commands::Tx(args) => run_tx(config, args).await?,
    }

    Ok(())
}
