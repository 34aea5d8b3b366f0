use clap::{Args as ClapArgs, Parser, Subcommand};
use flatfile_bridge::runner::{
    Bridge, DiscoverRequest, FileParams, IngestRequest, ProbeRequest, Response, StoreParams,
};

#[derive(Parser, Clone)]
#[command(about = "Move tabular data between a ClickHouse table and a delimited file")]
struct Args {
    /// Quiet mode - only warnings and the JSON response
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Store connection flags
#[derive(ClapArgs, Clone, Debug)]
struct StoreArgs {
    /// Store host
    #[arg(long)]
    host: Option<String>,

    /// Store port (PostgreSQL wire protocol)
    #[arg(long, default_value = "9005")]
    port: u16,

    /// Database name
    #[arg(short, long)]
    database: Option<String>,

    /// Database user
    #[arg(short, long)]
    user: Option<String>,

    /// Bearer token, sent as the connection password
    #[arg(long)]
    token: Option<String>,
}

impl StoreArgs {
    fn into_params(self) -> StoreParams {
        StoreParams {
            host: self.host,
            port: Some(self.port),
            database: self.database,
            user: self.user,
            jwt_token: self.token,
        }
    }
}

/// Flat file flags
#[derive(ClapArgs, Clone, Debug)]
struct FileArgs {
    /// Path to the delimited file
    #[arg(short, long)]
    file: Option<String>,

    /// Field delimiter, a single character or \t
    #[arg(long, default_value = ",")]
    delimiter: String,
}

impl FileArgs {
    fn into_params(self) -> FileParams {
        FileParams {
            file_path: self.file,
            delimiter: Some(self.delimiter),
        }
    }
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Check that a store connection or a file can be opened
    Probe {
        /// Endpoint type (ClickHouse, FlatFile)
        #[arg(short, long)]
        source_type: String,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        file: FileArgs,
    },
    /// List the columns of a store table or a file header
    Columns {
        /// Endpoint type (ClickHouse, FlatFile)
        #[arg(short, long)]
        source_type: String,

        /// Table name (ClickHouse only)
        #[arg(short, long)]
        table: Option<String>,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        file: FileArgs,
    },
    /// List the tables of the store database
    Tables {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Transfer the selected columns between store and file
    Ingest {
        /// Source type (ClickHouse, FlatFile)
        #[arg(short, long)]
        source_type: String,

        /// Target type (ClickHouse, FlatFile)
        #[arg(long)]
        target_type: String,

        /// Store table to read from or write to
        #[arg(short, long)]
        table: String,

        /// Columns to transfer (format: col1,col2)
        #[arg(short, long)]
        columns: String,

        /// Rows per INSERT when loading into the store
        #[arg(short, long)]
        batch_size: Option<usize>,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        file: FileArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);

    let bridge = Bridge::default();
    let response = match args.command {
        Command::Probe {
            source_type,
            store,
            file,
        } => {
            let request = ProbeRequest {
                source_type,
                store: store.into_params(),
                file: file.into_params(),
            };
            bridge.probe_connection(&request).await
        }
        Command::Columns {
            source_type,
            table,
            store,
            file,
        } => {
            let request = DiscoverRequest {
                source_type,
                store: store.into_params(),
                file: file.into_params(),
                table_name: table,
            };
            bridge.discover_columns(&request).await
        }
        Command::Tables { store } => {
            let request = DiscoverRequest {
                source_type: "ClickHouse".to_string(),
                store: store.into_params(),
                ..Default::default()
            };
            bridge.discover_tables(&request).await
        }
        Command::Ingest {
            source_type,
            target_type,
            table,
            columns,
            batch_size,
            store,
            file,
        } => {
            let request = IngestRequest {
                source_type,
                target_type,
                store: store.into_params(),
                file: file.into_params(),
                table_name: Some(table.clone()),
                target_table: Some(table),
                selected_columns: columns,
                batch_size,
            };
            bridge.run_ingestion(&request).await
        }
    };

    print_response(&response)?;
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if quiet {
        EnvFilter::new("flatfile_bridge=warn,sqlx=off")
    } else {
        EnvFilter::new("flatfile_bridge=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_response(response: &Response) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(response)
        .map_err(|e| anyhow::anyhow!("Failed to serialize response: {}", e))?;
    println!("{}", body);
    Ok(())
}
