//! CLI entry point for the stowage collection engine. Provides
//! clap-based command routing over `ServiceSurface`, exit code mapping
//! based on status, and JSON/table output.

mod output;

use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use stowage_core::clone_manager::CancelToken;
use stowage_core::config::CliOverrides;
use stowage_core::StowageConfig;
use stowage_service::dto::*;
use stowage_service::{status, streaming, ServiceSurface};

use status::Status;

/// Print a report as JSON (when `--json` is active) or via a terminal printer.
macro_rules! print_report {
    ($report:expr, $json:expr, $printer:path) => {
        if $json {
            println!(
                "{}",
                serde_json::to_string_pretty(&$report).expect("JSON serialization failed")
            );
        } else {
            $printer(&$report);
        }
    };
}

#[derive(Parser)]
#[command(name = "stowage", about = "Embedded multi-tenant collection engine", version)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Data directory (overrides config)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Backup directory (overrides config)
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<String>,

    /// Default server endpoint advertised by Route (overrides config)
    #[arg(long, value_name = "ENDPOINT")]
    default_server_endpoint: Option<String>,

    /// Default Search/List page size (overrides config)
    #[arg(long, value_name = "N")]
    default_search_limit: Option<u32>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a collection
    CreateCollection {
        namespace: String,
        name: String,
        message_type: String,
        #[arg(long, value_name = "FIELDS", value_delimiter = ',')]
        indexed_fields: Vec<String>,
        #[arg(long)]
        server_endpoint: Option<String>,
        #[arg(long)]
        disable_fts: bool,
        #[arg(long)]
        disable_json: bool,
    },

    /// List and filter known collections
    Discover {
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        message_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
        #[arg(long, default_value = "")]
        page_token: String,
    },

    /// Resolve the server endpoint for a collection
    Route { namespace: String, name: String },

    /// Insert a record
    Create {
        namespace: String,
        name: String,
        id: String,
        /// Raw payload bytes, read as UTF-8 text
        payload: String,
    },

    /// Fetch a record by id
    Get { namespace: String, name: String, id: String },

    /// Replace a record's payload/labels
    Update {
        namespace: String,
        name: String,
        id: String,
        /// Raw payload bytes, read as UTF-8 text
        payload: String,
    },

    /// Delete a record by id
    Delete { namespace: String, name: String, id: String },

    /// List records in a collection
    List {
        namespace: String,
        name: String,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
        #[arg(long, default_value = "")]
        page_token: String,
    },

    /// Full-text/structured search within a collection
    Search {
        namespace: String,
        name: String,
        /// Full-text query string
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Search across multiple collections in a namespace
    SearchAll {
        namespace: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Duplicate a collection within this process
    Clone {
        source_namespace: String,
        source_name: String,
        dest_namespace: String,
        dest_name: String,
        #[arg(long)]
        include_files: bool,
    },

    /// Simulate a push of one collection to another in-process
    Push {
        source_namespace: String,
        source_name: String,
        dest_namespace: String,
        dest_name: String,
        #[arg(long)]
        include_files: bool,
    },

    /// Simulate a pull of one collection into a new destination
    Pull {
        namespace: String,
        name: String,
        dest_namespace: String,
        dest_name: String,
        #[arg(long)]
        include_files: bool,
    },

    /// Take a backup of a collection
    Backup {
        namespace: String,
        name: String,
        #[arg(long)]
        include_files: bool,
        /// Where the snapshot artifact should land; defaults to the
        /// configured backup directory
        #[arg(long)]
        dest_path: Option<String>,
    },

    /// List backups
    ListBackups {
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Restore a backup into a (possibly new) collection
    Restore {
        backup_id: String,
        dest_namespace: String,
        dest_name: String,
        #[arg(long)]
        overwrite: bool,
    },

    /// Verify a backup's integrity without restoring it
    VerifyBackup { backup_id: String },

    /// Delete a backup artifact and its catalogue entry
    DeleteBackup { backup_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let json = cli.json;
    let quiet = cli.quiet;
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(message) => {
            if !json && !quiet {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32, String> {
    let overrides = CliOverrides {
        data_dir: cli.data_dir.clone().map(std::path::PathBuf::from),
        backup_dir: cli.backup_dir.clone().map(std::path::PathBuf::from),
        default_server_endpoint: cli.default_server_endpoint.clone(),
    };
    let mut config = StowageConfig::load(cli.config.as_deref(), &overrides).map_err(|e| e.to_string())?;
    if let Some(limit) = cli.default_search_limit {
        config.default_search_limit = limit;
    }
    let json = cli.json;

    let surface = Arc::new(ServiceSurface::new(config).map_err(|e| e.to_string())?);

    match cli.command {
        Commands::CreateCollection {
            namespace,
            name,
            message_type,
            indexed_fields,
            server_endpoint,
            disable_fts,
            disable_json,
        } => {
            let resp = surface
                .create_collection(CreateCollectionRequest {
                    namespace,
                    name,
                    message_type,
                    indexed_fields,
                    server_endpoint,
                    enable_fts: !disable_fts,
                    enable_json: !disable_json,
                })
                .await;
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Discover {
            namespace,
            message_type,
            page_size,
            page_token,
        } => {
            let resp = surface
                .discover(DiscoverRequestDto {
                    namespace,
                    message_type,
                    labels: BTreeMap::new(),
                    page_size,
                    page_token,
                })
                .await;
            if resp.status.is_ok() {
                print_report!(resp.collections, json, output::print_collections_table);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Route { namespace, name } => {
            let resp = surface.route(RouteRequest { namespace, name }).await;
            if resp.status.is_ok() {
                println!("{}", resp.endpoint);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Create {
            namespace,
            name,
            id,
            payload,
        } => {
            let resp = surface
                .create_record(CreateRequest {
                    namespace,
                    name,
                    id,
                    payload: payload.into_bytes(),
                    data_uri: None,
                    labels: BTreeMap::new(),
                })
                .await;
            if let Some(record) = resp.record.clone() {
                print_report!(record, json, output::print_record);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Get { namespace, name, id } => {
            let resp = surface.get_record(GetRequest { namespace, name, id }).await;
            if let Some(record) = resp.record.clone() {
                print_report!(record, json, output::print_record);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Update {
            namespace,
            name,
            id,
            payload,
        } => {
            let resp = surface
                .update_record(UpdateRequest {
                    namespace,
                    name,
                    id,
                    payload: payload.into_bytes(),
                    data_uri: None,
                    labels: BTreeMap::new(),
                })
                .await;
            if let Some(record) = resp.record.clone() {
                print_report!(record, json, output::print_record);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Delete { namespace, name, id } => {
            let resp = surface.delete_record(DeleteRequest { namespace, name, id }).await;
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::List {
            namespace,
            name,
            page_size,
            page_token,
        } => {
            let resp = surface
                .list_records(ListRequest {
                    namespace,
                    name,
                    page_size,
                    page_token,
                })
                .await;
            if resp.status.is_ok() {
                print_report!(resp.records, json, output::print_records_table);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Search {
            namespace,
            name,
            text,
            limit,
        } => {
            let resp = surface
                .search_records(SearchRequest {
                    namespace,
                    name,
                    query: SearchQueryDto {
                        full_text: text,
                        limit,
                        ..Default::default()
                    },
                })
                .await;
            if resp.status.is_ok() {
                print_report!(resp, json, output::print_search_results);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::SearchAll { namespace, text, limit } => {
            let resp = surface
                .search_collections(SearchCollectionsRequest {
                    selector: CollectionSelectorDto::Namespace(namespace),
                    query: SearchQueryDto {
                        full_text: text,
                        limit,
                        ..Default::default()
                    },
                })
                .await;
            if resp.status.is_ok() {
                print_report!(resp, json, output::print_cross_collection_hits);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Clone {
            source_namespace,
            source_name,
            dest_namespace,
            dest_name,
            include_files,
        } => {
            let resp = surface
                .clone_collection(CloneRequest {
                    source_namespace,
                    source_name,
                    dest_namespace,
                    dest_name,
                    include_files,
                })
                .await;
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Push {
            source_namespace,
            source_name,
            dest_namespace,
            dest_name,
            include_files,
        } => {
            let result = streaming::simulate_push(
                surface.clones_handle(),
                source_namespace,
                source_name,
                dest_namespace,
                dest_name,
                include_files,
                CancelToken::new(),
            )
            .await;
            report_transfer(result, json)
        }

        Commands::Pull {
            namespace,
            name,
            dest_namespace,
            dest_name,
            include_files,
        } => {
            let result = streaming::simulate_pull(
                surface.clones_handle(),
                surface.repo_handle(),
                namespace,
                name,
                dest_namespace,
                dest_name,
                include_files,
                CancelToken::new(),
            )
            .await;
            report_transfer(result, json)
        }

        Commands::Backup {
            namespace,
            name,
            include_files,
            dest_path,
        } => {
            let resp = surface
                .backup_collection(BackupCollectionRequest {
                    namespace,
                    name,
                    include_files,
                    metadata: BTreeMap::new(),
                    dest_path,
                })
                .await;
            if let Some(backup) = resp.backup.clone() {
                print_report!(vec![backup], json, output::print_backups_table);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::ListBackups {
            namespace,
            collection,
            limit,
        } => {
            let resp = surface
                .list_backups(ListBackupsRequestDto {
                    namespace,
                    collection_name: collection,
                    since_timestamp: None,
                    limit,
                })
                .await;
            if resp.status.is_ok() {
                print_report!(resp.backups, json, output::print_backups_table);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::Restore {
            backup_id,
            dest_namespace,
            dest_name,
            overwrite,
        } => {
            let resp = surface
                .restore_backup(RestoreBackupRequest {
                    backup_id,
                    dest_namespace,
                    dest_name,
                    overwrite,
                })
                .await;
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::VerifyBackup { backup_id } => {
            let resp = surface.verify_backup(VerifyBackupRequest { backup_id }).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp).expect("JSON serialization failed"));
            } else if resp.is_valid {
                println!("{}", "valid".green());
            } else {
                println!(
                    "{} {}",
                    "invalid:".red().bold(),
                    resp.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(status::exit_code(&resp.status.code))
        }

        Commands::DeleteBackup { backup_id } => {
            let resp = surface.delete_backup(DeleteBackupRequest { backup_id }).await;
            if resp.status.is_ok() && !json {
                println!("freed {} bytes", resp.bytes_freed);
            }
            print_report!(resp.status, json, output::print_status);
            Ok(status::exit_code(&resp.status.code))
        }
    }
}

fn report_transfer(
    result: Result<stowage_core::clone_manager::TransferSummary, Status>,
    json: bool,
) -> Result<i32, String> {
    match result {
        Ok(summary) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&summary_as_json(&summary)).unwrap());
            } else {
                println!(
                    "{} records, {} files, {} bytes, status {:?}",
                    summary.records_cloned, summary.files_cloned, summary.bytes_received, summary.status
                );
            }
            Ok(0)
        }
        Err(status) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status).unwrap());
            } else {
                output::print_status(&status);
            }
            Ok(status::exit_code(&status.code))
        }
    }
}

fn summary_as_json(summary: &stowage_core::clone_manager::TransferSummary) -> serde_json::Value {
    serde_json::json!({
        "records_cloned": summary.records_cloned,
        "files_cloned": summary.files_cloned,
        "bytes_received": summary.bytes_received,
        "status": format!("{:?}", summary.status),
    })
}
