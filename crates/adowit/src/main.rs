//! adowit: MCP server for Azure DevOps work tracking.
//!
//! Reads framed JSON-RPC from stdin, writes responses to stdout, and logs
//! to a rolling file (stdout belongs to the protocol). Configuration errors
//! exit non-zero before the transport starts; runtime errors surface
//! through tool result envelopes instead.

use adowit_auth::{AzureCliSource, TokenProvider};
use adowit_client::{AdoClient, RestAdoClient};
use adowit_logging::{init_logging, LogConfig};
use adowit_mcp::bulk::BulkEngine;
use adowit_mcp::handles::QueryHandleStore;
use adowit_mcp::metrics::MetricsRegistry;
use adowit_mcp::openapi;
use adowit_mcp::tools::{ToolContext, ToolRegistry};
use adowit_mcp::transport::Transport;
use adowit_mcp::{McpServer, ServerConfig};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "adowit",
    about = "MCP server connecting AI agents to Azure DevOps work tracking",
    version
)]
struct Cli {
    /// Azure DevOps organization name
    organization: String,

    /// Project name (required unless --area-path provides one)
    #[arg(long)]
    project: Option<String>,

    /// Area path; its first backslash-separated segment doubles as the
    /// project when --project is absent
    #[arg(long = "area-path")]
    area_path: Option<String>,

    /// Additional area paths to scope queries to
    #[arg(long = "area-paths", value_delimiter = ',')]
    area_paths: Vec<String>,

    /// GUID of the Copilot service account
    #[arg(long = "copilot-guid")]
    copilot_guid: Option<String>,

    /// Verbose logging (also MCP_DEBUG=1)
    #[arg(short, long)]
    verbose: bool,

    /// Allow the credential source to open a browser when logged out
    #[arg(long = "auto-launch-browser")]
    auto_launch_browser: bool,

    /// Print the generated OpenAPI document and exit
    #[arg(long = "emit-openapi")]
    emit_openapi: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose || std::env::var("MCP_DEBUG").map(|v| v == "1").unwrap_or(false);

    let config = match ServerConfig::resolve(
        cli.organization,
        cli.project,
        cli.area_path,
        cli.area_paths,
        cli.copilot_guid,
        verbose,
        cli.auto_launch_browser,
    ) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("adowit: configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    if cli.emit_openapi {
        let registry = ToolRegistry::new();
        let document =
            openapi::build_document(&registry, &config.server_name, &config.server_version);
        match serde_json::to_string_pretty(&document) {
            Ok(text) => {
                println!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(err) => {
                eprintln!("adowit: could not render OpenAPI document: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(err) = init_logging(LogConfig {
        app_name: "adowit",
        verbose,
    }) {
        eprintln!("adowit: logging setup failed: {err}");
        return ExitCode::from(2);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("adowit: runtime setup failed: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Server error: {err:#}");
            eprintln!("adowit: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    // Non-interactive unless browser launch was requested explicitly.
    let credential = AzureCliSource::new(!config.auto_launch_browser);
    let tokens = Arc::new(TokenProvider::new(Arc::new(credential)));
    let client: Arc<dyn AdoClient> = Arc::new(RestAdoClient::new(
        &config.organization,
        &config.project,
        Arc::clone(&tokens),
    ));
    let store = Arc::new(QueryHandleStore::with_default_ttl(config.default_handle_ttl));
    let metrics = Arc::new(MetricsRegistry::new());
    let engine = Arc::new(BulkEngine::new(
        Arc::clone(&client),
        Arc::clone(&store),
        Arc::clone(&metrics),
    ));

    let ctx = ToolContext {
        config: config.clone(),
        store,
        client,
        tokens,
        engine,
        metrics,
        // Host-side sampling is wired in by embedders; the stdio binary
        // serves deterministic "sampling unavailable" envelopes.
        sampling: None,
    };

    let server = McpServer::new(config, Transport::stdio(), ToolRegistry::new(), ctx);
    server.run().await
}
