use std::sync::Arc;

use chaindb::{
    Bootstrap,
    Connection,
    EmbeddedService,
    Error,
    HttpService,
    QueryEngine,
    RecordStore,
    Result,
    SearchService,
    StorageRoot,
    cli::{Cli, Command, EngineKind, ServeArgs},
    search,
    web::{self, AppState},
};
use clap::Parser;
use reqwest::Url;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CHAINDB_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    // Validate serve inputs before blocking on the search service.
    let serve = match &cli.command {
        Command::Serve(args) => Some(prepare_serve(args)?),
        _ => None,
    };

    let service = open_service(&cli)?;
    let connection = Arc::new(Connection::new(cli.index.clone()));
    Bootstrap::new(service)
        .with_policy(cli.retry_policy())
        .run(&connection)
        .await?;

    match cli.command {
        Command::Serve(args) => {
            if let Some((storage, site_root)) = serve {
                cmd_serve(connection, storage, site_root, &args).await?;
            }
        }
        Command::Tag(args) => {
            let info = RecordStore::new(connection)
                .upsert(&args.name, &args.tags)
                .await?;
            println!("{info}");
        }
        Command::Untag(args) => {
            let info = RecordStore::new(connection).remove(&args.name).await?;
            println!("{info}");
        }
        Command::Search(args) => {
            let page = QueryEngine::new(connection)
                .search_page(&args.query)
                .await?;
            if args.json {
                search::format_json(&page, &args.query)?;
            } else {
                search::format_human(&page);
            }
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_service(cli: &Cli) -> Result<Arc<dyn SearchService>> {
    match cli.engine {
        EngineKind::Http => {
            let url = cli.search_url.as_deref().ok_or_else(|| {
                Error::Config(
                    "a search service URL is required (-e or CHAINDB_SEARCH_URL)"
                        .into(),
                )
            })?;
            Ok(Arc::new(HttpService::parse(url)?))
        }
        EngineKind::Embedded => Ok(Arc::new(EmbeddedService::open_in_data_dir(
            cli.data_dir.as_deref(),
        )?)),
    }
}

fn prepare_serve(args: &ServeArgs) -> Result<(StorageRoot, String)> {
    let storage = StorageRoot::open(&args.store_dir)?;
    let site_root = match args.site_root.as_deref() {
        None | Some("") => {
            tracing::warn!(
                port = args.port,
                "site root not set, defaulting to localhost:{}",
                args.port
            );
            format!("localhost:{}", args.port)
        }
        Some(root) => {
            validate_site_root(root)?;
            root.to_string()
        }
    };
    Ok((storage, site_root))
}

/// Accept a bare host (`example.net`, `10.0.0.1:80`) or a full URL.
fn validate_site_root(root: &str) -> Result<()> {
    let candidate = if root.contains("://") {
        root.to_string()
    } else {
        format!("http://{root}")
    };
    match Url::parse(&candidate) {
        Ok(url) if url.host().is_some() => Ok(()),
        _ => Err(Error::Config(format!(
            "the site root must be a valid host or URL: {root}"
        ))),
    }
}

async fn cmd_serve(
    connection: Arc<Connection>,
    storage: StorageRoot,
    site_root: String,
    args: &ServeArgs,
) -> Result<()> {
    tracing::info!(store = %storage.path().display(), "serving files");
    let state = AppState::new(
        QueryEngine::new(connection),
        storage,
        &args.site_path,
        site_root,
    )?;
    web::serve(Arc::new(state), args.port).await
}
