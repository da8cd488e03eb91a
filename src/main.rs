//! kgrepo CLI: operator access to the repository layer.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use oxigraph::io::RdfFormat;

use kg_repo::auth::Authority;
use kg_repo::config::StorageConfig;
use kg_repo::context::{RepositoryKind, RequestContext, TenantScope};
use kg_repo::ops::RepositoryOperations;

/// Size of the chunks a file is streamed to the importer in.
const IMPORT_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "kgrepo", version, about = "Multi-tenant RDF repository access")]
struct Cli {
    /// Storage configuration (TOML). Without one, every repository is in memory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository kind: entities, transactions, schema or application.
    #[arg(long, global = true, default_value = "entities")]
    kind: RepositoryKind,

    /// Tenant scope. Defaults to the scope of the system principal.
    #[arg(long, global = true)]
    scope: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a SELECT or ASK query, print the rows as JSON.
    Query {
        /// SPARQL query text.
        sparql: String,
    },

    /// Evaluate a CONSTRUCT or DESCRIBE query, print N-Triples.
    Construct {
        /// SPARQL query text.
        sparql: String,
    },

    /// Import an RDF file into the repository.
    Import {
        /// Path to the RDF document.
        #[arg(long)]
        file: PathBuf,

        /// Media type of the document. Guessed from the extension if omitted.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Remove every statement of the repository.
    Reset,

    /// Show statement counts for every repository kind, as JSON.
    Stats,

    /// Validate a configuration and print it back in canonical form.
    ConfigCheck,
}

fn guess_media_type(file: &Path) -> Option<&'static str> {
    let ext = file.extension()?.to_str()?;
    RdfFormat::from_extension(ext).map(|f| f.media_type())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    config.validate()?;

    let mut ctx = RequestContext::system();
    if let Some(scope) = &cli.scope {
        ctx = ctx.with_scope(TenantScope::new(scope.as_str())?);
    }

    match cli.command {
        Commands::ConfigCheck => {
            print!("{}", config.to_toml_string()?);
        }

        Commands::Query { sparql } => {
            let ops = RepositoryOperations::from_config(config);
            let rows = ops.query(&sparql, cli.kind, &ctx, Authority::Reader).await?;
            let json: Vec<_> = rows.iter().map(|r| r.to_json()).collect();
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }

        Commands::Construct { sparql } => {
            let ops = RepositoryOperations::from_config(config);
            let statements = ops.construct(&sparql, cli.kind, &ctx, Authority::Reader).await?;
            if let Some(first) = statements.first() {
                for ns in first.namespaces.iter() {
                    println!("# @prefix {}: <{}>", ns.prefix, ns.iri);
                }
            }
            for statement in &statements {
                println!("{} .", statement.triple);
            }
        }

        Commands::Import { file, mime } => {
            let mime = match mime {
                Some(m) => m,
                None => match guess_media_type(&file) {
                    Some(m) => m.to_string(),
                    None => miette::bail!("cannot guess the media type of {}, pass --mime", file.display()),
                },
            };
            let bytes = std::fs::read(&file).into_diagnostic()?;
            let chunks: Vec<std::io::Result<Vec<u8>>> =
                bytes.chunks(IMPORT_CHUNK).map(|c| Ok(c.to_vec())).collect();

            let ops = RepositoryOperations::from_config(config);
            let count = ops
                .import_statements(
                    futures_util::stream::iter(chunks),
                    &mime,
                    cli.kind,
                    &ctx,
                    Authority::Contributor,
                )
                .await?;
            println!("Imported {count} statements from {}", file.display());
        }

        Commands::Reset => {
            let ops = RepositoryOperations::from_config(config);
            ops.reset(cli.kind, &ctx, Authority::Contributor).await?;
            println!("Reset {} repository", cli.kind);
        }

        Commands::Stats => {
            let ops = RepositoryOperations::from_config(config);
            let mut stats = serde_json::Map::new();
            for kind in RepositoryKind::ALL {
                let size = ops.size(kind, &ctx, Authority::Reader).await?;
                stats.insert(kind.to_string(), serde_json::json!(size));
            }
            stats.insert(
                "repositories".into(),
                serde_json::json!(ops.builder().cached_labels()),
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::Value::Object(stats)).into_diagnostic()?
            );
        }
    }

    Ok(())
}
