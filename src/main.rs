//! sokman - Systematic literature mapping manager
//!
//! Searches DBLP, snowballs references and citations through Semantic
//! Scholar, and keeps the classification of every publication in SQLite.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! sokman search "crypto api misuse"
//! sokman snowball
//! sokman citations --min-citations 2 > citations.dot
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! sokman serve --port 8000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sokman::choices::{DblpChoices, SemanticScholarChoices};
use sokman::commands::{self, import::RecordSource};
use sokman::config::Config;
use sokman::db::{Database, PublicationFilter};
use sokman::dblp::{DblpClient, MAX_HITS};
use sokman::dump::DumpReader;
use sokman::models::{parse_review_status, parse_yes_no, StageFilter};
use sokman::prompt::StdinPrompter;
use sokman::semanticscholar::SemanticScholarClient;
use sokman::{graph, interchange, server};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Systematic literature mapping manager
#[derive(Parser)]
#[command(name = "sokman")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (default: ./sokman.toml, then ~/.config/sokman/sokman.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search DBLP and import selected results
    Search {
        /// Search term
        term: String,

        /// Results per request (1 - 1000)
        #[arg(long, default_value_t = MAX_HITS)]
        limit: usize,

        /// Fetch every page of results
        #[arg(long)]
        all: bool,

        /// Forget previously rejected results
        #[arg(long)]
        reset_choices: bool,
    },

    /// Import DBLP records by cite key
    Import {
        /// Cite keys, e.g. DBLP:conf/ccs/EgeleBFK13
        #[arg(required = true)]
        keys: Vec<String>,

        /// Fetch records from the DBLP API instead of the local dump
        #[arg(long)]
        use_api: bool,

        /// Attach the DBLP source with this search term
        #[arg(long)]
        search_term: Option<String>,
    },

    /// Follow references and citations of relevant publications
    Snowball {
        /// Forget previously ignored papers
        #[arg(long)]
        reset_choices: bool,

        /// Skip references (backward snowballing)
        #[arg(long)]
        no_references: bool,

        /// Skip citations (forward snowballing)
        #[arg(long)]
        no_citations: bool,
    },

    /// Fill in missing references, DOIs and Semantic Scholar IDs
    Repair {
        /// Skip checks against the local DBLP dump
        #[arg(long)]
        skip_dump: bool,

        /// Skip Semantic Scholar lookups
        #[arg(long)]
        skip_semanticscholar: bool,
    },

    /// Print the citation graph in DOT format
    Citations {
        /// Only publications cited at least this often
        #[arg(long, default_value_t = 0)]
        min_citations: i64,

        /// Use publication ids instead of cite keys as node names
        #[arg(long)]
        pk: bool,
    },

    /// Print the tag implication graph in DOT format
    Tagdag {
        /// Name of the root tag
        #[arg(long, default_value = "CAPI Misuse")]
        root: String,
    },

    /// Print a LaTeX \cite{} for publication ids
    Cite {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Print the BibTeX entry for a DBLP key
    Bibtex {
        key: String,
    },

    /// Merge tag RHS into tag LHS
    Mergetags {
        lhs: String,
        rhs: String,
    },

    /// Count search results and relevant publications per search term
    Stats,

    /// List publications
    List {
        /// excluded, primary, secondary, tertiary or - (none)
        #[arg(long)]
        stage: Option<StageFilter>,

        /// yes or no
        #[arg(long, value_parser = parse_yes_no)]
        relevant: Option<bool>,

        /// Only classified publications
        #[arg(long, conflicts_with = "unclassified")]
        classified: bool,

        /// Only publications not yet classified
        #[arg(long)]
        unclassified: bool,

        /// yes, no or unknown
        #[arg(long)]
        peer_reviewed: Option<String>,

        /// yes or no
        #[arg(long, value_parser = parse_yes_no)]
        variant: Option<bool>,

        /// Substring of cite key, title or DOI
        #[arg(short, long)]
        query: Option<String>,

        /// Write CSV instead of a table
        #[arg(long)]
        csv: bool,
    },

    /// Create, imply, assign and list tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Exclude publications by a criterion
    Exclude {
        criterion: String,

        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Dump the database as JSON
    Dumpdata {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a JSON dump into an empty database
    Loaddata {
        file: PathBuf,
    },

    /// Start the HTTP admin API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum TagAction {
    /// Create a tag (or update its criteria)
    Create {
        name: String,

        /// Classification criteria
        #[arg(long)]
        criteria: Option<String>,
    },

    /// Record that TAG implies IMPLIED
    Imply {
        tag: String,
        implied: String,
    },

    /// Tag publications by id
    Assign {
        tag: String,

        #[arg(required = true)]
        ids: Vec<i64>,

        #[arg(long)]
        comment: Option<String>,
    },

    /// List tags with publication counts
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let db = Database::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let mut out = std::io::stdout();

    match cli.command {
        Commands::Search { term, limit, all, reset_choices } => {
            let dblp = DblpClient::new()?;
            let ss = SemanticScholarClient::new(config.semantic_scholar_api_key.clone())?;
            let mut choices = DblpChoices::open(config.dblp_choices_path(), reset_choices)?;
            let options = commands::search::SearchOptions { term, limit, all };
            commands::search::run(
                &db,
                &dblp,
                &ss,
                &mut StdinPrompter,
                &mut choices,
                &mut out,
                &options,
            )
            .await
            .context("Search failed")?;
        }

        Commands::Import { keys, use_api, search_term } => {
            let dblp;
            let dump;
            let source = if use_api {
                dblp = DblpClient::new()?;
                RecordSource::Api(&dblp)
            } else {
                dump = DumpReader::new(&config.dump_path);
                RecordSource::Dump(&dump)
            };
            let publications =
                commands::import::run(&db, source, &keys, search_term.as_deref(), &mut out)
                    .await
                    .context("Import failed")?;
            info!(publications = publications.len(), "Import finished");
        }

        Commands::Snowball { reset_choices, no_references, no_citations } => {
            let ss = SemanticScholarClient::new(config.semantic_scholar_api_key.clone())?;
            let mut choices =
                SemanticScholarChoices::open(config.semanticscholar_choices_path(), reset_choices)?;
            let options = commands::snowball::SnowballOptions {
                references: !no_references,
                citations: !no_citations,
                throttle: config.throttle(),
            };
            let report = commands::snowball::run(
                &db,
                &ss,
                &mut StdinPrompter,
                &mut choices,
                &mut out,
                &options,
            )
            .await
            .context("Snowballing failed")?;
            info!(
                publications = report.publications,
                linked = report.linked,
                imported = report.imported.len(),
                ignored = report.ignored,
                "Snowballing finished"
            );
        }

        Commands::Repair { skip_dump, skip_semanticscholar } => {
            let dump = DumpReader::new(&config.dump_path);
            let ss = SemanticScholarClient::new(config.semantic_scholar_api_key.clone())?;
            let options = commands::repair::RepairOptions {
                skip_dump,
                skip_semanticscholar,
                throttle: config.throttle(),
            };
            let report = commands::repair::run(&db, &dump, &ss, &mut out, &options)
                .await
                .context("Repair failed")?;
            info!(
                references = report.references_added,
                missing_from_dump = report.missing_from_dump.len(),
                dois = report.dois_added,
                paper_ids = report.paper_ids_added,
                "Repair finished"
            );
        }

        Commands::Citations { min_citations, pk } => {
            graph::citation_graph(&db, min_citations, pk, &mut out)?;
        }

        Commands::Tagdag { root } => {
            let root = db
                .tag_by_name(&root)?
                .with_context(|| format!("No tag named '{root}'"))?;
            graph::tag_dag(&db, &root, &mut out)?;
        }

        Commands::Cite { ids } => {
            write!(out, "{}", commands::cite::cite(&db, &ids)?)?;
        }

        Commands::Bibtex { key } => {
            let dblp = DblpClient::new()?;
            let bibtex = commands::cite::bibtex(&dblp, &key)
                .await
                .with_context(|| format!("Failed to fetch BibTeX for {key}"))?;
            write!(out, "{bibtex}")?;
        }

        Commands::Mergetags { lhs, rhs } => {
            let moved = commands::mergetags::run(&db, &lhs, &rhs, &mut out)?;
            info!(moved, "Merged tags");
        }

        Commands::Stats => {
            let dblp = DblpClient::new()?;
            let dump = DumpReader::new(&config.dump_path);
            commands::stats::run(&db, &dblp, &dump, &mut out).await?;
        }

        Commands::List {
            stage,
            relevant,
            classified,
            unclassified,
            peer_reviewed,
            variant,
            query,
            csv,
        } => {
            let filter = PublicationFilter {
                stage,
                relevant,
                classified: match (classified, unclassified) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                peer_reviewed: peer_reviewed.as_deref().map(parse_review_status).transpose()?,
                variant,
                query,
                min_citations: None,
            };
            commands::manage::list(&db, &filter, csv, &mut out)?;
        }

        Commands::Tag { action } => match action {
            TagAction::Create { name, criteria } => {
                commands::manage::tag_create(&db, &name, criteria.as_deref(), &mut out)?;
            }
            TagAction::Imply { tag, implied } => {
                if !commands::manage::tag_imply(&db, &tag, &implied, &mut out)? {
                    warn!(tag = %tag, implied = %implied, "Implication already recorded");
                }
            }
            TagAction::Assign { tag, ids, comment } => {
                commands::manage::tag_assign(&db, &tag, &ids, comment.as_deref(), &mut out)?;
            }
            TagAction::List => commands::manage::tag_list(&db, &mut out)?,
        },

        Commands::Exclude { criterion, ids } => {
            commands::manage::exclude(&db, &criterion, &ids, &mut out)?;
        }

        Commands::Dumpdata { output } => {
            let dataset = interchange::export(&db)?;
            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let mut file = std::io::BufWriter::new(file);
                    interchange::write_dataset(&dataset, &mut file)?;
                    file.flush()?;
                    info!(path = %path.display(), "Wrote dataset");
                }
                None => interchange::write_dataset(&dataset, &mut out)?,
            }
        }

        Commands::Loaddata { file } => {
            let dataset = interchange::read_dataset(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            interchange::import(&db, &dataset).context("Failed to load dataset")?;
        }

        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            info!(host = %host, port, "Starting HTTP server");
            server::serve(db, &host, port).await.context("Server error")?;
        }
    }

    out.flush()?;
    Ok(())
}
