use std::io::{BufRead, BufReader};

use clap::Parser;
use docstore::{
    DocumentInput,
    DocumentStore,
    Filter,
    Limit,
    QueryParams,
    StorageLocation,
    StoreConfig,
    document::DocumentView,
    error::{self, Error},
    resolve_store_path,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    AddArgs,
    Cli,
    Command,
    CountArgs,
    DeleteArgs,
    GetArgs,
    QueryArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSTORE_LOG") {
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
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let config = load_config(&cli)?;
    let store = DocumentStore::open(config)?;

    match cli.command {
        Command::Add(args) => cmd_add(&store, &args)?,
        Command::Query(args) => cmd_query(&store, &args)?,
        Command::Get(args) => cmd_get(&store, &args)?,
        Command::Delete(args) => cmd_delete(&store, &args)?,
        Command::Count(args) => cmd_count(&store, &args)?,
        Command::Status(args) => cmd_status(&store, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn load_config(cli: &Cli) -> error::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    // The command line always works against a file.
    if cli.store.is_some()
        || !matches!(config.location, StorageLocation::File(_))
    {
        config.location =
            StorageLocation::File(resolve_store_path(cli.store.as_deref())?);
    }
    Ok(config)
}

fn parse_filter(raw: Option<&str>) -> error::Result<Option<Filter>> {
    raw.map(str::parse).transpose()
}

fn print_json<T: Serialize>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_add(store: &DocumentStore, args: &AddArgs) -> error::Result<()> {
    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) if path.as_os_str() != "-" => {
            Box::new(BufReader::new(std::fs::File::open(path)?))
        }
        _ => Box::new(BufReader::new(std::io::stdin())),
    };

    let default_index = args
        .index
        .as_deref()
        .unwrap_or(&store.config().default_index)
        .to_string();

    let mut docs = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let input: DocumentInput =
            serde_json::from_str(&line).map_err(|e| {
                Error::InvalidDocument(format!("line {}: {e}", n + 1))
            })?;
        docs.push(input.into_document(&default_index));
    }

    if docs.is_empty() {
        eprintln!("No documents to add.");
        return Ok(());
    }

    let policy = args.on_duplicate.unwrap_or(store.config().duplicate_policy);
    let summary = store.add_documents_with(docs, policy)?;

    if args.json {
        print_json(&summary)?;
    } else {
        println!(
            "Added {} documents ({} new, {} reindexed, {} metadata only, \
             {} unchanged, {} skipped)",
            summary.ids.len(),
            summary.inserted,
            summary.reindexed,
            summary.metadata_only,
            summary.unchanged,
            summary.skipped,
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct QueryHit<'a> {
    rank: usize,
    score: f64,
    #[serde(flatten)]
    document: DocumentView<'a>,
}

fn cmd_query(store: &DocumentStore, args: &QueryArgs) -> error::Result<()> {
    let params = QueryParams {
        text: args.text.clone(),
        filter: parse_filter(args.filter.as_deref())?,
        limit: if args.all {
            Some(Limit::All)
        } else {
            args.count.map(Limit::Top)
        },
        index: args.index.clone(),
        all_terms_must_match: args.all_terms,
        scale_score: args.scale,
    };
    let results = store.search(&params)?;

    if args.json {
        let hits: Vec<QueryHit> = results
            .iter()
            .enumerate()
            .map(|(i, r)| QueryHit {
                rank: i + 1,
                score: r.score,
                document: DocumentView::from(&r.document),
            })
            .collect();
        return print_json(&hits);
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.4}] {}/{}  {}",
            i + 1,
            r.score,
            r.document.index,
            r.document.id,
            preview(r.document.content()),
        );
    }
    Ok(())
}

/// First line of `content`, cut to 60 characters.
fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(60).collect();
    if line.chars().count() > 60 || content.lines().nth(1).is_some() {
        out.push_str("...");
    }
    out
}

fn cmd_get(store: &DocumentStore, args: &GetArgs) -> error::Result<()> {
    let docs = store.get_documents_by_id(&args.ids)?;
    for id in &args.ids {
        if !docs.iter().any(|d| &d.id == id) {
            eprintln!("Warning: document not found: {id}");
        }
    }

    if args.json {
        let views: Vec<DocumentView> =
            docs.iter().map(DocumentView::from).collect();
        return print_json(&views);
    }

    for doc in &docs {
        println!("--- {} ({})", doc.id, doc.index);
        for (key, value) in &doc.metadata {
            println!("{key}: {value}");
        }
        if !doc.metadata.is_empty() {
            println!();
        }
        println!("{}", doc.content());
    }
    Ok(())
}

fn cmd_delete(store: &DocumentStore, args: &DeleteArgs) -> error::Result<()> {
    let removed = if args.ids.is_empty() {
        let filter = parse_filter(args.filter.as_deref())?;
        store.delete_where(args.index.as_deref(), filter.as_ref())?
    } else {
        store.delete_documents(&args.ids)?
    };
    println!("Deleted {removed} documents");
    Ok(())
}

fn cmd_count(store: &DocumentStore, args: &CountArgs) -> error::Result<()> {
    let filter = parse_filter(args.filter.as_deref())?;
    println!("{}", store.count(args.index.as_deref(), filter.as_ref())?);
    Ok(())
}

fn cmd_status(store: &DocumentStore, json: bool) -> error::Result<()> {
    let stats = store.index_stats()?;
    let location = match &store.config().location {
        StorageLocation::File(path) => path.display().to_string(),
        StorageLocation::InMemory => "(memory)".to_string(),
    };

    if json {
        #[derive(Serialize)]
        struct Status<'a> {
            store: &'a str,
            #[serde(flatten)]
            stats: &'a docstore::IndexStats,
        }
        return print_json(&Status {
            store: &location,
            stats: &stats,
        });
    }

    println!("Store: {location}");
    println!("Documents: {}", stats.document_count);
    println!("Total tokens: {}", stats.total_length);
    println!(
        "Average document length: {:.2}",
        stats.average_document_length
    );
    println!("Posting rewrites: {}", stats.posting_rewrites);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("one\ntwo"), "one...");
        let long = "x".repeat(80);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(60)));
        assert_eq!(preview(""), "");
    }
}
