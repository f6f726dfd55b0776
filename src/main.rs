use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use clap::Parser;
use dentlink::{
    DataDir, EmbeddingDb, Error, Result,
    cli::{Cli, Command, LinkArgs, NormalizeArgs, VectorsAction},
    embedding::{self, Embedder, HashingEmbedder},
    lexicon::{Dictionaries, Lexicon},
    pipeline::{self, LinkOptions, Linker},
    refine::ReplayRefiner,
};
use kdam::{BarExt, tqdm};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Rows embedded and committed per vector store transaction.
const EMBED_BATCH: usize = 256;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DENTLINK_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    match cli.command {
        Command::Normalize(args) => cmd_normalize(&args)?,
        Command::Link(args) => {
            let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
            cmd_link(&data_dir, &args)?;
        }
        Command::Vectors { action } => {
            let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
            match action {
                VectorsAction::Build => cmd_vectors_build(&data_dir)?,
            }
        }
        Command::Status(args) => {
            let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
            cmd_status(&data_dir, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(std::io::stdin().lock())));
    }
    let file = File::open(path).map_err(|_| Error::NotFound {
        kind: "input file",
        name: path.display().to_string(),
    })?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    })
}

fn write_jsonl<T: Serialize>(out: &mut dyn Write, records: &[T]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_normalize(args: &NormalizeArgs) -> Result<()> {
    let lines = pipeline::read_lines(open_input(&args.input)?)?;
    let records = pipeline::normalize_batch(&lines);
    write_jsonl(&mut *open_output(args.output.as_deref())?, &records)
}

fn cmd_link(data_dir: &DataDir, args: &LinkArgs) -> Result<()> {
    let lines = pipeline::read_lines(open_input(&args.input)?)?;

    let options = LinkOptions {
        vectors: !args.no_vectors,
        bundle: args.bundle,
    };
    let mut linker = Linker::open(data_dir, options)?;
    if let Some(path) = &args.refine_responses {
        let refiner = ReplayRefiner::load(path)?;
        if refiner.len() != lines.len() {
            tracing::warn!(
                responses = refiner.len(),
                lines = lines.len(),
                "recorded refine responses do not match input line count"
            );
        }
        linker = linker.with_refiner(Arc::new(refiner));
    }

    let records = linker.annotate_batch(&lines);
    write_jsonl(&mut *open_output(args.output.as_deref())?, &records)?;

    let failed = records.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        eprintln!("{failed} of {} line(s) failed", records.len());
    }
    Ok(())
}

fn cmd_vectors_build(data_dir: &DataDir) -> Result<()> {
    let lexicon_path = data_dir.lexicon();
    let lexicon = Lexicon::load(&lexicon_path)?;
    if lexicon.is_empty() {
        return Err(Error::NotFound {
            kind: "lexicon",
            name: lexicon_path.display().to_string(),
        });
    }

    let rows = embedding::lexicon_rows(&lexicon);
    let embedder = HashingEmbedder::default();
    let db = EmbeddingDb::open(&data_dir.vectors_db())?;
    db.clear()?;

    eprintln!(
        "Embedding {} label(s) of {} concept(s) (dimension {})...",
        rows.len(),
        lexicon.len(),
        embedder.dimension()
    );
    let mut pb = tqdm!(total = rows.len(), desc = "Embedding");
    let mut stored = 0;
    for chunk in rows.chunks(EMBED_BATCH) {
        stored += embedding::embed_and_store(&embedder, &db, chunk)?;
        pb.update(chunk.len())?;
    }
    pb.refresh()?;
    eprintln!();

    eprintln!("Stored {stored} vector(s) in {}", data_dir.vectors_db().display());
    Ok(())
}

fn cmd_status(data_dir: &DataDir, json: bool) -> Result<()> {
    let lexicon = Lexicon::load(&data_dir.lexicon())?;
    let dictionaries = Dictionaries::load(data_dir)?;
    let vectors_path = data_dir.vectors_db();
    let vectors = if vectors_path.exists() {
        EmbeddingDb::open(&vectors_path)?.len()?
    } else {
        0
    };

    let sizes = [
        ("clinic_abbreviations", dictionaries.abbreviations.len()),
        ("brand_names", dictionaries.brand_names.len()),
        ("en_alias_to_iri", dictionaries.en_alias_to_iri.len()),
        ("he2en_static", dictionaries.he2en.len()),
        ("tooth_groups", dictionaries.tooth_groups.len()),
    ];

    if json {
        let dictionaries: serde_json::Map<String, serde_json::Value> = sizes
            .iter()
            .map(|(name, len)| (name.to_string(), (*len).into()))
            .collect();
        let status = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "concepts": lexicon.len(),
            "dictionaries": dictionaries,
            "vectors": vectors,
        });
        println!("{status}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Concepts: {}", lexicon.len());
        println!("Dictionaries:");
        for (name, len) in &sizes {
            println!("  {name}: {len}");
        }
        println!("Vectors: {vectors}");
    }
    Ok(())
}
