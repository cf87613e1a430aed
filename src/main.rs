mod db;
mod error;
mod labels;
mod pipeline;
mod template;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use pipeline::router::ScoringConfig;
use pipeline::{DocumentReport, Pipeline, PipelineConfig};
use template::TemplateStore;

const DEFAULT_TEMPLATES_DIR: &str = "templates/patterns";

#[derive(Parser)]
#[command(name = "sds_extractor", about = "Structured field extraction from SDS text dumps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction pipeline over page-marked text files
    Process {
        /// Input .txt files or directories of them
        paths: Vec<PathBuf>,
        /// Template profile directory
        #[arg(long, default_value = DEFAULT_TEMPLATES_DIR)]
        templates_dir: PathBuf,
        /// Routing confidence threshold (0-100)
        #[arg(long)]
        min_conf: Option<f64>,
        /// Never synthesize new template profiles on routing misses
        #[arg(long)]
        no_auto_create: bool,
        /// Max documents to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show extraction statistics
    Stats,
    /// Per-document overview table
    Overview {
        /// Only documents flagged for review (errors or partial extraction)
        #[arg(long)]
        flagged: bool,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// List loaded template profiles
    Templates {
        #[arg(long, default_value = DEFAULT_TEMPLATES_DIR)]
        templates_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Process {
            paths,
            templates_dir,
            min_conf,
            no_auto_create,
            limit,
        } => {
            let files = collect_inputs(&paths, limit)?;
            if files.is_empty() {
                println!("No .txt inputs found. Pass files or directories.");
                return Ok(());
            }

            let store = Arc::new(TemplateStore::open(templates_dir)?);
            let mut cfg = PipelineConfig {
                auto_create: !no_auto_create,
                ..Default::default()
            };
            if let Some(min_conf) = min_conf {
                cfg.scoring = ScoringConfig {
                    min_confidence: min_conf,
                    ..Default::default()
                };
            }
            let pipeline = Pipeline::new(Arc::clone(&store), cfg);

            let conn = db::connect()?;
            db::init_schema(&conn)?;

            println!("Processing {} documents...", files.len());
            let counts = process_files(&conn, &pipeline, &files)?;
            counts.print();
            println!("Templates loaded: {}", store.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Documents:   {}", s.documents);
            println!("Errors:      {}", s.errors);
            println!("Flagged:     {}", s.flagged);
            println!("Composition: {}", s.composition_rows);
            println!("Properties:  {}", s.physchem_rows);
            println!("Regulatory:  {}", s.regulatory_rows);
            Ok(())
        }
        Commands::Overview { flagged, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, flagged, limit)?;
            if rows.is_empty() {
                println!("No documents found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<28} | {:<14} | {:>6} | {:>5} | {:>4} | {:>4} | {:<24} | {}",
                "#", "File", "Template", "Route", "Extr", "Comp", "Reg", "Product", "Error"
            );
            println!("{}", "-".repeat(118));
            for (i, r) in rows.iter().enumerate() {
                let route = if r.locked {
                    "lock".to_string()
                } else {
                    format!("{:.0}", r.router_score)
                };
                println!(
                    "{:>3} | {:<28} | {:<14} | {:>6} | {:>4}% | {:>4} | {:>4} | {:<24} | {}",
                    i + 1,
                    truncate(&r.file, 28),
                    truncate(&r.template, 14),
                    route,
                    r.extract_score,
                    r.comp_rows,
                    r.reg_rows,
                    truncate(&r.product, 24),
                    truncate(&r.error, 24),
                );
            }
            println!("\n{} documents", rows.len());
            Ok(())
        }
        Commands::Templates { templates_dir } => {
            let store = TemplateStore::open(templates_dir)?;
            for name in store.names() {
                if let Some(t) = store.get(&name) {
                    println!(
                        "{:<16} core={} seeds={}",
                        name,
                        t.detect.doc_signatures.len(),
                        t.detect.seed_patterns.len()
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn collect_inputs(paths: &[PathBuf], limit: Option<usize>) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    if let Some(n) = limit {
        files.truncate(n);
    }
    Ok(files)
}

struct ProcessCounts {
    documents: usize,
    errors: usize,
    flagged: usize,
    composition: usize,
    physchem: usize,
    regulatory: usize,
    sec3_ok: usize,
    reg_ok: usize,
}

impl ProcessCounts {
    fn print(&self) {
        println!(
            "Saved {} documents ({} errors, {} flagged): {} composition, {} property, {} regulatory rows.",
            self.documents, self.errors, self.flagged,
            self.composition, self.physchem, self.regulatory,
        );
        println!(
            "Quality: {}/{} with composition rows, {}/{} with mapped regulatory items.",
            self.sec3_ok, self.documents, self.reg_ok, self.documents,
        );
    }
}

fn process_files(
    conn: &rusqlite::Connection,
    pipeline: &Pipeline,
    files: &[PathBuf],
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts {
        documents: 0,
        errors: 0,
        flagged: 0,
        composition: 0,
        physchem: 0,
        regulatory: 0,
        sec3_ok: 0,
        reg_ok: 0,
    };

    for chunk in files.chunks(64) {
        let reports: Vec<DocumentReport> = chunk
            .par_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                match std::fs::read_to_string(path) {
                    Ok(raw) => pipeline.process(&name, &raw),
                    Err(e) => pipeline.process_unreadable(&name, &e.to_string()),
                }
            })
            .collect();

        for report in &reports {
            counts.documents += 1;
            if report.error.is_some() {
                counts.errors += 1;
            }
            if report.flagged() {
                counts.flagged += 1;
            }
            if report.composition_ok() {
                counts.sec3_ok += 1;
            }
            if report.regulatory_mapped() > 0 {
                counts.reg_ok += 1;
            }
            if let Some(data) = &report.data {
                counts.composition += data.composition.rows.len();
                counts.physchem += data.physchem.len();
                counts.regulatory += data.regulatory.len();
            }
        }

        db::save_reports(conn, &reports)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
