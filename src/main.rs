use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use colored::*;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod cli;

use cli::{Args, Commands, OutputFormat, PageMode};
use codewindow::analyzer::{BatchAnalysisResult, ConcurrentAnalyzer, ProgressDetail, ProgressEvent};
use codewindow::chunking::{ChunkOptions, ChunkStrategy};
use codewindow::config::{EngineConfig, ResolvedConfig};
use codewindow::jobs::{discover_files, AnalyzeFilesHandler, AnalyzeFilesParams, ANALYZE_FILES_TASK};
use codewindow::logging::init_logging;
use codewindow::pagination::{MixedPage, PageRequest, PaginationInfo, SourceFile};
use task_daemon::{BackgroundProcessor, TaskStatus};

fn load_config() -> ResolvedConfig {
    match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "{} {:#}; using defaults",
                "Invalid configuration:".yellow().bold(),
                e
            );
            ResolvedConfig::default()
        }
    }
}

fn handle_chunk(
    config: &ResolvedConfig,
    file: &Path,
    strategy: &str,
    max_tokens: Option<usize>,
    overlap: Option<usize>,
    show_content: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let Some(strategy) = ChunkStrategy::from_str(strategy) else {
        anyhow::bail!("Unknown chunking strategy: {}", strategy);
    };
    let mut options = ChunkOptions::default().with_strategy(strategy);
    if let Some(max_tokens) = max_tokens {
        options = options.with_max_tokens(max_tokens);
    }
    if let Some(overlap) = overlap {
        options = options.with_overlap_lines(overlap);
    }

    let start = Instant::now();
    let file_id = file.to_string_lossy();
    let chunks = config.chunker().chunk(&file_id, &content, &options);

    println!("{} {}", "File:".bold().green(), file.display());
    println!("{} {}", "Chunks:".bold().green(), chunks.len());
    for chunk in &chunks {
        let meta = &chunk.metadata;
        println!(
            "  {} lines {}-{} ~{} tokens ({})",
            format!("#{}", meta.index + 1).cyan(),
            meta.start_line,
            meta.end_line,
            meta.estimated_tokens,
            meta.strategy
        );
        if show_content {
            println!("{}", chunk.content.dimmed());
        }
    }
    println!("Chunked in {:.2?}", start.elapsed());
    Ok(())
}

fn load_sources(root: &Path) -> Vec<SourceFile> {
    discover_files(root)
        .into_iter()
        .map(|path| {
            let file_path = path.to_string_lossy().into_owned();
            match std::fs::read_to_string(&path) {
                Ok(content) => SourceFile::with_content(file_path, content),
                Err(_) => match std::fs::metadata(&path) {
                    Ok(meta) => SourceFile::with_size(file_path, meta.len()),
                    Err(_) => SourceFile::new(file_path),
                },
            }
        })
        .collect()
}

fn print_page_footer(info: &PaginationInfo, cursor: Option<&String>) {
    println!();
    println!(
        "{} {}/{} ({} of {} items)",
        "Page".bold().green(),
        info.current_page,
        info.total_pages,
        info.items_in_page,
        info.total_items
    );
    match cursor {
        Some(cursor) => println!("{} {}", "Next cursor:".bold(), cursor),
        None => println!("{}", "Last page.".yellow()),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_paginate(
    config: &ResolvedConfig,
    root: &Path,
    mode: PageMode,
    max_tokens: Option<usize>,
    page_size: Option<usize>,
    cursor: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let paginator = config.paginator();
    let files = load_sources(root);
    let mut request = PageRequest::new().with_cursor(cursor);
    if let Some(max_tokens) = max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(page_size) = page_size {
        request = request.with_page_size(page_size);
    }

    match mode {
        PageMode::Files => {
            let page = paginator.paginate_files(&files, &request)?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&page)?);
                return Ok(());
            }
            for entry in &page.content {
                println!("{} ~{} tokens", entry.path, entry.estimated_tokens);
            }
            print_page_footer(&page.info, page.cursor.as_ref());
        }
        PageMode::Mixed => {
            let page = paginator.paginate_mixed(&files, &request)?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&page)?);
                return Ok(());
            }
            match &page.content {
                MixedPage::CompleteFile {
                    path,
                    content,
                    estimated_tokens,
                } => {
                    println!("{} ~{} tokens", path.bold(), estimated_tokens);
                    println!("{}", content);
                }
                MixedPage::FileChunks {
                    path,
                    chunks,
                    total_chunks,
                } => {
                    for chunk in chunks {
                        println!(
                            "{} chunk {}/{} lines {}-{}",
                            path.bold(),
                            chunk.metadata.index + 1,
                            total_chunks,
                            chunk.metadata.start_line,
                            chunk.metadata.end_line
                        );
                        println!("{}", chunk.content);
                    }
                }
                MixedPage::Empty => println!("{}", "No files found.".yellow().bold()),
            }
            print_page_footer(&page.info, page.cursor.as_ref());
        }
    }
    Ok(())
}

fn print_batch(batch: &BatchAnalysisResult) {
    for result in &batch.results {
        if result.success {
            println!("{} {}", "ok".green(), result.file_path);
        } else if let Some(error) = &result.error {
            println!("{} {} ({})", "failed".red(), result.file_path, error);
        }
    }
    println!();
    println!(
        "{} {}/{} files ({:.1}%) in {} ms",
        "Analyzed".bold().green(),
        batch.successful,
        batch.total_files,
        batch.success_rate(),
        batch.execution_time_ms
    );
}

async fn handle_analyze(
    config: &ResolvedConfig,
    root: &Path,
    batch_size: Option<usize>,
    max_concurrent: Option<usize>,
    kinds: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut settings = config.analyzer_settings();
    if let Some(max) = max_concurrent {
        settings = settings.with_max_concurrent_files(max);
    }
    let analyzer = ConcurrentAnalyzer::new(settings, config.estimator());
    if format == OutputFormat::Text {
        analyzer.add_progress_callback(Arc::new(|event: &ProgressEvent| {
            if let ProgressDetail::Batch { .. } = event.detail {
                eprintln!("{} ({:.0}%)", event.message, event.progress * 100.0);
            }
        }));
    }

    let files = discover_files(root);
    let batch = analyzer.analyze(&files, &kinds, batch_size).await;
    analyzer.shutdown();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&batch)?),
        OutputFormat::Text => print_batch(&batch),
    }
    Ok(())
}

async fn handle_job(
    config: &ResolvedConfig,
    root: &Path,
    batch_size: Option<usize>,
    wait: u64,
) -> Result<()> {
    let processor = BackgroundProcessor::new(config.processor_config());
    processor.register_task_handler(
        ANALYZE_FILES_TASK,
        AnalyzeFilesHandler::new(Arc::new(config.analyzer())),
    );
    processor.start().await;

    let request = AnalyzeFilesParams::for_root(root)
        .with_batch_size(batch_size)
        .into_request()?;
    let task_id = processor.submit(request).await?;
    println!("{} {}", "Submitted task".bold().green(), task_id);

    let task = processor
        .wait_for(&task_id, Duration::from_secs(wait))
        .await;
    processor.stop(Duration::from_secs(5)).await;

    let task = task.context("Task disappeared before it finished")?;
    match task.status {
        TaskStatus::Completed => {
            let value = task
                .result
                .and_then(|r| r.result)
                .context("Completed task carried no result")?;
            let batch: BatchAnalysisResult = serde_json::from_value(value)?;
            print_batch(&batch);
        }
        status => {
            let reason = task
                .last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string());
            anyhow::bail!("Task {} ended as {}: {}", task_id, status.as_str(), reason);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config();
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    match args.command {
        Commands::Chunk {
            file,
            strategy,
            max_tokens,
            overlap,
            show_content,
        } => handle_chunk(&config, &file, &strategy, max_tokens, overlap, show_content)?,
        Commands::Paginate {
            path,
            mode,
            max_tokens,
            page_size,
            cursor,
            format,
        } => handle_paginate(&config, &path, mode, max_tokens, page_size, cursor, format)?,
        Commands::Analyze {
            path,
            batch_size,
            max_concurrent,
            kind,
            format,
        } => handle_analyze(&config, &path, batch_size, max_concurrent, kind, format).await?,
        Commands::Job {
            path,
            batch_size,
            wait,
        } => handle_job(&config, &path, batch_size, wait).await?,
        Commands::Config => println!("{}", config.to_json_string()?),
    }

    Ok(())
}
