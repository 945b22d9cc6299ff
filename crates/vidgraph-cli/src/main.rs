// vidgraph — command-line interface for the transcript knowledge-graph
// pipeline. Subcommands mirror the pipeline stages so each can be run and
// re-run independently against the same stores.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use vidgraph_core::engine::grouping::GroupingStats;
use vidgraph_core::{AppConfig, Pipeline, RunOptions, TranscriptInput};

#[derive(Parser)]
#[command(
    name = "vidgraph",
    version,
    about = "Turn video transcripts into a typed knowledge graph: segments, semantic groups, concepts, and relationships."
)]
struct Cli {
    /// Directory for transcript/groups/relationships artifacts
    #[arg(long, global = true, env = "VIDGRAPH_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one transcript input file
    Process {
        /// JSON file with {video_id, timeline, punctuated_text}
        transcript: PathBuf,
        /// Reuse concepts already present in the graph store
        #[arg(long)]
        skip_existing: bool,
        /// Delete existing relationships for the video before upserting
        #[arg(long)]
        overwrite_relationships: bool,
        /// Skip the grouping stage (and everything after it)
        #[arg(long)]
        no_grouping: bool,
        /// Skip concept extraction
        #[arg(long)]
        no_concepts: bool,
        /// Skip relationship detection
        #[arg(long)]
        no_relationships: bool,
    },
    /// Group an already-uploaded video's segments
    Group {
        video_id: String,
    },
    /// Two-pass concept extraction for an already-grouped video
    Concepts {
        video_id: String,
        #[arg(long)]
        skip_existing: bool,
    },
    /// Relationship detection replay from the graph store + groups artifact
    Relationships {
        video_id: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete a video's data from the stores
    Delete {
        video_id: String,
        /// Delete segments from the vector store
        #[arg(long)]
        segments: bool,
        /// Delete concepts (and mentions) from the graph store
        #[arg(long)]
        concepts: bool,
        /// Delete relationships from the graph store
        #[arg(long)]
        relationships: bool,
    },
    /// Create the vector-store class and graph constraints
    InitSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = &cli.output_dir {
        config.pipeline.output_dir = dir.clone();
    }
    if let Command::Process {
        no_grouping,
        no_concepts,
        no_relationships,
        ..
    } = &cli.command
    {
        config.pipeline.enable_grouping = !no_grouping;
        config.pipeline.enable_concepts = !no_concepts;
        config.pipeline.enable_relationships = !no_relationships;
    }

    let pipeline = match Pipeline::connect(config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to connect: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C trips the cooperative cancel token; stages stop between batches
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling after the current batch");
            cancel.cancel();
        }
    });

    match run(&pipeline, &cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(pipeline: &Pipeline, command: &Command) -> Result<(), String> {
    match command {
        Command::Process {
            transcript,
            skip_existing,
            overwrite_relationships,
            ..
        } => {
            let raw = std::fs::read_to_string(transcript)
                .map_err(|e| format!("cannot read {}: {}", transcript.display(), e))?;
            let input: TranscriptInput = serde_json::from_str(&raw)
                .map_err(|e| format!("invalid transcript file: {}", e))?;

            let options = RunOptions {
                skip_existing: *skip_existing,
                overwrite_relationships: *overwrite_relationships,
                save_artifacts: true,
            };
            let report = pipeline.process_transcript(&input, &options).await;

            info!("Video:         {}", report.video_id);
            info!("Segments:      {}", report.segment_count);
            info!("Groups:        {}", report.group_count);
            if let Some(stats) = &report.concept_stats {
                info!(
                    "Concepts:      {} final ({} candidates, {} groups ok, {} failed)",
                    stats.final_concepts,
                    stats.candidates_extracted,
                    stats.groups_processed,
                    stats.groups_failed
                );
            }
            if let Some(stats) = &report.relationship_stats {
                info!(
                    "Relationships: {} detected, {} uploaded, {} skipped (avg confidence {:.2})",
                    stats.detected, stats.uploaded, stats.skipped, stats.avg_confidence
                );
            }
            if report.success {
                Ok(())
            } else {
                Err(report.error.unwrap_or_else(|| "pipeline failed".to_string()))
            }
        }

        Command::Group { video_id } => {
            let groups = pipeline
                .group_video(video_id, true)
                .await
                .map_err(|e| e.to_string())?;
            GroupingStats::from_groups(&groups).log_report();
            info!("Grouped {} into {} groups", video_id, groups.len());
            Ok(())
        }

        Command::Concepts {
            video_id,
            skip_existing,
        } => {
            let options = RunOptions {
                skip_existing: *skip_existing,
                ..RunOptions::with_artifacts()
            };
            let stats = pipeline
                .extract_concepts_for_video(video_id, &options)
                .await
                .map_err(|e| e.to_string())?;
            info!(
                "Extracted {} final concepts from {} groups ({} candidates) in {:.1}s",
                stats.final_concepts,
                stats.groups_processed,
                stats.candidates_extracted,
                stats.extraction_secs
            );
            Ok(())
        }

        Command::Relationships { video_id, overwrite } => {
            let options = RunOptions {
                overwrite_relationships: *overwrite,
                ..RunOptions::with_artifacts()
            };
            let stats = pipeline
                .extract_relationships_for_video(video_id, &options)
                .await
                .map_err(|e| e.to_string())?;
            info!(
                "Detected {} relationships; {} uploaded, {} skipped (avg confidence {:.2})",
                stats.detected, stats.uploaded, stats.skipped, stats.avg_confidence
            );
            for (rel_type, count) in stats.type_distribution {
                info!("  {:<20} {}", rel_type, count);
            }
            Ok(())
        }

        Command::Delete {
            video_id,
            segments,
            concepts,
            relationships,
        } => {
            // Bare `delete <id>` wipes everything
            let all = !(*segments || *concepts || *relationships);
            pipeline
                .delete_video(
                    video_id,
                    *segments || all,
                    *concepts || all,
                    *relationships || all,
                )
                .await
                .map_err(|e| e.to_string())?;
            info!("Deleted data for {}", video_id);
            Ok(())
        }

        Command::InitSchema => {
            // Pipeline::connect already ensured both; report and exit
            info!("Vector-store class and graph constraints are in place");
            Ok(())
        }
    }
}
