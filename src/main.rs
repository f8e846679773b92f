//! RiskForge: customer risk scoring from raw transactions
//!
//! This is the main entrypoint that orchestrates the batch labeling pipeline
//! and single-customer scoring.

use anyhow::Result;
use clap::Parser;
use riskforge::cli::{Command, PipelineArgs, ScoreArgs};
use riskforge::woe::DiagnosticOutcome;
use riskforge::{run_pipeline, Args, ScoringService};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match &args.command {
        Command::Pipeline(pipeline) => run_full_pipeline(pipeline),
        Command::Score(score) => run_scoring_mode(score),
    }
}

/// Run the full labeling pipeline and print a summary
fn run_full_pipeline(args: &PipelineArgs) -> Result<()> {
    println!("=== Risk Labeling Pipeline ===\n");

    let config = args.resolve_config()?;
    let report = run_pipeline(&config)?;
    let labeled = &report.labeled;

    println!("✓ Input: {} ({} transactions)", report.input.display(), report.transactions);
    println!("✓ Customers: {}", labeled.rfm.len());

    println!("\n=== Cluster Statistics ===");
    let means = labeled.cluster_mean_recency();
    for (cluster, size) in labeled.model.cluster_sizes().iter().enumerate() {
        let percentage = (*size as f64 / labeled.rfm.len() as f64) * 100.0;
        let marker = if cluster == labeled.high_risk_cluster { "  <- high risk" } else { "" };
        println!(
            "Cluster {}: {} customers ({:.1}%), mean recency {:.1}{}",
            cluster,
            size,
            percentage,
            means[cluster].unwrap_or(0.0),
            marker
        );
    }
    println!("Within-cluster sum of squares: {:.4}", labeled.model.inertia);
    println!("Silhouette score (sample): {:.3}", report.silhouette);

    println!("\n=== Information Value ===");
    for diagnostic in &report.diagnostics {
        match &diagnostic.outcome {
            DiagnosticOutcome::Computed(woe) => println!(
                "{:<16} IV {:.4} ({})",
                diagnostic.feature,
                woe.iv,
                woe.strength()
            ),
            DiagnosticOutcome::Skipped { reason } => {
                println!("{:<16} skipped: {}", diagnostic.feature, reason)
            }
        }
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", report.elapsed.as_secs_f64());
    println!("Processed table saved to: {}", report.output.display());

    Ok(())
}

/// Score a single customer against the trained model
fn run_scoring_mode(args: &ScoreArgs) -> Result<()> {
    let service = ScoringService::load(&args.model)?;
    let request = args.parse_request()?;

    match service.score(&request) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            let class = e.class();
            anyhow::bail!(
                "{} (status {:?}, {})",
                e.public_message(),
                class,
                class.status_code()
            )
        }
    }
}
