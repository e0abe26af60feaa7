//! SegmentScope: sales dashboard data and customer segmentation CLI
//!
//! This is the main entrypoint that wires settings, artifact loading, the
//! reporting facade and the optional Gaussian-mixture segmentation step.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmentscope::cli::{Command, ReportArgs, SegmentArgs};
use segmentscope::features::default_reference_date;
use segmentscope::report::ReportSettings;
use segmentscope::{
    aggregate_features, data, fit_segments, ArtifactCatalog, Args, Dashboard, DashboardViews, Error,
    Settings,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    let mut catalog = ArtifactCatalog::new();

    match &args.command {
        Some(Command::Segment(segment)) => run_segment(&args, segment, settings, &mut catalog),
        Some(Command::Report(report)) => run_report(&args, report, settings, &mut catalog),
        None => run_report(&args, &ReportArgs::default(), settings, &mut catalog),
    }
}

/// Logs go to stderr so stdout carries only report output
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("SEGMENTSCOPE_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Render the dashboard views for one filter selection
fn run_report(
    args: &Args,
    report: &ReportArgs,
    mut settings: Settings,
    catalog: &mut ArtifactCatalog,
) -> Result<()> {
    report.apply(&mut settings);
    settings.validate()?;

    let transactions = catalog
        .transactions(&args.input)
        .with_context(|| format!("cannot load transactions from {}", args.input.display()))?;

    let mut dashboard = match &report.rfm {
        Some(path) => Dashboard::new(Arc::clone(&transactions), catalog.rfm_export(path)?),
        None => Dashboard::from_transactions(
            Arc::clone(&transactions),
            settings.reference_date,
            settings.quantile_bins,
        )?,
    };
    if let Some(path) = &report.clusters {
        dashboard = dashboard.with_clusters(catalog.cluster_export(path)?);
    }

    let state = report.filter_state(transactions.date_bounds());
    let views = dashboard.render(&state, &ReportSettings::from(&settings))?;

    if report.json {
        match &report.output {
            Some(path) => {
                let writer = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(writer, &views)?;
                println!("✓ Report written to: {}", path.display());
            }
            None => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                serde_json::to_writer_pretty(&mut lock, &views)?;
                writeln!(lock)?;
            }
        }
    } else {
        print_report(&views);
    }

    if let Err(err @ Error::EmptyResult(_)) = views.sales.ensure_non_empty(&state) {
        eprintln!("⚠ {err}");
    }
    Ok(())
}

fn print_report(views: &DashboardViews) {
    let sales = &views.sales;
    println!("=== Sales Summary ===");
    println!("Total revenue:    {:.2}", sales.summary.total_revenue);
    println!("Unique customers: {}", sales.summary.unique_customers);
    println!("Total orders:     {}", sales.summary.unique_orders);

    println!("\n=== Top Products by Revenue ===");
    for p in &sales.top_products {
        println!("{:>12.2}  {}", p.revenue, p.description);
    }

    println!("\n=== Top Customers by Transaction Count ===");
    for c in &sales.top_customers_by_transactions {
        println!("{:>8}  {}", c.customer_id, c.transaction_count);
    }

    println!("\n=== Top Customers by Revenue ===");
    for c in &sales.top_customers_by_revenue {
        println!("{:>8}  {:.2}", c.customer_id, c.revenue);
    }

    println!("\n=== Top Countries by Transactions ===");
    for c in &sales.top_countries {
        println!("{:>6}  {}", c.transaction_count, c.country);
    }

    println!("\n=== Monthly Revenue ===");
    for m in &sales.monthly_revenue {
        println!("{}  {:.2}", m.year_month, m.revenue);
    }

    println!("\n=== Transactions by Weekday ===");
    for w in &sales.weekday_transactions {
        println!("{} {:<9}  {}", w.year, w.weekday, w.transaction_count);
    }

    println!("\n=== RFM Segment Distribution ===");
    for c in &views.rfm.level_counts {
        println!("{:<22} {}", c.level.label(), c.count);
    }
    println!("\n=== Average RFM Metrics per Segment ===");
    for a in &views.rfm.level_averages {
        println!(
            "{:<22} R={:.2} F={:.2} M={:.2}",
            a.level.label(), a.averages.recency, a.averages.frequency, a.averages.monetary
        );
    }

    if let Some(clusters) = &views.clusters {
        println!("\n=== Cluster Distribution ===");
        for c in &clusters.counts {
            println!("Cluster {}: {} customers", c.cluster, c.count);
        }
        println!("\n=== Cluster Averages (RFM Metrics) ===");
        for a in &clusters.averages {
            println!(
                "Cluster {}: R={:.2} F={:.2} M={:.2}",
                a.cluster, a.averages.recency, a.averages.frequency, a.averages.monetary
            );
        }
        println!("\n=== Cluster-Based Marketing Advice ===");
        for entry in &clusters.legend {
            println!("Cluster {} - {}: {}", entry.cluster, entry.segment, entry.advice);
        }
    }
}

/// Fit the mixture and write the cluster export
fn run_segment(
    args: &Args,
    segment: &SegmentArgs,
    mut settings: Settings,
    catalog: &mut ArtifactCatalog,
) -> Result<()> {
    println!("=== GMM Segmentation Pipeline ===\n");
    let start_time = Instant::now();

    segment.apply(&mut settings);
    settings.validate()?;
    let rfm_values = segment.parse_rfm_values()?;

    // Step 1: Load and aggregate features
    let transactions = catalog
        .transactions(&args.input)
        .with_context(|| format!("cannot load transactions from {}", args.input.display()))?;
    let reference_date = settings
        .reference_date
        .or_else(|| default_reference_date(transactions.lines()))
        .context("transactions file has no rows")?;
    let features = aggregate_features(transactions.lines(), reference_date);
    println!("✓ Data loaded: {} customers", features.len());

    // Step 2: Fit the mixture
    let segmentation = fit_segments(&features, &settings.gmm)?;
    println!("✓ Model fitted successfully");

    println!("\n=== Cluster Statistics ===");
    let total = segmentation.assignments.len();
    for (cluster, &size) in segmentation.cluster_sizes().iter().enumerate() {
        let percentage = (size as f64 / total as f64) * 100.0;
        println!("Cluster {}: {} customers ({:.1}%)", cluster, size, percentage);
    }

    // Step 3: Write the export
    data::write_cluster_export(&segment.output, &segmentation.assignments)?;
    println!("\n✓ Cluster export saved to: {}", segment.output.display());

    if let Some((recency, frequency, monetary)) = rfm_values {
        let (cluster, profile) = segmentation.predict(recency, frequency, monetary)?;
        println!("\n=== Prediction ===");
        println!("Input RFM values: R={}, F={}, M={}", recency, frequency, monetary);
        println!("✓ Predicted Cluster: {} ({})", cluster, profile.segment);
        println!("  Advice: {}", profile.advice);
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}
