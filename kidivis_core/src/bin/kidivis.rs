//! kidivis CLI
//!
//! Compares two revisions of a KiCad project and writes one composite PNG per
//! design file (per layer for boards) plus a `report.json` summary. Composites
//! mirror the repository layout under the output directory.

use std::process::ExitCode;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use kidivis_core::config::Config;
use kidivis_core::logging;
use kidivis_core::orchestrator::{ComparisonOutcome, DiffOrchestrator};
use kidivis_core::resolver::ResolveInput;
use kidivis_core::{ComparisonStatus, DiffStatus};

const REPORT_FILE: &str = "report.json";

#[derive(Debug, Parser)]
#[command(name = "kidivis", version)]
#[command(about = "Visual diff of KiCad PCBs and schematics across git revisions", long_about = None)]
struct Cli {
    /// Baseline revision (branch, tag, commit or WORK)
    #[arg(long)]
    old: Option<String>,
    /// Revision under review (branch, tag, commit or WORK)
    #[arg(long)]
    new: Option<String>,
    /// Configuration file; defaults to kidivis.toml next to the project or in the current directory
    #[arg(long)]
    config: Option<Utf8PathBuf>,
    /// Directory receiving composites and the report
    #[arg(long, short, default_value = "kidivis-out")]
    output: Utf8PathBuf,
    /// Log filter, overriding the configured level
    #[arg(long)]
    log_level: Option<String>,
    /// Print the report as JSON instead of one line per file
    #[arg(long)]
    json: bool,
    /// Skip design files that did not change
    #[arg(long)]
    changed_only: bool,
    /// Project directory, or .kicad_pro/.kicad_pcb/.kicad_sch files
    #[arg(required = true)]
    targets: Vec<Utf8PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init(config.logging.format, level);

    let anchor = cli
        .targets
        .first()
        .context("at least one target is required")?;
    let orchestrator = DiffOrchestrator::open(anchor.as_std_path(), &config)
        .with_context(|| format!("failed to open repository for {anchor}"))?;

    let mut input = ResolveInput::new(cli.targets.iter().map(|target| target.as_std_path().to_path_buf()))
        .with_include_unchanged(config.compare.include_unchanged && !cli.changed_only);
    if let Some(old) = &cli.old {
        input = input.with_old(old.clone());
    }
    if let Some(new) = &cli.new {
        input = input.with_new(new.clone());
    }

    let outcome = orchestrator.run(&input).context("comparison failed")?;
    write_outputs(&cli.output, &outcome)?;
    tracing::debug!(stats = ?orchestrator.cache().stats(), "render cache");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.summary())?);
    } else {
        print_report(&outcome);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        return Config::load(path.as_std_path())
            .with_context(|| format!("failed to load configuration {path}"));
    }

    let mut dirs = Vec::new();
    if let Some(target) = cli.targets.first() {
        let dir = if target.is_dir() {
            target.clone()
        } else {
            target.parent().map(Utf8Path::to_path_buf).unwrap_or_default()
        };
        if !dir.as_str().is_empty() {
            dirs.push(dir.into_std_path_buf());
        }
    }
    dirs.push(std::env::current_dir().context("failed to read current directory")?);
    let (config, _) = Config::discover(&dirs).context("failed to load configuration")?;
    Ok(config)
}

fn write_outputs(output: &Utf8Path, outcome: &ComparisonOutcome) -> Result<()> {
    std::fs::create_dir_all(output).with_context(|| format!("failed to create {output}"))?;
    for result in &outcome.results {
        for view in &result.layers {
            let Some(image) = &view.composite else {
                continue;
            };
            let path = composite_path(output, &result.file.path, view.layer.as_deref());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {parent}"))?;
            }
            image
                .save(&path)
                .with_context(|| format!("failed to write composite {path}"))?;
        }
    }
    let report = output.join(REPORT_FILE);
    let json = serde_json::to_vec_pretty(&outcome.summary())?;
    std::fs::write(&report, json).with_context(|| format!("failed to write {report}"))?;
    Ok(())
}

fn print_report(outcome: &ComparisonOutcome) {
    let revisions = &outcome.revisions;
    println!(
        "{} -> {}",
        revisions.old.short_label(),
        revisions.new.short_label()
    );
    if outcome.status == ComparisonStatus::NoRelevantChanges {
        println!("no PCB or schematic changes");
        return;
    }
    for result in &outcome.results {
        let magnitude = result.magnitude() * 100.0;
        let line = format!("{:<12} {magnitude:>7.3}%  {}", status_label(result.status), result.file.path);
        match &result.detail {
            Some(detail) => println!("{line}  ({detail})"),
            None => println!("{line}"),
        }
        for view in result.layers.iter().filter(|view| view.layer.is_some()) {
            let magnitude = view.magnitude() * 100.0;
            println!(
                "  {:<10} {magnitude:>7.3}%  {}",
                status_label(view.status),
                view.layer.as_deref().unwrap_or_default()
            );
        }
    }
}

/// `<output>/<path>.png`, or `<output>/<path>.<layer>.png` with the layer's
/// dots replaced by underscores.
fn composite_path(output: &Utf8Path, path: &str, layer: Option<&str>) -> Utf8PathBuf {
    let name = match layer {
        Some(layer) => format!("{path}.{}.png", layer.replace('.', "_")),
        None => format!("{path}.png"),
    };
    output.join(name)
}

const fn status_label(status: DiffStatus) -> &'static str {
    match status {
        DiffStatus::Modified => "modified",
        DiffStatus::Added => "added",
        DiffStatus::Removed => "removed",
        DiffStatus::Inconclusive => "inconclusive",
        DiffStatus::NoContent => "no-content",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_paths_mirror_the_repository() {
        let out = Utf8Path::new("out");
        assert_eq!(
            composite_path(out, "hw/main/board.kicad_pcb", Some("F.Cu")),
            Utf8PathBuf::from("out/hw/main/board.kicad_pcb.F_Cu.png")
        );
        assert_eq!(
            composite_path(out, "board.kicad_sch", None),
            Utf8PathBuf::from("out/board.kicad_sch.png")
        );
        assert_ne!(
            composite_path(out, "a/b-c.kicad_sch", None),
            composite_path(out, "a-b/c.kicad_sch", None)
        );
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "kidivis", "--old", "v1", "--new", "WORK", "--json", "-o", "out", "hw",
        ])
        .expect("parse args");
        assert_eq!(cli.old.as_deref(), Some("v1"));
        assert_eq!(cli.new.as_deref(), Some("WORK"));
        assert!(cli.json);
        assert_eq!(cli.output, Utf8PathBuf::from("out"));
        assert_eq!(cli.targets, vec![Utf8PathBuf::from("hw")]);
    }

    #[test]
    fn cli_requires_a_target() {
        assert!(Cli::try_parse_from(["kidivis"]).is_err());
    }
}
