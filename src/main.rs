use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use setdoctor::config::{AppConfig, TomlWeightsStore, WeightsStore};
use setdoctor::diagnosis::recommend::LibraryRecommender;
use setdoctor::diagnosis::{Diagnoser, StressDiagnosticReport};
use setdoctor::forensic::{EntryKind, ForensicVerdictEntry};
use setdoctor::healthbar::{self, DiagnosticSession, HealthBarSegment};
use setdoctor::library::{self, InMemoryLibrary, SetFile};
use setdoctor::model::{EnergyArc, FlowWeightSettings, SeverityLevel};
use setdoctor::rescue::{RescueSplice, RescueWorkflow};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BAR_WIDTH: usize = 60;

#[derive(Parser)]
#[command(name = "setdoctor", version, about = "DJ set transition diagnostics")]
struct Cli {
    /// Path to the track library JSON
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArcName {
    Free,
    Build,
    Sustain,
    Release,
}

impl From<ArcName> for EnergyArc {
    fn from(arc: ArcName) -> Self {
        match arc {
            ArcName::Free => EnergyArc::Free,
            ArcName::Build => EnergyArc::Build,
            ArcName::Sustain => EnergyArc::Sustain,
            ArcName::Release => EnergyArc::Release,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Score every transition in a set and show its health bar
    Diagnose {
        /// Set file (JSON: name, tracks, optional weights)
        set: PathBuf,
    },

    /// Explain one transition in detail
    Inspect {
        set: PathBuf,

        /// Transition index (0 = first → second track)
        index: usize,
    },

    /// Insert a suggested rescue track into a weak transition
    Rescue {
        set: PathBuf,

        /// Transition index to heal
        index: usize,

        /// Which suggestion to apply (1 = best)
        #[arg(default_value = "1")]
        option: usize,

        /// Show the outcome without rewriting the set file
        #[arg(long)]
        dry_run: bool,
    },

    /// Show or change the flow weights stored for a set
    Weights {
        set: PathBuf,

        #[arg(long)]
        harmonic: Option<f64>,

        #[arg(long)]
        tempo: Option<f64>,

        #[arg(long)]
        energy: Option<f64>,

        #[arg(long)]
        vocal: Option<f64>,

        #[arg(long, value_enum)]
        arc: Option<ArcName>,
    },

    /// Turn glyph-formatted reasoning text into typed entries
    Format {
        /// File to read (defaults to stdin)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolve_workers())
        .build_global()
    {
        log::debug!("Using existing rayon pool: {e}");
    }

    let store = TomlWeightsStore::new(config.resolve_weights_dir());

    match cli.command {
        Commands::Diagnose { set } => {
            let ctx = SetContext::load(&cli.library, &config, &store, &set)?;
            let report = ctx.diagnose()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("Set: {} ({} tracks)", ctx.set.name, ctx.set.tracks.len());
            println!();
            print_report(&report);
        }

        Commands::Inspect { set, index } => {
            let ctx = SetContext::load(&cli.library, &config, &store, &set)?;
            let mut session = DiagnosticSession::new(ctx.diagnose()?);
            let transitions = session.segments().len();

            let Some(point) = session.select_segment(index) else {
                println!("No transition at index {index} (set has {transitions}).");
                return Ok(());
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(point)?);
                return Ok(());
            }

            println!(
                "#{} {} → {}",
                index, point.from_label, point.to_label
            );
            println!(
                "Severity {:.1} ({}) · {} · vocal safety {:.0}",
                point.severity_score,
                point.severity_level.label(),
                point.archetype.label(),
                point.vocal_safety_score
            );
            println!();
            print_entries(&point.reasoning);

            if point.has_rescue() {
                println!();
                println!("Rescues:");
                for (i, s) in point.rescue_suggestions.iter().enumerate() {
                    println!(
                        "  {}. {:<12} → {:>5.1}  {}",
                        i + 1,
                        s.track_id,
                        s.predicted_severity_score,
                        s.display_reasoning
                    );
                }
                println!();
                println!("Apply with: setdoctor rescue {} {index} <n>", set.display());
            }
        }

        Commands::Rescue { set, index, option, dry_run } => {
            if dry_run {
                println!("DRY RUN — the set file will not be rewritten");
            }
            let ctx = SetContext::load(&cli.library, &config, &store, &set)?;
            let report = ctx.diagnose()?;
            let workflow = RescueWorkflow::new(ctx.diagnoser.clone());

            let mut ids = ctx.set.tracks.clone();
            let mut hook = |splice: &RescueSplice<'_>| -> Result<_> {
                library::splice_track(&mut ids, splice.position, &splice.suggestion.track_id)?;
                let tracks = library::resolve_set(ctx.library.as_ref(), &ids)?;
                if !dry_run {
                    let updated = SetFile {
                        tracks: ids.clone(),
                        ..ctx.set.clone()
                    };
                    updated
                        .save(&set)
                        .with_context(|| format!("Failed to write {}", set.display()))?;
                }
                Ok(tracks)
            };

            let result = workflow.apply_rescue(
                &report,
                Some(index),
                option.checked_sub(1),
                &ctx.weights,
                Some(&mut hook),
            );

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.message);
                if let Some(updated) = &result.updated_report {
                    println!();
                    print_report(updated);
                }
            }
            if !result.success {
                anyhow::bail!("Rescue failed");
            }
        }

        Commands::Weights { set, harmonic, tempo, energy, vocal, arc } => {
            let set_file = SetFile::load(&set).context("Failed to load set")?;
            let mut weights = store
                .load(&set_file.name)
                .context("Failed to load stored weights")?
                .or(set_file.weights)
                .unwrap_or(config.weights);

            let changed = harmonic.is_some()
                || tempo.is_some()
                || energy.is_some()
                || vocal.is_some()
                || arc.is_some();
            weights.harmonic = harmonic.unwrap_or(weights.harmonic);
            weights.tempo = tempo.unwrap_or(weights.tempo);
            weights.energy = energy.unwrap_or(weights.energy);
            weights.vocal = vocal.unwrap_or(weights.vocal);
            if let Some(arc) = arc {
                weights.arc = arc.into();
            }

            if changed {
                if let Some(reason) = weights.unusable_reason() {
                    log::warn!("{reason}: diagnosis will score no transitions");
                }
                store
                    .save(&set_file.name, &weights)
                    .context("Failed to save weights")?;
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&weights)?);
            } else {
                println!("Weights for {}:", set_file.name);
                println!("  harmonic  {:.2}", weights.harmonic);
                println!("  tempo     {:.2}", weights.tempo);
                println!("  energy    {:.2}", weights.energy);
                println!("  vocal     {:.2}", weights.vocal);
                println!("  arc       {:?}", weights.arc);
            }
        }

        Commands::Format { path } => {
            let raw = match path {
                Some(p) => std::fs::read_to_string(&p)
                    .with_context(|| format!("Failed to read {}", p.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            let entries = setdoctor::forensic::format_reasoning(&raw);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
        }
    }

    Ok(())
}

/// Everything a command needs to diagnose one set file.
struct SetContext {
    set: SetFile,
    library: Arc<InMemoryLibrary>,
    weights: FlowWeightSettings,
    diagnoser: Diagnoser,
}

impl SetContext {
    fn load(
        library_arg: &Option<PathBuf>,
        config: &AppConfig,
        store: &dyn WeightsStore,
        set_path: &Path,
    ) -> Result<Self> {
        // Resolve library path: CLI > config
        let library_path = library_arg
            .clone()
            .or(config.library_path.clone())
            .context("No track library. Pass --library or set library_path in config.")?;
        let library = Arc::new(
            InMemoryLibrary::load(&library_path).context("Failed to load track library")?,
        );

        let set = SetFile::load(set_path).context("Failed to load set")?;

        // Resolve weights: stored > set file > config
        let weights = match store.load(&set.name) {
            Ok(Some(w)) => w,
            Ok(None) => set.weights.unwrap_or(config.weights),
            Err(e) => {
                log::warn!("Ignoring stored weights for {}: {e}", set.name);
                set.weights.unwrap_or(config.weights)
            }
        };

        let recommender = LibraryRecommender::new(Arc::clone(&library));
        let diagnoser =
            Diagnoser::with_recommender(Arc::new(recommender)).rescue_limit(config.rescue_limit);

        Ok(Self {
            set,
            library,
            weights,
            diagnoser,
        })
    }

    fn diagnose(&self) -> Result<StressDiagnosticReport> {
        let tracks =
            library::resolve_set(self.library.as_ref(), &self.set.tracks).context("Failed to resolve set")?;
        self.diagnoser
            .diagnose(&tracks, &self.weights)
            .context("Diagnosis failed")
    }
}

/// Print the health bar, then one row per transition.
fn print_report(report: &StressDiagnosticReport) {
    println!(
        "Health {:.0}/100 — {}",
        report.overall_health_score, report.quick_summary
    );
    if report.is_empty() {
        return;
    }

    let segments = healthbar::project(report);
    println!("[{}]", render_bar(&segments));
    println!();

    println!(
        "{:>3} {:<28} {:<28} {:>5} {:<8} {}",
        "#", "From", "To", "Sev", "Level", "Problem"
    );
    println!("{}", "-".repeat(100));

    for p in &report.stress_points {
        let rescue = if p.has_rescue() { " *" } else { "" };
        println!(
            "{:>3} {:<28} {:<28} {:>5.1} {:<8} {}{}",
            p.from_index,
            truncate(&p.from_label, 28),
            truncate(&p.to_label, 28),
            p.severity_score,
            p.severity_level.label(),
            p.primary_problem,
            rescue,
        );
    }

    if let Some(worst) = report.worst().filter(|p| p.severity_level != SeverityLevel::Healthy) {
        println!();
        println!(
            "Weakest link: #{} {} → {} ({:.1}, {})",
            worst.from_index,
            worst.from_label,
            worst.to_label,
            worst.severity_score,
            worst.primary_problem
        );
    }

    // Legend
    println!();
    println!("= healthy  ~ warning  ! critical   * rescue available (see `inspect`)");
}

fn render_bar(segments: &[HealthBarSegment]) -> String {
    let mut bar = String::with_capacity(BAR_WIDTH);
    let mut filled = 0.0_f64;
    for s in segments {
        filled += s.width * BAR_WIDTH as f64;
        let glyph = match s.severity_level {
            SeverityLevel::Healthy => '=',
            SeverityLevel::Warning => '~',
            SeverityLevel::Critical => '!',
        };
        while (bar.chars().count() as f64) < filled.round() {
            bar.push(glyph);
        }
    }
    bar
}

fn print_entries(entries: &[ForensicVerdictEntry]) {
    for e in entries {
        match e.kind {
            EntryKind::Section => {
                println!();
                println!("{}", e.text);
            }
            EntryKind::Bullet => println!("  - {}", e.text),
            EntryKind::Warning => println!("  ! {}", e.text),
            EntryKind::Success => println!("  + {}", e.text),
            EntryKind::Detail => println!("      {}", e.text),
            EntryKind::Verdict => println!("  >> {}", e.text),
        }
    }
}

/// Truncate to `max` characters, marking the cut with "...".
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
