use anyhow::{Context, Result};
use clap::Parser;
use class_matcher::auto::{AutoMatchReport, auto_match_all};
use class_matcher::cli::{Cli, Commands, ProjectArgs};
use class_matcher::config::resolve_uid_store_path;
use class_matcher::env::ClassEnvironment;
use class_matcher::executor::{Executor, TaskContext};
use class_matcher::matcher::{Matcher, MatchingStatus};
use class_matcher::matches_io::{self, ReadSummary};
use class_matcher::model::Side;
use class_matcher::uid::{UidAssignment, assign_missing_uids, propagate_uids};
use class_matcher::uid_store::UidStore;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, trace};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Match {
            project,
            output,
            no_auto,
        } => {
            let (mut matcher, replayed) = load_project(&project)?;
            let started = Instant::now();
            let unobfuscated = matcher.match_unobfuscated()?;
            let auto = if no_auto {
                None
            } else {
                let executor = Executor::parallel(matcher.config().threads)?;
                let progress = |p: f64| trace!(progress = p, "auto match");
                let ctx = TaskContext::new(&executor, &progress, Arc::new(AtomicBool::new(false)));
                Some(auto_match_all(&mut matcher, &ctx)?)
            };
            matches_io::write_file(matcher.env(), &output)?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "matching finished");

            let report = MatchOutput {
                output: output.display().to_string(),
                replayed,
                unobfuscated,
                auto,
                status: matcher.status(true),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { project, all } => {
            let (matcher, replayed) = load_project(&project)?;
            let report = StatusOutput {
                replayed,
                status: matcher.status(!all),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Uids {
            project,
            store,
            label_a,
            label_b,
        } => {
            let (matcher, _) = load_project(&project)?;
            let store = UidStore::open(resolve_uid_store_path(store.as_deref())?)?;
            let mut env = matcher.into_env();

            let loaded = store.load_into(&label_a, &mut env, Side::A)?;
            let existing_b = store.load_into(&label_b, &mut env, Side::B)?;
            let propagated = propagate_uids(&mut env);
            let mut counters = store.counters()?;
            let assigned = assign_missing_uids(&mut env, &mut counters);
            let saved = store.save_from(&label_b, &env, Side::B)?;
            store.save_counters(&counters)?;

            let report = UidOutput {
                store: store.path().display().to_string(),
                loaded,
                existing_b,
                propagated,
                assigned,
                saved,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("class_matcher=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads both programs and replays the match file, if any.
fn load_project(project: &ProjectArgs) -> Result<(Matcher, Option<ReadSummary>)> {
    let header = match &project.matches {
        Some(path) => Some(matches_io::read_header_file(path)?),
        None => None,
    };
    let options = project.env_options(header.as_ref())?;
    let env = ClassEnvironment::load(&project.paths(), options).context("Failed to load project")?;
    let mut matcher = Matcher::new(env, project.matcher_config());

    let replayed = match &project.matches {
        Some(path) => Some(matches_io::read_file(&mut matcher, path)?),
        None => None,
    };
    Ok((matcher, replayed))
}

#[derive(Debug, Serialize)]
struct MatchOutput {
    output: String,
    replayed: Option<ReadSummary>,
    unobfuscated: usize,
    auto: Option<AutoMatchReport>,
    status: MatchingStatus,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    replayed: Option<ReadSummary>,
    status: MatchingStatus,
}

#[derive(Debug, Serialize)]
struct UidOutput {
    store: String,
    loaded: usize,
    existing_b: usize,
    propagated: UidAssignment,
    assigned: UidAssignment,
    saved: usize,
}
