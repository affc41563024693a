use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use graviton_probe::analyzer::{JsonKnowledgeBase, RuntimeAnalyzer, static_results};
use graviton_probe::config::AppConfig;
use graviton_probe::ecosystem::Ecosystem;
use graviton_probe::governor::Governor;
use graviton_probe::isolation::container::ContainerEnvironment;
use graviton_probe::isolation::native::NativeEnvironment;
use graviton_probe::isolation::process::TokioProcessRunner;
use graviton_probe::isolation::{AnalysisOptions, IsolationEnvironment};
use graviton_probe::merge::merge;
use graviton_probe::orchestrator::manifest::PackageGroups;
use graviton_probe::orchestrator::run_installer;

#[derive(Parser)]
#[command(name = "graviton-probe")]
#[command(version, about = "Sandboxed ARM64 compatibility testing for package dependencies")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Test declared package versions in isolated environments
    Analyze {
        /// Package groups keyed by ecosystem
        #[arg(long)]
        groups: PathBuf,
        /// Knowledge-base verdicts to merge the runtime results over
        #[arg(long = "static")]
        static_knowledge: Option<PathBuf>,
        /// Use docker/podman instead of native subprocesses
        #[arg(long)]
        containers: bool,
        #[arg(long)]
        os_version: Option<String>,
        /// Merged results file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Directory receiving a copy of each result file
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Keep work directories and images
        #[arg(long)]
        keep_temp: bool,
    },
    /// Test one ecosystem's manifest in the current environment
    RunInstaller {
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Inspect or clear the registry metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Clear {
        #[arg(long)]
        ecosystem: Option<Ecosystem>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let _guard = graviton_probe::logging::init(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Analyze {
            groups,
            static_knowledge,
            containers,
            os_version,
            output,
            output_dir,
            keep_temp,
        } => {
            let mut config = config;
            config.isolation.use_containers |= containers;
            config.isolation.preserve_for_debug |= keep_temp;
            if let Some(os_version) = os_version {
                config.isolation.os_version = os_version;
            }
            if output_dir.is_some() {
                config.isolation.output_dir = output_dir;
            }
            runtime.block_on(analyze(
                &config,
                &groups,
                static_knowledge.as_deref(),
                output.as_deref(),
            ))
        }
        Command::RunInstaller { manifest, output } => {
            let governor = Arc::new(Governor::new(&config.cache));
            let report = runtime.block_on(run_installer(
                &manifest,
                &output,
                Arc::new(TokioProcessRunner),
                Some(governor),
            ))?;
            let code = report.exit_code();
            if code != 0 {
                warn!("Incompatible {} dependencies found", report.ecosystem);
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Cache { action } => {
            let governor = Governor::new(&config.cache);
            match action {
                CacheAction::Stats => {
                    println!("{}", serde_json::to_string_pretty(&governor.stats())?);
                }
                CacheAction::Clear { ecosystem } => {
                    let removed = governor.clear(ecosystem)?;
                    info!("Removed {} cache documents", removed);
                }
            }
            Ok(())
        }
    }
}

async fn analyze(
    config: &AppConfig,
    groups_path: &Path,
    static_knowledge: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let groups = PackageGroups::load(groups_path)?;
    let installer = std::env::current_exe()?;
    let runner = Arc::new(TokioProcessRunner);

    let environment: Box<dyn IsolationEnvironment> = if config.isolation.use_containers {
        Box::new(ContainerEnvironment::new(
            runner,
            installer,
            config.isolation.clone(),
        ))
    } else {
        Box::new(NativeEnvironment::new(runner, installer))
    };

    let mut analyzer = RuntimeAnalyzer::new(environment)
        .with_options(AnalysisOptions {
            sbom_name: None,
            output_dir: config.isolation.output_dir.clone(),
        })
        .preserve_for_debug(config.isolation.preserve_for_debug);
    let analysis = analyzer.analyze(&groups).await;
    for report in analysis.reports.iter().filter(|r| r.error.is_some()) {
        warn!(
            "{}: {}",
            report.ecosystem,
            report.error.as_deref().unwrap_or_default()
        );
    }

    // Every declared version gets a baseline entry, so a failed ecosystem
    // still shows up as Unknown
    let knowledge_base = match static_knowledge {
        Some(path) => JsonKnowledgeBase::load(path)?,
        None => JsonKnowledgeBase::default(),
    };
    let mut baseline = static_results(&knowledge_base, &groups);
    analysis.annotate_failures(&mut baseline);
    let merged = merge(baseline, analysis.components());
    info!(
        "{} components: {} compatible, {} incompatible, {} need upgrade",
        merged.counts.total,
        merged.counts.compatible,
        merged.counts.incompatible,
        merged.counts.needs_upgrade
    );

    let json = serde_json::to_string_pretty(&merged)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}
