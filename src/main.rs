//! devops-promote CLI - promote changes through a DevOps Center pipeline.

use clap::{Args, Parser, Subcommand};
use devops_promote::{
    render_report, render_result, BaseOptions, Config, ConsoleReporter, DevopsClient,
    FileCacheStore, JobCache, JobSelector, OutputMode, PromoteArgs, PromoteError,
    PromotionResult, PromotionVariant, PromotionWorkflow, TestLevel,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Parser)]
#[command(name = "devops-promote")]
#[command(about = "Promote changes through a DevOps Center pipeline and track the resulting jobs")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config dir>/devops-promote/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Show progress events, deployment details and work items
    #[arg(long, global = true, conflicts_with = "concise")]
    verbose: bool,

    /// Show only the job id and status
    #[arg(long, global = true)]
    concise: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Promote the changes waiting for the given stage
    Start {
        #[command(flatten)]
        promote: PromoteFlags,

        /// Only promote work items not yet deployed to the target stage
        #[arg(long)]
        undeployed_only: bool,
    },

    /// Validate a promotion without committing it
    Validate {
        #[command(flatten)]
        promote: PromoteFlags,

        /// Only validate work items not yet deployed to the target stage
        #[arg(long)]
        undeployed_only: bool,
    },

    /// Deploy a previously validated promotion
    Quick {
        #[command(flatten)]
        promote: PromoteFlags,

        /// Deployment id of the validation to deploy
        #[arg(long)]
        deployment_id: Option<String>,

        #[command(flatten)]
        job: JobFlags,
    },

    /// Keep watching a job started earlier
    Resume {
        #[command(flatten)]
        job: JobFlags,

        /// Minutes to wait for the job to finish
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Show the current state of a job
    Report {
        #[command(flatten)]
        job: JobFlags,
    },
}

#[derive(Args)]
struct PromoteFlags {
    /// DevOps Center project name
    #[arg(short, long)]
    project: String,

    /// Branch of the target pipeline stage
    #[arg(short, long)]
    branch: String,

    /// Deploy all metadata in the branch, not only the changes
    #[arg(long)]
    deploy_all: bool,

    /// Apex test level
    #[arg(short = 'l', long)]
    test_level: Option<TestLevel>,

    /// Tests to run with RunSpecifiedTests (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    tests: Vec<String>,

    /// Version name of the change bundle to create
    #[arg(long)]
    bundle_version_name: Option<String>,

    /// Minutes to wait for the job to finish
    #[arg(short, long, conflicts_with = "is_async")]
    wait: Option<u64>,

    /// Return as soon as the job is created
    #[arg(long = "async")]
    is_async: bool,
}

impl PromoteFlags {
    fn into_args(self) -> PromoteArgs {
        PromoteArgs {
            project_name: self.project,
            branch_name: self.branch,
            base: BaseOptions {
                full_deploy: self.deploy_all,
                test_level: self.test_level,
                run_tests: self.tests,
                change_bundle_name: self.bundle_version_name,
            },
            wait: self.wait.map(minutes),
            is_async: self.is_async,
        }
    }
}

#[derive(Args)]
struct JobFlags {
    /// Job id (15 or 18 characters)
    #[arg(short = 'i', long, conflicts_with = "use_most_recent")]
    job_id: Option<String>,

    /// Use the most recent job started from this machine
    #[arg(short = 'r', long)]
    use_most_recent: bool,
}

impl From<JobFlags> for JobSelector {
    fn from(flags: JobFlags) -> Self {
        Self {
            use_most_recent: flags.use_most_recent,
            job_id: flags.job_id,
        }
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else if cli.verbose {
        OutputMode::Verbose
    } else if cli.concise {
        OutputMode::Concise
    } else {
        OutputMode::Normal
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mode = output_mode(&cli);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, stopping watch");
            on_signal.cancel();
        }
    });

    match run(cli, mode, cancel).await {
        Ok(code) => code,
        Err(e) => {
            if mode == OutputMode::Json {
                let body = serde_json::json!({
                    "status": 1,
                    "name": e.code(),
                    "message": e.to_string(),
                });
                println!("{}", body);
            } else {
                eprintln!("Error ({}): {}", e.code(), e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mode: OutputMode, cancel: CancellationToken) -> Result<ExitCode, PromoteError> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    config.validate()?;

    let client = DevopsClient::from_config(&config.org)?;
    let store = match &config.cache.path {
        Some(path) => FileCacheStore::new(path.clone()),
        None => FileCacheStore::new_default()?,
    };
    let cache = JobCache::new(store, config.cache.ttl());
    let reporter = ConsoleReporter::new(mode);
    let workflow = PromotionWorkflow::new(&client, &cache, &reporter, config.workflow_config())
        .with_cancellation(cancel);

    let details = cli.verbose;
    let result = match cli.command {
        Commands::Start {
            promote,
            undeployed_only,
        } => {
            let variant = PromotionVariant::start(undeployed_only);
            workflow.start(&variant, &promote.into_args()).await?
        }
        Commands::Validate {
            promote,
            undeployed_only,
        } => {
            let variant = PromotionVariant::validate(undeployed_only);
            workflow.start(&variant, &promote.into_args()).await?
        }
        Commands::Quick {
            promote,
            deployment_id,
            job,
        } => {
            let args = promote.into_args();
            args.validate(workflow.config().min_wait)?;
            let deployment_id = workflow
                .quick_deployment_id(deployment_id.as_deref(), &job.into())
                .await?;
            workflow
                .start(&PromotionVariant::quick(deployment_id), &args)
                .await?
        }
        Commands::Resume { job, wait } => {
            workflow
                .resume(&job.into(), wait.map(minutes))
                .await?
        }
        Commands::Report { job } => {
            let report = workflow
                .report(&job.into(), details)
                .await?;
            emit(&render_report(
                &report.result,
                report.deployment.as_ref(),
                &report.work_items,
                mode,
            ));
            return Ok(exit_code(&report.result));
        }
    };

    emit(&render_result(&result, mode));
    Ok(exit_code(&result))
}

fn emit(out: &str) {
    if out.ends_with('\n') {
        print!("{}", out);
    } else {
        println!("{}", out);
    }
}

fn exit_code(result: &PromotionResult) -> ExitCode {
    if result.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
