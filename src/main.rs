//! ECR CI pipeline CLI
//!
//! Entry point for the `ecr-ci` command-line tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use ecr_build_runner::{BuildRunner, RunnerConfig};
use ecr_ci_pipeline::config::{
    cli_overrides, default_host_config_path, CliOverrides, REPO_CONFIG_PATH,
};
use ecr_ci_pipeline::logging;
use ecr_ci_pipeline::source::{SourceTrigger, TriggerDecision};
use ecr_ci_pipeline::{
    ConfigError, EcrCiStack, EffectiveConfig, ExitCode, FailureKind, LocalCheckout,
    LocalPipeline, PushEvent, RunReport, StackConfig,
};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ecr-ci")]
#[command(about = "GitHub to ECR image CI pipeline", version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// Application identifier (same as --context appName=<name>)
    #[arg(long)]
    app_name: Option<String>,

    /// Config override as key=value; repeatable
    #[arg(long = "context", short = 'c', value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Target account id
    #[arg(long)]
    account: Option<String>,

    /// Target region
    #[arg(long)]
    region: Option<String>,

    /// Path to repo config file (default: .ecr-ci/stack.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildSpecFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CloudFormation template, buildspec and synth manifest
    Synth {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output directory
        #[arg(long, short = 'o', default_value = "cdk.out")]
        out: PathBuf,
    },

    /// Validate the configuration and print the resolved pipeline
    Validate {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the effective config as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the build project's buildspec
    Buildspec {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long, value_enum, default_value = "yaml")]
        format: BuildSpecFormat,
    },

    /// Explain whether a push event would start the pipeline
    ExplainTrigger {
        #[command(flatten)]
        config: ConfigArgs,

        /// Push event payload (JSON)
        #[arg(long)]
        event: PathBuf,
    },

    /// Replay a push event locally: snapshot the source and run the build
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Push event payload (JSON)
        #[arg(long)]
        event: PathBuf,

        /// Checkout standing in for the pushed commit
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Where run directories are created (default: run.runs_dir)
        #[arg(long)]
        runs_dir: Option<PathBuf>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_from_env(cli.log_level.as_deref());

    let code = match cli.command {
        Commands::Synth { config, out } => run_synth(&config, &out),
        Commands::Validate { config, json } => run_validate(&config, json),
        Commands::Buildspec { config, format } => run_buildspec(&config, format),
        Commands::ExplainTrigger { config, event } => run_explain_trigger(&config, &event),
        Commands::Run {
            config,
            event,
            source,
            runs_dir,
            json,
        } => run_local(&config, &event, &source, runs_dir, json),
    };
    process::exit(code.as_i32());
}

fn fail(kind: FailureKind, message: impl std::fmt::Display) -> ExitCode {
    eprintln!("{}: {}", kind.description(), message);
    kind.exit_code()
}

fn repo_config_path(args: &ConfigArgs) -> PathBuf {
    args.config
        .clone()
        .unwrap_or_else(|| PathBuf::from(REPO_CONFIG_PATH))
}

/// Directory relative paths in the config resolve against: the working
/// directory, or the directory of an explicit `--config` file.
fn base_dir(args: &ConfigArgs) -> PathBuf {
    match &args.config {
        Some(path) => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        None => PathBuf::from("."),
    }
}

fn load_config(args: &ConfigArgs) -> Result<(EffectiveConfig, StackConfig), ConfigError> {
    let overrides = CliOverrides {
        app_name: args.app_name.clone(),
        context: args.context.clone(),
        account: args.account.clone(),
        region: args.region.clone(),
    };
    let host = default_host_config_path();
    let repo = repo_config_path(args);
    let effective = EffectiveConfig::build(
        host.as_deref(),
        Some(repo.as_path()),
        cli_overrides(&overrides)?,
    )?;
    let stack_config = effective.stack_config()?;
    Ok((effective, stack_config))
}

fn load_stack(args: &ConfigArgs) -> Result<(EffectiveConfig, EcrCiStack), ExitCode> {
    let (effective, stack_config) =
        load_config(args).map_err(|e| fail(FailureKind::Configuration, e))?;
    let stack = EcrCiStack::from_config(stack_config, &base_dir(args))
        .map_err(|e| fail(FailureKind::Configuration, e))?;
    Ok((effective, stack))
}

fn run_synth(args: &ConfigArgs, out: &Path) -> ExitCode {
    let (effective, stack) = match load_stack(args) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    match stack.synthesize(out, &effective) {
        Ok(manifest) => {
            for file in &manifest.files {
                println!("{}  {}", file.sha256, out.join(&file.path).display());
            }
            ExitCode::Success
        }
        Err(e) => fail(FailureKind::Synthesis, e),
    }
}

fn run_validate(args: &ConfigArgs, json: bool) -> ExitCode {
    let (effective, stack) = match load_stack(args) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    if json {
        return match effective.to_json() {
            Ok(text) => {
                println!("{}", text);
                ExitCode::Success
            }
            Err(e) => fail(FailureKind::Io, e),
        };
    }

    let source = stack.source();
    println!("Configuration valid");
    println!();
    println!("  App name: {}", stack.app_name());
    println!("  Stack: {}", stack.stack_name());
    println!("  Pipeline: {}", stack.pipeline().name());
    println!(
        "  Source: {} @ {} (trigger: {})",
        source.full_name(),
        source.branch,
        source.trigger
    );
    println!("  Image repository: {}", stack.repository_uri());
    for stage in stack.pipeline().stages() {
        for action in stage.actions() {
            println!("  Stage {}: {}", stage.name(), action.name());
        }
    }
    for origin in &effective.sources {
        match &origin.path {
            Some(path) => println!("  Config layer: {:?} {}", origin.origin, path),
            None => println!("  Config layer: {:?}", origin.origin),
        }
    }
    ExitCode::Success
}

fn run_buildspec(args: &ConfigArgs, format: BuildSpecFormat) -> ExitCode {
    let (_, stack) = match load_stack(args) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let rendered = match format {
        BuildSpecFormat::Yaml => stack.buildspec().to_yaml(),
        BuildSpecFormat::Json => stack.buildspec().to_json_pretty(),
    };
    match rendered {
        Ok(text) => {
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
            ExitCode::Success
        }
        Err(e) => fail(FailureKind::Synthesis, e),
    }
}

fn run_explain_trigger(args: &ConfigArgs, event_path: &Path) -> ExitCode {
    let (_, stack) = match load_stack(args) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let event = match PushEvent::from_file(event_path) {
        Ok(event) => event,
        Err(e) => return fail(FailureKind::Configuration, e),
    };

    match SourceTrigger::new(stack.source().clone()).evaluate(&event) {
        TriggerDecision::Fire(revision) => {
            println!(
                "fire: {}/{} branch {} at {}",
                revision.owner, revision.repo, revision.branch, revision.commit
            );
        }
        TriggerDecision::Ignore(reason) => println!("ignore: {}", reason),
    }
    ExitCode::Success
}

fn run_local(
    args: &ConfigArgs,
    event_path: &Path,
    source: &Path,
    runs_dir: Option<PathBuf>,
    json: bool,
) -> ExitCode {
    let (effective, stack) = match load_stack(args) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    let event = match PushEvent::from_file(event_path) {
        Ok(event) => event,
        Err(e) => return fail(FailureKind::Configuration, e),
    };
    let checkout = match LocalCheckout::new(source) {
        Ok(checkout) => checkout,
        Err(e) => return fail(FailureKind::SourceFetch, e),
    };

    let run_config = &stack.config().run;
    let runner = BuildRunner::new(RunnerConfig {
        shell: run_config.shell.clone(),
        timeout: stack.config().build.timeout(),
        poll_interval: Duration::from_millis(50),
        ..RunnerConfig::default()
    });
    let runs_dir = runs_dir.unwrap_or_else(|| run_config.runs_dir.clone());

    let pipeline = match LocalPipeline::new(stack, checkout, runner, |key| std::env::var(key).ok()) {
        Ok(pipeline) => pipeline
            .with_runs_dir(runs_dir)
            .with_effective_config(effective),
        Err(e) => return fail(e.failure_kind(), e),
    };

    let report = match pipeline.execute(&event) {
        Ok(report) => report,
        Err(e) => return fail(e.failure_kind(), e),
    };

    match &report {
        RunReport::Ignored(reason) => println!("Event ignored: {}", reason),
        RunReport::Completed { run_dir, summary } => {
            if json {
                match summary.to_json() {
                    Ok(text) => println!("{}", text),
                    Err(e) => return fail(FailureKind::Io, e),
                }
            } else {
                println!("{}", summary.human_summary);
                if let Some(uri) = &summary.image_uri {
                    println!("Image: {}", uri);
                }
                println!("Run directory: {}", run_dir.display());
            }
        }
    }
    report.exit_code()
}
