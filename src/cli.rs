// SPDX-License-Identifier: Apache-2.0

//! Manage command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command line arguments.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Turn the quiet mode on (i.e., minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// List of supported commands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Supported commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Compile policybooks into target-language policy files
    Transpile(TranspileArgs),
    /// Evaluate policies against a project or a runtime artifact
    Eval(EvalArgs),
}

/// Parameters of the `transpile` sub-command.
#[derive(Debug, Args)]
pub struct TranspileArgs {
    /// A policybook file or a directory of policybooks
    #[arg(short, long)]
    pub input: PathBuf,

    /// The output directory for compiled policies
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Parameters of the `eval` sub-command.
#[derive(Debug, Args)]
pub struct EvalArgs {
    /// The evaluation type: project, jobdata, task_result, event or rest
    #[arg(short = 't', long = "eval-type", default_value = "project")]
    pub eval_type: String,

    /// A config file with `[policy]` and `[source]` sections
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// A policybook directory (used instead of a config file)
    #[arg(long)]
    pub policy_dir: Option<PathBuf>,

    /// The installation root for compiled policies (temporary when omitted)
    #[arg(long)]
    pub root_dir: Option<PathBuf>,

    /// The target project directory (project evaluations)
    #[arg(short = 'd', long)]
    pub project_dir: Option<PathBuf>,

    /// The scanner's output file (defaults to `scan_result.json` inside the
    /// project directory)
    #[arg(long)]
    pub scan_result: Option<PathBuf>,

    /// A jobdata stream file (jobdata evaluations; stdin when omitted)
    #[arg(long)]
    pub jobdata: Option<PathBuf>,

    /// A task result JSON file (task_result evaluations)
    #[arg(long)]
    pub task_result: Option<PathBuf>,

    /// An event JSON file (event evaluations)
    #[arg(long)]
    pub event: Option<PathBuf>,

    /// A REST request JSON file (rest evaluations)
    #[arg(long)]
    pub rest: Option<PathBuf>,

    /// An external data file with galaxy module-name mappings
    #[arg(short = 'g', long)]
    pub external_data: Option<PathBuf>,

    /// A variables file of explicit overrides
    #[arg(long)]
    pub variables: Option<PathBuf>,

    /// The output format: plain, json, event_stream or rest
    #[arg(short, long, default_value = "plain")]
    pub format: String,

    /// Strip this prefix from displayed file paths
    #[arg(long)]
    pub base_dir: Option<String>,

    /// The policy engine executable
    #[arg(long, default_value = "opa")]
    pub engine: String,
}
