use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;

use crate::common::timeutils::ArgDuration;
use crate::server::backend::BackendKind;
use crate::server::submit::SubmitMode;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(
        long,
        env = "DATAJOB_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::DATAJOB_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Commands for the server
    Server(ServerOpts),
    /// Generate shell completion script
    GenerateCompletion(GenerateCompletionOpts),
}

#[derive(Parser)]
pub struct ServerOpts {
    #[clap(subcommand)]
    pub subcmd: ServerCommand,
}

#[derive(Parser)]
pub enum ServerCommand {
    /// Start the job server
    Start(ServerStartOpts),
}

/// Options that are not given on the command line fall back to the configuration file,
/// and then to built-in defaults.
#[derive(Parser, Default, Debug)]
pub struct ServerStartOpts {
    /// Path to a TOML configuration file
    #[arg(long, env = "DATAJOB_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Address on which the HTTP server listens [default: 0.0.0.0]
    #[arg(long, env = "DATAJOB_HOST")]
    pub host: Option<String>,

    /// Port on which the HTTP server listens [default: 8181]
    #[arg(long, env = "DATAJOB_PORT")]
    pub port: Option<u16>,

    /// Backend that executes jobs [default: kubernetes]
    #[arg(long, env = "DATAJOB_BACKEND", value_enum)]
    pub backend: Option<BackendKind>,

    /// Kubernetes namespace in which jobs are created [default: test]
    #[arg(long, env = "DATAJOB_NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to a kubeconfig file.
    /// If not set, the in-cluster configuration or `~/.kube/config` is used.
    #[arg(long, env = "DATAJOB_KUBECONFIG", value_hint = clap::ValueHint::FilePath)]
    pub kubeconfig: Option<PathBuf>,

    /// Container image of jobs [default: nginx]
    #[arg(long, env = "DATAJOB_IMAGE")]
    pub image: Option<String>,

    /// Command executed by jobs, arguments are separated by a comma [default: ls]
    #[arg(long, env = "DATAJOB_COMMAND", value_delimiter(','))]
    pub command: Vec<String>,

    /// Request header that identifies the tenant [default: jwt_token]
    #[arg(long, env = "DATAJOB_TENANT_HEADER")]
    pub tenant_header: Option<String>,

    /// Maximum duration of a single submission to the backend [default: 30s]
    #[arg(long, env = "DATAJOB_SUBMIT_TIMEOUT")]
    pub submit_timeout: Option<ArgDuration>,

    /// Whether job creation waits for the job to finish [default: detached]
    #[arg(long, env = "DATAJOB_SUBMIT_MODE", value_enum)]
    pub submit_mode: Option<SubmitMode>,

    /// Maximum duration of a job run, only used in the `wait` submit mode
    #[arg(long, env = "DATAJOB_RUN_TIMEOUT")]
    pub run_timeout: Option<ArgDuration>,

    /// How often is the status of running jobs refreshed [default: 10s]
    #[arg(long, env = "DATAJOB_RECONCILE_INTERVAL")]
    pub reconcile_interval: Option<ArgDuration>,
}

#[derive(Parser)]
pub struct GenerateCompletionOpts {
    /// Shell flavour for which the completion script should be generated
    #[arg(value_enum)]
    pub shell: Shell,
}
