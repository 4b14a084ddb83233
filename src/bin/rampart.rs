use clap::Parser;
use rampart::config::{self, ClusterConfig, DEFAULT_CLUSTER_FILE};
use rampart::core::{Cancellation, Environment, Operation, Selection};
use rampart::logger::Logs;
use rampart::run_plan::{self, ActionGraph, Reporter, RunOptions, DEFAULT_CONCURRENCY};
use rampart::state;
use rampart::uplink::openssh::SshUplinkFactory;
use rampart::uplink::{LocalUplinkFactory, UplinkFactory};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit code for problems found before anything ran.
const CONFIG_ERROR: u8 = 2;

#[derive(Parser)]
#[command(
    name = "rampart",
    about = "Brings up, checks, stops, and tears down ZooKeeper, Kafka, and Trogdor clusters",
    version
)]
struct Cli {
    /// The cluster file
    #[arg(long, env = "RAMPART_CLUSTER", default_value = DEFAULT_CLUSTER_FILE)]
    cluster: PathBuf,

    /// Where logs and saved cluster state live (default: ~/.rampart)
    #[arg(long, env = "RAMPART_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// How many actions may run at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Only act on these nodes
    #[arg(long, value_delimiter = ',')]
    nodes: Option<Vec<String>>,

    /// Only act on these roles, by the names the cluster file gives them
    #[arg(long, value_delimiter = ',')]
    roles: Option<Vec<String>>,

    /// Run every command on this machine instead of over SSH
    #[arg(long)]
    local: bool,

    /// Print the order actions would run in, then exit
    #[arg(long)]
    dry_run: bool,

    /// up, status, stop, or down
    operation: Operation,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(CONFIG_ERROR)
        }
    }
}

/// Returns [Err] only for problems found before any action ran.
fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let working_dir = match cli.working_dir {
        Some(dir) => dir,
        None => config::default_working_dir()
            .ok_or_else(|| anyhow::anyhow!("could not find your home directory; pass --working-dir"))?,
    };
    let config = ClusterConfig::load(&cli.cluster)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let cancellation = Cancellation::new();
    let canceller = cancellation.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; cancelling the run");
            canceller.cancel();
        }
    });

    let inventory = Arc::new(state::load(&working_dir)?);
    let logs = Logs::new(working_dir.join("logs"))?;
    let uplinks: Box<dyn UplinkFactory> = match cli.local {
        true => Box::new(LocalUplinkFactory),
        false => Box::new(SshUplinkFactory::new(runtime.handle().clone())),
    };
    let env = Environment::new(&working_dir, cancellation);
    let cluster = config.assemble(env, &logs, uplinks.as_ref(), Arc::clone(&inventory))?;

    let mut selection = Selection::new(cli.operation);
    selection.nodes = cli.nodes.map(BTreeSet::from_iter);
    selection.roles = cli.roles.map(BTreeSet::from_iter);

    if cli.dry_run {
        let graph = ActionGraph::build(selection.select(&cluster))?;
        graph.check_nodes(&cluster)?;
        for &i in graph.order() {
            println!("{}", graph.actions()[i].id());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let options = RunOptions {
        concurrency: cli.concurrency,
    };
    let report = run_plan::run_plan(&cluster, &selection, &options, &mut Reporter)?;

    if let Err(err) = state::save(&working_dir, &inventory) {
        tracing::error!("Could not save cluster state: {err:#}");
    }
    if let Err(err) = run_plan::report::print_summary(&report) {
        tracing::warn!("Could not print the summary: {err}");
    }

    Ok(match report.exit_code() {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
