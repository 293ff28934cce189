//! wsconform: run the Autobahn fuzzing suite against a local WebSocket
//! implementation.
//!
//! # Quick Start
//!
//! ```bash
//! wsconform check
//! wsconform client --client-cmd "target/release/my-client {host} {port}"
//! wsconform server --server-cmd "target/release/my-server {port}"
//! wsconform --json all --client-cmd "my-client {host} {port}" --server-cmd "my-server {port}"
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsconform::cli::check::preflight;
use wsconform::cli::{Outputtable, RunOutput};
use wsconform::container::docker::DockerRuntime;
use wsconform::endpoint::{CommandClient, CommandServer};
use wsconform::{ConformanceRun, HarnessSettings, RunConfig};

#[derive(Parser, Debug)]
#[command(
    name = "wsconform",
    version,
    about = "WebSocket conformance runs against the Autobahn fuzzing suite",
    long_about = "wsconform runs the Autobahn fuzzing suite in Docker against a local\n\
        WebSocket client, server, or both, and collects the reports."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json: bool,

    /// Directory holding fuzzingserver.json and fuzzingclient.json
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Report directory shared with the container (default: <base-dir>/target/reports)
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,

    /// TOML settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the reference image
    #[arg(long, global = true)]
    image: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the local client against the reference fuzzing server
    Client(ClientArgs),

    /// Run the reference fuzzing client against the local server
    Server(ServerArgs),

    /// Run both scenarios, client first
    All(AllArgs),

    /// Check configs, report directory and Docker without running anything
    Check,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Client command; `{host}` and `{port}` are substituted
    #[arg(long)]
    client_cmd: String,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Server command; `{port}` is substituted
    #[arg(long)]
    server_cmd: String,

    /// Seconds to wait for the server to accept connections
    #[arg(long, default_value_t = 10)]
    server_ready_timeout: u64,
}

#[derive(Args, Debug)]
struct AllArgs {
    #[command(flatten)]
    client: ClientArgs,

    #[command(flatten)]
    server: ServerArgs,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(cli: &Cli) -> Result<HarnessSettings, String> {
    let mut settings = match &cli.settings {
        Some(path) => HarnessSettings::load(path).map_err(|e| e.to_string())?,
        None => HarnessSettings::default(),
    };
    if let Some(image) = &cli.image {
        settings.image.clone_from(image);
    }
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn run_config(cli: &Cli) -> RunConfig {
    let config = RunConfig::from_base_directory(&cli.base_dir);
    match &cli.report_dir {
        Some(dir) => config.with_report_directory(dir),
        None => config,
    }
}

fn command_server(args: &ServerArgs) -> Result<CommandServer, String> {
    Ok(CommandServer::parse(&args.server_cmd)
        .map_err(|e| e.to_string())?
        .with_ready_timeout(Duration::from_secs(args.server_ready_timeout)))
}

fn connect_run(settings: HarnessSettings) -> Result<ConformanceRun<DockerRuntime>, String> {
    let runtime = DockerRuntime::connect().map_err(|e| e.to_string())?;
    Ok(ConformanceRun::with_settings(runtime, settings))
}

fn finish(output: &RunOutput, json: bool) -> Result<(), String> {
    println!("{}", output.render(json));
    if output.passed() {
        Ok(())
    } else {
        Err("conformance run did not pass".to_string())
    }
}

fn cmd_client(cli: &Cli, args: &ClientArgs) -> Result<(), String> {
    let settings = load_settings(cli)?;
    let config = run_config(cli);
    let mut client = CommandClient::parse(&args.client_cmd).map_err(|e| e.to_string())?;
    let mut run = connect_run(settings)?;
    let result = run.run_client_under_test(&config, &mut client);
    finish(&RunOutput::single(&result), cli.json)
}

fn cmd_server(cli: &Cli, args: &ServerArgs) -> Result<(), String> {
    let settings = load_settings(cli)?;
    let config = run_config(cli);
    let mut server = command_server(args)?;
    let mut run = connect_run(settings)?;
    let result = run.run_server_under_test(&config, &mut server);
    finish(&RunOutput::single(&result), cli.json)
}

fn cmd_all(cli: &Cli, args: &AllArgs) -> Result<(), String> {
    let settings = load_settings(cli)?;
    let config = run_config(cli);
    let mut client = CommandClient::parse(&args.client.client_cmd).map_err(|e| e.to_string())?;
    let mut server = command_server(&args.server)?;
    let mut run = connect_run(settings)?;
    let outcome = run.run_all(&config, &mut client, &mut server);
    finish(&RunOutput::all(&outcome), cli.json)
}

fn cmd_check(cli: &Cli) -> Result<(), String> {
    let settings = load_settings(cli)?;
    let config = run_config(cli);
    let report = preflight(&config, &settings, || {
        DockerRuntime::connect()?.server_version()
    });
    println!("{}", report.render(cli.json));
    if report.passed() {
        Ok(())
    } else {
        Err("preflight checks failed".to_string())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    info!(
        workspace = %std::env::var("WORKSPACE").unwrap_or_default(),
        base = %cli.base_dir.display(),
        "wsconform starting"
    );

    let result = match &cli.command {
        Command::Client(args) => cmd_client(&cli, args),
        Command::Server(args) => cmd_server(&cli, args),
        Command::All(args) => cmd_all(&cli, args),
        Command::Check => cmd_check(&cli),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}
