use anyhow::Context;
use clap::Parser;
use std::io::Write;

mod autocomplete;
mod dashboard;

/// orchestrate drives the query pipeline and join engines through
/// scripted scenarios against simulated sources, and prints their outputs
/// as JSON lines.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Filter of emitted logs, in `tracing_subscriber::EnvFilter` syntax.
    #[clap(long, global = true, default_value = "warn", env = "ORCHESTRATE_LOG")]
    log: String,
    /// Format of logs written to stderr.
    #[clap(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Play an autocomplete script through a query pipeline,
    /// printing each emitted result list.
    Autocomplete(autocomplete::Args),
    /// Join the todos of a fixture with their users,
    /// printing each joined todo.
    Dashboard(dashboard::Args),
    /// Print the JSON schema of a scenario file.
    Spec {
        #[clap(value_enum)]
        scenario: Scenario,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum Scenario {
    Autocomplete,
    Dashboard,
}

fn main() {
    let args = Args::parse();

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.log.as_str());

    match args.log_format {
        LogFormat::Text => builder.init(),
        // Flattened, so that the message and fields aren't nested under "fields".
        LogFormat::Json => builder.json().flatten_event(true).with_target(false).init(),
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build();

    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "couldn't build Tokio runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(args.command));

    if let Err(error) = result {
        tracing::error!(error = format!("{error:#}"), "orchestrate failed");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();

    match command {
        Command::Autocomplete(args) => {
            let script = load(&args.script)?;
            autocomplete::run(script, |results| print_line(&mut stdout, results)).await
        }
        Command::Dashboard(args) => {
            let fixture = load(&args.fixture)?;
            dashboard::run(fixture, |record| print_line(&mut stdout, record)).await?;
            Ok(())
        }
        Command::Spec { scenario } => {
            let schema = match scenario {
                Scenario::Autocomplete => schemars::schema_for!(autocomplete::Script),
                Scenario::Dashboard => schemars::schema_for!(dashboard::Fixture),
            };
            print_line(&mut stdout, &schema)
        }
    }
}

fn load<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    serde_yaml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_line<W: Write, T: serde::Serialize>(w: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *w, value).context("failed to serialize output")?;
    writeln!(w).context("failed to write output")?;
    Ok(())
}
