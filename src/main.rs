use clap::Parser;
use hserve::cli::{self, Cli, Command, CommonArgs};
use hserve::config::{self, ConfigError, Settings};
use hserve::lifecycle::{Controller, LifecycleError, Request};
use hserve::output::Printer;
use hserve::scanner::ProcFs;
use hserve::serve::{self, ServeSpec};
use hserve::sys::SystemHost;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log filter, e.g. `HSERVE_LOG=debug`.
const LOG_ENV: &str = "HSERVE_LOG";

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Status,
    Restart,
}

fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("{}", cli::HELP_TEXT);
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Command::Help { topic } => Ok(match cli::topic_help(topic.as_deref()) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                Printer::detect(false, cli.json).error(&e, None);
                ExitCode::from(e.exit_code())
            }
        }),
        Command::Serve(args) => run_instance(args.into()),
        Command::Start(args) => operate(Action::Start, &args, cli.json),
        Command::Stop(args) => operate(Action::Stop, &args, cli.json),
        Command::Status(args) => operate(Action::Status, &args, cli.json),
        Command::Restart(args) => operate(Action::Restart, &args, cli.json),
    }
}

fn init_tracing(default_level: &str, ansi: bool) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .try_init();
}

/// The detached instance. Nothing here may write to the launcher's terminal.
fn run_instance(spec: ServeSpec) -> color_eyre::Result<ExitCode> {
    // Before the runtime spawns any threads.
    if let Err(e) = serve::detach(&spec) {
        // stderr is the log file unless opening the log was what failed.
        eprintln!("failed to detach instance: {e}");
        return Ok(ExitCode::FAILURE);
    }
    init_tracing("info", false);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(match runtime.block_on(serve::run(&spec)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

fn operate(action: Action, args: &CommonArgs, json: bool) -> color_eyre::Result<ExitCode> {
    init_tracing("warn", std::io::stderr().is_terminal());
    let printer = Printer::detect(args.no_color, json);

    let request = match resolve_request(args) {
        Ok(request) => request,
        Err(e) => {
            printer.error(&e, None);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };
    tracing::debug!(?request, ?action, "resolved request");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let controller = Controller::new(ProcFs::new(), SystemHost::new());

    let result: Result<(), LifecycleError> = runtime.block_on(async {
        match action {
            Action::Start => controller.start(&request).await.map(|o| printer.start(&o)),
            Action::Stop => controller.stop(&request).await.map(|o| printer.stop(&o)),
            Action::Status => {
                printer.status(&controller.status(&request).await);
                Ok(())
            }
            Action::Restart => controller
                .restart(&request)
                .await
                .map(|o| printer.restart(&o)),
        }
    });

    Ok(match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            printer.error(&e, e.hint());
            ExitCode::from(e.exit_code())
        }
    })
}

/// Settings file, then `SERVE_DIR`, then flags.
fn resolve_request(args: &CommonArgs) -> Result<Request, ConfigError> {
    let file = match hserve::paths::settings_file() {
        Some(path) => config::load_settings(&path)?,
        None => Settings::default(),
    };
    let cwd = std::env::current_dir()
        .map_err(|e| ConfigError::IoError(format!("current directory: {e}")))?;

    file.layer(Settings::from_env())
        .layer(args.to_settings())
        .into_request(&cwd)
}
