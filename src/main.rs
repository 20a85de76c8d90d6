use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcpx::cli::{self, Invocation, Parsed, ParseResult};
use mcpx::config::Catalogue;
use mcpx::credentials::CredentialStore;
use mcpx::daemon;
use mcpx::error::CliResult;
use mcpx::handlers::{self, Context};
use mcpx::settings::Settings;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let settings = Settings::from_env();
    init_tracing(&settings);

    let parsed = match cli::parse_args(std::env::args()) {
        Ok(ParseResult::Help(text)) => {
            print!("{}", text);
            return 0;
        }
        Ok(ParseResult::Run(parsed)) => parsed,
        Err(e) => {
            e.render();
            return e.exit_code();
        }
    };

    if parsed.invocation == Invocation::Version {
        println!("mcpx {}", env!("CARGO_PKG_VERSION"));
        return 0;
    }

    // The daemon worker owns its whole lifecycle, including signal
    // handling; it runs outside the interactive signal race below.
    if let Invocation::Daemon { server } = &parsed.invocation {
        return match daemon::worker::run(server, parsed.config.as_deref()).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("mcpx daemon: {:#}", e);
                1
            }
        };
    }

    // Clear out state left behind by daemons that died without cleanup.
    daemon::sweep();

    tokio::select! {
        result = dispatch(parsed, settings) => match result {
            Ok(()) => 0,
            Err(e) => {
                e.render();
                e.exit_code()
            }
        },
        _ = tokio::signal::ctrl_c() => 130,
        _ = wait_for_sigterm() => 143,
    }
}

async fn dispatch(parsed: Parsed, settings: Settings) -> CliResult<()> {
    let catalogue = Catalogue::load(parsed.config.as_deref(), settings.strict_env)?;
    let ctx = Context {
        catalogue,
        store: CredentialStore::from_env(),
        settings,
        with_descriptions: parsed.with_descriptions,
    };

    match parsed.invocation {
        Invocation::List => handlers::run_list(&ctx).await,
        Invocation::Info { server, tool } => {
            handlers::run_info(&ctx, &server, tool.as_deref()).await
        }
        Invocation::Grep { pattern } => handlers::run_grep(&ctx, &pattern).await,
        Invocation::Call { server, tool, json } => {
            handlers::run_call(&ctx, &server, &tool, json.as_deref()).await
        }
        // Handled before dispatch.
        Invocation::Daemon { .. } | Invocation::Version => Ok(()),
    }
}

fn init_tracing(settings: &Settings) {
    let default_directive = if settings.debug { "mcpx=debug" } else { "mcpx=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // stdout carries command output only; all diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
}

async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}
