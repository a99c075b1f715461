use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use cloud_shell::terminal::RawModeGuard;
use cloud_shell::{
    CloudShellConfig, CloudShellError, CloudShellSession, Console, HttpInvoker, SessionOptions,
    SessionReport, ShellKind, TerminalSize,
};

/// Connect to Azure Cloud Shell from the local terminal
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Tenant to connect to (defaults to the first tenant of the account)
    #[arg(long)]
    tenant_id: Option<String>,

    /// Provision a fresh cloud shell instead of reusing the existing one
    #[arg(long)]
    reset: bool,

    /// Shell to start in the cloud shell
    #[arg(long, value_enum, default_value_t = ShellArg::PowerShell)]
    shell: ShellArg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    #[value(name = "powershell", alias = "pwsh")]
    PowerShell,
    Bash,
}

impl From<ShellArg> for ShellKind {
    fn from(arg: ShellArg) -> Self {
        match arg {
            ShellArg::PowerShell => ShellKind::PowerShell,
            ShellArg::Bash => ShellKind::Bash,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => {
            eprintln!("\r\nSession ended ({})", report);
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => match e.downcast_ref::<CloudShellError>() {
            Some(CloudShellError::OperationCancelled) => {
                eprintln!("Cancelled");
                ExitCode::from(130)
            }
            _ => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<SessionReport> {
    let config = CloudShellConfig::default();
    let http =
        HttpInvoker::with_user_agent(&config.user_agent).context("Failed to create HTTP client")?;
    let session = CloudShellSession::new(config, http);

    let cancel = session.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping session");
            cancel.cancel();
        }
    });

    let size = crossterm::terminal::size()
        .map(|(cols, rows)| TerminalSize { cols, rows })
        .unwrap_or_default();

    let options = SessionOptions {
        tenant_id: cli.tenant_id,
        reset: cli.reset,
        shell: cli.shell.into(),
        size,
    };

    let terminal = session
        .provision(&options, |challenge| eprintln!("{}", challenge.message))
        .await?;

    eprintln!("Connecting to {} terminal...", options.shell);
    let _raw_mode = RawModeGuard::enable().context("Failed to enable raw terminal mode")?;
    let report = session
        .attach(&terminal.socket_uri, Console::interactive())
        .await?;

    Ok(report)
}
