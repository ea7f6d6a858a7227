use std::fs::File;
use std::io::{self, Read};

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use authstate::script::{self, Command, ScriptError, SignUpArgs};
use authstate::{AuthError, ClientConfig, ConfigError, Notice, SessionStore};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
    #[error("failed to read script: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{failures} of {total} script commands failed")]
    ScriptFailed { failures: usize, total: usize },
}

#[derive(Parser, Debug)]
#[command(name = "authctl", about = "Session client for the auth API")]
struct Cli {
    #[arg(long, env = "AUTH_API_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Create an account and start a session.
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// Probe the profile endpoint.
    Profile,
    Refresh,
    Get {
        path: String,
    },
    Post {
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// Run a line-based command script against one session.
    Script {
        #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
        input: String,
    },
}

impl CliCommand {
    /// `None` for `script`, whose commands come from its input.
    fn into_command(self) -> Result<Option<Command>, CliError> {
        Ok(Some(match self {
            Self::Signup { name, email, password, confirm_password } => {
                Command::SignUp(SignUpArgs { name, email, password, confirm_password })
            }
            Self::Login { email, password } => Command::Login { email, password },
            Self::Logout => Command::Logout,
            Self::Profile => Command::Profile,
            Self::Refresh => Command::Refresh,
            Self::Get { path } => Command::Get { path },
            Self::Post { path, data } => {
                let body = data.as_deref().map(serde_json::from_str::<serde_json::Value>).transpose()?;
                Command::Post { path, body }
            }
            Self::Script { .. } => return Ok(None),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    tracing::info!(base_url = %config.base_url, "authctl starting");

    let store = SessionStore::from_config(&config)?;
    let mut notices = store.subscribe_notices();

    let (commands, keep_going) = match cli.command {
        CliCommand::Script { input } => (script::parse_script(&read_input(&input)?)?, true),
        single => (single.into_command()?.into_iter().collect::<Vec<_>>(), false),
    };

    let mut failures = 0usize;
    for command in &commands {
        let result = script::run(&store, command).await;
        print_notices(&mut notices);
        match result {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(e) if keep_going => {
                failures += 1;
                eprintln!("error [{}]: {e}", e.error_code());
            }
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(commands = commands.len(), failures, "authctl finished");
    script_outcome(failures, commands.len())
}

fn script_outcome(failures: usize, total: usize) -> Result<(), CliError> {
    if failures == 0 { Ok(()) } else { Err(CliError::ScriptFailed { failures, total }) }
}

fn read_input(input: &str) -> io::Result<String> {
    let mut text = String::new();
    if input == "-" {
        io::stdin().read_to_string(&mut text)?;
    } else {
        File::open(input)?.read_to_string(&mut text)?;
    }
    Ok(text)
}

fn print_notices(notices: &mut broadcast::Receiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        if notice.is_error() {
            eprintln!("! {}", notice.message());
        } else {
            println!("* {}", notice.message());
        }
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
