use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::prelude::*;

use telecare::cli::{self, App, auth, live};
use telecare::config::TelecareConfig;

#[derive(Parser)]
#[command(name = "telecare")]
#[command(about = "Terminal client for the Telecare telehealth service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.telecare)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login(LoginArgs),

    /// Create a patient account
    Register(RegisterArgs),

    /// Forget the stored session
    Logout,

    /// Show the logged-in user
    Whoami(JsonArgs),

    /// Show stats, activity, and appointments
    Dashboard(DashboardArgs),

    /// Open a conversation and chat from stdin
    Chat(ChatArgs),

    /// List conversations
    Conversations(JsonArgs),

    /// Ask the AI assistant about symptoms
    Analyze(AnalyzeArgs),

    /// Search doctors, patients, appointments, and records
    Search(SearchArgs),

    /// List or cancel appointments
    Appointments(AppointmentsArgs),
}

#[derive(Parser)]
struct LoginArgs {
    email: String,

    /// Read from stdin when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Parser)]
struct RegisterArgs {
    email: String,

    #[arg(long)]
    first_name: String,

    #[arg(long)]
    last_name: String,

    /// Read from stdin when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Parser)]
struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct DashboardArgs {
    /// Keep the live channel open and reprint on every update
    #[arg(short, long)]
    watch: bool,
}

#[derive(Parser)]
struct ChatArgs {
    conversation_id: String,
}

#[derive(Parser)]
struct AnalyzeArgs {
    /// Comma-separated, e.g. "headache, fever"
    symptoms: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct SearchArgs {
    keyword: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct AppointmentsArgs {
    /// Cancel the appointment with this id instead of listing
    #[arg(long, value_name = "ID")]
    cancel: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TelecareConfig::new(cli.data_dir.clone())?;
    init_logging(&config, cli.debug);
    debug!("Using data directory {}", config.data_dir.display());

    let app = App::new(config)?;

    match cli.command {
        Commands::Login(args) => auth::login_command(&app, args.email, args.password).await,
        Commands::Register(args) => {
            auth::register_command(
                &app,
                args.email,
                args.first_name,
                args.last_name,
                args.password,
            )
            .await
        }
        Commands::Logout => auth::logout_command(&app).await,
        Commands::Whoami(args) => auth::whoami_command(&app, args.json).await,
        Commands::Dashboard(args) => live::dashboard_command(&app, args.watch).await,
        Commands::Chat(args) => live::chat_command(&app, &args.conversation_id).await,
        Commands::Conversations(args) => cli::conversations_command(&app, args.json).await,
        Commands::Analyze(args) => cli::analyze_command(&app, &args.symptoms, args.json).await,
        Commands::Search(args) => cli::search_command(&app, &args.keyword, args.json).await,
        Commands::Appointments(args) => match args.cancel {
            Some(id) => cli::cancel_appointment_command(&app, &id).await,
            None => cli::appointments_command(&app, args.json).await,
        },
    }
}

/// Log to `<data_dir>/logs/telecare.log` so output never interleaves with
/// interactive commands; fall back to stderr if the file cannot be opened.
fn init_logging(config: &TelecareConfig, debug: bool) {
    let default_directive = if debug {
        "telecare=debug,info"
    } else {
        "telecare=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path());

    match log_file {
        Ok(file) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
            .with(env_filter)
            .init(),
        Err(_) => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init(),
    }
}
