use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chartdesk::api::{ApiClient, CredentialSlot};
use chartdesk::config::{Config, DEFAULT_LOG_LEVEL};
use chartdesk::gate::GateDecision;
use chartdesk::identity::http::HttpIdentityService;
use chartdesk::patients::{DirectoryError, HttpPatientDirectory, PatientRef};
use chartdesk::session::{LoginOutcome, SessionError, SessionStore};
use chartdesk::shell::AppShell;
use chartdesk::storage::open_store;
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "chartdesk", about = "Records desk session and patient context", version)]
struct Cli {
    /// Backend URL (overrides config and $CHARTDESK_API_URL)
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and persist the session token
    Login {
        #[arg(long, short)]
        username: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        /// Six-digit code, if the account has two-factor enabled
        #[arg(long)]
        code: Option<String>,
    },
    /// Sign out and forget the stored token
    Logout,
    /// Show the session state after restoring it
    Status,
    /// Run the route gate for a path
    Open {
        /// e.g. /patients or /login
        path: String,
    },
    /// Work with the active patient
    #[command(subcommand)]
    Patients(PatientCommands),
}

#[derive(Subcommand)]
enum PatientCommands {
    /// List the roster
    List {
        /// Filter by name, hospital number or phone
        #[arg(long)]
        search: Option<String>,
    },
    /// Make a patient the active one, by hospital number or id
    Select { patient_id: String },
    /// Clear the active patient
    Clear,
    /// Show the active patient
    Current,
}

// ── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise start from the default and switch to the
    // configured level once the config is read.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_set = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL)));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load_or_init()?;
    if !env_set && config.log_level != DEFAULT_LOG_LEVEL {
        filter_handle
            .reload(EnvFilter::new(&config.log_level))
            .context("apply configured log level")?;
    }
    if let Some(server) = cli.server {
        config.api.base_url = server;
        config.validate()?;
    }

    let shell = build_shell(&config)?;
    let session = shell.session().clone();

    match session.rehydrate().await {
        Ok(outcome) => tracing::debug!(?outcome, "Rehydration finished"),
        Err(SessionError::SessionUnverifiable { reason }) => {
            eprintln!("Stored session could not be verified ({reason}); please log in again.");
        }
        Err(e) => return Err(e.into()),
    }

    match cli.command {
        Commands::Login {
            username,
            password,
            code,
        } => cmd_login(&session, &username, password, code).await,
        Commands::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Commands::Status => cmd_status(&session),
        Commands::Open { path } => cmd_open(&shell, &path),
        Commands::Patients(cmd) => cmd_patients(&shell, cmd).await,
    }
}

fn build_shell(config: &Config) -> Result<AppShell> {
    let storage = open_store(&config.storage)?;
    let credential = CredentialSlot::new();
    let api = ApiClient::new(&config.api, credential.clone()).context("Failed to build HTTP client")?;

    let identity = Arc::new(HttpIdentityService::new(api.clone()));
    let directory = Arc::new(HttpPatientDirectory::new(api));
    let session = SessionStore::shared(identity, storage.clone(), credential);

    tracing::debug!(
        backend = storage.name(),
        server = %config.api.base_url,
        "Shell initialized"
    );
    Ok(AppShell::new(session, storage, directory))
}

// ── Command implementations ─────────────────────────────────────────────────

async fn cmd_login(
    session: &SessionStore,
    username: &str,
    password: Option<String>,
    code: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("read password")?,
    };

    match session.login(username, &password).await? {
        LoginOutcome::Authenticated => {}
        LoginOutcome::SecondFactorRequired(challenge) => {
            let code = match code {
                Some(c) => c,
                None => Input::<String>::new()
                    .with_prompt("Verification code")
                    .interact_text()
                    .context("read verification code")?,
            };
            session.complete_second_factor(&challenge, &code).await?;
        }
    }

    println!("Logged in as {username}.");
    Ok(())
}

fn cmd_status(session: &SessionStore) -> Result<()> {
    let state = session.snapshot();
    println!("phase: {}", session.phase());
    if let Some(user) = &state.user {
        println!("user:  {}", user.identifier);
    }
    Ok(())
}

fn cmd_open(shell: &AppShell, path: &str) -> Result<()> {
    let nav = shell.navigate(path);
    match nav.decision {
        GateDecision::Loading => println!("{path} ({}): loading", nav.kind),
        GateDecision::Render {
            mount_active_entity,
        } => {
            println!("{path} ({}): render", nav.kind);
            if mount_active_entity {
                if let Some(active) = shell.active_entity() {
                    match active.selected() {
                        Some(p) => println!("active patient: {}", describe(&p)),
                        None => println!("active patient: none"),
                    }
                }
            }
        }
        GateDecision::Redirect(to) => println!("{path} ({}): redirect to {to}", nav.kind),
    }
    Ok(())
}

async fn cmd_patients(shell: &AppShell, cmd: PatientCommands) -> Result<()> {
    let nav = shell.navigate("/patients");
    let Some(active) = shell.active_entity() else {
        match nav.decision {
            GateDecision::Redirect(to) => bail!("Not logged in (redirected to {to})"),
            _ => bail!("Patient context unavailable"),
        }
    };

    match cmd {
        PatientCommands::List { search } => {
            load_roster(shell, &active).await?;
            let state = active.snapshot();
            let hits = state.search(search.as_deref().unwrap_or_default());
            if hits.is_empty() {
                println!("No patients.");
            }
            for p in hits {
                println!("{}", describe(p));
            }
        }
        PatientCommands::Select { patient_id } => {
            load_roster(shell, &active).await?;
            let found = active
                .snapshot()
                .roster
                .into_iter()
                .find(|p| p.patient_id == patient_id || p.id == patient_id);
            let Some(patient) = found else {
                bail!("No patient with id {patient_id}");
            };
            println!("Selected {}", describe(&patient));
            active.select(patient);
        }
        PatientCommands::Clear => {
            active.clear_selection();
            println!("Selection cleared.");
        }
        PatientCommands::Current => match active.selected() {
            Some(p) => println!("{}", describe(&p)),
            None => println!("No active patient."),
        },
    }
    Ok(())
}

async fn load_roster(shell: &AppShell, active: &chartdesk::ActiveEntityStore) -> Result<()> {
    match active.load_roster().await {
        Ok(_) => Ok(()),
        Err(DirectoryError::Unauthorized) => {
            shell.session().invalidate("roster request unauthorized");
            shell.sync_with_session();
            bail!("Session expired; please log in again")
        }
        Err(e) => Err(e.into()),
    }
}

fn describe(p: &PatientRef) -> String {
    format!(
        "{:<12} {:<28} {}  {}",
        p.patient_id,
        p.display_name(),
        p.date_of_birth,
        p.phone_number
    )
}
