use std::path::PathBuf;
use std::sync::Arc;

use aevum::backend::{self, Backend};
use aevum::config::{BackendConfig, ConfigError};
use aevum::guard::{GuardProfile, UnknownRoute, can_enter_route, protected_route};
use aevum::profile::memory::InMemoryProfileStore;
use aevum::profile::{Clinic, ProfileRow, Role, ScopedProfile};
use aevum::session::memory::InMemorySessionProvider;
use aevum::validation::{SignupForm, validate_signup_form};
use aevum::{Access, AuthError, RoleScopedAuthContext, Route, SignUpOutcome};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

const DEMO_PASSWORD: &str = "123456";
const DEMO_ACCOUNTS: [(&str, Role); 3] = [
    ("demo@test.ro", Role::Patient),
    ("admin@test.ro", Role::Admin),
    ("seller@test.ro", Role::Seller),
];

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.user_message())]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Route(#[from] UnknownRoute),
    #[error("backend not installed")]
    NoBackend,
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "aevum", about = "Aevum portal authentication CLI")]
struct Cli {
    /// Use an in-memory backend seeded with demo accounts.
    #[arg(long, global = true, default_value_t = false)]
    demo: bool,

    /// Persist the session here between runs.
    #[arg(long, env = "AEVUM_SESSION_FILE", global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and print the settled auth state.
    Login(LoginArgs),
    /// Create a patient account.
    Signup(SignupArgs),
    Logout,
    /// Print the current auth state.
    Whoami {
        #[arg(long, default_value_t = false)]
        seller: bool,
    },
    /// Evaluate the route guard for a path.
    Guard(GuardArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long, env = "AEVUM_PASSWORD", hide_env_values = true)]
    password: String,
    /// Resolve the seller profile instead of the patient profile.
    #[arg(long, default_value_t = false)]
    seller: bool,
}

#[derive(Args, Debug)]
struct SignupArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    confirm_password: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    date_of_birth: String,
}

#[derive(Args, Debug)]
struct GuardArgs {
    /// Route path, e.g. `/seller-dashboard`.
    route: String,
    /// Sign in first with these credentials.
    #[arg(long, requires = "password")]
    email: Option<String>,
    #[arg(long, requires = "email")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let backend = if cli.demo {
        demo_backend()
    } else {
        let mut config = BackendConfig::from_env()?;
        if cli.session_file.is_some() {
            config.session_file = cli.session_file;
        }
        Backend::connect(&config).await?
    };
    backend::install(backend);
    let backend = backend::global().ok_or(CliError::NoBackend)?;

    match cli.command {
        Command::Login(args) => run_login(backend, args).await,
        Command::Signup(args) => run_signup(backend, args).await,
        Command::Logout => run_logout(backend).await,
        Command::Whoami { seller } => {
            if seller {
                print_settled(backend.seller_context()).await
            } else {
                print_settled(backend.patient_context()).await
            }
        }
        Command::Guard(args) => run_guard(backend, args).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_login(backend: &Backend, args: LoginArgs) -> Result<(), CliError> {
    if args.seller {
        login_with(backend.seller_context(), &args.email, &args.password).await
    } else {
        login_with(backend.patient_context(), &args.email, &args.password).await
    }
}

async fn login_with<P: ScopedProfile + Serialize>(
    ctx: Arc<RoleScopedAuthContext<P>>,
    email: &str,
    password: &str,
) -> Result<(), CliError> {
    ctx.login(email, password).await?;
    print_settled(ctx).await
}

async fn run_signup(backend: &Backend, args: SignupArgs) -> Result<(), CliError> {
    let form = SignupForm {
        email: args.email,
        password: args.password,
        confirm_password: args.confirm_password,
        first_name: args.first_name,
        last_name: args.last_name,
        phone: args.phone,
        date_of_birth: args.date_of_birth,
    };
    let request = validate_signup_form(&form).map_err(AuthError::Validation)?;
    let ctx = backend.patient_context();
    let outcome = ctx.signup(&request).await?;
    let user = match &outcome {
        SignUpOutcome::SignedIn(session) => &session.user,
        SignUpOutcome::ConfirmationRequired(user) => user,
    };
    print_json(&serde_json::json!({
        "message": outcome.user_message(),
        "confirmation_required": matches!(outcome, SignUpOutcome::ConfirmationRequired(_)),
        "user": user,
    }))
}

async fn run_logout(backend: &Backend) -> Result<(), CliError> {
    let ctx = backend.patient_context();
    ctx.logout().await?;
    print_json(&ctx.snapshot())
}

async fn run_guard(backend: &Backend, args: GuardArgs) -> Result<(), CliError> {
    let route: Route = args.route.parse()?;
    let credentials = args.email.zip(args.password);
    if protected_route(route) == Some(Access::Seller) {
        guard_with(backend.seller_context(), route, credentials).await
    } else {
        guard_with(backend.patient_context(), route, credentials).await
    }
}

async fn guard_with<P: ScopedProfile + GuardProfile + Serialize>(
    ctx: Arc<RoleScopedAuthContext<P>>,
    route: Route,
    credentials: Option<(String, String)>,
) -> Result<(), CliError> {
    if let Some((email, password)) = credentials {
        ctx.login(&email, &password).await?;
    }
    let snapshot = ctx.settled().await;
    print_json(&serde_json::json!({
        "route": route,
        "decision": can_enter_route(&snapshot, route),
        "state": snapshot,
    }))
}

async fn print_settled<P: ScopedProfile + Serialize>(ctx: Arc<RoleScopedAuthContext<P>>) -> Result<(), CliError> {
    let snapshot = ctx.settled().await;
    print_json(&snapshot)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

// =============================================================================
// DEMO BACKEND
// =============================================================================

fn demo_backend() -> Backend {
    let sessions = Arc::new(InMemorySessionProvider::new());
    let store = Arc::new(InMemoryProfileStore::new());
    let clinic = Clinic {
        id: Uuid::new_v4(),
        name: "Aevum București".to_owned(),
        address: Some("Bd. Aviatorilor 12".to_owned()),
    };
    for (email, role) in DEMO_ACCOUNTS {
        let user = sessions.register_account(email, DEMO_PASSWORD);
        store.insert(demo_row(user.id, email, role, &clinic));
    }
    tracing::info!(accounts = DEMO_ACCOUNTS.len(), "demo backend seeded");
    Backend::in_memory(sessions, store)
}

fn demo_row(user_id: Uuid, email: &str, role: Role, clinic: &Clinic) -> ProfileRow {
    let seller = role == Role::Seller;
    ProfileRow {
        id: Uuid::new_v4(),
        user_id,
        email: email.to_owned(),
        first_name: Some("Demo".to_owned()),
        last_name: Some(role.to_string()),
        phone: None,
        date_of_birth: None,
        role: Some(role),
        clinic_id: seller.then_some(clinic.id),
        commission_rate: seller.then_some(10.0),
        total_sales: seller.then_some(0.0),
        total_commission: seller.then_some(0.0),
        clinic: seller.then(|| clinic.clone()),
    }
}
