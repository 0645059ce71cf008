use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use supportdesk::config::{ClientConfig, normalize_base_url};
use supportdesk::error::{ChatError, LOGIN_PATH};
use supportdesk::net::api::{ChatApi, HttpChatApi};
use supportdesk::net::auth::{AuthClient, Registration};
use supportdesk::net::types::{MessageId, Role, SenderKind};
use supportdesk::services::agent_session::AgentSession;
use supportdesk::services::alerts::AlertSink;
use supportdesk::services::customer_session::CustomerSession;
use supportdesk::state::agent::AgentChatState;
use supportdesk::state::auth::{AuthContext, DEFAULT_SESSION_FILE, SessionFile};
use supportdesk::state::customer::{CustomerChatState, CustomerPhase};
use supportdesk::util::format::{badge_label, customer_status_line, format_time, initial, roster_status_label};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not signed in; run `supportdesk login` first")]
    NotSignedIn,
    #[error("the agent inbox requires an agent account (signed in as {0:?})")]
    NotAgent(Role),
}

#[derive(Parser, Debug)]
#[command(name = "supportdesk", about = "Customer support chat client")]
struct Cli {
    /// API base URL, overriding `SUPPORTDESK_API_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "SUPPORTDESK_SESSION_FILE", default_value = DEFAULT_SESSION_FILE)]
    session_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SUPPORTDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SUPPORTDESK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Revoke the stored session.
    Logout,
    /// Show the stored identity.
    Whoami,
    /// Open the customer chat widget.
    Customer,
    /// Open the agent inbox.
    Agent,
}

/// Rings the terminal bell and prints notifications to stderr.
struct TerminalAlertSink;

impl AlertSink for TerminalAlertSink {
    fn notify(&self, title: &str, body: &str) {
        eprintln!("[{title}] {body}");
    }

    fn play_sound(&self) {
        eprint!("\x07");
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config.api_base_url = normalize_base_url(url)?;
    }
    let sessions = SessionFile::new(cli.session_file);

    match cli.command {
        Command::Login { email, password } => run_login(&config, &sessions, &email, &password).await,
        Command::Register { email, password, full_name, role } => {
            run_register(&config, Registration { email, password, full_name, role }).await
        }
        Command::Logout => run_logout(&config, &sessions).await,
        Command::Whoami => run_whoami(&sessions),
        Command::Customer => run_customer(&config, &sessions).await,
        Command::Agent => run_agent(&config, &sessions).await,
    }
}

fn require_session(sessions: &SessionFile) -> Result<AuthContext, CliError> {
    sessions.load()?.ok_or(CliError::NotSignedIn)
}

// =============================================================================
// ACCOUNT
// =============================================================================

async fn run_login(config: &ClientConfig, sessions: &SessionFile, email: &str, password: &str) -> Result<(), CliError> {
    let client = AuthClient::new(config)?;
    let auth = match client.login(email, password).await {
        Ok(auth) => auth,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };
    sessions.save(&auth)?;
    println!("signed in as {} ({:?})", auth.user.full_name, auth.role());
    println!("dashboard: {}", auth.role().dashboard_path());
    Ok(())
}

async fn run_register(config: &ClientConfig, form: Registration) -> Result<(), CliError> {
    let client = AuthClient::new(config)?;
    let user = client.register(&form).await?;
    println!("registered {} as {:?}; sign in with `supportdesk login`", user.email, user.role);
    Ok(())
}

async fn run_logout(config: &ClientConfig, sessions: &SessionFile) -> Result<(), CliError> {
    if let Some(auth) = sessions.load()? {
        let client = AuthClient::new(config)?;
        if let Err(e) = client.logout(&auth.token).await {
            tracing::warn!(error = %e, "server-side logout failed; clearing local session anyway");
        }
    }
    sessions.clear()?;
    println!("signed out");
    Ok(())
}

fn run_whoami(sessions: &SessionFile) -> Result<(), CliError> {
    let auth = require_session(sessions)?;
    println!("{} <{}> id={} role={:?}", auth.user.full_name, auth.user.email, auth.user_id(), auth.role());
    Ok(())
}

// =============================================================================
// CUSTOMER WIDGET
// =============================================================================

struct CustomerView {
    printed: BTreeSet<MessageId>,
    phase: Option<CustomerPhase>,
    unread: usize,
}

impl CustomerView {
    fn render(&mut self, state: &CustomerChatState) {
        let phase = state.phase();
        if self.phase != Some(phase) {
            println!("-- {} --", customer_status_line(phase));
            self.phase = Some(phase);
        }
        for message in state.messages.iter() {
            if self.printed.contains(&message.id) {
                continue;
            }
            let who = match message.sender {
                SenderKind::Customer => "you",
                SenderKind::Agent => "agent",
            };
            let mark = if state.is_highlighted(message) { "*" } else { " " };
            println!("{mark}[{}] {who}: {}", format_time(message.created_at), message.text);
            self.printed.insert(message.id);
        }
        let unread = state.unread();
        if !state.view_open && unread != self.unread && unread > 0 {
            println!("({} unread)", badge_label(unread));
        }
        self.unread = unread;
        if let Some(err) = &state.last_error {
            tracing::debug!(code = err.error_code(), "last error");
        }
    }
}

async fn run_customer(config: &ClientConfig, sessions: &SessionFile) -> Result<(), CliError> {
    let auth = sessions.load()?;
    if auth.is_none() {
        eprintln!("{} (go to {LOGIN_PATH})", ChatError::Unauthenticated.user_message());
    }
    let api: Arc<dyn ChatApi> = Arc::new(HttpChatApi::new(config)?);
    let session = CustomerSession::new(api, Arc::new(TerminalAlertSink), auth, config);
    if let Err(e) = session.mount().await {
        eprintln!("could not restore conversation: {}", e.user_message());
    }
    session.open_view();

    println!("type a message and press enter; /open, /close, /quit");
    let mut view = CustomerView { printed: BTreeSet::new(), phase: None, unread: 0 };
    let mut updates = session.subscribe();
    view.render(&updates.borrow_and_update().clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                view.render(&snapshot);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/open" => session.open_view(),
                    "/close" => session.close_view(),
                    text => {
                        session.set_draft(text);
                        if let Err(e) = session.submit(text).await {
                            eprintln!("! {}", e.user_message());
                            if e == ChatError::Unauthenticated {
                                eprintln!("sign in again (go to {LOGIN_PATH})");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    session.shutdown().await;
    Ok(())
}

// =============================================================================
// AGENT INBOX
// =============================================================================

#[derive(Default)]
struct AgentView {
    printed: BTreeSet<MessageId>,
    selected: Option<u64>,
    total_unread: usize,
}

impl AgentView {
    fn render(&mut self, state: &AgentChatState) {
        if state.selected != self.selected {
            self.printed.clear();
            self.selected = state.selected;
            if let Some(ch) = &state.active {
                let name = ch.customer_name.as_deref().unwrap_or("Customer");
                println!("== #{} [{}] {} ({}) ==", ch.id, initial(ch.customer_name.as_deref()), name, roster_status_label(ch));
            }
        }
        for message in state.messages.iter() {
            if self.printed.contains(&message.id) {
                continue;
            }
            let who = match message.sender {
                SenderKind::Customer => "customer",
                SenderKind::Agent => "you",
            };
            println!(" [{}] {who}: {}", format_time(message.created_at), message.text);
            self.printed.insert(message.id);
        }
        let total = state.total_unread();
        if total != self.total_unread {
            if total > 0 {
                println!("(inbox: {} unread)", badge_label(total));
            }
            self.total_unread = total;
        }
    }
}

fn print_roster(state: &AgentChatState) {
    if state.roster.is_empty() {
        println!("no open conversations");
        return;
    }
    for ch in &state.roster {
        let marker = if state.selected == Some(ch.id) { ">" } else { " " };
        let unread = badge_label(state.unread(ch.id));
        let preview = ch.last_message.as_ref().map_or("", |m| m.message.as_str());
        println!(
            "{marker} #{:<5} [{}] {:<20} {:<10} {:>3}  {}",
            ch.id,
            initial(ch.customer_name.as_deref()),
            ch.customer_name.as_deref().unwrap_or("Customer"),
            roster_status_label(ch),
            unread,
            preview
        );
    }
}

async fn run_agent_command(session: &AgentSession, line: &str) -> Result<bool, ChatError> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().and_then(|raw| raw.trim_start_matches('#').parse::<u64>().ok());
    match (command, arg) {
        ("/quit", _) => return Ok(false),
        ("/list", _) => print_roster(&session.snapshot()),
        ("/select", Some(id)) => session.select_channel(id).await?,
        ("/assign", Some(id)) => session.assign_channel(id).await?,
        ("/select" | "/assign", None) => println!("usage: {command} <channel id>"),
        ("/close", _) => session.close_channel().await?,
        ("/stats", _) => {
            let stats = session.stats().await?;
            println!(
                "open {} | assigned {} | closed {} | total {} | unread {}",
                stats.open, stats.assigned, stats.closed, stats.total, stats.unread
            );
        }
        (other, _) if other.starts_with('/') => println!("unknown command {other}"),
        _ => {
            session.set_draft(line);
            session.send_message(line).await?;
        }
    }
    Ok(true)
}

async fn run_agent(config: &ClientConfig, sessions: &SessionFile) -> Result<(), CliError> {
    let auth = require_session(sessions)?;
    if !auth.is_agent() {
        return Err(CliError::NotAgent(auth.role()));
    }
    let api: Arc<dyn ChatApi> = Arc::new(HttpChatApi::new(config)?);
    let session = AgentSession::new(api, Arc::new(TerminalAlertSink), Some(auth), config);
    session.open_inbox()?;

    println!("commands: /list, /select <id>, /assign <id>, /close, /stats, /quit; other lines are sent");
    let mut view = AgentView::default();
    let mut updates = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                view.render(&snapshot);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match run_agent_command(&session, line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        eprintln!("! {}", e.user_message());
                        if e == ChatError::Unauthenticated {
                            eprintln!("sign in again (go to {LOGIN_PATH})");
                            break;
                        }
                    }
                }
            }
        }
    }
    session.close_inbox();
    session.shutdown().await;
    Ok(())
}
