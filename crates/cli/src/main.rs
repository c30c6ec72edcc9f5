mod config;
mod error;
mod web;

use std::io::{self, BufRead, Write};

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{
    Backend, CompletionClient, ContextBuilder, HistoryStore, Message, Role, Session, ToolCall,
    ToolContext, ToolHost, ToolRegistry, ToolResult, TurnObserver, TurnOutcome, WorkspaceContext,
};
use storage::SessionStore;
use tracing_subscriber::EnvFilter;

use config::{API_KEY_ENV, Config, Paths};
use error::{Error, Result};
use web::WebState;

const DEFAULT_SESSION: &str = "cli:default";
const MAX_RETRIES: usize = 2;
const PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "roxy")]
#[command(about = "A small tool-using AI agent for your terminal", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Session name
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
        /// Discard the stored history before starting
        #[arg(long)]
        clear: bool,
    },
    /// Create the default config and workspace files
    Onboard,
    /// List stored sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show the message log of a session
    Logs {
        /// Session name
        #[arg(short, long)]
        session: String,
    },
    /// Serve the chat in a browser over a WebSocket
    Web {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so they never interleave with streamed replies.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::from_env()?;

    match cli.command {
        Some(Commands::Chat { session, clear }) => cmd_chat(&paths, &session, clear).await,
        None => cmd_chat(&paths, DEFAULT_SESSION, false).await,
        Some(Commands::Onboard) => cmd_onboard(&paths),
        Some(Commands::Sessions { limit }) => cmd_sessions(&paths, limit),
        Some(Commands::Logs { session }) => cmd_logs(&paths, &session),
        Some(Commands::Web { port, host }) => cmd_web(&paths, &host, port).await,
    }
}

async fn cmd_chat(paths: &Paths, session_name: &str, clear: bool) -> Result<()> {
    let config = Config::load(paths.config_file())?;
    let endpoint = config.endpoint(std::env::var(API_KEY_ENV).ok())?;

    let client = CompletionClient::builder(&endpoint.api_key, &endpoint.model)
        .base_url(&endpoint.base_url)
        .stream(config.agent.stream)
        .build();

    let workspace = config.workspace(paths);
    std::fs::create_dir_all(&workspace)?;
    let tools = ToolRegistry::with_builtins(ToolContext::new(&workspace, config.policy()?))?;
    let context = WorkspaceContext::new(&workspace);

    let store = SessionStore::open(paths.sessions_dir())?;
    let log = store.log(session_name);
    if clear && log.clear()? {
        println!("Cleared session {session_name}.");
    }
    let history: Vec<Message> = log.load()?;
    tracing::debug!(session = session_name, messages = history.len(), "loaded session history");

    println!("roxy v{}", env!("CARGO_PKG_VERSION"));
    println!("Model: {}/{}", endpoint.provider, endpoint.model);
    println!("Workspace: {}", workspace.display());
    println!("Session: {session_name} ({} messages)", history.len());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let mut session = Session::new(client, tools, context)
        .with_max_iterations(config.agent.max_iterations)
        .with_history(history)?
        .with_store(log);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        run_turn(&mut session, input).await?;
    }

    println!("\nSession saved.");
    Ok(())
}

/// Run one turn, offering a bounded, confirmed retry after transport failures.
async fn run_turn<B, T, C, S>(session: &mut Session<B, T, C, S>, input: &str) -> Result<()>
where
    B: Backend,
    T: ToolHost,
    C: ContextBuilder,
    S: HistoryStore,
{
    let mut printer = Printer::default();
    let mut result = session.chat(input, &mut printer).await;
    let mut retries = 0;

    loop {
        match result {
            Ok(outcome) => {
                printer.finish(&outcome, session.history());
                return Ok(());
            }
            Err(e) if e.is_transport() && retries < MAX_RETRIES => {
                printer.interrupt();
                eprintln!("Error: {e}");
                retries += 1;
                if !confirm(&format!("Retry? ({retries}/{MAX_RETRIES}) [y/N] "))? {
                    return Ok(());
                }
                printer = Printer::default();
                result = session.retry(&mut printer).await;
            }
            Err(e @ runtime::Error::Storage(_)) => return Err(e.into()),
            Err(e) => {
                printer.interrupt();
                eprintln!("Error: {e}\n");
                return Ok(());
            }
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// Prints a turn to the terminal as it happens.
#[derive(Default)]
struct Printer {
    streamed: bool,
}

impl Printer {
    fn interrupt(&mut self) {
        if self.streamed {
            println!();
            self.streamed = false;
        }
    }

    fn finish(&mut self, outcome: &TurnOutcome, history: &[Message]) {
        match outcome {
            TurnOutcome::Done { reply: Some(reply) } if !self.streamed => println!("{reply}"),
            TurnOutcome::Done { .. } => {}
            TurnOutcome::LimitReached { .. } => {
                self.interrupt();
                if let Some(notice) = history.last() {
                    println!("{}", notice.text());
                }
            }
        }
        if self.streamed {
            println!();
        }
        println!();
    }
}

impl TurnObserver for Printer {
    fn on_delta(&mut self, delta: &str) {
        print!("{delta}");
        let _ = io::stdout().flush();
        self.streamed = true;
    }

    fn on_tool_calls(&mut self, calls: &[ToolCall]) {
        self.interrupt();
        for call in calls {
            println!("  [tool] {}({})", call.name(), call.function.arguments);
        }
    }

    fn on_tool_results(&mut self, results: &[ToolResult]) {
        for result in results.iter().filter(|r| r.is_error()) {
            println!("  [tool] {} failed: {}", result.name, preview(&result.content()));
        }
    }
}

async fn cmd_web(paths: &Paths, host: &str, port: u16) -> Result<()> {
    let config = Config::load(paths.config_file())?;
    let endpoint = config.endpoint(std::env::var(API_KEY_ENV).ok())?;
    let client = CompletionClient::builder(&endpoint.api_key, &endpoint.model)
        .base_url(&endpoint.base_url)
        .stream(config.agent.stream)
        .build();

    let workspace = config.workspace(paths);
    std::fs::create_dir_all(&workspace)?;
    let store = SessionStore::open(paths.sessions_dir())?;
    let state = WebState::new(
        client,
        workspace,
        config.policy()?,
        store,
        config.agent.max_iterations,
    );

    println!("Model: {}/{}", endpoint.provider, endpoint.model);
    web::serve(state, host, port).await
}

fn cmd_onboard(paths: &Paths) -> Result<()> {
    let config_file = paths.config_file();
    if config::write_default_config(paths)? {
        println!("Created {}", config_file.display());
    } else {
        println!("Config already exists: {}", config_file.display());
    }

    let config = Config::load(&config_file)?;
    let workspace = config.workspace(paths);
    let created = config::init_workspace(&workspace)?;
    for path in &created {
        println!("Created {}", path.display());
    }
    println!("Workspace: {}", workspace.display());

    if config.endpoint(std::env::var(API_KEY_ENV).ok()).is_err() {
        println!(
            "\nAdd an api_key to {} or set {API_KEY_ENV} before running 'roxy chat'.",
            config_file.display()
        );
    }
    Ok(())
}

fn cmd_sessions(paths: &Paths, limit: usize) -> Result<()> {
    let store = SessionStore::open(paths.sessions_dir())?;
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<32}  {:<20}  MSGS", "SESSION", "UPDATED");
    println!("{}", "-".repeat(64));

    for summary in sessions.into_iter().take(limit) {
        let updated = Local
            .from_utc_datetime(&summary.updated_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!(
            "{:<32}  {:<20}  {}",
            summary.name, updated, summary.record_count
        );
    }

    Ok(())
}

fn cmd_logs(paths: &Paths, session_name: &str) -> Result<()> {
    let store = SessionStore::open(paths.sessions_dir())?;
    let log = store.log(session_name);
    let messages: Vec<Message> = log.load()?;

    if messages.is_empty() {
        return Err(Error::SessionNotFound {
            name: session_name.to_string(),
        });
    }

    println!("Session: {session_name}\n");
    for message in &messages {
        print_message(message);
    }
    Ok(())
}

fn print_message(message: &Message) {
    let time = Local
        .from_utc_datetime(&message.timestamp.naive_utc())
        .format("%H:%M:%S");

    let role = match message.role {
        Role::System => "SYSTEM",
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
        Role::Tool => "TOOL",
    };

    if !message.text().is_empty() {
        println!("[{time}] {role}: {}", preview(message.text()));
    }
    for call in message.tool_calls() {
        println!(
            "[{time}] TOOL CALL: {} {} ({})",
            call.name(),
            call.function.arguments,
            call.id
        );
    }
}

/// Truncate long text for display.
fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
