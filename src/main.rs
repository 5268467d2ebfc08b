use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use llm_chat_core::context::compose_prompt;
use llm_chat_core::{
    capture_selection, Config, ConfigSource, EditorSnapshot, EditorSurface, LayeredConfigSource,
    Overrides, RequestBridge, SendMode,
};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod serve;

#[derive(Parser)]
#[command(name = "llm-chat")]
#[command(about = "Chat with a remote LLM endpoint from your editor", version)]
struct Cli {
    /// Chat endpoint URL (overrides config file and LLM_CHAT_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Bearer API key (overrides config file and LLM_CHAT_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Request timeout in seconds, 0 disables
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the chat panel protocol on stdin/stdout (JSON lines)
    Serve {
        /// Send requests independently instead of one at a time
        #[arg(long)]
        concurrent: bool,
    },
    /// Send one message and print the reply
    Send {
        /// Your message
        text: String,
        /// Attach a file as context
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Line range of the attached file (e.g. 10:20)
        #[arg(short, long, requires = "file", value_parser = parse_line_range)]
        lines: Option<(usize, usize)>,
    },
    /// Print the context that would be attached for a file selection
    Selection {
        path: PathBuf,
        #[arg(short, long, value_parser = parse_line_range)]
        lines: Option<(usize, usize)>,
    },
    /// Inspect or edit the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective settings
    Show,
    /// Print the config file location
    Path,
    SetEndpoint { url: String },
    SetApiKey { key: String },
    SetTimeout { secs: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let overrides = Overrides {
        endpoint: cli.endpoint,
        api_key: cli.api_key,
        timeout_secs: cli.timeout_secs,
    };
    let source = LayeredConfigSource::new(overrides);

    match cli.command {
        Commands::Serve { concurrent } => {
            let mode = if concurrent {
                SendMode::Concurrent
            } else {
                SendMode::Ordered
            };
            serve::run_chat_server(
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                Arc::new(source),
                mode,
            )
            .await?
        }
        Commands::Send { text, file, lines } => send_once(&source, &text, file, lines).await?,
        Commands::Selection { path, lines } => show_selection(&path, lines)?,
        Commands::Config { action } => run_config(&source, action)?,
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "llm_chat=info,llm_chat_core=info,warn".into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Parse `A:B` or a single line `A` (1-based, inclusive).
fn parse_line_range(s: &str) -> Result<(usize, usize), String> {
    let parse = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid line number: {}", part))
    };
    let (first, last) = match s.split_once(':') {
        Some((first, last)) => (parse(first)?, parse(last)?),
        None => {
            let line = parse(s)?;
            (line, line)
        }
    };
    if first == 0 || last < first {
        return Err(format!("invalid line range: {}", s));
    }
    Ok((first, last))
}

async fn send_once(
    source: &LayeredConfigSource,
    text: &str,
    file: Option<PathBuf>,
    lines: Option<(usize, usize)>,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("Message is empty"));
    }

    let editor = match file {
        Some(path) => Some(EditorSnapshot::from_file(&path, lines)?),
        None => None,
    };
    let context = capture_selection(editor.as_ref().map(|e| e as &dyn EditorSurface));
    if let Some(context) = &context {
        println!(
            "📎 Attached {} lines from {}",
            context.text.lines().count().to_string().bold(),
            context.source_label.cyan()
        );
    }

    let config = source.connection().map_err(|e| anyhow!(e.user_notice()))?;
    let prompt = compose_prompt(text, context.as_ref());

    match RequestBridge::new().send_message(&prompt, &config).await {
        Ok(reply) => {
            println!("{}", "Response:".bold().green());
            println!("{}", reply);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            Err(anyhow!(e.user_notice()))
        }
    }
}

fn show_selection(path: &Path, lines: Option<(usize, usize)>) -> Result<()> {
    let editor = EditorSnapshot::from_file(path, lines)?;
    let context = capture_selection(Some(&editor as &dyn EditorSurface))
        .ok_or_else(|| anyhow!("no selection"))?;

    println!("{}", format!("Selected code from {}:", context.source_label).bold().blue());
    println!("{}", context.text);
    Ok(())
}

fn run_config(source: &LayeredConfigSource, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = source.resolve()?;
            let connection = config.connection();
            println!("{}", "LLM chat settings".bold().blue());
            println!("{}", "=".repeat(30).dimmed());
            println!("  endpoint: {}", display_or_unset(&connection.endpoint));
            println!("  apiKey:   {}", display_or_unset(&mask_key(&connection.api_key)));
            match connection.timeout {
                Some(timeout) => println!("  timeout:  {}s", timeout.as_secs()),
                None => println!("  timeout:  {}", "disabled".dimmed()),
            }
            if let Err(e) = connection.validate() {
                println!("\n{}", e.user_notice().yellow());
            }
        }
        ConfigAction::Path => println!("{}", Config::get_config_path()?.display()),
        ConfigAction::SetEndpoint { url } => {
            update_stored_config(|config| config.endpoint = Some(url))?;
            println!("{}", "Endpoint saved".green());
        }
        ConfigAction::SetApiKey { key } => {
            update_stored_config(|config| config.api_key = Some(key))?;
            println!("{}", "API key saved".green());
        }
        ConfigAction::SetTimeout { secs } => {
            update_stored_config(|config| config.timeout_secs = Some(secs))?;
            println!("{}", "Timeout saved".green());
        }
    }
    Ok(())
}

fn update_stored_config<F: FnOnce(&mut Config)>(update: F) -> Result<()> {
    let mut config = Config::load()?;
    update(&mut config);
    config.save()?;
    Ok(())
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 4 {
        "*".repeat(key.chars().count())
    } else {
        format!("{}…", visible)
    }
}

fn display_or_unset(value: &str) -> ColoredString {
    if value.is_empty() {
        "(not set)".red()
    } else {
        value.normal()
    }
}
