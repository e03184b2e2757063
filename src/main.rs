use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ollama_connect::config::{clear_provider_token, has_provider_token, save_provider_token};
use ollama_connect::db::DEFAULT_CONVERSATION_LIMIT;
use ollama_connect::models::{Provider, Role, TelemetryRow};
use ollama_connect::{init_tracing, AppConfig, Controller, Database, Session};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Chat with local Ollama models and cloud providers, and watch what Ollama is running.
#[derive(Parser, Debug)]
#[command(name = "ollama-connect", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed local models.
    Models,
    /// Show models currently loaded by Ollama.
    Ps {
        /// Keep polling until interrupted.
        #[arg(long)]
        watch: bool,
        /// Only show these models.
        #[arg(short, long = "model")]
        models: Vec<String>,
    },
    /// Print the raw `/api/tags` listing as JSON.
    Tags,
    /// Send one prompt and stream the reply.
    Ask {
        #[command(flatten)]
        target: Target,
        /// Prompt text.
        prompt: String,
    },
    /// Interactive chat reading prompts from stdin.
    Chat {
        #[command(flatten)]
        target: Target,
        /// Persist the conversation after every turn.
        #[arg(long)]
        save: bool,
        /// Continue a stored conversation.
        #[arg(long, conflicts_with = "save")]
        resume: Option<String>,
    },
    /// Manage stored conversations.
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Manage API keys kept in the OS keyring.
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Provider: ollama, openai or gemini.
    #[arg(short, long, default_value = "ollama")]
    provider: Provider,
    /// Model name.
    #[arg(short, long)]
    model: String,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List conversations, most recent first.
    List {
        #[arg(long, default_value_t = DEFAULT_CONVERSATION_LIMIT)]
        limit: usize,
    },
    /// Print the messages of a conversation.
    Show { id: String },
    /// Rename a conversation.
    Rename { id: String, title: String },
    /// Delete a conversation and its messages.
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    /// Store a key; read from stdin when `--token` is omitted.
    Set {
        provider: Provider,
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove a stored key.
    Clear { provider: Provider },
    /// Report whether a key is stored.
    Status { provider: Provider },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    if let Err(error) = init_tracing(&config.log_dir()) {
        eprintln!("logging disabled: {}", error);
    }

    match cli.command {
        Command::Models => list_models(&config).await,
        Command::Ps { watch, models } => show_running(&config, watch, models).await,
        Command::Tags => {
            let controller = Controller::from_config(&config, None)?;
            let tags = controller.client().ollama().export_tags().await?;
            println!("{}", serde_json::to_string_pretty(&tags)?);
            Ok(())
        }
        Command::Ask { target, prompt } => ask(&config, target, &prompt).await,
        Command::Chat { target, save, resume } => chat(&config, target, save, resume).await,
        Command::History { action } => history(&config, action),
        Command::Key { action } => key(action).await,
    }
}

async fn list_models(config: &AppConfig) -> Result<()> {
    let controller = Controller::from_config(config, None)?;
    let mut models = controller.telemetry().list_models().await;
    if models.is_empty() {
        models = controller.client().ollama().local_models().await;
    }
    if models.is_empty() {
        eprintln!("no local models found");
    }
    for model in models {
        println!("{}", model);
    }
    Ok(())
}

async fn show_running(config: &AppConfig, watch: bool, models: Vec<String>) -> Result<()> {
    let controller = Controller::from_config(config, None)?;
    let session = controller.select_models(Session::default(), models);
    let mut session = controller.set_live_monitor(session, watch);

    loop {
        session = controller.poll_monitor(session).await;
        if let Some(sample) = session.latest_sample() {
            if session.live_monitor {
                println!("-- {}", sample.taken_at.format("%H:%M:%S"));
            }
            print_running(&sample.rows);
        }
        if !session.live_monitor {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(config.monitor_interval) => {}
        }
    }
}

fn print_running(rows: &[TelemetryRow]) {
    if rows.is_empty() {
        println!("no running models");
        return;
    }
    println!("{:<32} {:<14} {:>9} {:>5} {:>5}", "NAME", "ID", "SIZE", "CPU", "GPU");
    for row in rows {
        let size = if row.memory_reported {
            format!("{:.1} GB", row.size_gb)
        } else {
            "?".to_string()
        };
        let (cpu, gpu) = if row.utilization_reported {
            (format!("{}%", row.cpu_pct), format!("{}%", row.gpu_pct))
        } else {
            ("?".to_string(), "?".to_string())
        };
        println!("{:<32} {:<14} {:>9} {:>5} {:>5}", row.name, row.id, size, cpu, gpu);
    }
}

async fn ask(config: &AppConfig, target: Target, prompt: &str) -> Result<()> {
    let controller = Controller::from_config(config, None)?;
    let started = Instant::now();
    let mut reply = controller.client().generate(target.provider, &target.model, prompt);
    let mut stdout = std::io::stdout();
    while let Some(fragment) = reply.next_fragment().await {
        write!(stdout, "{}", fragment)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    eprintln!("({:.2}s)", started.elapsed().as_secs_f64());
    Ok(())
}

async fn chat(config: &AppConfig, target: Target, save: bool, resume: Option<String>) -> Result<()> {
    let store = if save || resume.is_some() {
        Some(Arc::new(Database::open(&config.db_path)?))
    } else {
        None
    };
    let controller = Controller::from_config(config, store)?;
    let mut session = controller.select_provider(Session::default(), target.provider);
    let mut model = target.model;

    if let Some(id) = resume {
        let (loaded, result) = controller.load_conversation(session, &id);
        session = loaded;
        result?;
        let stored = session.saved.iter().find(|(_, thread)| thread.conversation_id == id);
        if let Some(((_, stored_model), _)) = stored {
            model = stored_model.clone();
        }
        for turn in session.history(&model) {
            println!("{}: {}", turn.role.as_str(), turn.content);
        }
    }
    let persist = save || session.saved_thread(&model).is_some();

    eprintln!("chatting with {} {} (Ctrl-D to quit)", session.provider, model);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        session = controller.send_message(session, &model, &line).await;
        if let Some(turn) = session.history(&model).last() {
            println!("{}", turn.content);
            if let Some(secs) = turn.elapsed_secs {
                eprintln!("({:.2}s)", secs);
            }
        }

        if persist {
            let (saved, result) = controller.save_thread(session, &model);
            session = saved;
            if let Err(error) = result {
                eprintln!("could not save conversation: {}", error);
            }
        }
    }
    Ok(())
}

fn history(config: &AppConfig, action: HistoryCommand) -> Result<()> {
    let store = Database::open(&config.db_path)?;
    match action {
        HistoryCommand::List { limit } => {
            for conversation in store.list_conversations(limit) {
                println!(
                    "{}  {}  {}/{}  {}",
                    conversation.id,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.provider.as_str(),
                    conversation.model,
                    conversation.title
                );
            }
        }
        HistoryCommand::Show { id } => {
            let Some(conversation) = store.get_conversation(&id) else {
                bail!("conversation {} not found", id);
            };
            println!("# {} ({} {})", conversation.title, conversation.provider, conversation.model);
            for message in store.list_messages(&id) {
                let speaker = match message.role {
                    Role::User => "you",
                    Role::Assistant => conversation.model.as_str(),
                };
                println!("[{}] {}: {}", message.created_at.format("%H:%M:%S"), speaker, message.content);
            }
        }
        HistoryCommand::Rename { id, title } => {
            if !store.update_title(&id, &title) {
                bail!("conversation {} not found", id);
            }
        }
        HistoryCommand::Delete { id } => {
            if !store.delete_conversation(&id) {
                bail!("conversation {} not found", id);
            }
        }
    }
    Ok(())
}

async fn key(action: KeyCommand) -> Result<()> {
    match action {
        KeyCommand::Set { provider, token } => {
            let token = match token {
                Some(token) => token,
                None => {
                    eprint!("{} API key: ", provider);
                    std::io::stderr().flush()?;
                    BufReader::new(tokio::io::stdin()).lines().next_line().await?.unwrap_or_default()
                }
            };
            if token.trim().is_empty() {
                bail!("empty key");
            }
            save_provider_token(provider, token.trim())?;
            println!("{} key stored", provider);
        }
        KeyCommand::Clear { provider } => {
            clear_provider_token(provider)?;
            println!("{} key removed", provider);
        }
        KeyCommand::Status { provider } => {
            let state = if has_provider_token(provider)? { "stored" } else { "not stored" };
            println!("{} key {}", provider, state);
        }
    }
    Ok(())
}
