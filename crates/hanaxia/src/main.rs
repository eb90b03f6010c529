use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use hanaxia::config::{self, APP_NAME, AppConfig, AppPaths};
use hanaxia::features::{
    AgentFeature, CalendarFeature, ChatFeature, DocFeature, PresenceFeature, PresenceState,
    SessionIdentity,
};
use hanaxia::genai::{Assistant, DocumentInput, InlineData};
use hanaxia::protocol::{ChatMessagePayload, Envelope, EventKind, SyncEvent};
use hanaxia::relay::{RelayConfig, RelayServer};
use hanaxia::storage::{self, BlobStore, StorageConfig};
use hanaxia::sync::{ConnectionState, SyncContext};

/// Seconds to wait for the sync connection before giving up.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Listen(cmd) => handle_listen(&ctx, cmd).await,
        Command::Send(cmd) => handle_send(&ctx, cmd).await,
        Command::Chat(cmd) => handle_chat(&ctx, cmd).await,
        Command::Doc(cmd) => handle_doc(&ctx, cmd).await,
        Command::Plan(cmd) => handle_plan(&ctx, cmd).await,
        Command::Image(cmd) => handle_image(&ctx, cmd).await,
        Command::Video(cmd) => handle_video(&ctx, cmd).await,
        Command::Calendar { command } => handle_calendar(&ctx, command).await,
        Command::Relay(cmd) => handle_relay(&ctx, cmd).await,
        _ => Err(anyhow!("command does not need a runtime")),
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Hanaxia - assistant console with real-time multi-client sync.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Override the sync endpoint URL
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
    /// Maximum seconds to wait for the sync connection
    #[arg(long = "timeout", value_name = "SECONDS", global = true)]
    timeout: Option<u64>,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the sync endpoint and print every event received
    Listen(ListenCommand),
    /// Publish a single event to the sync endpoint
    Send(SendCommand),
    /// Interactive chat with the assistant, shared with other clients
    Chat(ChatCommand),
    /// Analyze a document and share the result
    Doc(DocCommand),
    /// Create an agent goal and generate its plan
    Plan(PlanCommand),
    /// Generate images from a prompt
    Image(ImageCommand),
    /// Generate a short video from a prompt
    Video(VideoCommand),
    /// Manage the local calendar
    Calendar {
        #[command(subcommand)]
        command: CalendarCommand,
    },
    /// Run the development relay endpoint
    Relay(RelayCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ListenCommand {
    /// Only print events of these types (repeatable)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    types: Vec<EventKind>,
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    /// Event type, e.g. DOC_UPDATE
    #[arg(value_name = "TYPE")]
    kind: EventKind,
    /// JSON payload object
    #[arg(value_name = "PAYLOAD")]
    payload: String,
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    /// Send one message, print the reply, and exit
    #[arg(short, long)]
    message: Option<String>,
    /// Conversation to use instead of the active one
    #[arg(long, value_name = "ID")]
    conversation: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct DocCommand {
    /// File to analyze
    #[arg(value_name = "FILE")]
    path: PathBuf,
    /// MIME type; guessed from the extension when omitted
    #[arg(long)]
    mime_type: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct PlanCommand {
    /// Goal title
    title: String,
    /// Goal description
    text: String,
}

#[derive(Debug, Clone, Args)]
struct ImageCommand {
    /// What to draw
    prompt: String,
    /// Aspect ratio of the generated images
    #[arg(long, default_value = "1:1", value_parser = ["1:1", "3:4", "4:3", "9:16", "16:9"])]
    aspect_ratio: String,
    /// Number of images to request
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
    /// Reference image to guide generation
    #[arg(long, value_name = "FILE")]
    reference: Option<PathBuf>,
    /// Directory to write images into; data URLs are printed when omitted
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct VideoCommand {
    /// What the video should show
    prompt: String,
    /// Aspect ratio of the video
    #[arg(long, default_value = "16:9", value_parser = ["16:9", "9:16"])]
    aspect_ratio: String,
    /// Reference image for the first frame
    #[arg(long, value_name = "FILE")]
    reference: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum CalendarCommand {
    /// Add an event
    Add {
        /// Event title
        title: String,
        /// Event date, e.g. 2026-03-10
        date: String,
        /// Optional notes
        #[arg(long)]
        description: Option<String>,
    },
    /// List events by date
    List,
    /// Remove an event by id
    Remove {
        /// Event id as shown by `calendar list`
        id: String,
    },
}

#[derive(Debug, Clone, Args)]
struct RelayCommand {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Echo frames back to their sender
    #[arg(long)]
    echo: bool,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let mut config = config::load_or_init_config(&paths, common.dry_run)?;
        if let Some(ref url) = common.url {
            config.sync.url = url.clone();
        }
        let paths = paths.apply_overrides(&config)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("hanaxia={level}")));

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // The sync, storage and feature modules log through the `log` facade.
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.config.logging.level.as_str()),
        );
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.common.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    /// Persistent storage under the data directory; process memory only
    /// with `--dry-run`.
    fn storage(&self) -> Result<Box<dyn BlobStore>> {
        let config = if self.common.dry_run {
            StorageConfig::Memory
        } else {
            fs::create_dir_all(&self.paths.data_dir).with_context(|| {
                format!("creating data directory {}", self.paths.data_dir.display())
            })?;
            StorageConfig::Local(self.paths.data_dir.clone())
        };
        Ok(storage::create_storage(config))
    }

    fn assistant(&self) -> Result<Assistant> {
        Assistant::from_config(&self.config.genai).context("creating generative AI client")
    }

    /// Start the sync layer and wait for the connection to open.
    async fn connect(&self) -> Result<SyncContext> {
        let sync = SyncContext::new(self.config.sync.clone());
        sync.start();
        let timeout = self.connect_timeout();
        tokio::time::timeout(timeout, sync.transport().wait_for_state(ConnectionState::Open))
            .await
            .map_err(|_| {
                anyhow!(
                    "could not connect to {} within {}s",
                    self.config.sync.url,
                    timeout.as_secs()
                )
            })?;
        Ok(sync)
    }

    fn print_event(&self, event: &SyncEvent) -> Result<()> {
        let output = if self.common.json {
            event.encode().context("serializing event to JSON")?
        } else if self.common.yaml {
            serde_yaml::to_string(event).context("serializing event to YAML")?
        } else {
            let envelope = Envelope::try_from(event).context("converting event")?;
            format!("[{}] {}", envelope.kind, envelope.payload)
        };
        println!("{output}");
        Ok(())
    }
}

async fn handle_listen(ctx: &RuntimeContext, cmd: ListenCommand) -> Result<()> {
    let sync = SyncContext::new(ctx.config.sync.clone());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let kinds = if cmd.types.is_empty() {
        EventKind::ALL.to_vec()
    } else {
        cmd.types
    };
    let _subscriptions: Vec<_> = kinds
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            sync.bus().subscribe_kind(kind, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();

    sync.start();
    let mut states = sync.watch_connection();
    info!("Listening on {} (Ctrl-C to stop)", ctx.config.sync.url);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => ctx.print_event(&event)?,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!("Connection {}", state);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.shutdown().await;
    Ok(())
}

async fn handle_send(ctx: &RuntimeContext, cmd: SendCommand) -> Result<()> {
    let payload = serde_json::from_str(&cmd.payload).context("parsing payload JSON")?;
    let envelope = Envelope {
        kind: cmd.kind.as_str().to_string(),
        payload,
    };
    let event = SyncEvent::try_from(envelope).context("payload does not match event type")?;

    if ctx.common.dry_run {
        info!("dry-run: would send {}", event.encode()?);
        return Ok(());
    }

    let sync = ctx.connect().await?;
    sync.bus().send(event);
    sync.shutdown().await;
    info!("Sent {}", cmd.kind);
    Ok(())
}

async fn handle_chat(ctx: &RuntimeContext, cmd: ChatCommand) -> Result<()> {
    let storage = ctx.storage()?;
    let assistant = ctx.assistant()?;
    let sync = SyncContext::new(ctx.config.sync.clone());

    let store = ChatFeature::load(storage.as_ref())
        .await
        .context("loading conversations")?;
    let chat = ChatFeature::mount(sync.bus(), store);
    let presence = PresenceFeature::mount(sync.bus(), SessionIdentity::random());
    if let Some(ref id) = cmd.conversation
        && !chat.select(id)
    {
        return Err(anyhow!("unknown conversation: {id}"));
    }

    // Show messages relayed from other clients while the session runs.
    let _remote = sync
        .bus()
        .subscribe::<ChatMessagePayload, _>(|payload| {
            eprintln!("\n[{}] {}", payload.conversation_id, payload.message.text);
        });

    sync.start();
    if let Err(e) = tokio::time::timeout(
        ctx.connect_timeout(),
        sync.transport().wait_for_state(ConnectionState::Open),
    )
    .await
    {
        warn!("Sync endpoint unavailable ({e}); chatting locally");
    }

    if let Some(message) = cmd.message {
        let result = send_chat_line(&chat, &assistant, &message).await;
        persist_chat(&chat, storage.as_ref()).await;
        sync.shutdown().await;
        return result;
    }

    let me = presence.identity();
    println!(
        "Chatting as {} in \"{}\". Commands: /new, /list, /who, /quit",
        me.user_name,
        chat.state().read(|s| s.active().title.clone())
    );
    let mut presence_changes = presence.state().watch();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            Ok(()) = presence_changes.changed() => {
                let conversation_id = chat.state().read(|s| s.active_id().to_string());
                let present = presence.state().read(|s| describe_presence(s, &conversation_id));
                for entry in present {
                    eprintln!("\n  {entry}");
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/new" => {
                chat.create_session();
                println!("Started a new conversation");
            }
            "/who" => {
                let conversation_id = chat.state().read(|s| s.active_id().to_string());
                let present = presence.state().read(|s| describe_presence(s, &conversation_id));
                if present.is_empty() {
                    println!("Nobody else is here");
                }
                for entry in present {
                    println!("  {entry}");
                }
                continue;
            }
            "/list" => {
                let store = chat.snapshot();
                for conversation in store.conversations() {
                    let marker = if conversation.id == store.active_id() { "*" } else { " " };
                    println!(
                        "{marker} {} {} ({} messages)",
                        conversation.id,
                        conversation.title,
                        conversation.messages.len()
                    );
                }
            }
            text => {
                let conversation_id = chat.state().read(|s| s.active_id().to_string());
                presence.publish_draft(&conversation_id, "");
                if let Err(e) = send_chat_line(&chat, &assistant, text).await {
                    eprintln!("{e:#}");
                }
            }
        }
        persist_chat(&chat, storage.as_ref()).await;
    }

    persist_chat(&chat, storage.as_ref()).await;
    sync.shutdown().await;
    Ok(())
}

/// One line per remote participant in a conversation: drafts first, then
/// anyone whose caret is visible but who is not typing.
fn describe_presence(state: &PresenceState, conversation_id: &str) -> Vec<String> {
    let cursors = state.cursors(conversation_id);
    let name_of = |user_id: &str| {
        cursors
            .iter()
            .find(|c| c.user_id == user_id)
            .map(|c| c.user_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    };

    let drafts = state.drafts(conversation_id);
    let mut lines: Vec<String> = drafts
        .iter()
        .map(|(sender, text)| format!("{} is typing: {}", name_of(sender), text))
        .collect();
    lines.extend(
        cursors
            .iter()
            .filter(|c| !drafts.iter().any(|(sender, _)| *sender == c.user_id))
            .map(|c| {
                format!(
                    "{} is here (selection {}..{})",
                    c.user_name, c.selection_start, c.selection_end
                )
            }),
    );
    lines
}

async fn send_chat_line(chat: &ChatFeature, assistant: &Assistant, text: &str) -> Result<()> {
    chat.send_message(assistant, text, Vec::new(), |chunk| {
        print!("{chunk}");
        io::stdout().flush().ok();
    })
    .await?;
    println!();
    Ok(())
}

async fn persist_chat(chat: &ChatFeature, storage: &dyn BlobStore) {
    if let Err(e) = chat.persist(storage).await {
        warn!("Failed to save conversations: {e}");
    }
}

async fn handle_doc(ctx: &RuntimeContext, cmd: DocCommand) -> Result<()> {
    let document = read_document(&cmd.path, cmd.mime_type)?;

    let assistant = ctx.assistant()?;
    let sync = SyncContext::new(ctx.config.sync.clone());
    let doc = DocFeature::mount(sync.bus());
    sync.start();
    let _ = tokio::time::timeout(
        ctx.connect_timeout(),
        sync.transport().wait_for_state(ConnectionState::Open),
    )
    .await;

    let result = doc.analyze(&assistant, &document).await;
    sync.shutdown().await;
    println!("{}", result.context("document analysis failed")?);
    Ok(())
}

async fn handle_plan(ctx: &RuntimeContext, cmd: PlanCommand) -> Result<()> {
    let storage = ctx.storage()?;
    let assistant = ctx.assistant()?;
    let sync = SyncContext::new(ctx.config.sync.clone());

    let (goals, templates) = AgentFeature::load(storage.as_ref())
        .await
        .context("loading agent goals")?;
    let agent = AgentFeature::mount(sync.bus(), goals, templates);
    sync.start();
    let _ = tokio::time::timeout(
        ctx.connect_timeout(),
        sync.transport().wait_for_state(ConnectionState::Open),
    )
    .await;

    let goal = agent
        .add_goal(&cmd.title, &cmd.text)
        .ok_or_else(|| anyhow!("goal title and text must not be empty"))?;
    let result = agent.execute_plan(&assistant, &goal.id).await;

    if let Err(e) = agent.persist(storage.as_ref()).await {
        warn!("Failed to save agent goals: {e}");
    }
    sync.shutdown().await;

    let goal = result.context("plan generation failed")?;
    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
    } else {
        println!("# {}\n\n{}", goal.title, goal.plan.unwrap_or_default());
    }
    Ok(())
}

async fn handle_image(ctx: &RuntimeContext, cmd: ImageCommand) -> Result<()> {
    let reference = cmd.reference.as_deref().map(read_inline_image).transpose()?;
    let assistant = ctx.assistant()?;

    let urls = assistant
        .generate_images(&cmd.prompt, &cmd.aspect_ratio, cmd.count, reference.as_ref())
        .await;
    if urls.is_empty() {
        return Err(anyhow!("no images were generated"));
    }

    let Some(dir) = cmd.output else {
        for url in &urls {
            println!("{url}");
        }
        return Ok(());
    };
    if ctx.common.dry_run {
        info!("dry-run: would write {} image(s) to {}", urls.len(), dir.display());
        return Ok(());
    }
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    for (index, url) in urls.iter().enumerate() {
        let (mime_type, bytes) =
            decode_data_url(url).ok_or_else(|| anyhow!("malformed image data returned"))?;
        let extension = mime_guess::get_mime_extensions_str(&mime_type)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin");
        let path = dir.join(format!("image-{}.{extension}", index + 1));
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

async fn handle_video(ctx: &RuntimeContext, cmd: VideoCommand) -> Result<()> {
    let reference = cmd.reference.as_deref().map(read_inline_image).transpose()?;
    let assistant = ctx.assistant()?;

    info!("Video generation can take a few minutes");
    let uri = assistant
        .generate_video(&cmd.prompt, &cmd.aspect_ratio, reference)
        .await
        .context("video generation failed")?;
    println!("{uri}");
    Ok(())
}

async fn handle_calendar(ctx: &RuntimeContext, command: CalendarCommand) -> Result<()> {
    let storage = ctx.storage()?;
    let calendar = CalendarFeature::new(
        CalendarFeature::load(storage.as_ref())
            .await
            .context("loading calendar")?,
    );

    match command {
        CalendarCommand::Add {
            title,
            date,
            description,
        } => {
            let event = calendar
                .add(title.trim(), date.trim(), description.as_deref())
                .ok_or_else(|| anyhow!("event title and date must not be empty"))?;
            println!("Added {} on {} ({})", event.title, event.date, event.id);
        }
        CalendarCommand::List => {
            let events = calendar.state().read(|s| s.events().to_vec());
            if ctx.common.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for event in &events {
                    match &event.description {
                        Some(notes) => {
                            println!("{}  {}  {} - {}", event.date, event.id, event.title, notes)
                        }
                        None => println!("{}  {}  {}", event.date, event.id, event.title),
                    }
                }
            }
            return Ok(());
        }
        CalendarCommand::Remove { id } => {
            if !calendar.remove(&id) {
                return Err(anyhow!("unknown calendar event: {id}"));
            }
            println!("Removed {id}");
        }
    }

    calendar
        .persist(storage.as_ref())
        .await
        .context("saving calendar")
}

async fn handle_relay(ctx: &RuntimeContext, cmd: RelayCommand) -> Result<()> {
    let config = RelayConfig {
        host: cmd.host.unwrap_or_else(|| ctx.config.relay.host.clone()),
        port: cmd.port.unwrap_or(ctx.config.relay.port),
        echo: cmd.echo || ctx.config.relay.echo,
    };
    let server = RelayServer::bind(&config)
        .await
        .with_context(|| format!("binding relay to {}:{}", config.host, config.port))?;
    println!("Relay listening on ws://{}", server.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping relay");
        }
        signal.cancel();
    });

    server.run(shutdown).await.context("running relay")
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    config::write_default_config(&ctx.paths.config_file)?;
    fs::create_dir_all(&ctx.paths.data_dir)
        .with_context(|| format!("creating data directory {}", ctx.paths.data_dir.display()))?;
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            config::write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

/// Read a file for analysis; the MIME type comes from the extension unless
/// given explicitly.
fn read_document(path: &Path, mime_type: Option<String>) -> Result<DocumentInput> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_type.unwrap_or_else(|| {
        mime_guess::from_path(path)
            .first_or_text_plain()
            .essence_str()
            .to_string()
    });
    Ok(DocumentInput {
        file_name,
        mime_type,
        data,
    })
}

fn read_inline_image(path: &Path) -> Result<InlineData> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        return Err(anyhow!("{} is not an image ({mime})", path.display()));
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(InlineData {
        mime_type: mime.essence_str().to_string(),
        data: BASE64.encode(bytes),
    })
}

/// Split a `data:<mime>;base64,<payload>` URL into its MIME type and bytes.
fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    let bytes = BASE64.decode(payload).ok()?;
    Some((mime_type.to_string(), bytes))
}
