use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use omni_capture::{CaptureScheduler, CaptureTrigger, PageDriver, SnapshotDriver};
use omni_config::{Config, ConfigManager, LogLevel};
use omni_core::{
    derive_session_id, detect_platform, format_session_for_injection, format_timestamp,
    is_unsaved_session_id, InjectionMode, Platform, Session,
};
use omni_extract::diagnostics::SelectorGroup;
use omni_extract::{diagnose, Document, TranscriptExtractor};
use omni_observability::{capture_span, LogManager};
use omni_session::{CheckpointStore, JsonFileStore, JsonFileStoreConfig, SessionStore};

#[derive(Parser)]
#[command(name = "omni")]
#[command(about = "OmniContext: capture AI chat sessions from page snapshots")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Config file path
    #[arg(long, env = "OMNI_CONFIG", default_value = "~/.omnicontext/config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 识别地址所属平台和会话 id
    Detect {
        /// 页面地址
        url: String,
    },
    /// 从 HTML 快照提取会话
    Extract {
        #[arg(long)]
        url: String,
        /// HTML 文件
        #[arg(long)]
        html: PathBuf,
        /// 同时保存到存储
        #[arg(long, default_value = "false")]
        save: bool,
    },
    /// 选择器诊断
    Debug {
        /// doubao / yuanbao / claude
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        html: PathBuf,
    },
    /// 持续捕获：文件每次被覆盖都视为页面变化，Ctrl-C 结束
    Watch {
        #[arg(long)]
        url: String,
        #[arg(long)]
        html: PathBuf,
    },
    /// 会话管理
    Sessions(SessionsArgs),
    /// 输出会话的上下文引用文本
    Inject {
        /// 会话 id
        id: String,
        #[arg(long, default_value = "full")]
        mode: InjectionMode,
    },
    /// 批量遍历检查点
    Checkpoint(CheckpointArgs),
    /// 配置管理命令
    Config(ConfigArgs),
}

#[derive(Args, Clone)]
struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommands,
}

#[derive(Subcommand, Clone)]
enum SessionsCommands {
    /// 列出会话，最近更新的在前
    List {
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// 显示完整会话
    Show { id: String },
    /// 删除会话
    Delete { id: String },
    /// 修改标题
    Rename { id: String, title: String },
}

#[derive(Args, Clone)]
struct CheckpointArgs {
    #[command(subcommand)]
    command: CheckpointCommands,
}

#[derive(Subcommand, Clone)]
enum CheckpointCommands {
    /// 显示检查点
    Show,
    /// 清除检查点
    Clear,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// 获取配置值
    Get {
        /// 配置键 (如: capture.debounce_ms, logging.level)
        key: String,
    },
    /// 设置配置值
    Set {
        /// 配置键 (如: capture.debounce_ms, logging.level)
        key: String,
        /// 配置值
        value: String,
    },
    /// 初始化默认配置
    Init {
        /// 强制覆盖已有配置
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// 显示当前配置
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        omni_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    let command = match cli.command {
        Commands::Config(args) => return handle_config(args, &config_path, cli.debug).await,
        command => command,
    };

    let manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let config = manager.snapshot().await;
    let _log = init_logging(&config, cli.debug)?;

    match command {
        Commands::Detect { url } => detect(&url),
        Commands::Extract { url, html, save } => extract(&config, &url, &html, save).await,
        Commands::Debug { platform, html } => debug_selectors(platform, &html).await,
        Commands::Watch { url, html } => watch(&config, url, html).await,
        Commands::Sessions(args) => handle_sessions(args, &config).await,
        Commands::Inject { id, mode } => inject(&config, &id, mode).await,
        Commands::Checkpoint(args) => handle_checkpoint(args, &config).await,
        Commands::Config(_) => Ok(()),
    }
}

fn init_logging(config: &Config, debug: bool) -> anyhow::Result<LogManager> {
    let mut logging = config.logging.clone();
    if debug {
        logging.level = LogLevel::Debug;
    }
    Ok(LogManager::new(&logging)?)
}

async fn open_store(config: &Config) -> anyhow::Result<JsonFileStore> {
    let store = JsonFileStore::new(JsonFileStoreConfig::new(&config.storage.path))
        .await
        .with_context(|| format!("Failed to open store at {}", config.storage.path))?;
    Ok(store)
}

async fn read_html(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

fn require_platform(url: &str) -> anyhow::Result<Platform> {
    detect_platform(url).ok_or_else(|| anyhow!("Unsupported page: {}", url))
}

fn detect(url: &str) -> anyhow::Result<()> {
    let Some(platform) = detect_platform(url) else {
        println!("{}", format!("❌ Unsupported page: {}", url).red());
        std::process::exit(1);
    };
    println!(
        "{}",
        format!("✅ Platform: {} ({})", platform.display_name(), platform).green()
    );

    let session_id = derive_session_id(url, platform)?;
    if is_unsaved_session_id(&session_id) {
        println!(
            "{}",
            format!("📝 Session ID: {} (new conversation, not stable)", session_id).yellow()
        );
    } else {
        println!("{}", format!("📝 Session ID: {}", session_id).green());
    }
    Ok(())
}

async fn extract(config: &Config, url: &str, html: &Path, save: bool) -> anyhow::Result<()> {
    let platform = require_platform(url)?;
    let source = read_html(html).await?;

    let extraction = TranscriptExtractor::new(platform).extract_html(&source);
    if extraction.is_empty() {
        eprintln!("{}", "⚠️  No messages found. Try `omni debug` to check selectors".yellow());
        return Ok(());
    }

    let session_id = derive_session_id(url, platform)?;
    let mut session = Session::from_extraction(session_id, platform, url, extraction);

    if save {
        let store = open_store(config).await?;
        session = store.save_session_optimized(session).await?;
        eprintln!(
            "{}",
            format!("✅ Saved {} messages to {}", session.message_count, session.id).green()
        );
    }

    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

async fn debug_selectors(platform: Platform, html: &Path) -> anyhow::Result<()> {
    let source = read_html(html).await?;
    print_diagnostics(platform, &source);
    Ok(())
}

fn print_diagnostics(platform: Platform, source: &str) {
    let doc = Document::parse(source);
    let report = diagnose(platform, &doc);
    let (messages, stage) = TranscriptExtractor::new(platform).extract_with_stage(&doc);

    println!(
        "{}",
        format!("🔍 Selector report: {}", platform.display_name()).cyan().bold()
    );
    println!();

    let groups = [
        (SelectorGroup::Title, "Title"),
        (SelectorGroup::Container, "Container"),
        (SelectorGroup::Block, "Message block"),
        (SelectorGroup::User, "User"),
        (SelectorGroup::Assistant, "Assistant"),
    ];
    for (group, label) in groups {
        let mut probes = report.probes_in(group).peekable();
        if probes.peek().is_none() {
            continue;
        }
        println!("{}", label.bold());
        for probe in probes {
            let line = if !probe.valid {
                format!("  ✗ {} (invalid selector)", probe.selector).red()
            } else if probe.matches == 0 {
                format!("  · {}", probe.selector).dimmed()
            } else {
                format!("  ✓ {} ({})", probe.selector, probe.matches).green()
            };
            println!("{}", line);
            if let Some(sample) = probe.sample.as_deref().filter(|s| !s.is_empty()) {
                println!("{}", format!("      {}", sample).dimmed());
            }
        }
    }

    if !report.candidates.is_empty() {
        println!();
        println!("{}", "Candidate nodes".bold());
        for candidate in &report.candidates {
            println!("  {}", candidate.class.yellow());
            println!("{}", format!("      {}", candidate.sample).dimmed());
        }
    }

    println!();
    println!(
        "{}",
        format!("📊 Stage: {:?}, messages: {}", stage, messages.len()).cyan()
    );
}

async fn watch(config: &Config, url: String, html: PathBuf) -> anyhow::Result<()> {
    let platform = require_platform(&url)?;
    let session_id = derive_session_id(&url, platform)?;
    let store: Arc<dyn SessionStore> = Arc::new(open_store(config).await?);
    let driver = Arc::new(SnapshotDriver::new(url, html.clone()));
    if !driver.is_alive().await {
        return Err(anyhow!("Snapshot file not found: {:?}", html));
    }

    let cancel = CancellationToken::new();
    let (trigger_tx, trigger_rx) = mpsc::channel(16);
    let watcher = spawn_file_watcher(
        html,
        config.capture.poll_interval() / 2,
        trigger_tx,
        cancel.clone(),
    );
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    println!(
        "{}",
        format!("👀 Watching {} session {} (Ctrl-C to stop)", platform.display_name(), session_id)
            .cyan()
    );

    let scheduler = CaptureScheduler::new(driver, store, config.capture.clone());
    let span = capture_span(platform.as_str(), &session_id);
    let context = scheduler.run(trigger_rx, cancel.clone()).instrument(span).await;
    cancel.cancel();
    let _ = watcher.await;

    if context.invalidated {
        println!("{}", "⚠️  Snapshot disappeared, capture stopped".yellow());
    } else if let Some(fingerprint) = &context.last_written {
        println!(
            "{}",
            format!("✅ Last saved state: {}", fingerprint).green()
        );
    } else {
        println!("{}", "Nothing was saved".dimmed());
    }
    Ok(())
}

/// 轮询文件修改时间，变化时发出 `Mutation`
fn spawn_file_watcher(
    path: PathBuf,
    period: Duration,
    triggers: mpsc::Sender<CaptureTrigger>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = modified_at(&path).await;
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let current = modified_at(&path).await;
            if current != last {
                last = current;
                if triggers.send(CaptureTrigger::Mutation).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn handle_sessions(args: SessionsArgs, config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match args.command {
        SessionsCommands::List { platform } => {
            let sessions = match platform {
                Some(platform) => store.get_sessions_by_platform(platform).await?,
                None => store.get_all_sessions().await?,
            };
            if sessions.is_empty() {
                println!("{}", "No sessions saved yet".dimmed());
                return Ok(());
            }
            println!("{}", format!("📚 {} sessions", sessions.len()).cyan().bold());
            for session in &sessions {
                println!(
                    "{}  {}  {}  {}",
                    session.id.yellow(),
                    session.platform.display_name(),
                    session.title.bold(),
                    format!(
                        "{} messages, {}",
                        session.message_count,
                        format_timestamp(session.updated_at)
                    )
                    .dimmed()
                );
            }
        }
        SessionsCommands::Show { id } => match store.get_session(&id).await? {
            Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
            None => {
                println!("{}", format!("❌ Session not found: {}", id).red());
                std::process::exit(1);
            }
        },
        SessionsCommands::Delete { id } => {
            store.delete_session(&id).await?;
            println!("{}", format!("✅ Deleted {}", id).green());
        }
        SessionsCommands::Rename { id, title } => {
            let session = store.update_session_title(&id, &title).await?;
            println!(
                "{}",
                format!("✅ Renamed {} to {}", session.id, session.title).green()
            );
        }
    }
    Ok(())
}

async fn inject(config: &Config, id: &str, mode: InjectionMode) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let session = store
        .get_session(id)
        .await?
        .ok_or_else(|| anyhow!("Session not found: {}", id))?;
    println!("{}", format_session_for_injection(&session, mode));
    Ok(())
}

async fn handle_checkpoint(args: CheckpointArgs, config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    match args.command {
        CheckpointCommands::Show => match store.load_checkpoint().await? {
            Some(record) => {
                let progress = &record.progress;
                println!(
                    "{}",
                    format!("📋 Batch capture on {}", record.platform.display_name())
                        .cyan()
                        .bold()
                );
                println!("  status:   {}", progress.status.to_string().yellow());
                println!("  progress: {}/{}", progress.current, progress.total);
                if !progress.current_title.is_empty() {
                    println!("  current:  {}", progress.current_title);
                }
                println!(
                    "  captured: {} messages, {} failed",
                    progress.captured, progress.failed
                );
                if let Some(error) = &progress.error {
                    println!("  error:    {}", error.red());
                }
                println!(
                    "{}",
                    format!("  written {}", format_timestamp(record.written_at)).dimmed()
                );
            }
            None => println!("{}", "No batch capture in progress".dimmed()),
        },
        CheckpointCommands::Clear => {
            store.clear_checkpoint().await?;
            println!("{}", "✅ Checkpoint cleared".green());
        }
    }
    Ok(())
}

async fn handle_config(args: ConfigArgs, config_path: &Path, debug: bool) -> anyhow::Result<()> {
    if debug {
        eprintln!("{}", format!("[DEBUG] Config path: {:?}", config_path).dimmed());
    }

    match args.command {
        ConfigCommands::Get { key } => {
            let manager = ConfigManager::load(config_path).await?;
            let config = manager.snapshot().await;

            match config.get_value(&key) {
                Some(value) => {
                    println!("{}", format!("{} = {}", key, value).green());
                }
                None => {
                    println!("{}", format!("❌ Key not found: {}", key).red());
                    std::process::exit(1);
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            let manager = ConfigManager::load(config_path).await?;
            manager
                .update(|config| config.set_value(&key, &value))
                .await
                .with_context(|| format!("Failed to set {}", key))?;
            println!("{}", format!("✅ Set {} = {}", key, value).green());
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                println!(
                    "{}",
                    format!("⚠️  Config already exists at {:?}", config_path).yellow()
                );
                println!("{}", "Use --force to overwrite".dimmed());
                return Ok(());
            }

            // 初始化目录
            omni_config::init_omnicontext_dirs().await?;

            let manager = ConfigManager::new(Config::default(), config_path.to_path_buf());
            manager.save().await?;
            println!(
                "{}",
                format!("✅ Config initialized at {:?}", config_path).green()
            );
            println!("{}", "You can edit this file to customize your settings".dimmed());
        }
        ConfigCommands::Show => {
            let manager = ConfigManager::load(config_path).await?;
            let config = manager.snapshot().await;
            println!("{}", "📋 Current Configuration:".cyan().bold());
            println!();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
