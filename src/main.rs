mod blender;
mod config;
mod error;
mod generic_predictor;
mod history;
mod ingestor;
mod knowledge_graph;
mod lifecycle;
mod logging;
mod pcd;
mod persistence;
mod privacy;
mod protocol;
mod security;
mod sequence;
mod session;
mod tokenizer;
mod workflow;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

use crate::blender::{NullCompletionProvider, PredictorBlender};
use crate::config::Config;
use crate::generic_predictor::{GenericPredictor, GenericPredictorRequest};
use crate::ingestor::{FeedbackEvent, FeedbackIngestor};
use crate::lifecycle::{Engine, ModuleLifecycle};
use crate::logging::InteractionLogger;
use crate::pcd::PcdEngine;
use crate::privacy::PrivacyFilter;
use crate::protocol::{
    CompletionKind, CompletionListResponse, CompletionResult, Request, Response, StatsResponse,
};
use crate::session::SessionManager;

#[derive(Parser)]
#[command(name = "pscue", about = "Learned shell completion and prediction")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop the running engine
    Stop {
        #[arg(long)]
        socket_path: Option<PathBuf>,
    },
    /// Show engine status
    Status {
        #[arg(long)]
        socket_path: Option<PathBuf>,
    },
    /// Start the engine (used internally by the shell plugin)
    #[command(hide = true)]
    Start {
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        #[arg(long)]
        log_file: Option<PathBuf>,

        #[arg(long)]
        foreground: bool,

        #[arg(long)]
        socket_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Stop { socket_path }) => stop_daemon(socket_path)?,
        Some(Commands::Status { socket_path }) => show_status(socket_path)?,
        Some(Commands::Start { verbose, log_file, foreground, socket_path }) => {
            start_daemon(verbose, log_file, foreground, socket_path).await?;
        }
        None => {
            if std::io::stdout().is_terminal() {
                setup_shell_rc("~/.zshrc")?;
            } else {
                print_init_code();
            }
        }
    }

    Ok(())
}

/// Check if the current binary is running from a Cargo target directory (dev mode).
fn detect_dev_mode() -> Option<(PathBuf, PathBuf)> {
    let exe = std::env::current_exe().ok()?.canonicalize().ok()?;
    let profile_dir = exe.parent()?;
    let target_dir = profile_dir.parent()?;

    let profile = profile_dir.file_name()?.to_str()?;
    if !matches!(profile, "debug" | "release") {
        return None;
    }
    if target_dir.file_name()?.to_str()? != "target" {
        return None;
    }

    let workspace_root = target_dir.parent()?;
    if workspace_root.join("Cargo.toml").exists() {
        Some((exe.to_path_buf(), workspace_root.to_path_buf()))
    } else {
        None
    }
}

fn workspace_hash(path: &std::path::Path) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in path.to_string_lossy().as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:08x}", (hash & 0xFFFF_FFFF) as u32)
}

fn find_plugin_path(exe: &std::path::Path, workspace_root: Option<&std::path::Path>) -> PathBuf {
    if let Some(root) = workspace_root {
        let p = root.join("plugin").join("pscue.zsh");
        if p.exists() {
            return p;
        }
    }

    if let Some(parent) = exe.parent() {
        if let Some(grandparent) = parent.parent() {
            let p = grandparent.join("plugin").join("pscue.zsh");
            if p.exists() {
                return p;
            }
        }
        let p = parent.join("plugin").join("pscue.zsh");
        if p.exists() {
            return p;
        }
    }

    PathBuf::from("plugin/pscue.zsh")
}

fn print_init_code() {
    if let Some((exe, workspace_root)) = detect_dev_mode() {
        print_dev_init_code(&exe, &workspace_root);
    } else {
        let exe = std::env::current_exe().unwrap_or_default();
        let exe = exe.canonicalize().unwrap_or(exe);
        print_normal_init_code(&exe);
    }
}

fn print_dev_init_code(exe: &std::path::Path, workspace_root: &std::path::Path) {
    let plugin_path = find_plugin_path(exe, Some(workspace_root));
    let hash = workspace_hash(workspace_root);
    let socket_path = format!("/tmp/pscue-dev-{hash}.sock");
    let pid_path = format!("/tmp/pscue-dev-{hash}.pid");
    let log_path = format!("/tmp/pscue-dev-{hash}.log");
    let profile = exe.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()).unwrap_or("unknown");

    eprintln!("pscue dev ({profile})");
    eprintln!("  workspace: {}", workspace_root.display());
    eprintln!("  socket:    {socket_path}");
    eprintln!("  logs:      tail -f {log_path}");

    print!(
        r#"# pscue dev mode
export PSCUE_BIN="{exe}"
export PSCUE_SOCKET="{socket}"
if [[ -f "{pid}" ]] && kill -0 $(<"{pid}") 2>/dev/null; then
    kill $(<"{pid}") 2>/dev/null
    command sleep 0.1
fi
command rm -f "{socket}" "{pid}"
"{exe}" start --foreground --socket-path "{socket}" --log-file "{log}" -vv &>/dev/null &
disown
_pscue_i=0
while [[ ! -S "{socket}" ]] && (( _pscue_i < 50 )); do command sleep 0.1; (( _pscue_i++ )); done
unset _pscue_i
source "{plugin}"
if [[ -S "{socket}" ]]; then
    echo "pscue dev: ready" >&2
else
    echo "pscue dev: engine failed to start. check: tail -f {log}" >&2
fi
_pscue_dev_cleanup() {{
    if [[ -n "$PSCUE_SOCKET" ]]; then
        local pid_file="${{PSCUE_SOCKET%.sock}}.pid"
        if [[ -f "$pid_file" ]]; then
            local pid=$(<"$pid_file")
            [[ -n "$pid" ]] && kill "$pid" 2>/dev/null
            rm -f "$pid_file"
        fi
        rm -f "$PSCUE_SOCKET"
    fi
    unset PSCUE_SOCKET PSCUE_BIN
}}
if [[ -z "$_PSCUE_DEV_TRAP_SET" ]]; then
    _PSCUE_DEV_TRAP_SET=1
    trap '_pscue_dev_cleanup' EXIT
fi
"#,
        exe = exe.display(),
        socket = socket_path,
        pid = pid_path,
        log = log_path,
        plugin = plugin_path.display(),
    );
}

fn print_normal_init_code(exe: &std::path::Path) {
    let plugin_path = find_plugin_path(exe, None);
    print!(
        r#"export PSCUE_BIN="{exe}"
source "{plugin}"
"#,
        exe = exe.display(),
        plugin = plugin_path.display(),
    );
}

fn setup_shell_rc(rc_file: &str) -> anyhow::Result<()> {
    let path = rc_file.replace('~', &dirs::home_dir().unwrap_or_default().to_string_lossy());
    let path = PathBuf::from(path);

    let init_line = r#"eval "$(pscue)""#;

    if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        if contents.contains(init_line) {
            eprintln!("pscue already present in {}", path.display());
            return Ok(());
        }
    }

    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file)?;
    writeln!(file, "# PSCue — learned command and directory suggestions")?;
    writeln!(file, "{init_line}")?;

    eprintln!("Added pscue to {}", path.display());
    eprintln!("Restart your shell or run: {init_line}");

    Ok(())
}

fn stop_daemon(socket_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().with_socket_override(socket_path);
    let pid_path = config.pid_path();

    if !pid_path.exists() {
        eprintln!("Engine is not running (no PID file)");
        return Ok(());
    }

    let pid_str = std::fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str.trim().parse()?;

    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM) {
        Ok(()) => {
            eprintln!("Sent SIGTERM to engine (PID {pid})");
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(config.socket_path());
        }
        Err(nix::errno::Errno::ESRCH) => {
            eprintln!("Engine not running (stale PID file), cleaning up");
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(config.socket_path());
        }
        Err(e) => {
            eprintln!("Failed to stop engine: {e}");
        }
    }

    Ok(())
}

fn show_status(socket_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load().with_socket_override(socket_path);
    let pid_path = config.pid_path();
    let socket_path = config.socket_path();

    if !pid_path.exists() {
        eprintln!("Engine is not running (no PID file)");
        return Ok(());
    }

    let pid_str = std::fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str.trim().parse()?;

    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => {
            eprintln!("Engine is running (PID {pid})");
            eprintln!("Socket: {}", socket_path.display());
        }
        Err(_) => {
            eprintln!("Engine is not running (stale PID file for PID {pid})");
        }
    }

    Ok(())
}

/// The wired-together read/write surfaces a connection handler needs:
/// a lifecycle-owned [`Engine`], the write-side ingestor, and the
/// read-side predictors built on top of the same shared stores.
struct Daemon {
    lifecycle: Arc<ModuleLifecycle>,
    engine: Arc<Engine>,
    ingestor: Arc<FeedbackIngestor>,
    blender: Arc<PredictorBlender<NullCompletionProvider>>,
    generic: Arc<GenericPredictor>,
    pcd: Arc<PcdEngine>,
    sessions: SessionManager,
    interaction_logger: Arc<InteractionLogger>,
}

impl Daemon {
    async fn boot(config: Config) -> anyhow::Result<Self> {
        let lifecycle = Arc::new(ModuleLifecycle::new());
        let engine = lifecycle.on_init_with_config(config).await?;

        let ingestor = Arc::new(FeedbackIngestor::new(
            PrivacyFilter::new(&engine.config.privacy.ignore_patterns),
            engine.history.clone(),
            engine.knowledge_graph.clone(),
            engine.workflow.clone(),
            engine.sequence.clone(),
            engine.persistence.clone(),
        ));

        let generic = Arc::new(GenericPredictor::new(
            engine.knowledge_graph.clone(),
            engine.workflow.clone(),
            engine.sequence.clone(),
            engine.history.clone(),
        ));

        let pcd = Arc::new(PcdEngine::new(engine.config.pcd.clone(), engine.knowledge_graph.clone()));

        let blender = Arc::new(PredictorBlender::new(
            NullCompletionProvider,
            GenericPredictor::new(
                engine.knowledge_graph.clone(),
                engine.workflow.clone(),
                engine.sequence.clone(),
                engine.history.clone(),
            ),
            Some(pcd.clone()),
        ));

        let interaction_logger = Arc::new(InteractionLogger::new(
            engine.config.interaction_log_path(),
            engine.config.logging.max_log_size_mb,
        ));

        Ok(Self {
            lifecycle,
            engine,
            ingestor,
            blender,
            generic,
            pcd,
            sessions: SessionManager::new(),
            interaction_logger,
        })
    }
}

async fn start_daemon(
    verbose: u8,
    log_file: Option<PathBuf>,
    foreground: bool,
    socket_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::load().with_socket_override(socket_path);

    let level = match verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(file).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if !foreground {
        tracing::info!("starting in foreground mode (daemonization not yet wired up)");
    }

    let pid_path = config.pid_path();
    if pid_path.exists() {
        if let Ok(pid_str) = std::fs::read_to_string(&pid_path) {
            if let Ok(pid) = pid_str.trim().parse::<i32>() {
                if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok() {
                    eprintln!("Engine already running (PID {pid})");
                    std::process::exit(1);
                }
            }
        }
        let _ = std::fs::remove_file(&pid_path);
    }

    let socket_path = config.socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!("listening on {}", socket_path.display());

    let daemon = Arc::new(Daemon::boot(config).await?);

    let result = run_server(listener, daemon.clone()).await;

    tracing::info!("shutting down");
    daemon.lifecycle.on_shutdown().await?;
    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(&pid_path);

    result
}

async fn run_server(listener: UnixListener, daemon: Arc<Daemon>) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let daemon = daemon.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, daemon).await {
                                tracing::debug!("connection error: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::error!("accept error: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: tokio::net::UnixStream, daemon: Arc<Daemon>) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        tracing::trace!("received: {trimmed}");

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &daemon).await,
            Err(e) => {
                tracing::warn!("parse error: {e}");
                Response::Error { message: format!("invalid request: {e}") }
            }
        };

        let mut line_out = response.to_tsv();
        line_out.push('\n');
        writer.write_all(line_out.as_bytes()).await?;
        writer.flush().await?;

        if matches!(response, Response::Ack) {
            // Shutdown requests ack then the caller closes; nothing more to do here.
        }
    }

    Ok(())
}

async fn handle_request(request: Request, daemon: &Arc<Daemon>) -> Response {
    match request {
        Request::CommandExecuted(report) => {
            tracing::debug!(cwd = %report.cwd, "command executed");
            daemon
                .ingestor
                .ingest(FeedbackEvent {
                    command_line: report.command_line,
                    success: report.success,
                    current_working_directory: report.cwd,
                    previous_working_directory: report.previous_cwd,
                })
                .await;
            Response::Ack
        }

        Request::CwdChanged(report) => {
            daemon.sessions.update_cwd(&report.session_id, &report.cwd).await;
            Response::Ack
        }

        Request::PredictInline(req) => {
            let cwd = daemon.sessions.get_cwd(&req.session_id).await.unwrap_or_default();
            let text = daemon.blender.get_suggestion(&req.buffer, &cwd).await;
            Response::InlineSuggestion { text }
        }

        Request::CompleteArgument(req) => {
            let command = req.buffer.split_whitespace().next().unwrap_or("").to_string();
            let word_to_complete = if req.buffer.ends_with(' ') || req.buffer.is_empty() {
                String::new()
            } else {
                req.buffer.split_whitespace().last().unwrap_or("").to_string()
            };

            let gen_req = GenericPredictorRequest {
                command: &command,
                full_line: &req.buffer,
                word_to_complete: &word_to_complete,
                cursor_position: req.cursor,
            };
            let suggestions = daemon.generic.predict(&gen_req).await;

            let results = suggestions
                .into_iter()
                .map(|s| CompletionResult {
                    completion_text: s.text.clone(),
                    display_text: s.text,
                    tooltip: s.description,
                    kind: match s.kind {
                        crate::generic_predictor::SuggestionKind::Argument => CompletionKind::Argument,
                        crate::generic_predictor::SuggestionKind::Flag => CompletionKind::Flag,
                        crate::generic_predictor::SuggestionKind::NextCommand => CompletionKind::NextCommand,
                    },
                })
                .collect();

            Response::CompletionList(CompletionListResponse { results })
        }

        Request::Navigate(req) => {
            let cwd = daemon.sessions.get_cwd(&req.session_id).await.unwrap_or_default();
            let top_n = req.top_n.unwrap_or(10);
            let candidates = daemon.pcd.best_match(&req.query, &cwd, top_n).await;
            Response::NavigateResult { path: candidates.into_iter().next().map(|c| c.path) }
        }

        Request::GetStats => {
            let tracked = daemon.engine.knowledge_graph.get_tracked_commands().await;
            Response::Stats(StatsResponse {
                tracked_commands: tracked.len(),
                history_len: daemon.engine.history.len().await,
            })
        }

        Request::ClearLearning => {
            daemon.engine.knowledge_graph.restore(HashMap::new()).await;
            daemon.engine.workflow.restore(HashMap::new()).await;
            daemon.engine.sequence.restore_bigrams(HashMap::new()).await;
            if let Err(e) = daemon.engine.persistence.clear().await {
                tracing::warn!("clear failed: {e}");
                return Response::Error { message: e.to_string() };
            }
            Response::Ack
        }

        Request::ExportLearning => match daemon.engine.persistence.export_snapshot().await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => Response::InlineSuggestion { text: Some(json) },
                Err(e) => Response::Error { message: e.to_string() },
            },
            Err(e) => Response::Error { message: e.to_string() },
        },

        Request::ImportLearning(req) => {
            match serde_json::from_str::<crate::persistence::Snapshot>(&req.snapshot_json) {
                Ok(snapshot) => match daemon.engine.persistence.import_snapshot(&snapshot, req.merge).await {
                    Ok(()) => Response::Ack,
                    Err(e) => Response::Error { message: e.to_string() },
                },
                Err(e) => Response::Error { message: format!("invalid snapshot: {e}") },
            }
        }

        Request::RecordInteraction(req) => {
            daemon.interaction_logger.log_interaction(
                &req.session_id,
                req.action,
                &req.buffer,
                &req.suggestion,
                req.source,
                req.confidence,
                &req.cwd,
            );
            Response::Ack
        }

        Request::Ping => Response::Pong,

        Request::Shutdown => {
            tracing::info!("shutdown requested");
            let daemon = daemon.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                let _ = daemon.lifecycle.on_shutdown().await;
                std::process::exit(0);
            });
            Response::Ack
        }
    }
}
