pub mod agent_core;
pub mod config;
pub mod inference;
pub mod models;
pub mod store;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::AgentOrchestrator;
use config::AppConfig;
use inference::ModelEndpoint;
use models::ModelRouter;
use store::RecordStore;
use tools::{ResultCache, ToolError, ToolExecutor, ToolRegistry};

/// Return the platform-standard data directory for ContentForge.
///
/// - macOS: `~/Library/Application Support/com.contentforge.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.contentforge.app\`
/// - Linux: `$XDG_DATA_HOME/com.contentforge.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.contentforge/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.contentforge.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".contentforge")
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

/// Assemble an orchestrator from config: builtin catalog and routes, the
/// built-in content tools over `store`, and the result cache when enabled.
pub fn build_orchestrator(
    config: &AppConfig,
    endpoint: Arc<dyn ModelEndpoint>,
    store: Arc<dyn RecordStore>,
) -> Result<AgentOrchestrator, ToolError> {
    let mut registry = ToolRegistry::new();
    let mut executor = ToolExecutor::new(config.agent.tool_timeout());
    if config.cache.enabled {
        executor = executor.with_cache(Arc::new(ResultCache::from_config(&config.cache)));
    }
    tools::register_builtin_tools(store, &mut registry, &mut executor)?;

    Ok(AgentOrchestrator::new(
        endpoint,
        Arc::new(ModelRouter::builtin()),
        Arc::new(registry),
        Arc::new(executor),
        config.agent.clone(),
    ))
}

// ─── Tracing ─────────────────────────────────────────────────────────────────

/// Initialize the tracing subscriber, writing structured logs to
/// `<log_dir>/agent.log` (default: `<data_dir>/logs`).
///
/// On each startup:
/// 1. Rotates existing logs (agent.log → agent.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh agent.log with a line-flushing writer.
/// 3. Logs a startup banner with the log path.
///
/// Returns the log file path. A subscriber installed earlier is left in place.
pub fn init_tracing(log_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = log_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir().join("logs"));
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("agent.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("contentforge=info,warn"));

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = %log_path.display(),
            pid = std::process::id(),
            "=== ContentForge starting ==="
        );
    }

    Ok(log_path)
}

/// Rotate log files: `agent.log` → `agent.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so a
/// crash never loses the last log lines.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
