//! Project daemon (C10): owns one instance of C1-C9 per process and serves
//! the local RPC protocol over a Unix domain socket.
//!
//! One long-lived state struct, one connection per request, a command
//! dispatch table keyed by command name — the request/response shape comes
//! straight off the per-project Unix socket contract.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::checksum::ChecksumDiff;
use crate::config::Config;
use crate::embedder::{Embedder, Model2VecEmbedder};
use crate::error::{RagexError, RagexResult};
use crate::ignore_engine::IgnoreEngine;
use crate::indexer::{IndexPlan, IndexStats, Indexer, ProgressCallback};
use crate::project::{self, ProjectMetadata, ProjectPaths};
use crate::queue::ChangeQueue;
use crate::rpc::{self, RpcResponse};
use crate::search::{self, SearchMode, SearchRequest, SearchResult};
use crate::vector_store::VectorStore;
use crate::watcher::FileWatcher;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Init = 0,
    Loading = 1,
    Ready = 2,
    Indexing = 3,
    Draining = 4,
    Closed = 5,
}

impl DaemonState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Indexing,
            4 => Self::Draining,
            _ => Self::Closed,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Indexing => "indexing",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

pub struct ProjectDaemon {
    workspace_root: PathBuf,
    paths: ProjectPaths,
    config: Config,
    ignore: Arc<IgnoreEngine>,
    /// Serializes writers (`index`, the watcher's debounced pass).
    store: Mutex<VectorStore>,
    /// A read-only snapshot `search` consults directly, refreshed by the
    /// writer after each pass — so a query never waits behind an in-flight
    /// index (§4.6).
    snapshot: ArcSwap<VectorStore>,
    embedder: Box<dyn Embedder>,
    indexer: Indexer,
    queue: Arc<ChangeQueue>,
    watcher: Mutex<Option<FileWatcher>>,
    state: AtomicU8,
    start_time: Instant,
    command_count: AtomicU64,
    /// Set once the project's first index (ever) completes. Before that,
    /// a search served mid-index has nothing but an empty snapshot, so the
    /// response carries an `index_in_progress` warning.
    first_index_done: AtomicBool,
}

impl ProjectDaemon {
    /// Loads configuration, opens the vector store, builds the ignore
    /// engine, and loads the embedder eagerly — module loading happens once
    /// at startup so request latency doesn't pay cold-start cost per §4.10.
    pub async fn start(workspace_root: PathBuf) -> RagexResult<Arc<Self>> {
        if !workspace_root.is_absolute() {
            return Err(RagexError::configuration_mismatch(format!(
                "workspace root must be absolute, got {}",
                workspace_root.display()
            )));
        }

        let user_id = project::current_user_id();
        let project_id = project::project_id(&user_id, &workspace_root);
        let paths = ProjectPaths::new(project_id.clone());
        paths.ensure_dirs()?;

        let config = Config::load(&workspace_root);
        let preset = config.resolved_preset();

        let embedder = {
            let preset = preset.clone();
            tokio::task::spawn_blocking(move || Model2VecEmbedder::load(&preset))
                .await
                .map_err(|e| RagexError::internal(format!("embedder load task panicked: {e}")))??
        };

        let store_dir = Config::persist_dir_override().unwrap_or_else(|| paths.vector_store_dir());
        let store = VectorStore::open(&store_dir, &preset.model_name, preset.dimensions, &config.collection_name, config.hnsw.clone())?;

        let ignore = Arc::new(IgnoreEngine::new(workspace_root.clone()).with_extra_excluded_dirs(config.scan.exclude_dir_names.clone()));

        let meta_path = paths.project_info_path();
        let existing_meta = ProjectMetadata::load(&meta_path)?;
        let first_index_done = existing_meta.as_ref().map(|m| m.last_indexed_at.is_some()).unwrap_or(false);
        if existing_meta.is_none() {
            ProjectMetadata::new(project_id, &workspace_root, preset.model_name.clone(), preset.dimensions).save(&meta_path)?;
        }

        let queue = Arc::new(ChangeQueue::new(config.watcher.debounce_seconds));
        let indexer = Indexer::new(config.parallel.clone());
        let snapshot = ArcSwap::from_pointee(store.clone());

        let daemon = Arc::new(Self {
            workspace_root,
            paths,
            config,
            ignore,
            store: Mutex::new(store),
            snapshot,
            embedder: Box::new(embedder),
            indexer,
            queue,
            watcher: Mutex::new(None),
            state: AtomicU8::new(DaemonState::Loading as u8),
            start_time: Instant::now(),
            command_count: AtomicU64::new(0),
            first_index_done: AtomicBool::new(first_index_done),
        });
        daemon.state.store(DaemonState::Ready as u8, Ordering::SeqCst);
        Ok(daemon)
    }

    fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Binds the socket, serves connections until a shutdown signal fires,
    /// then drains: stop accepting, cancel the watcher/debounce, flush any
    /// in-progress index, close the store, remove the socket.
    pub async fn run(self: Arc<Self>) -> RagexResult<()> {
        let socket_path = self.paths.socket_path();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| RagexError::internal(format!("failed to install SIGTERM handler: {e}")))?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let daemon = self.clone();
                    tokio::spawn(async move {
                        Self::serve_connection(daemon, stream).await;
                    });
                }
                _ = sigterm.recv() => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.state.store(DaemonState::Draining as u8, Ordering::SeqCst);
        self.queue.cancel();
        *self.watcher.lock().await = None;
        let _ = std::fs::remove_file(&socket_path);
        self.state.store(DaemonState::Closed as u8, Ordering::SeqCst);
        Ok(())
    }

    async fn serve_connection(daemon: Arc<Self>, mut stream: UnixStream) {
        let request = match rpc::read_request(&mut stream).await {
            Ok(r) => r,
            Err(e) => {
                let _ = rpc::write_response(&mut stream, &RpcResponse::err(e.to_string())).await;
                return;
            }
        };
        daemon.command_count.fetch_add(1, Ordering::SeqCst);
        let response = daemon.dispatch(&daemon, &request.command, &request.args).await;
        let _ = rpc::write_response(&mut stream, &response).await;
    }

    async fn dispatch(&self, daemon: &Arc<Self>, command: &str, args: &[String]) -> RpcResponse {
        match command {
            "status" => self.cmd_status(),
            "search" => RpcResponse::from_result(self.cmd_search(args).await),
            "index" => RpcResponse::from_result(self.cmd_index(args).await),
            "start_continuous_index" => RpcResponse::from_result(self.cmd_start_continuous_index(daemon.clone()).await),
            "init" => RpcResponse::from_result(self.cmd_init()),
            "ls" => RpcResponse::from_result(self.cmd_ls()),
            "rm" => RpcResponse::from_result(self.cmd_rm(args)),
            "register" | "unregister" => self.cmd_register(command),
            other => RpcResponse::err(format!("unknown command: {other}")),
        }
    }

    fn cmd_status(&self) -> RpcResponse {
        let uptime = self.start_time.elapsed().as_secs_f64();
        RpcResponse::ok_data(json!({
            "status": self.state().as_str(),
            "uptime_seconds": uptime,
            "commands_processed": self.command_count.load(Ordering::SeqCst),
            "ready": matches!(self.state(), DaemonState::Ready | DaemonState::Indexing),
            "pid": std::process::id(),
        }))
    }

    async fn cmd_search(&self, args: &[String]) -> RagexResult<RpcResponse> {
        let flags = SearchFlags::parse(args)?;
        let mode = match &flags.mode_override {
            Some(m) => SearchMode::parse(m).ok_or_else(|| RagexError::invalid_input(format!("unknown mode '{m}'")))?,
            None if flags.regex => SearchMode::Regex,
            None => SearchMode::Auto,
        };
        let request = SearchRequest {
            query: &flags.query,
            mode,
            limit: flags.limit,
            min_similarity: flags.min_similarity,
            language_filter: None,
        };
        // Reads the current snapshot directly — never waits on `self.store`'s
        // lock, so a search issued mid-index returns immediately with
        // whatever the store held before that index started (§4.6).
        let store = self.snapshot.load();
        let result = search::run(&request, &self.workspace_root, &self.ignore, &store, self.embedder.as_ref(), &self.config.reranker)?;

        let empty = match &result {
            SearchResult::Semantic { hits } => hits.is_empty(),
            SearchResult::Regex { matches } => matches.is_empty(),
        };
        let index_in_progress = self.state() == DaemonState::Indexing && !self.first_index_done.load(Ordering::SeqCst);

        if flags.json {
            let mut data = serde_json::to_value(&result)?;
            if empty {
                data["guidance"] = json!(search::empty_result_guidance(mode));
            }
            if index_in_progress {
                data["warnings"] = json!(["index_in_progress"]);
            }
            Ok(RpcResponse::ok_data(data))
        } else {
            let mut text = render_human(&result);
            if empty {
                text.push_str(&format!("\n{}\n", search::empty_result_guidance(mode)));
            }
            if index_in_progress {
                text.push_str("\nwarning: index_in_progress\n");
            }
            Ok(RpcResponse::ok_stdout(text))
        }
    }

    async fn cmd_index(&self, args: &[String]) -> RagexResult<RpcResponse> {
        let force = args.iter().any(|a| a == "--force");
        let verbose = args.iter().any(|a| a == "--verbose");
        let mut store = self.store.lock().await;

        self.state.store(DaemonState::Indexing as u8, Ordering::SeqCst);
        let mut progress: Box<ProgressCallback> = Box::new(move |p: &Path| {
            if verbose {
                tracing::info!(path = %p.display(), "indexing");
            }
        });
        let plan = self.indexer.decide(&self.workspace_root, &self.ignore, &store, force);
        let result = match plan {
            Ok(IndexPlan::Full) => {
                self.indexer.full_index(&self.workspace_root, &self.ignore, &mut store, self.embedder.as_ref(), progress)
            }
            Ok(IndexPlan::Incremental(diff)) => {
                self.indexer.apply_diff(&diff, &mut store, self.embedder.as_ref(), &mut progress)
            }
            Ok(IndexPlan::NoOp) => Ok(IndexStats::default()),
            Err(e) => Err(e),
        };
        self.state.store(DaemonState::Ready as u8, Ordering::SeqCst);
        let stats = result?;

        let mut meta = ProjectMetadata::load(&self.paths.project_info_path())?.unwrap_or_else(|| {
            ProjectMetadata::new(
                self.paths.project_id.clone(),
                &self.workspace_root,
                self.embedder.model_name().to_string(),
                self.embedder.dimensions(),
            )
        });
        meta.mark_indexed(store.statistics().total_symbols);
        meta.save(&self.paths.project_info_path())?;
        self.first_index_done.store(true, Ordering::SeqCst);
        self.snapshot.store(Arc::new(store.clone()));

        Ok(RpcResponse::ok_data(serde_json::to_value(stats)?))
    }

    /// Starts the recursive watcher if it isn't already running. Each
    /// debounced batch of changes is applied directly as a `ChecksumDiff`
    /// built from the queue's own added/removed sets — no tree rescan — and
    /// serialized behind the indexer's own lock so a watcher-triggered pass
    /// and a manual one never race.
    async fn cmd_start_continuous_index(&self, daemon: Arc<Self>) -> RagexResult<RpcResponse> {
        let mut guard = self.watcher.lock().await;
        if guard.is_some() {
            return Ok(RpcResponse::ok_stdout("watcher already running\n"));
        }
        let ignore = self.ignore.clone();
        let queue = self.queue.clone();
        let extensions = self.config.watcher.watched_extensions.clone();

        let watcher = FileWatcher::start(&self.workspace_root, extensions, ignore, queue, move |added, removed| {
            let daemon = daemon.clone();
            Box::pin(async move {
                let diff = ChecksumDiff { added, removed, modified: Vec::new() };
                let mut store = daemon.store.lock().await;
                let mut progress: Box<ProgressCallback> = Box::new(|_p: &Path| {});
                match daemon.indexer.apply_diff(&diff, &mut store, daemon.embedder.as_ref(), &mut progress) {
                    Ok(stats) => {
                        daemon.snapshot.store(Arc::new(store.clone()));
                        tracing::info!(?stats, "continuous index pass complete");
                    }
                    Err(RagexError::Busy) => tracing::debug!("continuous index pass skipped, another index is running"),
                    Err(e) => tracing::warn!(error = %e, "continuous index pass failed"),
                }
            })
        })?;
        *guard = Some(watcher);
        Ok(RpcResponse::ok_stdout("started watching for changes\n"))
    }

    fn cmd_init(&self) -> RagexResult<RpcResponse> {
        let path = self.workspace_root.join(".mcpignore");
        if path.exists() {
            return Ok(RpcResponse::ok_stdout("'.mcpignore' already exists, not overwritten\n"));
        }
        std::fs::write(&path, DEFAULT_IGNORE_TEMPLATE)?;
        Ok(RpcResponse::ok_stdout("created '.mcpignore'\n"))
    }

    fn cmd_ls(&self) -> RagexResult<RpcResponse> {
        let rows = list_projects()?;
        Ok(RpcResponse::ok_data(serde_json::to_value(rows)?))
    }

    fn cmd_rm(&self, args: &[String]) -> RagexResult<RpcResponse> {
        let Some(target) = args.first() else {
            return Err(RagexError::invalid_input("rm requires a project identifier"));
        };
        remove_project(target)?;
        Ok(RpcResponse::ok_stdout(format!("removed {target}\n")))
    }

    fn cmd_register(&self, command: &str) -> RpcResponse {
        RpcResponse::ok_stdout(registration_hint(command))
    }
}

/// Lists every project this host has ever indexed, by walking the data
/// directory directly. Host-wide and independent of any running daemon —
/// `ls` is served by a short-lived process, not a per-project socket.
pub fn list_projects() -> RagexResult<Vec<ProjectMetadata>> {
    let projects_dir = project::data_root().join("projects");
    let mut rows = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&projects_dir) {
        for entry in entries.flatten() {
            let info_path = entry.path().join("project_info.json");
            if let Ok(Some(meta)) = ProjectMetadata::load(&info_path) {
                rows.push(meta);
            }
        }
    }
    Ok(rows)
}

/// Deletes a project's persisted index by id. Works even when the project's
/// own daemon isn't running, since it touches only the on-disk data directory.
pub fn remove_project(target: &str) -> RagexResult<()> {
    let dir = project::data_root().join("projects").join(target);
    if !dir.exists() {
        return Err(RagexError::NotFound(format!("no project matching '{target}'")));
    }
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

/// The `claude mcp add`/`remove` invocation printed by `register`/`unregister`.
pub fn registration_hint(command: &str) -> String {
    let verb = if command == "register" { "add" } else { "remove" };
    format!("claude mcp {verb} ragex -- ragex daemon\n")
}

struct SearchFlags {
    query: String,
    regex: bool,
    limit: usize,
    min_similarity: Option<f32>,
    json: bool,
    mode_override: Option<String>,
}

impl SearchFlags {
    fn parse(args: &[String]) -> RagexResult<Self> {
        let mut query_parts = Vec::new();
        let mut regex = false;
        let mut limit = 20usize;
        let mut min_similarity = None;
        let mut json = false;
        let mut mode_override = None;

        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--regex" => regex = true,
                "--json" => json = true,
                "--limit" => {
                    limit = iter
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| RagexError::invalid_input("--limit requires a number"))?;
                }
                "--min-similarity" => {
                    min_similarity = Some(
                        iter.next()
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| RagexError::invalid_input("--min-similarity requires a number"))?,
                    );
                }
                "--mode" => {
                    mode_override = iter.next().cloned();
                }
                "--index-dir" => {
                    iter.next();
                }
                other => query_parts.push(other.to_string()),
            }
        }

        if query_parts.is_empty() {
            return Err(RagexError::invalid_input("search requires a query"));
        }

        Ok(Self { query: query_parts.join(" "), regex, limit, min_similarity, json, mode_override })
    }
}

fn render_human(result: &SearchResult) -> String {
    match result {
        SearchResult::Semantic { hits } => hits
            .iter()
            .map(|h| format!("{}:{} {} ({}) — score {:.3}", h.file, h.name, h.kind, h.rank, h.reranked_score))
            .collect::<Vec<_>>()
            .join("\n"),
        SearchResult::Regex { matches } => matches
            .iter()
            .map(|m| format!("{}:{}:{}: {}", m.path, m.line_number, m.column, m.line_text))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

const DEFAULT_IGNORE_TEMPLATE: &str = "\
# ragex ignore file — gitignore syntax.
# Lines starting with # are comments; !pattern negates an exclusion.
.git/
node_modules/
__pycache__/
.venv/
venv/
dist/
build/
*.log
*.sqlite*
.env
!.env.example
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_flags_parse_joins_multiword_query_and_flags() {
        let args = vec![
            "how".to_string(),
            "does".to_string(),
            "auth".to_string(),
            "work".to_string(),
            "--json".to_string(),
            "--limit".to_string(),
            "5".to_string(),
        ];
        let flags = SearchFlags::parse(&args).unwrap();
        assert_eq!(flags.query, "how does auth work");
        assert!(flags.json);
        assert_eq!(flags.limit, 5);
    }

    #[test]
    fn search_flags_reject_empty_query() {
        let args = vec!["--json".to_string()];
        assert!(SearchFlags::parse(&args).is_err());
    }

    #[test]
    fn search_flags_parse_mode_override() {
        let args = vec!["foo".to_string(), "--mode".to_string(), "regex".to_string()];
        let flags = SearchFlags::parse(&args).unwrap();
        assert_eq!(flags.mode_override.as_deref(), Some("regex"));
    }

    #[test]
    fn daemon_state_round_trips_through_u8() {
        assert_eq!(DaemonState::from_u8(DaemonState::Indexing as u8), DaemonState::Indexing);
    }

    struct FakeEmbedder {
        dims: usize,
    }

    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn model_name(&self) -> &str {
            "fake"
        }
        fn embed_text(&self, _text: &str) -> RagexResult<Vec<f32>> {
            Ok(vec![1.0; self.dims])
        }
        fn embed_batch(&self, texts: &[String]) -> RagexResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    fn build_test_daemon(workspace: &Path) -> Arc<ProjectDaemon> {
        let store_dir = tempfile::tempdir().unwrap();
        let ignore = Arc::new(IgnoreEngine::new(workspace.to_path_buf()));
        let embedder: Box<dyn Embedder> = Box::new(FakeEmbedder { dims: 4 });
        let parallel = crate::config::ParallelConfig { use_parallel: false, ..Default::default() };
        let indexer = Indexer::new(parallel.clone());

        let mut store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        indexer.full_index(workspace, &ignore, &mut store, embedder.as_ref(), Box::new(|_| {})).unwrap();
        let snapshot = ArcSwap::from_pointee(store.clone());

        let config = Config { parallel, ..Config::default() };
        Arc::new(ProjectDaemon {
            workspace_root: workspace.to_path_buf(),
            paths: ProjectPaths::new("test_project".to_string()),
            config,
            ignore,
            store: Mutex::new(store),
            snapshot,
            embedder,
            indexer,
            queue: Arc::new(ChangeQueue::new(1)),
            watcher: Mutex::new(None),
            state: AtomicU8::new(DaemonState::Ready as u8),
            start_time: Instant::now(),
            command_count: AtomicU64::new(0),
            first_index_done: AtomicBool::new(true),
        })
    }

    async fn roundtrip(socket_path: &Path, request: serde_json::Value) -> serde_json::Value {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client = UnixStream::connect(socket_path).await.unwrap();
        client.write_all(&serde_json::to_vec(&request).unwrap()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    async fn serve_one(daemon: Arc<ProjectDaemon>, socket_path: &Path, request: serde_json::Value) -> serde_json::Value {
        let listener = UnixListener::bind(socket_path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            ProjectDaemon::serve_connection(daemon, stream).await;
        });
        let response = roundtrip(socket_path, request).await;
        server.await.unwrap();
        response
    }

    #[tokio::test]
    async fn serve_connection_answers_status_and_search_over_the_socket() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def authenticate_user():\n    pass\n").unwrap();
        let daemon = build_test_daemon(workspace.path());
        let socket_dir = tempfile::tempdir().unwrap();

        let response = serve_one(daemon.clone(), &socket_dir.path().join("status.sock"), json!({"command": "status", "args": []})).await;
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["data"]["status"], json!("ready"));

        let response = serve_one(
            daemon.clone(),
            &socket_dir.path().join("search.sock"),
            json!({"command": "search", "args": ["authenticate", "--json"]}),
        )
        .await;
        assert_eq!(response["success"], json!(true));
        assert_eq!(daemon.command_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn search_does_not_block_behind_the_store_writer_lock() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def authenticate_user():\n    pass\n").unwrap();
        let daemon = build_test_daemon(workspace.path());

        let _held = daemon.store.lock().await;
        let args = vec!["authenticate".to_string(), "--json".to_string()];
        let result = tokio::time::timeout(std::time::Duration::from_millis(200), daemon.cmd_search(&args)).await;
        assert!(result.is_ok(), "search must read the snapshot, not wait on an in-flight index's writer lock");
    }

    #[tokio::test]
    async fn search_during_first_index_carries_an_index_in_progress_warning() {
        let workspace = tempfile::tempdir().unwrap();
        let daemon = build_test_daemon(workspace.path());
        daemon.first_index_done.store(false, Ordering::SeqCst);
        daemon.state.store(DaemonState::Indexing as u8, Ordering::SeqCst);

        let args = vec!["authenticate".to_string(), "--json".to_string()];
        let response = daemon.cmd_search(&args).await.unwrap();
        assert_eq!(response.data.unwrap()["warnings"], json!(["index_in_progress"]));
    }

    #[tokio::test]
    async fn serve_connection_reports_invalid_json_as_an_error_response() {
        let workspace = tempfile::tempdir().unwrap();
        let daemon = build_test_daemon(workspace.path());

        let socket_dir = tempfile::tempdir().unwrap();
        let socket_path = socket_dir.path().join("bad.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            ProjectDaemon::serve_connection(daemon, stream).await;
        });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"not json").await.unwrap();
        client.shutdown().await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        let response: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        server.await.unwrap();

        assert_eq!(response["success"], json!(false));
        assert!(response["error"].as_str().unwrap().contains("invalid JSON"));
    }
}
