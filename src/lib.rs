pub mod errors;
pub mod guard;
pub mod models;
pub mod rate_limit;
pub mod settings;
pub mod snippet;
pub mod store;
pub mod tree;

use crate::errors::{AppError, AppResult};
use crate::models::{
    now_millis, BoardRecord, BooleanResponse, EntryInfo, InitialData, RmOptions, SnippetRecord, StatInfo,
};
use crate::rate_limit::RateLimiter;
use crate::settings::{AppSettings, StorageContext};
use crate::snippet::SnippetFormat;
use crate::store::FileStore;
use crate::tree::{classify, StructuredDocument, TreeBuilder};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

// Rate-limit identity of the stdio peer. One host process serves one peer.
pub const STDIO_PEER: &str = "stdio";

#[derive(Clone)]
pub struct AppState {
    store: FileStore,
    tree: TreeBuilder,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl AppState {
    pub fn new(settings: &AppSettings) -> AppResult<Self> {
        let context = Arc::new(StorageContext::from_settings(settings)?);
        let store = FileStore::new(context);
        Ok(Self {
            tree: TreeBuilder::new(store.clone()),
            store,
            limiter: Arc::new(Mutex::new(RateLimiter::from_settings(&settings.rate_limit))),
        })
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    async fn admit(&self, caller: &str) -> AppResult<()> {
        let mut limiter = self.limiter.lock().await;
        if limiter.is_allowed(caller) {
            Ok(())
        } else {
            tracing::warn!(caller = %caller, "request rate limited");
            Err(AppError::RateLimited(caller.to_string()))
        }
    }

    pub async fn sweep_rate_limits(&self) -> usize {
        self.limiter.lock().await.sweep()
    }

    pub async fn read_file(&self, caller: &str, path: &str) -> AppResult<Option<String>> {
        self.admit(caller).await?;
        self.store.read(path).await
    }

    pub async fn write_file(&self, caller: &str, path: &str, content: &str) -> AppResult<BooleanResponse> {
        self.admit(caller).await?;
        self.store.ensure_bucket_for(path).await?;
        self.store.write(path, content).await?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn rm(&self, caller: &str, path: &str, options: RmOptions) -> AppResult<BooleanResponse> {
        self.admit(caller).await?;
        // `force` has no effect: deletes of missing paths already succeed.
        self.store.delete(path, options.recursive).await?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn rename(&self, caller: &str, old_path: &str, new_path: &str) -> AppResult<BooleanResponse> {
        self.admit(caller).await?;
        self.store.rename(old_path, new_path).await?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn mkdir(&self, caller: &str, path: &str) -> AppResult<BooleanResponse> {
        self.admit(caller).await?;
        self.store.mkdir(path).await?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn readdir(&self, caller: &str, path: &str) -> AppResult<Vec<EntryInfo>> {
        self.admit(caller).await?;
        self.store.list(path).await
    }

    pub async fn stat(&self, caller: &str, path: &str) -> AppResult<Option<StatInfo>> {
        self.admit(caller).await?;
        self.store.stat(path).await
    }

    pub async fn get_initial_data(&self, caller: &str) -> AppResult<InitialData> {
        self.admit(caller).await?;
        self.store.ensure_topology().await?;
        Ok(InitialData {
            sidebar_tree: self.tree.build("").await,
        })
    }

    pub async fn load_snippet(&self, caller: &str, path: &str) -> AppResult<Option<SnippetRecord>> {
        self.admit(caller).await?;
        let format = snippet_format(path)?;
        let Some(content) = self.store.read(path).await? else {
            return Ok(None);
        };
        match format {
            SnippetFormat::Text => snippet::parse(format, &content).map(Some),
            SnippetFormat::Json => {
                let value: Value = serde_json::from_str(&content)?;
                match classify(value, &file_stem(path))? {
                    StructuredDocument::Snippet(record) | StructuredDocument::Legacy(record) => Ok(Some(record)),
                    StructuredDocument::Board(_) => {
                        Err(AppError::Parse("document is a board, not a snippet".to_string()))
                    }
                }
            }
        }
    }

    pub async fn save_snippet(&self, caller: &str, path: &str, mut record: SnippetRecord) -> AppResult<SnippetRecord> {
        self.admit(caller).await?;
        let format = snippet_format(path)?;
        record.modified = now_millis();
        let encoded = snippet::encode(format, &record)?;
        self.store.ensure_bucket_for(path).await?;
        self.store.write(path, &encoded).await?;
        Ok(record)
    }

    pub async fn save_board(&self, caller: &str, path: &str, board: BoardRecord) -> AppResult<BoardRecord> {
        self.admit(caller).await?;
        if snippet_format(path)? != SnippetFormat::Json {
            return Err(AppError::InvalidRequest("boards are stored as .json files".to_string()));
        }
        let encoded = serde_json::to_string_pretty(&board)?;
        self.store.ensure_bucket_for(path).await?;
        self.store.write(path, &encoded).await?;
        Ok(board)
    }
}

fn snippet_format(path: &str) -> AppResult<SnippetFormat> {
    SnippetFormat::from_path(path)
        .ok_or_else(|| AppError::InvalidRequest("snippets must be .txt or .json files".to_string()))
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub caller: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, error: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
enum BridgeCommand {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    Rm {
        path: String,
        #[serde(default)]
        options: RmOptions,
    },
    Rename {
        #[serde(rename = "oldPath")]
        old_path: String,
        #[serde(rename = "newPath")]
        new_path: String,
    },
    Mkdir {
        path: String,
    },
    Readdir {
        path: String,
    },
    Stat {
        path: String,
    },
    GetInitialData {},
    LoadSnippet {
        path: String,
    },
    SaveSnippet {
        path: String,
        snippet: SnippetRecord,
    },
    SaveBoard {
        path: String,
        board: BoardRecord,
    },
}

// `peer` is assigned by the host and keys the rate limiter. The request's own
// `caller` field is a client-chosen label and only shows up in logs.
pub async fn dispatch(state: &AppState, peer: &str, request: BridgeRequest) -> BridgeResponse {
    let label = request.caller.clone().unwrap_or_default();
    let command = request.command.clone();

    match execute(state, peer, request.command, request.args).await {
        Ok(result) => BridgeResponse::success(request.id, result),
        Err(error) => {
            tracing::debug!(command = %command, peer = %peer, label = %label, error = %error, "request failed");
            BridgeResponse::failure(request.id, to_client_error(error))
        }
    }
}

async fn execute(state: &AppState, caller: &str, command: String, args: Value) -> AppResult<Value> {
    let args = if args.is_null() { json!({}) } else { args };
    let command: BridgeCommand = serde_json::from_value(json!({ "command": command, "args": args }))
        .map_err(|error| AppError::InvalidRequest(error.to_string()))?;

    let result = match command {
        BridgeCommand::ReadFile { path } => serde_json::to_value(state.read_file(caller, &path).await?)?,
        BridgeCommand::WriteFile { path, content } => {
            serde_json::to_value(state.write_file(caller, &path, &content).await?)?
        }
        BridgeCommand::Rm { path, options } => serde_json::to_value(state.rm(caller, &path, options).await?)?,
        BridgeCommand::Rename { old_path, new_path } => {
            serde_json::to_value(state.rename(caller, &old_path, &new_path).await?)?
        }
        BridgeCommand::Mkdir { path } => serde_json::to_value(state.mkdir(caller, &path).await?)?,
        BridgeCommand::Readdir { path } => serde_json::to_value(state.readdir(caller, &path).await?)?,
        BridgeCommand::Stat { path } => serde_json::to_value(state.stat(caller, &path).await?)?,
        BridgeCommand::GetInitialData {} => serde_json::to_value(state.get_initial_data(caller).await?)?,
        BridgeCommand::LoadSnippet { path } => serde_json::to_value(state.load_snippet(caller, &path).await?)?,
        BridgeCommand::SaveSnippet { path, snippet } => {
            serde_json::to_value(state.save_snippet(caller, &path, snippet).await?)?
        }
        BridgeCommand::SaveBoard { path, board } => {
            serde_json::to_value(state.save_board(caller, &path, board).await?)?
        }
    };
    Ok(result)
}

pub async fn handle_line(state: &AppState, peer: &str, line: &str) -> BridgeResponse {
    match serde_json::from_str::<BridgeRequest>(line) {
        Ok(request) => dispatch(state, peer, request).await,
        Err(error) => BridgeResponse::failure(
            Value::Null,
            to_client_error(AppError::InvalidRequest(error.to_string())),
        ),
    }
}

pub async fn run() -> anyhow::Result<()> {
    let settings = AppSettings::load().context("failed to load settings")?;
    let log_dir = settings.resolved_log_dir();
    if let Err(error) = init_tracing(&log_dir) {
        eprintln!("tracing disabled: {}", error);
    }

    let state = AppState::new(&settings).context("failed to open data root")?;
    tracing::info!(
        data_root = %state.store().data_root().display(),
        max_file_size_bytes = settings.max_file_size_bytes,
        "storage bridge ready"
    );

    let sweep_every = Duration::from_millis(settings.rate_limit.sweep_interval_ms.max(1));
    let sweeper = tokio::spawn({
        let state = state.clone();
        async move {
            let mut interval = tokio::time::interval(sweep_every);
            loop {
                interval.tick().await;
                let dropped = state.sweep_rate_limits().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "idle rate-limit entries swept");
                }
            }
        }
    });

    let (sender, mut receiver) = mpsc::channel::<BridgeResponse>(256);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = receiver.recv().await {
            let mut line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(error) => {
                    tracing::error!(error = %error, "failed to serialize response");
                    continue;
                }
            };
            line.push('\n');
            if let Err(error) = stdout.write_all(line.as_bytes()).await {
                tracing::error!(error = %error, "stdout closed; stopping writer");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let state = state.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            let response = handle_line(&state, STDIO_PEER, &line).await;
            if sender.send(response).await.is_err() {
                tracing::warn!("response dropped; writer has stopped");
            }
        });
    }

    drop(sender);
    let _ = writer.await;
    sweeper.abort();
    tracing::info!("stdin closed; storage bridge shutting down");
    Ok(())
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "snipboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RateLimitSettings;

    fn state_for(root: &Path, max_requests: usize) -> AppState {
        let settings = AppSettings {
            data_root: root.to_path_buf(),
            rate_limit: RateLimitSettings {
                max_requests,
                ..RateLimitSettings::default()
            },
            ..AppSettings::default()
        };
        AppState::new(&settings).expect("state")
    }

    #[tokio::test]
    async fn unknown_command_is_invalid_request() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_for(dir.path(), 100);
        let response = handle_line(&state, STDIO_PEER, r#"{"id": 1, "command": "format-disk", "args": {}}"#).await;
        assert!(!response.ok);
        assert_eq!(response.id, json!(1));
        assert!(response.error.unwrap_or_default().starts_with("INVALID_REQUEST"));

        let garbage = handle_line(&state, STDIO_PEER, "not json").await;
        assert!(!garbage.ok);
        assert_eq!(garbage.id, Value::Null);
    }

    #[tokio::test]
    async fn rate_limit_applies_per_caller() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_for(dir.path(), 2);
        for _ in 0..2 {
            state.stat("ui", "").await.expect("allowed");
        }
        let error = state.stat("ui", "").await.expect_err("limited");
        assert!(matches!(error, AppError::RateLimited(_)));
        state.stat("other", "").await.expect("separate budget");
    }

    #[tokio::test]
    async fn client_chosen_caller_names_share_one_budget() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_for(dir.path(), 2);
        let mut allowed = 0;
        for index in 0..50 {
            let line = json!({"id": index, "caller": format!("c{}", index), "command": "stat", "args": {"path": ""}});
            if handle_line(&state, STDIO_PEER, &line.to_string()).await.ok {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 2);

        let other_peer = handle_line(&state, "second-peer", r#"{"command": "stat", "args": {"path": ""}}"#).await;
        assert!(other_peer.ok);
    }

    #[tokio::test]
    async fn snippet_save_uses_native_encoding() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_for(dir.path(), 100);
        let mut record = SnippetRecord::new("body text");
        record.tags = vec!["b".to_string(), "a".to_string()];

        state.save_snippet("ui", "snippets/one.txt", record.clone()).await.expect("save txt");
        let raw = state.read_file("ui", "snippets/one.txt").await.expect("read").expect("exists");
        assert!(raw.contains("tags: b, a\n"));
        assert!(raw.contains("\n---\nbody text"));

        state.save_snippet("ui", "snippets/two.json", record.clone()).await.expect("save json");
        let loaded = state
            .load_snippet("ui", "snippets/two.json")
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(loaded.text, "body text");
        assert_eq!(loaded.tags, vec!["b", "a"]);

        let error = state
            .save_snippet("ui", "snippets/three.md", record)
            .await
            .expect_err("unsupported extension");
        assert!(matches!(error, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn board_files_are_not_loaded_as_snippets() {
        let dir = tempfile::tempdir().expect("temp dir");
        let state = state_for(dir.path(), 100);
        let board: BoardRecord = serde_json::from_value(json!({
            "id": "b1", "name": "Plot", "cards": [], "tags": ["x"]
        }))
        .expect("board");
        state.save_board("ui", "boards/plot.json", board).await.expect("save board");
        let error = state
            .load_snippet("ui", "boards/plot.json")
            .await
            .expect_err("board is not a snippet");
        assert!(error.to_string().starts_with("PARSE_FAILURE"));
    }
}
