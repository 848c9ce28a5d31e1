//! Built-in content tools over the [`RecordStore`].
//!
//! - `get_clients`: search or list clients
//! - `get_client`: fetch one client by id
//! - `create_content`: create a draft content item (idempotent)
//! - `list_content`: list content items, optionally filtered

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::errors::ToolError;
use super::executor::{ToolExecutor, ToolHandler};
use super::registry::ToolRegistry;
use super::types::{Tool, ToolExecutionResult, ToolParameter};
use crate::store::{RecordStore, StoreError, CLIENTS, CONTENT};

pub const CONTENT_KINDS: [&str; 5] = [
    "blog_post",
    "social_post",
    "video_script",
    "affiliate_review",
    "seo_article",
];

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

fn limit_param(params: &Value) -> usize {
    params
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT) as usize
}

fn str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn store_failure(err: StoreError) -> ToolExecutionResult {
    tracing::error!(error = %err, "record store call failed");
    ToolExecutionResult::from_error(&ToolError::Store(err))
}

/// Run a store-backed body on the blocking pool. rusqlite calls are
/// synchronous and must not hold a runtime worker while other calls run.
async fn on_blocking_pool<F>(tool: &'static str, work: F) -> ToolExecutionResult
where
    F: FnOnce() -> ToolExecutionResult + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(tool = %tool, error = %e, "blocking store task failed");
            ToolExecutionResult::from_error(&ToolError::Handler {
                tool: tool.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Deterministic id for a content item, so repeating the same
/// `create_content` call returns the existing item instead of a duplicate.
pub fn content_id(client_id: &str, kind: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(title.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("content-{hex}")
}

// ─── get_clients ─────────────────────────────────────────────────────────────

pub struct GetClientsTool {
    store: Arc<dyn RecordStore>,
}

impl GetClientsTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for GetClientsTool {
    fn definition(&self) -> Tool {
        Tool::new(
            "get_clients",
            "Search clients by name, company or email. Without a search term, lists clients.",
        )
        .with_param(ToolParameter::string("search", "Case-insensitive name, company or email fragment"))
        .with_param(ToolParameter::integer("limit", "Maximum number of clients (1-100, default 20)"))
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> ToolExecutionResult {
        let store = Arc::clone(&self.store);
        on_blocking_pool("get_clients", move || get_clients(store.as_ref(), &params)).await
    }
}

fn get_clients(store: &dyn RecordStore, params: &Value) -> ToolExecutionResult {
    let limit = limit_param(params);
    let records = match str_param(params, "search") {
        Some(needle) => store.search(CLIENTS, &["name", "company", "email"], needle, limit),
        None => store.list(CLIENTS, limit),
    };

    match records {
        Ok(records) => {
            let clients: Vec<Value> = records.iter().map(|r| r.to_json()).collect();
            let message = format!("Found {} client(s)", clients.len());
            ToolExecutionResult::ok(Value::Array(clients), message)
        }
        Err(e) => store_failure(e),
    }
}

// ─── get_client ──────────────────────────────────────────────────────────────

pub struct GetClientTool {
    store: Arc<dyn RecordStore>,
}

impl GetClientTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for GetClientTool {
    fn definition(&self) -> Tool {
        Tool::new("get_client", "Fetch a single client by id.")
            .with_param(ToolParameter::string("client_id", "Client id").required())
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> ToolExecutionResult {
        let store = Arc::clone(&self.store);
        on_blocking_pool("get_client", move || get_client(store.as_ref(), &params)).await
    }
}

fn get_client(store: &dyn RecordStore, params: &Value) -> ToolExecutionResult {
    let Some(client_id) = str_param(params, "client_id") else {
        return ToolExecutionResult::failure("client_id must not be empty", "Invalid arguments");
    };

    match store.get(CLIENTS, client_id) {
        Ok(Some(record)) => ToolExecutionResult::ok(record.to_json(), "Client found"),
        Ok(None) => {
            ToolExecutionResult::failure(format!("Client not found: {client_id}"), "Not found")
        }
        Err(e) => store_failure(e),
    }
}

// ─── create_content ──────────────────────────────────────────────────────────

pub struct CreateContentTool {
    store: Arc<dyn RecordStore>,
}

impl CreateContentTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CreateContentTool {
    fn definition(&self) -> Tool {
        Tool::new(
            "create_content",
            "Create a draft content item for a client. Repeating the same client, kind and title returns the existing item.",
        )
        .with_param(ToolParameter::string("client_id", "Client id").required())
        .with_param(
            ToolParameter::string("kind", "Content kind")
                .required()
                .with_enum(&CONTENT_KINDS),
        )
        .with_param(ToolParameter::string("title", "Working title").required())
        .with_param(ToolParameter::string("body", "Draft body text"))
        .with_param(ToolParameter::string("platform", "Target platform, e.g. linkedin"))
    }

    fn invalidates(&self) -> &'static [&'static str] {
        &["list_content"]
    }

    async fn execute(&self, params: Value) -> ToolExecutionResult {
        let store = Arc::clone(&self.store);
        on_blocking_pool("create_content", move || create_content(store.as_ref(), &params)).await
    }
}

fn create_content(store: &dyn RecordStore, params: &Value) -> ToolExecutionResult {
    let (Some(client_id), Some(kind), Some(title)) = (
        str_param(params, "client_id"),
        str_param(params, "kind"),
        str_param(params, "title"),
    ) else {
        return ToolExecutionResult::failure(
            "client_id, kind and title must not be empty",
            "Invalid arguments",
        );
    };

    match store.get(CLIENTS, client_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return ToolExecutionResult::failure(
                format!("Client not found: {client_id}"),
                "Not found",
            )
        }
        Err(e) => return store_failure(e),
    }

    let id = content_id(client_id, kind, title);
    match store.get(CONTENT, &id) {
        Ok(Some(existing)) => {
            tracing::info!(content_id = %id, "create_content repeated, returning existing item");
            return ToolExecutionResult::ok(existing.to_json(), "Content already exists");
        }
        Ok(None) => {}
        Err(e) => return store_failure(e),
    }

    let data = json!({
        "client_id": client_id,
        "kind": kind,
        "title": title,
        "body": str_param(params, "body"),
        "platform": str_param(params, "platform"),
        "status": "draft",
    });

    match store.insert(CONTENT, &id, &data) {
        Ok(record) => {
            tracing::info!(content_id = %id, client_id = %client_id, kind = %kind, "content created");
            ToolExecutionResult::ok(record.to_json(), format!("Created {kind} '{title}'"))
        }
        // Lost a race with an identical call; the existing item is the answer.
        Err(StoreError::Conflict { .. }) => match store.get(CONTENT, &id) {
            Ok(Some(existing)) => ToolExecutionResult::ok(existing.to_json(), "Content already exists"),
            Ok(None) => ToolExecutionResult::failure(
                format!("content {id} vanished after conflict"),
                "Storage error",
            ),
            Err(e) => store_failure(e),
        },
        Err(e) => store_failure(e),
    }
}

// ─── list_content ────────────────────────────────────────────────────────────

pub struct ListContentTool {
    store: Arc<dyn RecordStore>,
}

impl ListContentTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ListContentTool {
    fn definition(&self) -> Tool {
        Tool::new("list_content", "List content items, optionally filtered by client and kind.")
            .with_param(ToolParameter::string("client_id", "Only items for this client"))
            .with_param(ToolParameter::string("kind", "Only items of this kind").with_enum(&CONTENT_KINDS))
            .with_param(ToolParameter::integer("limit", "Maximum number of items (1-100, default 20)"))
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> ToolExecutionResult {
        let store = Arc::clone(&self.store);
        on_blocking_pool("list_content", move || list_content(store.as_ref(), &params)).await
    }
}

fn list_content(store: &dyn RecordStore, params: &Value) -> ToolExecutionResult {
    let mut filters = Vec::new();
    if let Some(client_id) = str_param(params, "client_id") {
        filters.push(("client_id", client_id));
    }
    if let Some(kind) = str_param(params, "kind") {
        filters.push(("kind", kind));
    }

    match store.filter(CONTENT, &filters, limit_param(params)) {
        Ok(records) => {
            let items: Vec<Value> = records.iter().map(|r| r.to_json()).collect();
            let message = format!("Found {} content item(s)", items.len());
            ToolExecutionResult::ok(Value::Array(items), message)
        }
        Err(e) => store_failure(e),
    }
}

// ─── Registration ────────────────────────────────────────────────────────────

/// Every built-in handler, backed by `store`.
pub fn builtin_handlers(store: Arc<dyn RecordStore>) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(GetClientsTool::new(Arc::clone(&store))),
        Arc::new(GetClientTool::new(Arc::clone(&store))),
        Arc::new(CreateContentTool::new(Arc::clone(&store))),
        Arc::new(ListContentTool::new(store)),
    ]
}

/// Register a handler's declaration and implementation together.
pub fn register_handler(
    registry: &mut ToolRegistry,
    executor: &mut ToolExecutor,
    handler: Arc<dyn ToolHandler>,
) -> Result<(), ToolError> {
    registry.register(handler.definition())?;
    executor.register(handler)
}

pub fn register_builtin_tools(
    store: Arc<dyn RecordStore>,
    registry: &mut ToolRegistry,
    executor: &mut ToolExecutor,
) -> Result<(), ToolError> {
    for handler in builtin_handlers(store) {
        register_handler(registry, executor, handler)?;
    }
    tracing::info!(count = registry.len(), "built-in tools registered");
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Record, SqliteRecordStore};
    use std::time::Duration;

    fn setup() -> (Arc<dyn RecordStore>, ToolRegistry, ToolExecutor) {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        store
            .insert(
                CLIENTS,
                "c1",
                &json!({"name": "Anna Jansen", "company": "Bakkerij Jansen", "email": "anna@jansen.nl"}),
            )
            .unwrap();
        store
            .insert(CLIENTS, "c2", &json!({"name": "Bram Pieters", "company": "Fietsen BV"}))
            .unwrap();

        let mut registry = ToolRegistry::new();
        let mut executor = ToolExecutor::new(Duration::from_secs(5));
        register_builtin_tools(Arc::clone(&store), &mut registry, &mut executor).unwrap();
        (store, registry, executor)
    }

    #[tokio::test]
    async fn test_registers_all_four() {
        let (_, registry, executor) = setup();
        assert_eq!(
            registry.names(),
            vec!["create_content", "get_client", "get_clients", "list_content"]
        );
        assert!(executor.has_handler("get_clients"));
    }

    #[tokio::test]
    async fn test_get_clients_search() {
        let (_, _, executor) = setup();
        let result = executor.execute("get_clients", json!({"search": "JANSEN"})).await;
        assert!(result.success);
        let clients = result.data.unwrap();
        assert_eq!(clients.as_array().unwrap().len(), 1);
        assert_eq!(clients[0]["id"], "c1");

        let all = executor.execute("get_clients", json!({})).await;
        assert_eq!(all.data.unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_client_not_found() {
        let (_, _, executor) = setup();
        let result = executor.execute("get_client", json!({"client_id": "nope"})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Client not found: nope"));
    }

    #[tokio::test]
    async fn test_create_content_is_idempotent() {
        let (store, _, executor) = setup();
        let args = json!({"client_id": "c1", "kind": "blog_post", "title": "Zuurdesem 101"});

        let first = executor.execute("create_content", args.clone()).await;
        assert!(first.success, "{first:?}");
        let second = executor
            .execute(
                "create_content",
                json!({"client_id": "c1", "kind": "blog_post", "title": "  zuurdesem 101 "}),
            )
            .await;
        assert!(second.success);
        assert_eq!(second.message, "Content already exists");
        assert_eq!(first.data.unwrap()["id"], second.data.unwrap()["id"]);
        assert_eq!(store.count(CONTENT).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_content_unknown_client() {
        let (_, _, executor) = setup();
        let result = executor
            .execute(
                "create_content",
                json!({"client_id": "ghost", "kind": "blog_post", "title": "x"}),
            )
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_create_content_rejects_bad_kind() {
        let (_, _, executor) = setup();
        let result = executor
            .execute(
                "create_content",
                json!({"client_id": "c1", "kind": "podcast", "title": "x"}),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "Invalid arguments");
    }

    #[tokio::test]
    async fn test_list_content_filters() {
        let (_, _, executor) = setup();
        for (client, kind, title) in [
            ("c1", "blog_post", "A"),
            ("c1", "social_post", "B"),
            ("c2", "blog_post", "C"),
        ] {
            let r = executor
                .execute(
                    "create_content",
                    json!({"client_id": client, "kind": kind, "title": title}),
                )
                .await;
            assert!(r.success);
        }

        let c1 = executor.execute("list_content", json!({"client_id": "c1"})).await;
        assert_eq!(c1.data.unwrap().as_array().unwrap().len(), 2);

        let blogs = executor
            .execute("list_content", json!({"client_id": "c1", "kind": "blog_post"}))
            .await;
        let blogs = blogs.data.unwrap();
        assert_eq!(blogs.as_array().unwrap().len(), 1);
        assert_eq!(blogs[0]["title"], "A");
    }

    /// SQLite store that blocks the calling thread before every call.
    struct SlowStore {
        inner: SqliteRecordStore,
        delay: Duration,
    }

    impl RecordStore for SlowStore {
        fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.get(collection, id)
        }

        fn list(&self, collection: &str, limit: usize) -> Result<Vec<Record>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.list(collection, limit)
        }

        fn search(
            &self,
            collection: &str,
            fields: &[&str],
            needle: &str,
            limit: usize,
        ) -> Result<Vec<Record>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.search(collection, fields, needle, limit)
        }

        fn filter(
            &self,
            collection: &str,
            filters: &[(&str, &str)],
            limit: usize,
        ) -> Result<Vec<Record>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.filter(collection, filters, limit)
        }

        fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<Record, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.insert(collection, id, data)
        }

        fn count(&self, collection: &str) -> Result<usize, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.count(collection)
        }
    }

    // `#[tokio::test]` runs on a single thread, so a store call on that thread
    // would hold back the timer until the call returns.
    #[tokio::test]
    async fn test_slow_store_does_not_block_runtime() {
        let store: Arc<dyn RecordStore> = Arc::new(SlowStore {
            inner: SqliteRecordStore::open_in_memory().unwrap(),
            delay: Duration::from_millis(300),
        });
        let mut registry = ToolRegistry::new();
        let mut executor = ToolExecutor::new(Duration::from_secs(5));
        register_builtin_tools(store, &mut registry, &mut executor).unwrap();

        let started = std::time::Instant::now();
        let timer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            started.elapsed()
        };
        let (result, timer_fired_at) =
            tokio::join!(executor.execute("get_clients", json!({})), timer);

        assert!(result.success, "{result:?}");
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(
            timer_fired_at < Duration::from_millis(200),
            "runtime was blocked for {timer_fired_at:?}"
        );
    }

    #[test]
    fn test_content_id_normalizes_title() {
        assert_eq!(
            content_id("c1", "blog_post", "Hello"),
            content_id("c1", "blog_post", " hello ")
        );
        assert_ne!(
            content_id("c1", "blog_post", "Hello"),
            content_id("c1", "social_post", "Hello")
        );
        assert_eq!(content_id("c1", "blog_post", "Hello").len(), "content-".len() + 16);
    }
}
