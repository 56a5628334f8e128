use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantql_engine::model::{MappingKind, MappingSet, PlanComplexity, TranslationPath};
use tenantql_engine::rewriter::reverse;
use tenantql_engine::{
    parse_schema_yaml, EngineConfig, ExecutionError, GenerationError, GenerationPolicy, JsonFileMappingStore,
    MappingStore, MemoryMappingStore, MemorySchemaStore, QueryExecutor, QueryResult, TranslateError,
    TranslationEngine,
};
use tenantql_engine::testing::ScriptedBackend;

const SCHEMA: &str = r#"
tables:
  awards:
    description: Federal contract awards
    columns:
      generated_unique_award_id: { type: VARCHAR, is_primary_key: true }
      description: { type: VARCHAR }
      total_obligation: { type: "DECIMAL(18,2)" }
      action_date: { type: DATE }
      period_start: { type: DATE }
      period_end: { type: DATE }
      recipient_id: { type: INTEGER, nullable: false, references: recipients.id }
  recipients:
    columns:
      id: { type: INTEGER, is_primary_key: true }
      legal_name: { type: VARCHAR }
      email: { type: VARCHAR }
"#;

const STATUS_CASE: &str =
    "CASE WHEN period_end>=CURRENT_DATE AND period_start<=CURRENT_DATE THEN 'active' ELSE 'inactive' END";

const CONTRACTS: &str = "=== CANONICAL TABLE: contracts ===";
const PARTIES: &str = "=== CANONICAL TABLE: parties ===";
const FIRST: &str = "=== CANONICAL QUERY ===";
const RETRY: &str = "=== PREVIOUS ATTEMPT FAILED VALIDATION ===";

fn contracts_reply() -> String {
    serde_json::json!({
        "table": {"target_table": "awards", "confidence": 0.95},
        "fields": [
            {"canonical_field": "contract_id", "kind": "direct", "target_column": "generated_unique_award_id", "confidence": 0.95},
            {"canonical_field": "title", "kind": "direct", "target_column": "description", "confidence": 0.85},
            {"canonical_field": "status", "kind": "derived", "expression": STATUS_CASE, "confidence": 0.85},
            {"canonical_field": "date_signed", "kind": "direct", "target_column": "action_date", "confidence": 0.8},
            {"canonical_field": "period_start", "kind": "direct", "target_column": "period_start", "confidence": 1.0},
            {"canonical_field": "period_end", "kind": "direct", "target_column": "period_end", "confidence": 1.0},
            {"canonical_field": "value_amount", "kind": "direct", "target_column": "total_obligation", "confidence": 0.9},
            {"canonical_field": "value_currency", "kind": "none", "reasoning": "amounts carry no currency"},
            {"canonical_field": "buyer_party_id", "kind": "none"},
            {"canonical_field": "supplier_party_ids", "kind": "direct", "target_table": "recipients", "target_column": "id", "confidence": 0.5}
        ]
    })
    .to_string()
}

fn parties_reply() -> String {
    serde_json::json!({
        "table": {"target_table": "recipients", "confidence": 0.9},
        "fields": [
            {"canonical_field": "party_id", "kind": "direct", "target_column": "id", "confidence": 0.95},
            {"canonical_field": "name", "kind": "direct", "target_column": "legal_name", "confidence": 0.9},
            {"canonical_field": "role", "kind": "constant", "value": "supplier", "confidence": 0.8},
            {"canonical_field": "contact_email", "kind": "direct", "target_column": "email", "confidence": 0.8}
        ]
    })
    .to_string()
}

fn sql_reply(sql: &str) -> String {
    serde_json::json!({"sql": sql, "confidence": 0.9, "reasoning": "status uses the registered CASE"}).to_string()
}

fn status_sql() -> String {
    format!(
        "SELECT generated_unique_award_id AS contract_id, {case} AS status FROM awards WHERE {case} = 'active'",
        case = STATUS_CASE
    )
}

/// Backend that can discover the acme tenant; translation rules are added by each test
fn discovering_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .reply(CONTRACTS, contracts_reply())
        .reply(PARTIES, parties_reply())
}

fn config() -> EngineConfig {
    EngineConfig {
        confidence_floor: 0.7,
        sample_rows: 2,
        generation: GenerationPolicy {
            timeout_secs: 5,
            max_attempts: 2,
            backoff_ms: 1,
        },
    }
}

fn engine_with(backend: Arc<ScriptedBackend>, cache: Arc<dyn MappingStore>) -> TranslationEngine {
    let schemas = MemorySchemaStore::new().with(parse_schema_yaml("acme", SCHEMA).unwrap());
    TranslationEngine::new(Arc::new(schemas), cache, backend, config())
}

fn engine(backend: Arc<ScriptedBackend>) -> TranslationEngine {
    engine_with(backend, Arc::new(MemoryMappingStore::new()))
}

#[tokio::test]
async fn derived_status_is_reproduced_verbatim() {
    let backend = Arc::new(discovering_backend().reply(FIRST, sql_reply(&status_sql())));
    let engine = engine(backend.clone());

    let result = engine
        .translate("SELECT contract_id, status FROM contracts WHERE status='active'", "acme")
        .await
        .unwrap();

    assert_eq!(result.path, TranslationPath::Generated);
    assert!(result.validation_errors.is_empty(), "{:?}", result.validation_errors);
    assert!(result.translated_query.contains(&format!("{} AS status", STATUS_CASE)));
    assert!(result.translated_query.contains("FROM awards"));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.join_strategy.as_ref().unwrap().primary_table, "awards");

    // the prompt carried the expression to copy
    let prompt = backend.prompts().into_iter().find(|p| p.contains(FIRST)).unwrap();
    assert!(prompt.contains("=== DERIVED FIELDS - COPY EXACTLY ==="));
    assert!(prompt.contains(STATUS_CASE));
}

#[tokio::test]
async fn missing_table_triggers_one_regeneration() {
    let hallucinated = format!("SELECT h.award_id, {} AS status FROM award_history h", STATUS_CASE);
    let backend = Arc::new(
        discovering_backend()
            .reply(RETRY, sql_reply(&status_sql()))
            .reply(FIRST, sql_reply(&hallucinated)),
    );
    let engine = engine(backend.clone());

    let result = engine
        .translate("SELECT contract_id, status FROM contracts WHERE status='active'", "acme")
        .await
        .unwrap();

    assert!(result.validation_errors.is_empty(), "{:?}", result.validation_errors);
    assert_eq!(result.translated_query, status_sql());
    assert_eq!(result.attempts, 2);
    assert_eq!(backend.calls_matching(RETRY), 1);
    let retry = backend.prompts().into_iter().find(|p| p.contains(RETRY)).unwrap();
    assert!(retry.contains("table award_history does not exist; available: awards, recipients"));
}

#[tokio::test]
async fn persistent_failure_returns_latest_sql_with_errors() {
    let backend = Arc::new(
        discovering_backend()
            .reply(RETRY, sql_reply("SELECT description AS status FROM awards"))
            .reply(FIRST, sql_reply("SELECT * FROM award_history")),
    );
    let result = engine(backend)
        .translate("SELECT status FROM contracts", "acme")
        .await
        .unwrap();
    assert_eq!(result.translated_query, "SELECT description AS status FROM awards");
    assert!(!result.validation_errors.is_empty());
    assert!(!result.is_valid());
}

#[tokio::test]
async fn simple_queries_never_call_the_backend() {
    let cache = Arc::new(MemoryMappingStore::new());
    // discover once with a working backend
    engine_with(Arc::new(discovering_backend()), cache.clone())
        .translate("SELECT title FROM contracts", "acme")
        .await
        .unwrap();

    let silent = Arc::new(ScriptedBackend::new());
    let engine = engine_with(silent.clone(), cache);
    let a = engine
        .translate("SELECT contract_id, title FROM contracts WHERE value_amount > 1000", "acme")
        .await
        .unwrap();
    let b = engine
        .translate("SELECT name, contact_email FROM parties ORDER BY name", "acme")
        .await
        .unwrap();

    assert_eq!(silent.calls(), 0);
    assert_eq!(a.path, TranslationPath::Direct);
    assert_eq!(
        a.translated_query,
        "SELECT generated_unique_award_id, description FROM awards WHERE total_obligation > 1000"
    );
    assert_eq!(a.confidence, 0.85);
    assert!(a.validation_errors.is_empty());
    assert_eq!(b.translated_query, "SELECT legal_name, email FROM recipients ORDER BY legal_name");
    assert_eq!(b.attempts, 0);

    let plan = a.execution_plan.as_ref().unwrap();
    assert_eq!(plan.tables_involved, vec!["awards"]);
    assert_eq!(plan.join_count, 0);
    assert_eq!(plan.estimated_complexity, PlanComplexity::Low);
    assert_eq!(a.performance_hints, vec!["WHERE conditions should use indexed columns"]);
    assert!(b.performance_hints.is_empty());
}

#[tokio::test]
async fn discovery_runs_at_most_once_per_tenant() {
    let cache = Arc::new(MemoryMappingStore::new());
    let backend = Arc::new(discovering_backend());
    let engine = engine_with(backend.clone(), cache.clone());

    for query in [
        "SELECT title FROM contracts",
        "SELECT contract_id FROM contracts",
        "SELECT name FROM parties",
    ] {
        engine.translate(query, "acme").await.unwrap();
    }

    assert_eq!(backend.calls_matching(CONTRACTS), 1);
    assert_eq!(backend.calls_matching(PARTIES), 1);
    let record = cache.get("acme").await.unwrap().unwrap();
    assert_eq!(record.usage_count, 2);

    // ungrounded and weak proposals were recorded as unmapped
    assert!(record.unmapped_field("value_currency").is_some());
    assert!(record.unmapped_field("supplier_party_ids").is_some());
    assert_eq!(record.field("role").unwrap().kind, MappingKind::Derived);
    assert_eq!(record.derived("role").unwrap().expression, "'supplier'");
}

#[tokio::test]
async fn cache_hit_translation_is_idempotent() {
    let cache = Arc::new(MemoryMappingStore::new());
    let backend = Arc::new(discovering_backend().reply(FIRST, sql_reply(&status_sql())));
    let engine = engine_with(backend.clone(), cache.clone());
    let simple = "SELECT contract_id, title FROM contracts WHERE value_amount > 1000";

    let first = engine.translate(simple, "acme").await.unwrap();
    let after_first = cache.get("acme").await.unwrap().unwrap();
    let second = engine.translate(simple, "acme").await.unwrap();
    let after_second = cache.get("acme").await.unwrap().unwrap();

    assert_eq!(first, second);
    // a hit only moves the usage counters
    assert_eq!(after_first.without_usage(), after_second.without_usage());
    assert_eq!(after_second.usage_count, after_first.usage_count + 1);
    assert_eq!(backend.calls(), 2);

    let derived = "SELECT contract_id, status FROM contracts WHERE status='active'";
    let a = engine.translate(derived, "acme").await.unwrap();
    let b = engine.translate(derived, "acme").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(backend.calls_matching(CONTRACTS), 1);
    assert_eq!(backend.calls_matching(FIRST), 2);
}

#[tokio::test]
async fn concurrent_cold_misses_discover_once() {
    let cache = Arc::new(MemoryMappingStore::new());
    let backend = Arc::new(discovering_backend().with_delay(Duration::from_millis(50)));
    let engine = engine_with(backend.clone(), cache.clone());

    let (a, b) = tokio::join!(
        engine.translate("SELECT title FROM contracts", "acme"),
        engine.translate("SELECT name FROM parties", "acme"),
    );
    assert_eq!(a.unwrap().translated_query, "SELECT description FROM awards");
    assert_eq!(b.unwrap().translated_query, "SELECT legal_name FROM recipients");

    assert_eq!(backend.calls(), 2);
    assert_eq!(backend.calls_matching(CONTRACTS), 1);
    assert_eq!(backend.calls_matching(PARTIES), 1);
    // the waiting call was served from the cache
    assert_eq!(cache.get("acme").await.unwrap().unwrap().usage_count, 1);
}

#[tokio::test]
async fn provider_confidence_is_clamped() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply(CONTRACTS, contracts_reply().replace("0.95", "1.7"))
            .reply(PARTIES, parties_reply()),
    );
    let cache = Arc::new(MemoryMappingStore::new());
    let engine = engine_with(backend, cache.clone());

    let result = engine.translate("SELECT contract_id FROM contracts", "acme").await.unwrap();
    assert_eq!(result.path, TranslationPath::Direct);
    assert_eq!(result.confidence, 1.0);

    let record = cache.get("acme").await.unwrap().unwrap();
    assert_eq!(record.table("contracts").unwrap().confidence, 1.0);
    assert!(record.field_mappings.iter().all(|f| (0.0..=1.0).contains(&f.confidence)));
}

#[tokio::test]
async fn substring_argument_is_translated_and_checked() {
    let engine = engine(Arc::new(discovering_backend()));

    let result = engine
        .translate("SELECT SUBSTRING(title FROM 1 FOR 3) FROM contracts", "acme")
        .await
        .unwrap();
    assert_eq!(result.path, TranslationPath::Direct);
    assert_eq!(result.translated_query, "SELECT SUBSTRING(description FROM 1 FOR 3) FROM awards");
    assert!(result.validation_errors.is_empty());
    assert_eq!(result.confidence, 0.85);
}

#[tokio::test]
async fn direct_rewrite_round_trips() {
    let cache = Arc::new(MemoryMappingStore::new());
    let engine = engine_with(Arc::new(discovering_backend()), cache.clone());
    let canonical = "SELECT contract_id, title, period_end FROM contracts WHERE value_amount >= 500 ORDER BY date_signed DESC";

    let result = engine.translate(canonical, "acme").await.unwrap();
    assert_eq!(result.path, TranslationPath::Direct);

    let mappings: MappingSet = cache.get("acme").await.unwrap().unwrap();
    assert_eq!(reverse(&result.translated_query, &mappings).unwrap(), canonical);
}

#[tokio::test]
async fn unmapped_select_item_is_dropped_with_warning() {
    let engine = engine(Arc::new(discovering_backend()));
    let result = engine
        .translate("SELECT contract_id, value_currency FROM contracts", "acme")
        .await
        .unwrap();
    assert_eq!(result.translated_query, "SELECT generated_unique_award_id FROM awards");
    assert!(result.warnings.iter().any(|w| w.contains("value_currency")));
    assert!(result.validation_errors.is_empty());
}

#[tokio::test]
async fn unknown_tenant_is_fatal() {
    let engine = engine(Arc::new(discovering_backend()));
    let err = engine.translate("SELECT title FROM contracts", "globex").await.unwrap_err();
    assert!(matches!(err, TranslateError::SchemaNotFound(t) if t == "globex"));
}

#[tokio::test]
async fn failed_discovery_caches_nothing() {
    let cache = Arc::new(MemoryMappingStore::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .reply(CONTRACTS, contracts_reply())
            .fail(PARTIES, GenerationError::Provider("overloaded".to_string())),
    );
    let engine = engine_with(backend, cache.clone());

    let err = engine.translate("SELECT title FROM contracts", "acme").await.unwrap_err();
    assert!(matches!(err, TranslateError::MappingDiscoveryFailed { .. }));
    assert!(err.to_string().starts_with("Mapping discovery unavailable"));
    assert!(cache.get("acme").await.unwrap().is_none());
}

#[tokio::test]
async fn non_select_is_rejected() {
    let engine = engine(Arc::new(discovering_backend()));
    let err = engine.translate("DELETE FROM contracts", "acme").await.unwrap_err();
    assert!(matches!(err, TranslateError::InvalidQuery(_)));
}

#[tokio::test]
async fn mappings_survive_restart_in_json_store() {
    let path = std::env::temp_dir().join(format!("tenantql_engine_{}.json", std::process::id()));
    std::fs::remove_file(&path).ok();

    let store = Arc::new(JsonFileMappingStore::open(&path).await.unwrap());
    engine_with(Arc::new(discovering_backend()), store)
        .translate("SELECT title FROM contracts", "acme")
        .await
        .unwrap();

    let silent = Arc::new(ScriptedBackend::new());
    let reopened = Arc::new(JsonFileMappingStore::open(&path).await.unwrap());
    let result = engine_with(silent.clone(), reopened)
        .translate("SELECT title FROM contracts", "acme")
        .await
        .unwrap();
    assert_eq!(result.translated_query, "SELECT description FROM awards");
    assert_eq!(silent.calls(), 0);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn refresh_rediscovers() {
    let cache = Arc::new(MemoryMappingStore::new());
    let backend = Arc::new(discovering_backend());
    let engine = engine_with(backend.clone(), cache.clone());
    engine.translate("SELECT title FROM contracts", "acme").await.unwrap();
    engine.refresh_mappings("acme").await.unwrap();
    assert_eq!(backend.calls_matching(CONTRACTS), 2);
    assert_eq!(cache.get("acme").await.unwrap().unwrap().usage_count, 0);

    assert!(engine.clear_mappings("acme").await.unwrap());
    assert!(engine.cached_mappings("acme").await.unwrap().is_none());
}

#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, _tenant_id: &str, sql: &str) -> Result<QueryResult, ExecutionError> {
        self.seen.lock().unwrap().push(sql.to_string());
        Ok(QueryResult {
            columns: vec!["description".to_string()],
            rows: vec![vec![serde_json::json!("Road resurfacing")]],
            row_count: 1,
        })
    }
}

#[tokio::test]
async fn only_valid_translations_are_executed() {
    let backend = Arc::new(
        discovering_backend()
            .reply(RETRY, sql_reply("SELECT * FROM bids"))
            .reply(FIRST, sql_reply("SELECT * FROM bids")),
    );
    let engine = engine(backend);
    let executor = RecordingExecutor::default();

    let ok = engine
        .translate_and_execute("SELECT title FROM contracts", "acme", &executor)
        .await
        .unwrap();
    assert_eq!(ok.execution.unwrap().row_count, 1);

    let bad = engine
        .translate_and_execute("SELECT status FROM contracts", "acme", &executor)
        .await
        .unwrap();
    assert!(bad.execution.is_none());
    assert!(bad.execution_error.is_some());
    assert_eq!(executor.seen.lock().unwrap().len(), 1);
}
