//! Orchestrator
//!
//! `translate` wires the stages together:
//! schema -> mappings (cache or discovery) -> classify -> direct rewrite, or
//! relationship analysis -> generation -> validation -> one regeneration.
//! The only side effects are mapping-cache touches and writes.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tenantql_model::{
    query_fingerprint, CanonicalSchema, JoinStrategy, MappingKind, MappingSet, QueryAnalysis, TenantSchema,
    TranslationPath, TranslationResult,
};
use tenantql_sql::Statement;
use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;

use crate::backend::{GenerationBackend, GenerationClient};
use crate::cache::MappingStore;
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::discovery::MappingDiscoverer;
use crate::error::TranslateError;
use crate::executor::{QueryExecutor, QueryResult, SampleSource};
use crate::plan::{execution_plan, performance_hints};
use crate::regenerator::generate_validated;
use crate::relationships::{build_join_strategy, infer_edges};
use crate::rewriter::rewrite;
use crate::samples::TableSamples;
use crate::schema_store::SchemaStore;
use crate::translator::{GenerationTranslator, TranslationContext};
use crate::validator::validate_schema;

/// A translation plus what happened when it was run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedTranslation {
    pub translation: TranslationResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<QueryResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
}

pub struct TranslationEngine {
    schemas: Arc<dyn SchemaStore>,
    cache: Arc<dyn MappingStore>,
    discoverer: MappingDiscoverer,
    translator: GenerationTranslator,
    canonical: Arc<CanonicalSchema>,
    samples: Option<Arc<dyn SampleSource>>,
    sample_rows: usize,
    /// Tenant schemas are read-only once loaded
    loaded: RwLock<HashMap<String, Arc<TenantSchema>>>,
    /// One discovery at a time per tenant
    discovering: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TranslationEngine {
    pub fn new(
        schemas: Arc<dyn SchemaStore>,
        cache: Arc<dyn MappingStore>,
        backend: Arc<dyn GenerationBackend>,
        config: EngineConfig,
    ) -> Self {
        let client = GenerationClient::new(backend, config.generation.clone());
        Self {
            schemas,
            cache,
            discoverer: MappingDiscoverer::new(client.clone(), config.confidence_floor),
            translator: GenerationTranslator::new(client),
            canonical: Arc::new(CanonicalSchema::builtin()),
            samples: None,
            sample_rows: config.sample_rows,
            loaded: RwLock::new(HashMap::new()),
            discovering: Mutex::new(HashMap::new()),
        }
    }

    /// Show sample rows from `source` in discovery and generation prompts
    pub fn with_samples(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.samples = Some(source);
        self
    }

    /// Replace the builtin vocabulary
    pub fn with_canonical(mut self, canonical: CanonicalSchema) -> Self {
        self.canonical = Arc::new(canonical);
        self
    }

    pub fn canonical(&self) -> &CanonicalSchema {
        &self.canonical
    }

    /// Translate one canonical query for one tenant
    pub async fn translate(&self, query: &str, tenant_id: &str) -> Result<TranslationResult, TranslateError> {
        let fingerprint = query_fingerprint(query);
        let span = tracing::info_span!("translate", tenant = %tenant_id, query = %&fingerprint[..12]);
        self.translate_inner(query, tenant_id).instrument(span).await
    }

    async fn translate_inner(&self, query: &str, tenant_id: &str) -> Result<TranslationResult, TranslateError> {
        // 1. Schema and mappings
        let schema = self.schema(tenant_id).await?;
        let mappings = self.mappings_for(&schema).await?;

        // 2. Classify
        let stmt = Statement::parse(query)?;
        let analysis = classify(&stmt, &mappings, &self.canonical)?;

        let mut result = TranslationResult {
            original_query: query.to_string(),
            translated_query: String::new(),
            tenant_id: tenant_id.to_string(),
            confidence: 0.0,
            reasoning: String::new(),
            warnings: Vec::new(),
            validation_errors: Vec::new(),
            join_strategy: None,
            path: TranslationPath::Direct,
            attempts: 0,
            execution_plan: None,
            performance_hints: Vec::new(),
        };

        // 3a. Fast path
        if analysis.is_simple() {
            match rewrite(&stmt, &analysis, &mappings) {
                Ok(rewritten) => {
                    let validation = Statement::parse(&rewritten.sql)
                        .map(|s| validate_schema(&s, &schema).messages())
                        .unwrap_or_else(|e| vec![e.to_string()]);
                    tracing::info!(
                        path = "direct",
                        valid = validation.is_empty(),
                        confidence = rewritten.confidence,
                        "Translated query"
                    );
                    result.translated_query = rewritten.sql;
                    result.confidence = rewritten.confidence;
                    result.reasoning = "direct identifier substitution".to_string();
                    result.warnings = rewritten.warnings;
                    result.validation_errors = validation;
                    let tenant_table = analysis
                        .tables_referenced
                        .first()
                        .and_then(|t| mappings.table(t))
                        .map(|m| m.tenant_table.clone())
                        .unwrap_or_default();
                    attach_plan(&mut result, &analysis, &JoinStrategy::single(tenant_table));
                    return Ok(result);
                }
                Err(e) => {
                    tracing::info!(error = %e, "Direct rewrite not possible, using generation");
                }
            }
        }

        // 3b. Complex path
        result.path = TranslationPath::Generated;
        result.warnings = self.unmapped_warnings(&analysis, &mappings);

        let strategy = plan_joins(&schema, &analysis, &mappings);
        for table in &strategy.unreachable {
            result
                .warnings
                .push(format!("no join path from {} to {}", strategy.primary_table, table));
        }

        let mut planned = vec![strategy.primary_table.clone()];
        planned.extend(strategy.joins.iter().map(|j| j.table.clone()));
        let samples = self.samples(tenant_id, &planned).await;

        let ctx = TranslationContext {
            query,
            schema: &schema,
            mappings: &mappings,
            analysis: &analysis,
            join_strategy: &strategy,
            samples: &samples,
        };
        let outcome = generate_validated(&self.translator, &ctx).await;

        tracing::info!(
            path = "generated",
            attempts = outcome.attempts,
            valid = outcome.validation_errors.is_empty(),
            confidence = outcome.confidence,
            "Translated query"
        );

        result.translated_query = outcome.sql;
        result.confidence = outcome.confidence.min(strategy.confidence);
        result.reasoning = outcome.reasoning;
        result.warnings.extend(outcome.warnings);
        result.validation_errors = outcome.validation_errors;
        result.attempts = outcome.attempts;
        attach_plan(&mut result, &analysis, &strategy);
        result.join_strategy = Some(strategy);
        Ok(result)
    }

    /// Translate, then run the SQL only if it passed validation
    pub async fn translate_and_execute(
        &self,
        query: &str,
        tenant_id: &str,
        executor: &dyn QueryExecutor,
    ) -> Result<ExecutedTranslation, TranslateError> {
        let translation = self.translate(query, tenant_id).await?;
        if !translation.is_valid() {
            return Ok(ExecutedTranslation {
                translation,
                execution: None,
                execution_error: Some("translation did not pass validation; not executed".to_string()),
            });
        }
        let (execution, execution_error) = match executor.execute(tenant_id, &translation.translated_query).await {
            Ok(rows) => (Some(rows), None),
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, error = %e, "Execution failed");
                (None, Some(e.to_string()))
            }
        };
        Ok(ExecutedTranslation {
            translation,
            execution,
            execution_error,
        })
    }

    /// Cached mappings for a tenant, without touching usage counters
    pub async fn cached_mappings(&self, tenant_id: &str) -> Result<Option<MappingSet>, TranslateError> {
        Ok(self.cache.get(tenant_id).await?)
    }

    /// Explicit invalidation
    pub async fn clear_mappings(&self, tenant_id: &str) -> Result<bool, TranslateError> {
        let existed = self.cache.clear(tenant_id).await?;
        tracing::info!(tenant = %tenant_id, existed, "Cleared cached mappings");
        Ok(existed)
    }

    /// Drop the cached record and discover again
    pub async fn refresh_mappings(&self, tenant_id: &str) -> Result<MappingSet, TranslateError> {
        let schema = self.schema(tenant_id).await?;
        let lock = self.discovery_lock(tenant_id).await;
        let _guard = lock.lock().await;
        // the old record stays in place if discovery fails
        let set = self.discover(&schema).await?;
        self.cache.put(&set).await?;
        tracing::info!(tenant = %tenant_id, "Refreshed mappings");
        Ok(set)
    }

    async fn schema(&self, tenant_id: &str) -> Result<Arc<TenantSchema>, TranslateError> {
        if let Some(schema) = self.loaded.read().await.get(tenant_id) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(self.schemas.load(tenant_id).await?);
        self.loaded
            .write()
            .await
            .insert(tenant_id.to_string(), schema.clone());
        Ok(schema)
    }

    async fn mappings_for(&self, schema: &TenantSchema) -> Result<MappingSet, TranslateError> {
        let tenant_id = schema.tenant_id.as_str();
        if let Some(set) = self.cache_hit(tenant_id).await? {
            return Ok(set);
        }

        let lock = self.discovery_lock(tenant_id).await;
        let _guard = lock.lock().await;
        // a concurrent call may have finished discovery while this one waited
        if let Some(set) = self.cache_hit(tenant_id).await? {
            return Ok(set);
        }

        tracing::info!("Mapping cache miss, discovering");
        let set = self.discover(schema).await?;
        // persisted before this call uses it
        self.cache.put(&set).await?;
        Ok(set)
    }

    async fn cache_hit(&self, tenant_id: &str) -> Result<Option<MappingSet>, TranslateError> {
        let Some(mut set) = self.cache.get(tenant_id).await? else {
            return Ok(None);
        };
        tracing::info!(usage_count = set.usage_count, "Mapping cache hit");
        self.cache.touch(tenant_id).await?;
        set.touch();
        Ok(Some(set))
    }

    async fn discovery_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.discovering
            .lock()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    async fn samples(&self, tenant_id: &str, tables: &[String]) -> TableSamples {
        match &self.samples {
            Some(source) => TableSamples::collect(source.as_ref(), tenant_id, tables, self.sample_rows).await,
            None => TableSamples::default(),
        }
    }

    async fn discover(&self, schema: &TenantSchema) -> Result<MappingSet, TranslateError> {
        let tables: Vec<String> = schema.table_names().iter().map(|t| t.to_string()).collect();
        let samples = self.samples(&schema.tenant_id, &tables).await;
        self.discoverer
            .discover(schema, &self.canonical, &samples)
            .await
            .map_err(|source| TranslateError::MappingDiscoveryFailed {
                tenant: schema.tenant_id.clone(),
                source,
            })
    }

    fn unmapped_warnings(&self, analysis: &QueryAnalysis, mappings: &MappingSet) -> Vec<String> {
        let mut warnings = Vec::new();
        for table in &analysis.tables_referenced {
            if self.canonical.is_table(table) && mappings.table(table).is_none() {
                warnings.push(format!("canonical table {} has no tenant table", table));
            }
        }
        for column in &analysis.columns_referenced {
            if let Some(u) = mappings.unmapped_field(column) {
                warnings.push(format!("unmapped field {} omitted ({})", u.canonical_field, u.reason));
            }
        }
        warnings
    }
}

fn attach_plan(result: &mut TranslationResult, analysis: &QueryAnalysis, strategy: &JoinStrategy) {
    let plan = execution_plan(analysis, strategy);
    result.performance_hints = performance_hints(&result.translated_query, &plan);
    result.execution_plan = Some(plan);
}

/// Primary tenant table and every tenant table a referenced field lives in
fn required_tables(analysis: &QueryAnalysis, mappings: &MappingSet) -> (String, Vec<String>) {
    let mut required: Vec<String> = Vec::new();
    let mut add = |name: &str| {
        if !required.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            required.push(name.to_string());
        }
    };

    for table in &analysis.tables_referenced {
        match mappings.table(table) {
            Some(m) => add(&m.tenant_table),
            None => add(table),
        }
    }
    for column in &analysis.columns_referenced {
        if let Some(f) = mappings.field(column) {
            if f.kind == MappingKind::Direct
                && analysis
                    .tables_referenced
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&f.canonical_table))
            {
                add(&f.target_table);
            }
        }
    }
    for field in &analysis.derived_fields {
        if let Some(source) = mappings.derived(field).and_then(|d| d.source_table.as_deref()) {
            add(source);
        }
    }

    let primary = required.first().cloned().unwrap_or_default();
    (primary, required)
}

impl std::fmt::Debug for TranslationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationEngine")
            .field("canonical_version", &self.canonical.version)
            .finish_non_exhaustive()
    }
}

/// Join strategy for reaching every table a query needs, exposed for diagnostics
pub fn plan_joins(schema: &TenantSchema, analysis: &QueryAnalysis, mappings: &MappingSet) -> JoinStrategy {
    let (primary, required) = required_tables(analysis, mappings);
    build_join_strategy(schema, &infer_edges(schema), &primary, &required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{awards_mappings, awards_schema};
    use tenantql_model::Complexity;

    #[test]
    fn test_required_tables_follow_field_targets() {
        let analysis = QueryAnalysis {
            complexity: Complexity::Complex,
            tables_referenced: vec!["contracts".to_string(), "parties".to_string()],
            columns_referenced: vec!["title".to_string(), "name".to_string(), "status".to_string()],
            has_join: true,
            has_aggregation: false,
            has_derived_field: true,
            has_subquery: false,
            derived_fields: vec!["status".to_string()],
        };
        let (primary, required) = required_tables(&analysis, &awards_mappings());
        assert_eq!(primary, "awards");
        assert_eq!(required, vec!["awards", "recipients"]);

        let strategy = plan_joins(&awards_schema(), &analysis, &awards_mappings());
        assert_eq!(strategy.joins.len(), 1);
        assert_eq!(strategy.joins[0].condition, "awards.recipient_id = recipients.id");
    }
}
