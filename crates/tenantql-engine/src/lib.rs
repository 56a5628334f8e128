//! tenantql translation engine
//!
//! Translates SQL written against the canonical vocabulary into SQL for one
//! tenant's schema. Simple queries are rewritten token by token; anything
//! with joins, aggregation or derived fields goes through the generation
//! backend and is validated (and regenerated once) before it is returned.

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod plan;
pub mod regenerator;
pub mod relationships;
pub mod rewriter;
pub mod samples;
pub mod schema_store;
pub mod translator;
pub mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod fixtures;

pub use backend::{GenerationBackend, GenerationClient, GenerationError};
pub use cache::{JsonFileMappingStore, MappingStore, MemoryMappingStore, StoreError};
pub use config::{EngineConfig, GenerationPolicy};
pub use discovery::{DiscoveryError, MappingDiscoverer};
pub use engine::{ExecutedTranslation, TranslationEngine};
pub use error::TranslateError;
pub use executor::{ExecutionError, QueryExecutor, QueryResult, SampleSource};
pub use samples::TableSamples;
pub use schema_store::{
    load_canonical_file, parse_canonical_yaml, parse_schema_yaml, validate_tenant_id, MemorySchemaStore,
    SchemaError, SchemaStore, YamlSchemaStore,
};

pub use tenantql_model as model;
pub use tenantql_sql as sql;
