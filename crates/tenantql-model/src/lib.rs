//! tenantql data model
//!
//! Types shared by every stage of canonical-to-tenant query translation:
//! tenant schemas, the canonical vocabulary, per-tenant mapping sets and the
//! ephemeral analysis/validation/result records. Everything here is plain data
//! and serializes deterministically so cached mappings survive restarts.

use sha2::{Digest, Sha256};

mod analysis;
mod canonical;
mod mapping;
mod result;
mod schema;

pub use analysis::*;
pub use canonical::*;
pub use mapping::*;
pub use result::*;
pub use schema::*;

/// SHA-256 fingerprint of a canonical query, used to correlate log lines for one call.
///
/// Whitespace runs are collapsed first so reformatting a query does not change it.
pub fn query_fingerprint(query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
