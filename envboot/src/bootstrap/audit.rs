//! Audit record appended at the end of a successful run

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::BootstrapSummary;
use crate::client::Document;
use crate::profile::EnvironmentProfile;

pub const AUDIT_ACTION: &str = "database_initialized";

pub(crate) fn audit_record(
    profile: &EnvironmentProfile,
    summary: &BootstrapSummary,
    timestamp: DateTime<Utc>,
) -> Document {
    let message = profile.audit_message.clone().unwrap_or_else(|| {
        format!("Database initialized for the {} environment", profile.name)
    });

    let mut record = Document::new();
    record.insert("environment".to_string(), json!(profile.name.as_str()));
    record.insert("action".to_string(), json!(AUDIT_ACTION));
    record.insert("timestamp".to_string(), json!(timestamp.to_rfc3339()));
    record.insert("message".to_string(), json!(message));
    if let Some(level) = profile.effective_security_level() {
        record.insert("security_level".to_string(), Value::String(level));
    }
    record.insert("database".to_string(), json!(profile.database_name));
    record.insert("run_id".to_string(), json!(summary.run_id.to_string()));
    record.insert("profile_digest".to_string(), json!(profile.digest()));
    record.insert(
        "summary".to_string(),
        json!({
            "principal_created": summary.principal_created,
            "collections_created": summary.collections_created.len(),
            "indexes_created": summary.indexes_created.len(),
            "records_inserted": summary.records_inserted,
            "seed_failures": summary.seed_failures.len(),
        }),
    );
    record
}
