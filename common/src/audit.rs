use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of one stage's outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub stage: String,
    pub market_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    pub data: serde_json::Value,
}

impl AuditEntry {
    pub fn new(stage: impl Into<String>, success: bool, duration_ms: u64, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: stage.into(),
            market_id: None,
            timestamp: Utc::now(),
            success,
            duration_ms,
            data,
        }
    }

    pub fn for_market(mut self, market_id: impl Into<String>) -> Self {
        self.market_id = Some(market_id.into());
        self
    }
}

/// Append-only audit trail; entries keep creation order and are never removed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Merge another log onto the end of this one, preserving both orders
    pub fn extend(&mut self, other: AuditLog) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| !e.success)
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_preserves_order() {
        let mut first = AuditLog::new();
        first.append(AuditEntry::new("execute", true, 10, serde_json::json!({})));

        let mut second = AuditLog::new();
        second.append(AuditEntry::new("fuse", false, 1, serde_json::json!({})));
        second.append(AuditEntry::new("persist", true, 2, serde_json::json!({})));

        first.extend(second);
        let stages: Vec<_> = first.entries().iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["execute", "fuse", "persist"]);
        assert_eq!(first.failures().count(), 1);
    }
}
