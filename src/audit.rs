//! Catalog ↔ index consistency audit.
//!
//! The index is supposed to hold exactly the ids of the catalog table.
//! Drift can only come from outside this process (a crash between the
//! relational commit and the index write, or manual edits), so nothing
//! checks it automatically. `crag index audit` reports it and
//! `crag index rebuild` repairs it.

use serde::Serialize;
use std::collections::BTreeSet;

use catalog_rag_core::RagError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    /// Catalog ids with no indexed item.
    pub missing_from_index: Vec<i64>,
    /// Indexed ids with no catalog row.
    pub orphaned_in_index: Vec<i64>,
}

impl AuditReport {
    /// Compare the two id sets. Each discrepancy is logged at `warn`.
    pub fn compare(catalog_ids: &[i64], index_ids: &[i64]) -> Self {
        let catalog: BTreeSet<i64> = catalog_ids.iter().copied().collect();
        let index: BTreeSet<i64> = index_ids.iter().copied().collect();

        let report = AuditReport {
            missing_from_index: catalog.difference(&index).copied().collect(),
            orphaned_in_index: index.difference(&catalog).copied().collect(),
        };

        for id in &report.missing_from_index {
            log::warn!("catalog row {} has no indexed item", id);
        }
        for id in &report.orphaned_in_index {
            log::warn!("indexed item {} has no catalog row", id);
        }
        report
    }

    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.orphaned_in_index.is_empty()
    }

    pub fn into_result(self) -> Result<(), RagError> {
        if self.is_consistent() {
            Ok(())
        } else {
            Err(RagError::IndexInconsistency {
                missing_from_index: self.missing_from_index,
                orphaned_in_index: self.orphaned_in_index,
            })
        }
    }
}
