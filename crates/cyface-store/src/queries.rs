//! Query builder for measurement listings.
//!
//! # Example
//!
//! ```
//! use cyface_store::{MeasurementQuery, Store};
//! use cyface_types::MeasurementStatus;
//!
//! let store = Store::open_in_memory()?;
//!
//! // Finished measurements waiting for upload, oldest first.
//! let query = MeasurementQuery::new()
//!     .status(MeasurementStatus::Finished)
//!     .oldest_first()
//!     .limit(20);
//!
//! let pending = store.query_measurements(&query)?;
//! assert!(pending.is_empty());
//! # Ok::<(), cyface_store::Error>(())
//! ```

use cyface_types::{MeasurementStatus, Modality};

/// Select list producing one summary row per measurement.
pub(crate) const SUMMARY_SELECT: &str = "SELECT m.id, m.timestamp, m.modality, m.status, \
     (SELECT COUNT(*) FROM tracks t WHERE t.measurement_id = m.id), \
     (SELECT COUNT(*) FROM geo_locations g JOIN tracks t ON g.track_id = t.id \
      WHERE t.measurement_id = m.id), \
     (SELECT COUNT(*) FROM accelerations a JOIN tracks t ON a.track_id = t.id \
      WHERE t.measurement_id = m.id) \
     FROM measurements m";

/// Fluent query builder for [`Store::query_measurements`](crate::Store::query_measurements).
///
/// By default results are ordered by identifier descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct MeasurementQuery {
    /// Filter by status.
    pub status: Option<MeasurementStatus>,
    /// Filter by transport mode.
    pub modality: Option<Modality>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by identifier descending.
    pub newest_first: bool,
}

impl MeasurementQuery {
    /// Create a new query returning all measurements, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include measurements in the given status.
    pub fn status(mut self, status: MeasurementStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only include measurements of the given transport mode.
    pub fn modality(mut self, modality: Modality) -> Self {
        self.modality = Some(modality);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by ascending identifier.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = self.status {
            conditions.push("m.status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(modality) = self.modality {
            conditions.push("m.modality = ?");
            params.push(Box::new(modality.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "{} {} ORDER BY m.id {}",
            SUMMARY_SELECT, where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        } else if self.offset.is_some() {
            // SQLite needs a LIMIT before OFFSET.
            sql.push_str(" LIMIT -1");
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_new_defaults() {
        let query = MeasurementQuery::new();
        assert!(query.status.is_none());
        assert!(query.modality.is_none());
        assert!(query.limit.is_none());
        assert!(query.newest_first);
    }

    #[test]
    fn test_build_sql_without_filters() {
        let sql = MeasurementQuery::new().build_sql();
        assert!(!sql.contains("WHERE m."));
        assert!(sql.contains("ORDER BY m.id DESC"));
    }

    #[test]
    fn test_build_sql_complete() {
        let query = MeasurementQuery::new()
            .status(MeasurementStatus::Finished)
            .modality(Modality::Bicycle)
            .limit(10)
            .offset(5)
            .oldest_first();

        let sql = query.build_sql();
        assert!(sql.contains("m.status = ? AND m.modality = ?"));
        assert!(sql.contains("ORDER BY m.id ASC"));
        assert!(sql.contains("LIMIT 10"));
        assert!(sql.contains("OFFSET 5"));

        let (_, params) = query.build_where();
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_offset_without_limit_is_valid_sqlite() {
        let sql = MeasurementQuery::new().offset(3).build_sql();
        assert!(sql.contains("LIMIT -1 OFFSET 3"));
    }
}
