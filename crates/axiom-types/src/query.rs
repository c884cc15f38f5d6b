//! Tabular query results.
//!
//! The server returns results column-oriented: each [`Table`] holds one
//! array of cells per field, and all columns of a table have the same
//! length. [`Table::rows`] reconstructs rows by index without copying cells.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result of a tabular query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Execution statistics.
    pub status: QueryStatus,
    /// Result tables, in the order the query produced them.
    #[serde(default)]
    pub tables: Vec<Table>,
    /// Trace ID of the request, read from the `X-Axiom-Trace-Id` header.
    #[serde(skip)]
    pub trace_id: Option<String>,
}

impl QueryResult {
    /// Returns the first table with the given name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Execution statistics of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    /// Server-side execution time. Microseconds on the wire.
    #[serde(with = "duration_micros")]
    pub elapsed_time: Duration,
    #[serde(default)]
    pub blocks_examined: u64,
    #[serde(default)]
    pub rows_examined: u64,
    #[serde(default)]
    pub rows_matched: u64,
    #[serde(default)]
    pub num_groups: u32,
    /// `true` if the result was truncated.
    #[serde(default)]
    pub is_partial: bool,
    /// Cursor of the oldest row in the result, used for pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cursor: Option<String>,
    /// Cursor of the newest row in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_block_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_block_time: Option<DateTime<Utc>>,
}

/// One result table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Datasets the table was computed from.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Field descriptors, one per column and in column order.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Time range covered by the table, if the query was time-bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TimeRange>,
    /// Cell values, column-major.
    #[serde(default)]
    pub columns: Vec<Vec<Value>>,
}

/// A dataset a table was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
}

/// A column descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// Set when the column is the output of an aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<Aggregation>,
}

/// Aggregation that produced a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

/// Time range of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Field the range applies to, usually `_time`.
    pub field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Table {
    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the column for the named field.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let idx = self.field_index(name)?;
        self.columns.get(idx).map(Vec::as_slice)
    }

    /// Returns an iterator over the rows of the table.
    ///
    /// The iterator is lazy and borrows the columns; call `rows` again to
    /// start over.
    pub fn rows(&self) -> Rows<'_> {
        Rows {
            table: self,
            next: 0,
            len: self.len(),
        }
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Iterator over the rows of a [`Table`].
#[derive(Debug, Clone)]
pub struct Rows<'a> {
    table: &'a Table,
    next: usize,
    len: usize,
}

impl<'a> Iterator for Rows<'a> {
    type Item = Row<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let row = Row {
            table: self.table,
            index: self.next,
        };
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.len - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Rows<'_> {}

/// A single row: the i-th cell of every column.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    /// Position of the row within its table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of cells in the row.
    pub fn len(&self) -> usize {
        self.table.columns.len()
    }

    /// Returns `true` if the table has no columns.
    pub fn is_empty(&self) -> bool {
        self.table.columns.is_empty()
    }

    /// Returns the cell in column `column`.
    pub fn get(&self, column: usize) -> Option<&'a Value> {
        let table: &'a Table = self.table;
        table.columns.get(column)?.get(self.index)
    }

    /// Returns the cell for the named field.
    pub fn get_by_name(&self, name: &str) -> Option<&'a Value> {
        self.get(self.table.field_index(name)?)
    }

    /// Iterates the cells in column order.
    pub fn values(&self) -> impl Iterator<Item = &'a Value> + 'a {
        let table: &'a Table = self.table;
        let index = self.index;
        table.columns.iter().filter_map(move |c| c.get(index))
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        Table {
            name: "0".to_string(),
            sources: vec![Source {
                name: "test".to_string(),
            }],
            fields: vec![
                Field {
                    name: "key".to_string(),
                    field_type: "string".to_string(),
                    agg: None,
                },
                Field {
                    name: "count".to_string(),
                    field_type: "integer".to_string(),
                    agg: Some(Aggregation {
                        name: "count".to_string(),
                        ..Default::default()
                    }),
                },
            ],
            range: None,
            columns: vec![
                vec![json!("a1"), json!("a2"), json!("a3")],
                vec![json!(1), json!(2), json!(3)],
            ],
        }
    }

    #[test]
    fn rows_zip_columns_in_order() {
        let table = table();
        let rows: Vec<(Value, Value)> = table
            .rows()
            .map(|r| (r.get(0).cloned().unwrap(), r.get(1).cloned().unwrap()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (json!("a1"), json!(1)),
                (json!("a2"), json!(2)),
                (json!("a3"), json!(3)),
            ]
        );

        let mut it = table.rows();
        assert_eq!(it.len(), 3);
        it.nth(2);
        assert!(it.next().is_none());
    }

    #[test]
    fn rows_restart_on_each_call() {
        let table = table();
        assert_eq!(table.rows().count(), 3);
        assert_eq!(table.rows().count(), 3);
        let first = table.rows().next().unwrap();
        assert_eq!(first.get_by_name("count"), Some(&json!(1)));
        assert_eq!(first.values().count(), 2);
    }

    #[test]
    fn rows_reassemble_columns() {
        let table = table();
        let mut rebuilt: Vec<Vec<Value>> = vec![Vec::new(); table.columns.len()];
        for row in table.rows() {
            for (i, v) in row.values().enumerate() {
                rebuilt[i].push(v.clone());
            }
        }
        assert_eq!(rebuilt, table.columns);
    }

    #[test]
    fn empty_table_yields_no_rows() {
        let table = Table::default();
        assert!(table.is_empty());
        assert_eq!(table.rows().count(), 0);
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn decodes_tabular_response() {
        let body = json!({
            "format": "tabular",
            "status": {
                "elapsedTime": 260650,
                "rowsExamined": 5,
                "rowsMatched": 5,
                "minCursor": "0d3wo7v7e1oii-075a8c41710018b9-0000ecc5",
                "maxCursor": "0d3wo7v7e1oii-075a8c41710018b9-0000faa3"
            },
            "tables": [{
                "name": "0",
                "sources": [{"name": "test"}],
                "fields": [
                    {"name": "_time", "type": "string"},
                    {"name": "count_", "type": "integer", "agg": {"name": "count"}}
                ],
                "range": {
                    "field": "_time",
                    "start": "2023-03-21T13:38:51.735448191Z",
                    "end": "2023-03-28T13:38:51.735448191Z"
                },
                "columns": [["2023-03-28T13:38:51Z"], [2]]
            }]
        });

        let result: QueryResult = serde_json::from_value(body).unwrap();
        assert_eq!(result.status.elapsed_time, Duration::from_micros(260_650));
        assert_eq!(result.status.rows_matched, 5);
        let table = result.table("0").unwrap();
        assert_eq!(table.sources[0].name, "test");
        assert_eq!(table.fields[1].agg.as_ref().unwrap().name, "count");
        assert_eq!(table.range.as_ref().unwrap().field, "_time");
        assert_eq!(table.column("count_"), Some(&[json!(2)][..]));

        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["status"]["elapsedTime"], json!(260650));
        let back: QueryResult = serde_json::from_value(wire).unwrap();
        assert_eq!(back, result);
    }
}
