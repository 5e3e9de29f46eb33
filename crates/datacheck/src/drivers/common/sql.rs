//! SQL text shared by the PostgreSQL and MySQL backends.
//!
//! Identifiers cannot be bound as statement parameters, so every table and
//! column name goes through [`SqlDialect::quote`]. Key values reach lookups
//! and repair statements as escaped literals, never raw.
//!
//! A row key travels through the engine as the comma-joined text of its key
//! columns. [`split_key`] reverses that for lookups; a key column whose value
//! itself contains a comma cannot be looked up and fails with a config error.

use crate::core::{RepairKind, RowDigest, RowImage};
use crate::error::{CheckError, Result};

/// Longest identifier accepted by any supported server.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Text standing in for NULL in key text and local checksums.
pub const NULL_TEXT: &str = "NULL";

/// Separator between key columns in key text.
pub const KEY_SEPARATOR: char = ',';

/// Separator between compared columns before hashing.
const COLUMN_SEPARATOR: &str = "|";

/// Reject identifiers that could not be quoted safely.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CheckError::Config("identifier cannot be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(CheckError::Config(format!(
            "identifier contains a null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CheckError::Config(format!(
            "identifier longer than {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }
    Ok(())
}

/// Quoting and expression rules per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Mysql,
}

impl SqlDialect {
    /// Quote one identifier.
    pub fn quote(&self, name: &str) -> Result<String> {
        validate_identifier(name)?;
        Ok(match self {
            SqlDialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::Mysql => format!("`{}`", name.replace('`', "``")),
        })
    }

    /// Quote a table name. PostgreSQL names are `schema.table`.
    pub fn qualify(&self, table: &str) -> Result<String> {
        match (self, table.split_once('.')) {
            (SqlDialect::Postgres, Some((schema, name))) => {
                Ok(format!("{}.{}", self.quote(schema)?, self.quote(name)?))
            }
            _ => self.quote(table),
        }
    }

    /// Escape a value as a string literal; `None` renders as `NULL`.
    pub fn literal(&self, value: Option<&str>) -> String {
        match value {
            None => "NULL".to_string(),
            Some(v) => {
                let escaped = v.replace('\'', "''");
                match self {
                    SqlDialect::Postgres => format!("'{}'", escaped),
                    // MySQL treats backslash as an escape inside literals
                    SqlDialect::Mysql => format!("'{}'", escaped.replace('\\', "\\\\")),
                }
            }
        }
    }

    /// A quoted column read back as text.
    pub fn as_text(&self, quoted: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("{}::text", quoted),
            SqlDialect::Mysql => format!("CAST({} AS CHAR)", quoted),
        }
    }

    /// Server-side 32-bit checksum over the given text expression.
    ///
    /// PostgreSQL has no built-in CRC-32, so the first 32 bits of the MD5
    /// are used instead. Both sides of a pair always run the same dialect.
    fn checksum(&self, text_expr: &str) -> String {
        match self {
            SqlDialect::Postgres => format!(
                "('x' || substr(md5({}), 1, 8))::bit(32)::bigint",
                text_expr
            ),
            SqlDialect::Mysql => format!("CAST(CRC32({}) AS SIGNED)", text_expr),
        }
    }
}

/// Split key text into per-column values.
pub fn split_key(key: &str) -> Vec<&str> {
    key.split(KEY_SEPARATOR).collect()
}

/// Build key text from per-column values.
pub fn join_key<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    values
        .into_iter()
        .map(|v| v.unwrap_or(NULL_TEXT))
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// Digest of a row read as text, hashed locally.
pub fn text_digest<'a>(
    key: String,
    columns: impl IntoIterator<Item = Option<&'a str>>,
) -> RowDigest {
    let text = columns
        .into_iter()
        .map(|v| v.unwrap_or(NULL_TEXT))
        .collect::<Vec<_>>()
        .join(COLUMN_SEPARATOR);
    RowDigest::from_row_text(key, text.as_bytes())
}

/// Choose key and compared columns for a table.
///
/// `key_override` wins over the primary key. Compared columns are every
/// column that is neither a key nor skipped.
pub fn pick_columns(
    table: &str,
    primary_key: Vec<String>,
    all_columns: &[String],
    key_override: &[String],
    skip_cols: &[String],
) -> Result<(Vec<String>, Vec<String>)> {
    if all_columns.is_empty() {
        return Err(CheckError::precheck(table, "table has no columns or does not exist"));
    }
    let keys = if key_override.is_empty() {
        primary_key
    } else {
        key_override.to_vec()
    };
    if keys.is_empty() {
        return Err(CheckError::precheck(
            table,
            "no primary key; pass key columns explicitly",
        ));
    }
    if let Some(missing) = keys.iter().find(|k| !all_columns.contains(k)) {
        return Err(CheckError::precheck(
            table,
            format!("key column '{}' does not exist", missing),
        ));
    }

    let columns: Vec<String> = all_columns
        .iter()
        .filter(|c| !keys.contains(c) && !skip_cols.contains(c))
        .cloned()
        .collect();
    if columns.is_empty() {
        return Err(CheckError::precheck(table, "no columns left to compare"));
    }
    Ok((keys, columns))
}

/// A resolved table: quoted names plus the statements built from them.
#[derive(Debug, Clone)]
pub struct TableShape {
    dialect: SqlDialect,
    table: String,
    keys: Vec<String>,
    columns: Vec<String>,
    quoted_keys: Vec<String>,
    quoted_columns: Vec<String>,
    filter: Option<String>,
}

impl TableShape {
    pub fn new(
        dialect: SqlDialect,
        table: &str,
        keys: Vec<String>,
        columns: Vec<String>,
        filter: Option<String>,
    ) -> Result<Self> {
        let quoted_keys = keys
            .iter()
            .map(|k| dialect.quote(k))
            .collect::<Result<Vec<_>>>()?;
        let quoted_columns = columns
            .iter()
            .map(|c| dialect.quote(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dialect,
            table: dialect.qualify(table)?,
            keys,
            columns,
            quoted_keys,
            quoted_columns,
            filter: filter.filter(|f| !f.trim().is_empty()),
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn where_clause(&self) -> String {
        match &self.filter {
            Some(f) => format!(" WHERE {}", f),
            None => String::new(),
        }
    }

    fn order_by(&self) -> String {
        format!(" ORDER BY {}", self.quoted_keys.join(", "))
    }

    fn text_list(&self, quoted: &[String]) -> Vec<String> {
        quoted.iter().map(|q| self.dialect.as_text(q)).collect()
    }

    /// `SELECT COUNT(*)` honoring the row filter.
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause())
    }

    /// Key text and server-side checksum per row, ordered by key.
    pub fn fast_sql(&self) -> String {
        let key_expr = self.concat(&self.quoted_keys, ",");
        let row_expr = self.concat(&self.quoted_columns, COLUMN_SEPARATOR);
        format!(
            "SELECT {} AS pk, {} AS chksum FROM {}{}{}",
            key_expr,
            self.dialect.checksum(&row_expr),
            self.table,
            self.where_clause(),
            self.order_by()
        )
    }

    /// Key columns then compared columns as text, ordered by key.
    pub fn slow_sql(&self) -> String {
        let mut select = self.text_list(&self.quoted_keys);
        select.extend(self.text_list(&self.quoted_columns));
        format!(
            "SELECT {} FROM {}{}{}",
            select.join(", "),
            self.table,
            self.where_clause(),
            self.order_by()
        )
    }

    /// Compared columns as text for every row with `key`.
    pub fn lookup_sql(&self, key: &str) -> Result<String> {
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            self.text_list(&self.quoted_columns).join(", "),
            self.table,
            self.key_predicate(key)?
        ))
    }

    /// Turn lookup output into a row image.
    pub fn row_image(&self, values: Vec<Option<String>>) -> RowImage {
        self.columns.iter().cloned().zip(values).collect()
    }

    /// Render a repair statement. Update and Insert need the source row.
    pub fn repair(&self, kind: RepairKind, key: &str, source: Option<&RowImage>) -> Result<String> {
        let predicate = self.key_predicate(key)?;
        match kind {
            RepairKind::Delete => Ok(format!("DELETE FROM {} WHERE {};", self.table, predicate)),
            RepairKind::Update => {
                let row = self.require_source(kind, key, source)?;
                let assignments: Vec<String> = self
                    .columns
                    .iter()
                    .zip(&self.quoted_columns)
                    .map(|(name, quoted)| {
                        let value = row.get(name).and_then(|v| v.as_deref());
                        format!("{} = {}", quoted, self.dialect.literal(value))
                    })
                    .collect();
                Ok(format!(
                    "UPDATE {} SET {} WHERE {};",
                    self.table,
                    assignments.join(", "),
                    predicate
                ))
            }
            RepairKind::Insert => {
                let row = self.require_source(kind, key, source)?;
                let mut names = self.quoted_keys.clone();
                names.extend(self.quoted_columns.iter().cloned());
                let mut values: Vec<String> = split_key(key)
                    .into_iter()
                    .map(|v| self.dialect.literal(Some(v)))
                    .collect();
                values.extend(self.columns.iter().map(|name| {
                    self.dialect
                        .literal(row.get(name).and_then(|v| v.as_deref()))
                }));
                Ok(format!(
                    "INSERT INTO {} ({}) VALUES ({});",
                    self.table,
                    names.join(", "),
                    values.join(", ")
                ))
            }
        }
    }

    fn require_source<'r>(
        &self,
        kind: RepairKind,
        key: &str,
        source: Option<&'r RowImage>,
    ) -> Result<&'r RowImage> {
        source.ok_or_else(|| {
            CheckError::Report(format!(
                "{}: source row for key [{}] is gone",
                kind.suffix(),
                key
            ))
        })
    }

    fn key_predicate(&self, key: &str) -> Result<String> {
        let values = split_key(key);
        if values.len() != self.quoted_keys.len() {
            return Err(CheckError::Config(format!(
                "key [{}] has {} parts, table {} has {} key columns",
                key,
                values.len(),
                self.table,
                self.quoted_keys.len()
            )));
        }
        let parts: Vec<String> = self
            .quoted_keys
            .iter()
            .zip(values)
            .map(|(k, v)| format!("{} = {}", k, self.dialect.literal(Some(v))))
            .collect();
        Ok(parts.join(" AND "))
    }

    fn concat(&self, quoted: &[String], separator: &str) -> String {
        let parts: Vec<String> = quoted
            .iter()
            .map(|q| {
                format!(
                    "COALESCE({}, '{}')",
                    self.dialect.as_text(q),
                    NULL_TEXT
                )
            })
            .collect();
        format!("CONCAT_WS('{}', {})", separator, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dialect: SqlDialect) -> TableShape {
        TableShape::new(
            dialect,
            "public.orders",
            vec!["id".into(), "line".into()],
            vec!["qty".into(), "note".into()],
            Some("qty > 0".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_quoting() {
        assert_eq!(SqlDialect::Postgres.quote("a\"b").unwrap(), "\"a\"\"b\"");
        assert_eq!(SqlDialect::Mysql.quote("a`b").unwrap(), "`a``b`");
        assert!(SqlDialect::Postgres.quote("").is_err());
        assert!(SqlDialect::Mysql.quote("a\0b").is_err());
        assert!(SqlDialect::Postgres.quote(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_qualify() {
        assert_eq!(
            SqlDialect::Postgres.qualify("public.orders").unwrap(),
            "\"public\".\"orders\""
        );
        assert_eq!(SqlDialect::Mysql.qualify("orders").unwrap(), "`orders`");
    }

    #[test]
    fn test_literals() {
        assert_eq!(SqlDialect::Postgres.literal(Some("O'Brien")), "'O''Brien'");
        assert_eq!(SqlDialect::Mysql.literal(Some("a\\b")), "'a\\\\b'");
        assert_eq!(SqlDialect::Postgres.literal(None), "NULL");
    }

    #[test]
    fn test_key_text() {
        assert_eq!(join_key([Some("1"), None, Some("x")]), "1,NULL,x");
        assert_eq!(split_key("1,2"), vec!["1", "2"]);
    }

    #[test]
    fn test_text_digest_distinguishes_null_position() {
        let a = text_digest("1".into(), [None, Some("x")]);
        let b = text_digest("1".into(), [Some("x"), None]);
        assert_ne!(a.checksum, b.checksum);
        assert_eq!(a, text_digest("1".into(), [None, Some("x")]));
    }

    #[test]
    fn test_pick_columns() {
        let all: Vec<String> = ["id", "name", "updated_at"].iter().map(|s| s.to_string()).collect();
        let (keys, cols) =
            pick_columns("t", vec!["id".into()], &all, &[], &["updated_at".into()]).unwrap();
        assert_eq!(keys, vec!["id"]);
        assert_eq!(cols, vec!["name"]);

        let (keys, cols) = pick_columns("t", vec![], &all, &["name".into()], &[]).unwrap();
        assert_eq!(keys, vec!["name"]);
        assert_eq!(cols, vec!["id", "updated_at"]);

        assert!(pick_columns("t", vec![], &all, &[], &[]).is_err());
        assert!(pick_columns("t", vec!["id".into()], &[], &[], &[]).is_err());
        assert!(pick_columns("t", vec![], &all, &["nope".into()], &[]).is_err());
        assert!(pick_columns(
            "t",
            vec!["id".into()],
            &all,
            &[],
            &["name".into(), "updated_at".into()]
        )
        .is_err());
    }

    #[test]
    fn test_statements_postgres() {
        let s = shape(SqlDialect::Postgres);
        assert_eq!(
            s.count_sql(),
            "SELECT COUNT(*) FROM \"public\".\"orders\" WHERE qty > 0"
        );
        let fast = s.fast_sql();
        assert!(fast.contains("md5("));
        assert!(fast.ends_with("WHERE qty > 0 ORDER BY \"id\", \"line\""));
        assert_eq!(
            s.slow_sql(),
            "SELECT \"id\"::text, \"line\"::text, \"qty\"::text, \"note\"::text \
             FROM \"public\".\"orders\" WHERE qty > 0 ORDER BY \"id\", \"line\""
        );
        assert_eq!(
            s.lookup_sql("7,2").unwrap(),
            "SELECT \"qty\"::text, \"note\"::text FROM \"public\".\"orders\" \
             WHERE \"id\" = '7' AND \"line\" = '2'"
        );
        assert!(s.lookup_sql("7").is_err());
    }

    #[test]
    fn test_statements_mysql() {
        let s = shape(SqlDialect::Mysql);
        assert!(s.fast_sql().contains("CAST(CRC32(CONCAT_WS('|', "));
        assert!(s.lookup_sql("1,1").unwrap().contains("CAST(`qty` AS CHAR)"));
    }

    #[test]
    fn test_repairs() {
        let s = shape(SqlDialect::Postgres);
        let mut row = RowImage::new();
        row.insert("qty".into(), Some("3".into()));
        row.insert("note".into(), None);

        assert_eq!(
            s.repair(RepairKind::Delete, "1,2", None).unwrap(),
            "DELETE FROM \"public\".\"orders\" WHERE \"id\" = '1' AND \"line\" = '2';"
        );
        assert_eq!(
            s.repair(RepairKind::Update, "1,2", Some(&row)).unwrap(),
            "UPDATE \"public\".\"orders\" SET \"qty\" = '3', \"note\" = NULL \
             WHERE \"id\" = '1' AND \"line\" = '2';"
        );
        assert_eq!(
            s.repair(RepairKind::Insert, "1,2", Some(&row)).unwrap(),
            "INSERT INTO \"public\".\"orders\" (\"id\", \"line\", \"qty\", \"note\") \
             VALUES ('1', '2', '3', NULL);"
        );
        assert!(s.repair(RepairKind::Insert, "1,2", None).is_err());
    }

    #[test]
    fn test_row_image_maps_columns() {
        let s = shape(SqlDialect::Mysql);
        let image = s.row_image(vec![Some("5".into()), None]);
        assert_eq!(image.get("qty"), Some(&Some("5".to_string())));
        assert_eq!(image.get("note"), Some(&None));
    }
}
