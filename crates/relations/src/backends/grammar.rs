//! SQL grammar - identifier wrapping, placeholders and dialect functions

use super::DatabaseBackendType;
use super::core::DatabaseValue;

/// Optional backend capabilities the planner asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `ROW_NUMBER() OVER (PARTITION BY ...)`
    WindowFunctions,
    /// JSON containment and length functions
    JsonFunctions,
}

/// Date/time part extracted by a function constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Date,
    Time,
    Day,
    Month,
    Year,
}

/// Dialect-aware SQL grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    backend: DatabaseBackendType,
    window_functions: bool,
}

impl Grammar {
    pub fn new(backend: DatabaseBackendType) -> Self {
        Self {
            backend,
            window_functions: true,
        }
    }

    pub fn postgres() -> Self {
        Self::new(DatabaseBackendType::PostgreSQL)
    }

    pub fn mysql() -> Self {
        Self::new(DatabaseBackendType::MySQL)
    }

    pub fn sqlite() -> Self {
        Self::new(DatabaseBackendType::SQLite)
    }

    /// Override window function support (old MySQL/SQLite servers lack it)
    pub fn with_window_functions(mut self, enabled: bool) -> Self {
        self.window_functions = enabled;
        self
    }

    pub fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    pub fn supports_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::WindowFunctions => self.window_functions,
            Feature::JsonFunctions => true,
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self.backend {
            DatabaseBackendType::MySQL => '`',
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::SQLite => '"',
        }
    }

    /// Wrap a (possibly qualified, possibly aliased) column reference
    pub fn wrap(&self, value: &str) -> String {
        let value = value.trim();
        if let Some(index) = value.to_ascii_lowercase().find(" as ") {
            let (column, alias) = (&value[..index], &value[index + 4..]);
            return format!("{} as {}", self.wrap(column), self.wrap_segment(alias.trim()));
        }

        value
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    "*".to_string()
                } else {
                    self.wrap_segment(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Wrap a table name
    pub fn wrap_table(&self, table: &str) -> String {
        self.wrap(table)
    }

    fn wrap_segment(&self, segment: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = segment.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }

    /// Quote a string literal
    pub fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Rewrite `?` placeholders into the dialect's placeholder style
    ///
    /// Placeholders inside single-quoted literals are left alone.
    pub fn parameterize(&self, sql: &str) -> String {
        if self.backend != DatabaseBackendType::PostgreSQL {
            return sql.to_string();
        }

        let mut output = String::with_capacity(sql.len() + 8);
        let mut index = 0;
        let mut in_literal = false;
        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    output.push(ch);
                }
                '?' if !in_literal => {
                    index += 1;
                    output.push('$');
                    output.push_str(&index.to_string());
                }
                _ => output.push(ch),
            }
        }
        output
    }

    /// Expression extracting a date part from an already-wrapped column
    pub fn compile_date_part(&self, part: DatePart, column: &str) -> String {
        match (self.backend, part) {
            (DatabaseBackendType::PostgreSQL, DatePart::Date) => format!("{column}::date"),
            (DatabaseBackendType::PostgreSQL, DatePart::Time) => format!("{column}::time"),
            (DatabaseBackendType::PostgreSQL, DatePart::Day) => format!("extract(day from {column})"),
            (DatabaseBackendType::PostgreSQL, DatePart::Month) => format!("extract(month from {column})"),
            (DatabaseBackendType::PostgreSQL, DatePart::Year) => format!("extract(year from {column})"),
            (DatabaseBackendType::MySQL, DatePart::Date) => format!("date({column})"),
            (DatabaseBackendType::MySQL, DatePart::Time) => format!("time({column})"),
            (DatabaseBackendType::MySQL, DatePart::Day) => format!("day({column})"),
            (DatabaseBackendType::MySQL, DatePart::Month) => format!("month({column})"),
            (DatabaseBackendType::MySQL, DatePart::Year) => format!("year({column})"),
            (DatabaseBackendType::SQLite, DatePart::Date) => format!("strftime('%Y-%m-%d', {column})"),
            (DatabaseBackendType::SQLite, DatePart::Time) => format!("strftime('%H:%M:%S', {column})"),
            (DatabaseBackendType::SQLite, DatePart::Day) => {
                format!("cast(strftime('%d', {column}) as integer)")
            }
            (DatabaseBackendType::SQLite, DatePart::Month) => {
                format!("cast(strftime('%m', {column}) as integer)")
            }
            (DatabaseBackendType::SQLite, DatePart::Year) => {
                format!("cast(strftime('%Y', {column}) as integer)")
            }
        }
    }

    /// Null-safe "differs from the bound value" test on an already-wrapped column
    pub fn compile_distinct(&self, column: &str) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("{column} is distinct from ?"),
            DatabaseBackendType::MySQL => format!("not ({column} <=> ?)"),
            DatabaseBackendType::SQLite => format!("{column} is not ?"),
        }
    }

    /// JSON containment test against an already-wrapped column
    ///
    /// `path` must have been validated; it is interpolated as a literal.
    pub fn compile_json_contains(
        &self,
        column: &str,
        path: &str,
        value: &DatabaseValue,
    ) -> (String, Vec<DatabaseValue>) {
        match self.backend {
            DatabaseBackendType::MySQL => (
                format!("json_contains({column}, ?, {})", self.quote_string(path)),
                vec![DatabaseValue::String(value.to_json().to_string())],
            ),
            DatabaseBackendType::PostgreSQL => (
                format!("{} @> ?::jsonb", self.postgres_json_target(column, path)),
                vec![DatabaseValue::String(value.to_json().to_string())],
            ),
            DatabaseBackendType::SQLite => (
                format!(
                    "exists (select 1 from json_each({column}, {}) where json_each.value = ?)",
                    self.quote_string(path)
                ),
                vec![value.clone()],
            ),
        }
    }

    /// JSON array length expression against an already-wrapped column
    pub fn compile_json_length(&self, column: &str, path: &str) -> String {
        match self.backend {
            DatabaseBackendType::MySQL => format!("json_length({column}, {})", self.quote_string(path)),
            DatabaseBackendType::PostgreSQL => {
                format!("jsonb_array_length({})", self.postgres_json_target(column, path))
            }
            DatabaseBackendType::SQLite => {
                format!("json_array_length({column}, {})", self.quote_string(path))
            }
        }
    }

    fn postgres_json_target(&self, column: &str, path: &str) -> String {
        let segments = json_path_segments(path);
        if segments.is_empty() {
            format!("({column})::jsonb")
        } else {
            format!("(({column})::jsonb #> '{{{}}}')", segments.join(","))
        }
    }
}

/// Split a validated `$.a[0].b` path into `["a", "0", "b"]`
fn json_path_segments(path: &str) -> Vec<String> {
    path.trim_start_matches('$')
        .split(['.', '['])
        .map(|segment| segment.trim_end_matches(']'))
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_identifiers() {
        let grammar = Grammar::sqlite();
        assert_eq!(grammar.wrap("posts.id"), "\"posts\".\"id\"");
        assert_eq!(grammar.wrap("posts.*"), "\"posts\".*");
        assert_eq!(grammar.wrap("post_tag.role as pivot_role"), "\"post_tag\".\"role\" as \"pivot_role\"");

        let grammar = Grammar::mysql();
        assert_eq!(grammar.wrap("tags.name"), "`tags`.`name`");
    }

    #[test]
    fn test_parameterize_postgres() {
        let grammar = Grammar::postgres();
        let sql = grammar.parameterize("select * from t where a = ? and b = '?' and c in (?, ?)");
        assert_eq!(sql, "select * from t where a = $1 and b = '?' and c in ($2, $3)");

        let grammar = Grammar::sqlite();
        assert_eq!(grammar.parameterize("a = ?"), "a = ?");
    }

    #[test]
    fn test_window_feature_toggle() {
        assert!(Grammar::postgres().supports_feature(Feature::WindowFunctions));
        let grammar = Grammar::sqlite().with_window_functions(false);
        assert!(!grammar.supports_feature(Feature::WindowFunctions));
    }

    #[test]
    fn test_distinct_per_dialect() {
        let column = "\"role\"";
        assert_eq!(Grammar::postgres().compile_distinct(column), "\"role\" is distinct from ?");
        assert_eq!(Grammar::sqlite().compile_distinct(column), "\"role\" is not ?");
        assert_eq!(Grammar::mysql().compile_distinct("`role`"), "not (`role` <=> ?)");
    }

    #[test]
    fn test_json_path_segments() {
        assert_eq!(json_path_segments("$.tags[0].name"), vec!["tags", "0", "name"]);
        assert!(json_path_segments("$").is_empty());
    }

    #[test]
    fn test_json_length_per_dialect() {
        let column = "\"post_tag\".\"meta\"";
        assert_eq!(
            Grammar::sqlite().compile_json_length(column, "$.labels"),
            "json_array_length(\"post_tag\".\"meta\", '$.labels')"
        );
        assert_eq!(
            Grammar::postgres().compile_json_length(column, "$.labels"),
            "jsonb_array_length(((\"post_tag\".\"meta\")::jsonb #> '{labels}'))"
        );
    }
}
