//! SQL security validator (C4). Grounded on `services/sql_validator.py`'s policy —
//! statement-kind gating, blocked functions/tables/columns, subquery safety,
//! WHERE-clause requirement, join-count cap — reimplemented against `sqlparser`'s
//! AST per the idiom in the nocodo executor reference file (`other_examples`).

use sqlparser::ast::{
    Expr, Query, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};

use crate::config::SecurityConfig;

const BUILTIN_DANGEROUS_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_open",
    "pg_write_file",
    "pg_execute_sql",
    "copy_from",
    "copy_to",
];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Security(String),
}

pub struct SqlValidator {
    blocked_table_patterns: Vec<String>,
    blocked_columns_map: HashMap<String, HashSet<String>>,
    blocked_functions: HashSet<String>,
    allow_explain: bool,
    require_where_clause: HashSet<String>,
    max_join_tables: u32,
}

impl SqlValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        let mut blocked_functions: HashSet<String> =
            BUILTIN_DANGEROUS_FUNCTIONS.iter().map(|s| s.to_string()).collect();
        blocked_functions.extend(config.blocked_functions.iter().map(|s| s.to_lowercase()));

        let blocked_columns_map = config
            .blocked_columns
            .iter()
            .map(|(table, cols)| {
                (
                    table.to_lowercase(),
                    cols.iter().map(|c| c.to_lowercase()).collect(),
                )
            })
            .collect();

        Self {
            blocked_table_patterns: config.blocked_tables.iter().map(|t| t.to_lowercase()).collect(),
            blocked_columns_map,
            blocked_functions,
            allow_explain: config.allow_explain,
            require_where_clause: config.require_where_clause.iter().map(|t| t.to_lowercase()).collect(),
            max_join_tables: config.max_join_tables,
        }
    }

    pub fn validate(&self, sql: &str) -> (bool, Option<String>) {
        match self.validate_or_raise(sql) {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    pub fn validate_or_raise(&self, sql: &str) -> Result<(), ValidationError> {
        if sql.trim().is_empty() {
            return Err(ValidationError::Parse("SQL query cannot be empty".into()));
        }

        let dialect = PostgreSqlDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| ValidationError::Parse(format!("Failed to parse SQL: {e}")))?;

        if statements.is_empty() {
            return Err(ValidationError::Parse("No valid SQL statement found".into()));
        }
        if statements.len() > 1 {
            return Err(ValidationError::Security(
                "Multiple statements not allowed. Only single SELECT queries are permitted.".into(),
            ));
        }

        let statement = &statements[0];

        if let Statement::Explain { .. } = statement {
            if !self.allow_explain {
                return Err(ValidationError::Security("EXPLAIN statements are not allowed".into()));
            }
            // EXPLAIN is read-only regardless of the inner statement; the inner query
            // is not re-parsed here (matches the source behavior, see DESIGN.md).
            return Ok(());
        }

        let query = match statement {
            Statement::Query(q) => q.as_ref(),
            other => {
                return Err(ValidationError::Security(format!(
                    "Statement type {} is not allowed. Only SELECT queries are permitted.",
                    statement_kind(other)
                )))
            }
        };

        self.check_dangerous_functions(sql)?;
        self.check_query(query)?;
        Ok(())
    }

    fn check_dangerous_functions(&self, sql: &str) -> Result<(), ValidationError> {
        if self.blocked_functions.is_empty() {
            return Ok(());
        }
        let lower = sql.to_lowercase();
        for func in &self.blocked_functions {
            if contains_call(&lower, func) {
                return Err(ValidationError::Security(format!(
                    "Function '{func}' is blocked for security reasons"
                )));
            }
        }
        Ok(())
    }

    /// Walks a query body, enforcing blocked tables/columns, subquery safety,
    /// WHERE-clause requirement and join-count cap at every nested SELECT. Each
    /// SELECT gets its own alias->table map built from its own `FROM` clause, so a
    /// qualified column reference (`u.password`) resolves to the real table
    /// (`users`) before the blocked-columns lookup runs.
    fn check_set_expr(&self, set_expr: &SetExpr) -> Result<(), ValidationError> {
        match set_expr {
            SetExpr::Select(select) => {
                let mut tables = HashSet::new();
                let mut aliases = HashMap::new();
                for twj in &select.from {
                    self.check_table_with_joins(twj, &mut tables, &mut aliases)?;
                }

                if tables.len() as u32 > self.max_join_tables {
                    return Err(ValidationError::Security(format!(
                        "Query joins {} tables, which exceeds the maximum allowed limit of {} tables",
                        tables.len(),
                        self.max_join_tables
                    )));
                }

                for required in &self.require_where_clause {
                    if tables.contains(required) && select.selection.is_none() {
                        return Err(ValidationError::Security(format!(
                            "Table '{required}' requires a WHERE clause in SELECT queries"
                        )));
                    }
                }

                if let Some(selection) = &select.selection {
                    self.check_expr(selection, &aliases)?;
                }
                for item in &select.projection {
                    if let sqlparser::ast::SelectItem::UnnamedExpr(e)
                    | sqlparser::ast::SelectItem::ExprWithAlias { expr: e, .. } = item
                    {
                        self.check_expr(e, &aliases)?;
                    }
                }
                Ok(())
            }
            SetExpr::Query(q) => self.check_query(q),
            SetExpr::SetOperation { left, right, .. } => {
                self.check_set_expr(left)?;
                self.check_set_expr(right)
            }
            _ => Ok(()),
        }
    }

    fn check_query(&self, query: &Query) -> Result<(), ValidationError> {
        self.check_set_expr(&query.body)
    }

    fn check_table_with_joins(
        &self,
        twj: &TableWithJoins,
        tables: &mut HashSet<String>,
        aliases: &mut HashMap<String, String>,
    ) -> Result<(), ValidationError> {
        self.check_table_factor(&twj.relation, tables, aliases)?;
        for join in &twj.joins {
            self.check_table_factor(&join.relation, tables, aliases)?;
        }
        Ok(())
    }

    fn check_table_factor(
        &self,
        factor: &TableFactor,
        tables: &mut HashSet<String>,
        aliases: &mut HashMap<String, String>,
    ) -> Result<(), ValidationError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table_name = name.to_string().to_lowercase();
                let bare_name = table_name.rsplit('.').next().unwrap_or(&table_name).to_string();

                for pattern in &self.blocked_table_patterns {
                    if glob_match(pattern, &bare_name) {
                        return Err(ValidationError::Security(format!(
                            "Access to table '{bare_name}' is not allowed (matches pattern '{pattern}')"
                        )));
                    }
                }

                let alias_key = alias
                    .as_ref()
                    .map(|a| a.name.value.to_lowercase())
                    .unwrap_or_else(|| bare_name.clone());
                aliases.insert(alias_key, bare_name.clone());

                tables.insert(bare_name);
                Ok(())
            }
            TableFactor::Derived { subquery, .. } => self.check_query(subquery),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.check_table_with_joins(table_with_joins, tables, aliases)
            }
            _ => Ok(()),
        }
    }

    fn check_expr(&self, expr: &Expr, aliases: &HashMap<String, String>) -> Result<(), ValidationError> {
        match expr {
            Expr::Subquery(subquery) => self.check_query(subquery),
            Expr::BinaryOp { left, right, .. } => {
                self.check_expr(left, aliases)?;
                self.check_expr(right, aliases)
            }
            Expr::UnaryOp { expr, .. } => self.check_expr(expr, aliases),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = parts[parts.len() - 2].value.to_lowercase();
                let column = parts[parts.len() - 1].value.to_lowercase();
                let table = aliases.get(&qualifier).cloned().unwrap_or(qualifier);
                if let Some(cols) = self.blocked_columns_map.get(&table) {
                    if cols.contains(&column) {
                        return Err(ValidationError::Security(format!(
                            "Access to column '{table}.{column}' is not allowed"
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-renders the parsed statement for canonical comparison/caching.
    pub fn normalize(&self, sql: &str) -> Result<String, ValidationError> {
        let dialect = PostgreSqlDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| ValidationError::Parse(format!("Failed to normalize SQL: {e}")))?;
        let first = statements
            .first()
            .ok_or_else(|| ValidationError::Parse("No valid SQL statement found".into()))?;
        Ok(first.to_string())
    }

    /// Table names referenced at any depth, lowercased and schema-stripped.
    pub fn extract_tables(&self, sql: &str) -> Result<Vec<String>, ValidationError> {
        let dialect = PostgreSqlDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| ValidationError::Parse(format!("Failed to parse SQL: {e}")))?;
        let mut tables = HashSet::new();
        for statement in &statements {
            if let Statement::Query(query) = statement {
                collect_tables(&query.body, &mut tables);
            }
        }
        let mut out: Vec<String> = tables.into_iter().collect();
        out.sort();
        Ok(out)
    }
}

fn collect_tables(set_expr: &SetExpr, out: &mut HashSet<String>) {
    match set_expr {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_factor(&twj.relation, out);
                for join in &twj.joins {
                    collect_table_factor(&join.relation, out);
                }
            }
        }
        SetExpr::Query(q) => collect_tables(&q.body, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_tables(left, out);
            collect_tables(right, out);
        }
        _ => {}
    }
}

fn collect_table_factor(factor: &TableFactor, out: &mut HashSet<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            let full = name.to_string().to_lowercase();
            out.insert(full.rsplit('.').next().unwrap_or(&full).to_string());
        }
        TableFactor::Derived { subquery, .. } => collect_tables(&subquery.body, out),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_table_factor(&table_with_joins.relation, out);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, out);
            }
        }
        _ => {}
    }
}

/// First token of the statement's `Debug` name (e.g. `"Insert"` -> `"INSERT"`), used
/// only for the human-readable rejection message. Avoids depending on the exact
/// field shape of each `Statement` variant, which varies across sqlparser versions.
fn statement_kind(statement: &Statement) -> String {
    let debug = format!("{statement:?}");
    let name = debug.split(|c: char| !c.is_alphanumeric()).next().unwrap_or("statement");
    name.to_uppercase()
}

/// Case-insensitive whole-word function-call match (`name(`), avoiding substring
/// false positives like matching `"copy_to"` inside `"my_copy_total"`.
fn contains_call(lowercase_sql: &str, func_name: &str) -> bool {
    let pattern = format!("{func_name}(");
    let mut search_from = 0;
    while let Some(pos) = lowercase_sql[search_from..].find(&pattern) {
        let abs = search_from + pos;
        let preceding_is_boundary = abs == 0
            || !lowercase_sql.as_bytes()[abs - 1].is_ascii_alphanumeric()
                && lowercase_sql.as_bytes()[abs - 1] != b'_';
        if preceding_is_boundary {
            return true;
        }
        search_from = abs + pattern.len();
    }
    false
}

/// Minimal `fnmatch`-style glob: `*` and `?` only, case-insensitive inputs assumed.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..])),
            (Some(b'?'), Some(_)) => helper(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => helper(&p[1..], &t[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> SecurityConfig {
        SecurityConfig {
            allow_write_operations: false,
            blocked_functions: vec![],
            max_rows: 1000,
            max_execution_time_secs: 30,
            blocked_tables: vec![],
            blocked_columns: HashMap::new(),
            allow_explain: false,
            require_where_clause: vec![],
            max_join_tables: 5,
        }
    }

    #[test]
    fn accepts_simple_select() {
        let v = SqlValidator::new(&config());
        let (ok, _) = v.validate("SELECT id, name FROM users");
        assert!(ok);
    }

    #[test]
    fn rejects_insert() {
        let v = SqlValidator::new(&config());
        let (ok, msg) = v.validate("INSERT INTO users (name) VALUES ('x')");
        assert!(!ok);
        assert!(msg.unwrap().contains("INSERT"));
    }

    #[test]
    fn rejects_multiple_statements() {
        let v = SqlValidator::new(&config());
        let (ok, _) = v.validate("SELECT 1; SELECT 2;");
        assert!(!ok);
    }

    #[test]
    fn rejects_blocked_function() {
        let mut cfg = config();
        cfg.blocked_functions = vec!["pg_sleep".into()];
        let v = SqlValidator::new(&cfg);
        let (ok, msg) = v.validate("SELECT pg_sleep(10)");
        assert!(!ok);
        assert!(msg.unwrap().contains("pg_sleep"));
    }

    #[test]
    fn rejects_blocked_table_by_glob() {
        let mut cfg = config();
        cfg.blocked_tables = vec!["secret_*".into()];
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("SELECT * FROM secret_keys");
        assert!(!ok);
    }

    #[test]
    fn rejects_blocked_column_qualified() {
        let mut cfg = config();
        cfg.blocked_columns.insert("users".into(), vec!["password".into()]);
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("SELECT users.password FROM users");
        assert!(!ok);
    }

    #[test]
    fn rejects_blocked_column_behind_table_alias() {
        let mut cfg = config();
        cfg.blocked_columns.insert("users".into(), vec!["password".into()]);
        let v = SqlValidator::new(&cfg);
        let (ok, msg) = v.validate("SELECT u.password FROM users u");
        assert!(!ok);
        assert!(msg.unwrap().contains("users.password"));
    }

    #[test]
    fn allows_unrelated_alias_to_unblocked_column() {
        let mut cfg = config();
        cfg.blocked_columns.insert("users".into(), vec!["password".into()]);
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("SELECT o.id FROM orders o");
        assert!(ok);
    }

    #[test]
    fn requires_where_clause_when_configured() {
        let mut cfg = config();
        cfg.require_where_clause = vec!["orders".into()];
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("SELECT * FROM orders");
        assert!(!ok);
        let (ok, _) = v.validate("SELECT * FROM orders WHERE id = 1");
        assert!(ok);
    }

    #[test]
    fn rejects_excess_joins() {
        let mut cfg = config();
        cfg.max_join_tables = 1;
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("SELECT * FROM a JOIN b ON a.id = b.id");
        assert!(!ok);
    }

    #[test]
    fn explain_allowed_only_when_configured() {
        let v = SqlValidator::new(&config());
        let (ok, _) = v.validate("EXPLAIN SELECT 1");
        assert!(!ok);

        let mut cfg = config();
        cfg.allow_explain = true;
        let v = SqlValidator::new(&cfg);
        let (ok, _) = v.validate("EXPLAIN SELECT 1");
        assert!(ok);
    }

    #[test]
    fn extracts_tables_from_join() {
        let v = SqlValidator::new(&config());
        let tables = v.extract_tables("SELECT * FROM a JOIN b ON a.id = b.a_id").unwrap();
        assert_eq!(tables, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn rejects_empty_sql() {
        let v = SqlValidator::new(&config());
        let (ok, msg) = v.validate("   ");
        assert!(!ok);
        assert!(msg.unwrap().contains("empty"));
    }

    proptest::proptest! {
        /// `normalize` is idempotent for any accepted query shaped by a random
        /// literal id, since re-rendering a parsed statement never changes its
        /// own canonical form.
        #[test]
        fn normalize_is_idempotent(id in 0u32..1_000_000) {
            let v = SqlValidator::new(&config());
            let sql = format!("SELECT * FROM orders WHERE id = {id}");
            let once = v.normalize(&sql).unwrap();
            let twice = v.normalize(&once).unwrap();
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
