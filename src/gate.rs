//! SQL safety gate: decides whether one piece of untrusted SQL text is a
//! single read-only SELECT before anything touches a database connection.
//!
//! The gate never executes anything. It strips comments with a quote-aware
//! scanner, refuses multi-statement input, parses the remainder with the
//! PostgreSQL dialect, then walks the tree rejecting writes hidden in CTEs,
//! `SELECT INTO`, row-locking clauses, and calls to denylisted functions.
//! All findings are collected into one issue list so a caller sees every
//! problem at once, not just the first.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    AccessExpr, Distinct, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArgumentClause,
    FunctionArguments, GroupByExpr, JoinConstraint, JoinOperator, LimitClause, NamedWindowExpr,
    ObjectName, OrderBy, OrderByKind, PivotValueSource, Query, Select, SelectItem, SetExpr,
    Statement, Subscript, TableFactor, TableWithJoins, WindowFrameBound, WindowSpec, WindowType,
    XmlTableColumnOption,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Functions whose mere invocation is refused, matched case-insensitively on
/// the final segment of a possibly schema-qualified name. Denylist over
/// structural intent: everything read-only the grammar allows still passes.
const BLOCKED_FUNCTION_NAMES: &[&str] = &[
    // sleep / delay
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    // filesystem and large objects
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    // session / server control
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_switch_wal",
    // privilege and identity introspection
    "current_setting",
    "set_config",
    "session_user",
    "current_user",
    "has_table_privilege",
    "has_database_privilege",
    "has_schema_privilege",
    "pg_has_role",
    "inet_server_addr",
    "inet_client_addr",
    "version",
    // remote execution
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_send_query",
    // sequence mutation
    "nextval",
    "setval",
    // advisory locks
    "pg_advisory_lock",
    "pg_advisory_lock_shared",
    "pg_advisory_xact_lock",
    "pg_advisory_xact_lock_shared",
    "pg_advisory_unlock",
    "pg_advisory_unlock_all",
    "pg_advisory_unlock_shared",
    "pg_try_advisory_lock",
    "pg_try_advisory_lock_shared",
    "pg_try_advisory_xact_lock",
    "pg_try_advisory_xact_lock_shared",
    // misc side channels
    "pg_notify",
    "query_to_xml",
];

static BLOCKED_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    BLOCKED_FUNCTION_NAMES.iter().copied().collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    EmptyQuery,
    MultiStatement,
    NotSelect,
    SelectInto,
    Locking,
    NonSelectCte,
    BlockedFunc,
    ParseError,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::EmptyQuery => "EMPTY_QUERY",
            IssueCode::MultiStatement => "MULTI_STATEMENT",
            IssueCode::NotSelect => "NOT_SELECT",
            IssueCode::SelectInto => "SELECT_INTO",
            IssueCode::Locking => "LOCKING",
            IssueCode::NonSelectCte => "NON_SELECT_CTE",
            IssueCode::BlockedFunc => "BLOCKED_FUNC",
            IssueCode::ParseError => "PARSE_ERROR",
        }
    }
}

/// One reason a statement was refused. A rejected statement carries one or
/// more of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new<S: Into<String>>(code: IssueCode, message: S) -> Self {
        ValidationIssue { code, message: message.into() }
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

#[derive(Debug)]
pub enum GateError {
    /// Policy rejection: the statement is well understood and not allowed.
    Rejected(Vec<ValidationIssue>),
    /// Parser fault (panic). Detail is for the server log, not the caller.
    Internal(String),
}

/// A statement that passed every check. `sql` is the normalized text that
/// later stages wrap and execute. The parse tree lives only for the policy
/// walk and is dropped with it.
#[derive(Debug)]
pub struct Accepted {
    pub sql: String,
}

/// Validate one piece of untrusted SQL text against the read-only policy.
pub fn validate(sql: &str) -> Result<Accepted, GateError> {
    let stripped = strip_comments(sql);
    let mut text = stripped.trim();
    while let Some(prefix) = text.strip_suffix(';') {
        text = prefix.trim_end();
    }
    if text.is_empty() {
        return Err(reject(IssueCode::EmptyQuery, "statement is empty"));
    }
    if has_extra_statement(text) {
        return Err(reject(
            IssueCode::MultiStatement,
            "multiple statements are not allowed",
        ));
    }
    if let Some(clause) = unparsed_lock_clause(text) {
        return Err(reject(IssueCode::Locking, format!("{clause} is not allowed")));
    }

    let parsed = catch_unwind(AssertUnwindSafe(|| {
        Parser::parse_sql(&PostgreSqlDialect {}, text)
    }))
    .map_err(|_| GateError::Internal("statement parser panicked".to_string()))?;

    let statements = match parsed {
        Ok(statements) => statements,
        Err(err) => return Err(reject(IssueCode::ParseError, err.to_string())),
    };

    let mut statements = statements.into_iter();
    let Some(statement) = statements.next() else {
        return Err(reject(IssueCode::EmptyQuery, "statement is empty"));
    };
    if statements.next().is_some() {
        return Err(reject(
            IssueCode::MultiStatement,
            "multiple statements are not allowed",
        ));
    }

    let query = match statement {
        Statement::Query(query) => query,
        other => {
            return Err(reject(
                IssueCode::NotSelect,
                format!(
                    "{} is not allowed; only read-only SELECT statements are accepted",
                    statement_kind(&other)
                ),
            ))
        }
    };

    let mut walker = Walker::default();
    walker.check_query(&query);
    if walker.issues.is_empty() {
        Ok(Accepted { sql: text.to_string() })
    } else {
        Err(GateError::Rejected(walker.issues))
    }
}

fn reject<S: Into<String>>(code: IssueCode, message: S) -> GateError {
    GateError::Rejected(vec![ValidationIssue::new(code, message)])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
    DollarQuote,
}

/// Remove `--` line and `/* */` block comments without touching the contents
/// of string literals, quoted identifiers, or dollar-quoted bodies.
fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut result = String::with_capacity(sql.len());
    let mut index = 0;
    let mut state = ScanState::Normal;
    let mut dollar_tag: Vec<char> = Vec::new();

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '-' && next == Some('-') {
                    state = ScanState::LineComment;
                    index += 2;
                    continue;
                }

                if current == '/' && next == Some('*') {
                    state = ScanState::BlockComment;
                    index += 2;
                    continue;
                }

                if current == '$' {
                    if let Some(len) = dollar_delimiter(&chars, index) {
                        dollar_tag = chars[index..index + len].to_vec();
                        for ch in &dollar_tag {
                            result.push(*ch);
                        }
                        state = ScanState::DollarQuote;
                        index += len;
                        continue;
                    }
                }

                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                }

                result.push(current);
                index += 1;
            }

            ScanState::LineComment => {
                if current == '\n' {
                    result.push('\n');
                    state = ScanState::Normal;
                }
                index += 1;
            }

            ScanState::BlockComment => {
                if current == '*' && next == Some('/') {
                    state = ScanState::Normal;
                    index += 2;
                } else {
                    index += 1;
                }
            }

            ScanState::SingleQuote => {
                result.push(current);

                if current == '\'' {
                    if next == Some('\'') {
                        result.push('\'');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }

                index += 1;
            }

            ScanState::DoubleQuote => {
                result.push(current);

                if current == '"' {
                    if next == Some('"') {
                        result.push('"');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }

                index += 1;
            }

            ScanState::DollarQuote => {
                if current == '$' && chars[index..].starts_with(&dollar_tag) {
                    for ch in &dollar_tag {
                        result.push(*ch);
                    }
                    index += dollar_tag.len();
                    state = ScanState::Normal;
                    continue;
                }
                result.push(current);
                index += 1;
            }
        }
    }

    result
}

/// True when a non-whitespace character follows a statement-level `;`.
/// Comments must already be stripped.
fn has_extra_statement(sql: &str) -> bool {
    let chars: Vec<char> = sql.chars().collect();
    let mut state = ScanState::Normal;
    let mut seen_semicolon = false;
    let mut index = 0;
    let mut dollar_tag: Vec<char> = Vec::new();

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if seen_semicolon && !current.is_whitespace() {
                    return true;
                }
                if current == '$' {
                    if let Some(len) = dollar_delimiter(&chars, index) {
                        dollar_tag = chars[index..index + len].to_vec();
                        state = ScanState::DollarQuote;
                        index += len;
                        continue;
                    }
                }
                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                } else if current == ';' {
                    seen_semicolon = true;
                }
            }

            ScanState::SingleQuote => {
                if current == '\'' {
                    if next == Some('\'') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::DoubleQuote => {
                if current == '"' {
                    if next == Some('"') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::DollarQuote => {
                if current == '$' && chars[index..].starts_with(&dollar_tag) {
                    index += dollar_tag.len();
                    state = ScanState::Normal;
                    continue;
                }
            }

            ScanState::LineComment | ScanState::BlockComment => {}
        }

        index += 1;
    }

    false
}

/// Locking clauses whose lock strength sqlparser does not model. Without
/// this check `FOR NO KEY UPDATE` and `FOR KEY SHARE` would surface as
/// parse errors instead of locking rejections. Matches keyword sequences
/// outside string literals, quoted identifiers, and dollar-quoted bodies;
/// comments must already be stripped.
fn unparsed_lock_clause(sql: &str) -> Option<&'static str> {
    let chars: Vec<char> = sql.chars().collect();
    let mut masked = String::with_capacity(sql.len());
    let mut state = ScanState::Normal;
    let mut dollar_tag: Vec<char> = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '$' {
                    if let Some(len) = dollar_delimiter(&chars, index) {
                        dollar_tag = chars[index..index + len].to_vec();
                        state = ScanState::DollarQuote;
                        masked.push(' ');
                        index += len;
                        continue;
                    }
                }
                if current == '\'' {
                    state = ScanState::SingleQuote;
                    masked.push(' ');
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                    masked.push(' ');
                } else if current.is_ascii_alphanumeric() || current == '_' {
                    masked.push(current.to_ascii_lowercase());
                } else {
                    masked.push(' ');
                }
            }

            ScanState::SingleQuote => {
                if current == '\'' {
                    if next == Some('\'') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::DoubleQuote => {
                if current == '"' {
                    if next == Some('"') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::DollarQuote => {
                if current == '$' && chars[index..].starts_with(&dollar_tag) {
                    index += dollar_tag.len();
                    state = ScanState::Normal;
                    continue;
                }
            }

            ScanState::LineComment | ScanState::BlockComment => {}
        }

        index += 1;
    }

    let words: Vec<&str> = masked.split_whitespace().collect();
    if words.windows(4).any(|w| matches!(w, ["for", "no", "key", "update"])) {
        return Some("FOR NO KEY UPDATE");
    }
    if words.windows(3).any(|w| matches!(w, ["for", "key", "share"])) {
        return Some("FOR KEY SHARE");
    }
    None
}

/// Length of a dollar-quote delimiter (`$$`, `$body$`, ...) starting at
/// `start`, or `None` if the `$` opens something else, e.g. a `$1`
/// positional parameter.
pub(crate) fn dollar_delimiter(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'$') {
        return None;
    }
    let mut end = start + 1;
    while let Some(ch) = chars.get(end) {
        if *ch == '$' {
            return Some(end + 1 - start);
        }
        let tag_char = if end == start + 1 {
            ch.is_ascii_alphabetic() || *ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || *ch == '_'
        };
        if !tag_char {
            return None;
        }
        end += 1;
    }
    None
}

/// Human-readable kind for a statement the gate refuses at the root.
fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Merge { .. } => "MERGE",
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. } => "CREATE",
        Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterRole { .. } => "ALTER",
        Statement::Drop { .. } | Statement::DropFunction { .. } => "DROP",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        Statement::Copy { .. } => "COPY",
        Statement::Call { .. } => "CALL",
        Statement::Execute { .. } => "EXECUTE",
        Statement::Set { .. } => "SET",
        Statement::StartTransaction { .. } | Statement::Commit { .. } | Statement::Rollback { .. } => {
            "transaction control"
        }
        Statement::Explain { .. } | Statement::ExplainTable { .. } => "EXPLAIN",
        _ => "this statement",
    }
}

fn set_expr_kind(body: &SetExpr) -> &'static str {
    match body {
        SetExpr::Insert(_) => "INSERT",
        SetExpr::Update(_) => "UPDATE",
        SetExpr::Delete(_) => "DELETE",
        SetExpr::Merge(_) => "MERGE",
        _ => "a non-SELECT expression",
    }
}

/// Recursive policy walk over an accepted `Statement::Query` tree. Collects
/// issues instead of stopping at the first.
#[derive(Default)]
struct Walker {
    issues: Vec<ValidationIssue>,
    cte_depth: usize,
}

impl Walker {
    fn push(&mut self, code: IssueCode, message: String) {
        let issue = ValidationIssue { code, message };
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }

    fn check_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            self.cte_depth += 1;
            for cte in &with.cte_tables {
                self.check_query(&cte.query);
            }
            self.cte_depth -= 1;
        }
        self.check_set_expr(&query.body);
        if let Some(order_by) = &query.order_by {
            self.check_order_by(order_by);
        }
        if let Some(limit_clause) = &query.limit_clause {
            self.check_limit_clause(limit_clause);
        }
        if let Some(fetch) = &query.fetch {
            if let Some(quantity) = &fetch.quantity {
                self.check_expr(quantity);
            }
        }
        for lock in &query.locks {
            self.push(IssueCode::Locking, format!("{lock} is not allowed"));
        }
    }

    fn check_order_by(&mut self, order_by: &OrderBy) {
        if let OrderByKind::Expressions(items) = &order_by.kind {
            for item in items {
                self.check_expr(&item.expr);
            }
        }
    }

    // LIMIT and OFFSET take arbitrary expressions, subqueries included.
    fn check_limit_clause(&mut self, clause: &LimitClause) {
        match clause {
            LimitClause::LimitOffset { limit, offset, limit_by } => {
                if let Some(limit) = limit {
                    self.check_expr(limit);
                }
                if let Some(offset) = offset {
                    self.check_expr(&offset.value);
                }
                for expr in limit_by {
                    self.check_expr(expr);
                }
            }
            LimitClause::OffsetCommaLimit { offset, limit } => {
                self.check_expr(offset);
                self.check_expr(limit);
            }
        }
    }

    fn check_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.check_select(select),
            SetExpr::Query(query) => self.check_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.check_set_expr(left);
                self.check_set_expr(right);
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.check_expr(expr);
                    }
                }
            }
            SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Delete(_) | SetExpr::Merge(_) => {
                let kind = set_expr_kind(body);
                if self.cte_depth > 0 {
                    self.push(
                        IssueCode::NonSelectCte,
                        format!("{kind} inside a CTE is not allowed"),
                    );
                } else {
                    self.push(IssueCode::NotSelect, format!("{kind} is not allowed here"));
                }
            }
            _ => {}
        }
    }

    fn check_select(&mut self, select: &Select) {
        if let Some(into) = &select.into {
            self.push(IssueCode::SelectInto, format!("{into} is not allowed"));
        }
        if let Some(Distinct::On(exprs)) = &select.distinct {
            for expr in exprs {
                self.check_expr(expr);
            }
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.check_expr(expr)
                }
                _ => {}
            }
        }
        for table in &select.from {
            self.check_table_with_joins(table);
        }
        if let Some(selection) = &select.selection {
            self.check_expr(selection);
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs, ..) => {
                for expr in exprs {
                    self.check_expr(expr);
                }
            }
            GroupByExpr::All(..) => {}
        }
        if let Some(having) = &select.having {
            self.check_expr(having);
        }
        if let Some(qualify) = &select.qualify {
            self.check_expr(qualify);
        }
        for item in &select.sort_by {
            self.check_expr(&item.expr);
        }
        for window in &select.named_window {
            if let NamedWindowExpr::WindowSpec(spec) = &window.1 {
                self.check_window_spec(spec);
            }
        }
    }

    fn check_table_with_joins(&mut self, table: &TableWithJoins) {
        self.check_table_factor(&table.relation);
        for join in &table.joins {
            self.check_table_factor(&join.relation);
            if let Some(JoinConstraint::On(expr)) = join_constraint(&join.join_operator) {
                self.check_expr(expr);
            }
        }
    }

    // Exhaustive on purpose: a FROM shape this match does not know cannot
    // slip through unchecked.
    fn check_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            // `FROM pg_sleep(1)` parses as a table with arguments; treat the
            // name as a function call.
            TableFactor::Table { name, args, .. } => {
                if let Some(table_args) = args {
                    self.check_function_name(name);
                    for arg in &table_args.args {
                        self.check_function_arg(arg);
                    }
                }
            }
            TableFactor::Derived { subquery, .. } => self.check_query(subquery),
            TableFactor::TableFunction { expr, .. } => self.check_expr(expr),
            TableFactor::Function { name, args, .. } => {
                self.check_function_name(name);
                for arg in args {
                    self.check_function_arg(arg);
                }
            }
            TableFactor::UNNEST { array_exprs, .. } => {
                for expr in array_exprs {
                    self.check_expr(expr);
                }
            }
            TableFactor::JsonTable { json_expr, .. } => self.check_expr(json_expr),
            TableFactor::OpenJsonTable { json_expr, .. } => self.check_expr(json_expr),
            TableFactor::XmlTable { namespaces, row_expression, passing, columns, .. } => {
                for namespace in namespaces {
                    self.check_expr(&namespace.uri);
                }
                self.check_expr(row_expression);
                for argument in &passing.arguments {
                    self.check_expr(&argument.expr);
                }
                for column in columns {
                    if let XmlTableColumnOption::NamedInfo { path, default, .. } = &column.option {
                        for expr in [path, default].into_iter().flatten() {
                            self.check_expr(expr);
                        }
                    }
                }
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.check_table_with_joins(table_with_joins)
            }
            TableFactor::Pivot {
                table,
                aggregate_functions,
                value_column,
                value_source,
                default_on_null,
                ..
            } => {
                self.check_table_factor(table);
                for aggregate in aggregate_functions {
                    self.check_expr(&aggregate.expr);
                }
                for expr in value_column {
                    self.check_expr(expr);
                }
                match value_source {
                    PivotValueSource::List(items) => {
                        for item in items {
                            self.check_expr(&item.expr);
                        }
                    }
                    PivotValueSource::Any(items) => {
                        for item in items {
                            self.check_expr(&item.expr);
                        }
                    }
                    PivotValueSource::Subquery(query) => self.check_query(query),
                }
                if let Some(expr) = default_on_null {
                    self.check_expr(expr);
                }
            }
            TableFactor::Unpivot { table, value, columns, .. } => {
                self.check_table_factor(table);
                self.check_expr(value);
                for column in columns {
                    self.check_expr(&column.expr);
                }
            }
            TableFactor::MatchRecognize {
                table,
                partition_by,
                order_by,
                measures,
                symbols,
                ..
            } => {
                self.check_table_factor(table);
                for expr in partition_by {
                    self.check_expr(expr);
                }
                for item in order_by {
                    self.check_expr(&item.expr);
                }
                for measure in measures {
                    self.check_expr(&measure.expr);
                }
                for symbol in symbols {
                    self.check_expr(&symbol.definition);
                }
            }
            TableFactor::SemanticView { dimensions, metrics, facts, where_clause, .. } => {
                for expr in dimensions.iter().chain(metrics).chain(facts) {
                    self.check_expr(expr);
                }
                if let Some(expr) = where_clause {
                    self.check_expr(expr);
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Function(func) => self.check_function(func),
            Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => self.check_query(query),
            Expr::InSubquery { expr, subquery, .. } => {
                self.check_expr(expr);
                self.check_query(subquery);
            }
            Expr::BinaryOp { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::UnaryOp { expr, .. } => self.check_expr(expr),
            Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::Nested(expr) => self.check_expr(expr),
            Expr::Cast { expr, .. } => self.check_expr(expr),
            Expr::Collate { expr, .. } => self.check_expr(expr),
            Expr::Extract { expr, .. } => self.check_expr(expr),
            Expr::Substring { expr, substring_from, substring_for, .. } => {
                self.check_expr(expr);
                if let Some(from) = substring_from {
                    self.check_expr(from);
                }
                if let Some(len) = substring_for {
                    self.check_expr(len);
                }
            }
            Expr::Trim { expr, trim_what, trim_characters, .. } => {
                self.check_expr(expr);
                if let Some(what) = trim_what {
                    self.check_expr(what);
                }
                if let Some(characters) = trim_characters {
                    for ch in characters {
                        self.check_expr(ch);
                    }
                }
            }
            Expr::Overlay { expr, overlay_what, overlay_from, overlay_for } => {
                self.check_expr(expr);
                self.check_expr(overlay_what);
                self.check_expr(overlay_from);
                if let Some(len) = overlay_for {
                    self.check_expr(len);
                }
            }
            Expr::Position { expr, r#in } => {
                self.check_expr(expr);
                self.check_expr(r#in);
            }
            Expr::Case { operand, conditions, else_result, .. } => {
                if let Some(operand) = operand {
                    self.check_expr(operand);
                }
                for when in conditions {
                    self.check_expr(&when.condition);
                    self.check_expr(&when.result);
                }
                if let Some(else_result) = else_result {
                    self.check_expr(else_result);
                }
            }
            Expr::InList { expr, list, .. } => {
                self.check_expr(expr);
                for item in list {
                    self.check_expr(item);
                }
            }
            Expr::InUnnest { expr, array_expr, .. } => {
                self.check_expr(expr);
                self.check_expr(array_expr);
            }
            Expr::Between { expr, low, high, .. } => {
                self.check_expr(expr);
                self.check_expr(low);
                self.check_expr(high);
            }
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.check_expr(expr);
                self.check_expr(pattern);
            }
            Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsNotTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::IsNotFalse(expr)
            | Expr::IsUnknown(expr)
            | Expr::IsNotUnknown(expr) => self.check_expr(expr),
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::Tuple(exprs) => {
                for expr in exprs {
                    self.check_expr(expr);
                }
            }
            Expr::Array(array) => {
                for expr in &array.elem {
                    self.check_expr(expr);
                }
            }
            Expr::Interval(interval) => self.check_expr(&interval.value),
            Expr::AtTimeZone { timestamp, time_zone } => {
                self.check_expr(timestamp);
                self.check_expr(time_zone);
            }
            Expr::Ceil { expr, .. } | Expr::Floor { expr, .. } => self.check_expr(expr),
            Expr::JsonAccess { value, .. } => self.check_expr(value),
            Expr::CompoundFieldAccess { root, access_chain } => {
                self.check_expr(root);
                for access in access_chain {
                    match access {
                        AccessExpr::Dot(expr) => self.check_expr(expr),
                        AccessExpr::Subscript(Subscript::Index { index }) => self.check_expr(index),
                        AccessExpr::Subscript(Subscript::Slice {
                            lower_bound,
                            upper_bound,
                            stride,
                        }) => {
                            for bound in [lower_bound, upper_bound, stride].into_iter().flatten() {
                                self.check_expr(bound);
                            }
                        }
                    }
                }
            }
            Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
                for set in sets {
                    for expr in set {
                        self.check_expr(expr);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_function(&mut self, func: &Function) {
        self.check_function_name(&func.name);
        self.check_function_arguments(&func.parameters);
        self.check_function_arguments(&func.args);
        if let Some(filter) = &func.filter {
            self.check_expr(filter);
        }
        for item in &func.within_group {
            self.check_expr(&item.expr);
        }
        if let Some(WindowType::WindowSpec(spec)) = &func.over {
            self.check_window_spec(spec);
        }
    }

    fn check_function_arguments(&mut self, arguments: &FunctionArguments) {
        match arguments {
            FunctionArguments::List(list) => {
                for arg in &list.args {
                    self.check_function_arg(arg);
                }
                for clause in &list.clauses {
                    match clause {
                        FunctionArgumentClause::OrderBy(items) => {
                            for item in items {
                                self.check_expr(&item.expr);
                            }
                        }
                        FunctionArgumentClause::Limit(expr) => self.check_expr(expr),
                        _ => {}
                    }
                }
            }
            FunctionArguments::Subquery(query) => self.check_query(query),
            FunctionArguments::None => {}
        }
    }

    fn check_function_arg(&mut self, arg: &FunctionArg) {
        match arg {
            FunctionArg::ExprNamed { name, arg, .. } => {
                self.check_expr(name);
                if let FunctionArgExpr::Expr(expr) = arg {
                    self.check_expr(expr);
                }
            }
            FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => {
                if let FunctionArgExpr::Expr(expr) = arg {
                    self.check_expr(expr);
                }
            }
        }
    }

    fn check_function_name(&mut self, name: &ObjectName) {
        let full = name.to_string().to_lowercase();
        let base = full.rsplit('.').next().unwrap_or(full.as_str());
        let base = base.trim_matches('"');
        if BLOCKED_FUNCTIONS.contains(base) {
            self.push(IssueCode::BlockedFunc, format!("function {full} is not allowed"));
        }
    }

    fn check_window_spec(&mut self, spec: &WindowSpec) {
        for expr in &spec.partition_by {
            self.check_expr(expr);
        }
        for item in &spec.order_by {
            self.check_expr(&item.expr);
        }
        if let Some(frame) = &spec.window_frame {
            self.check_frame_bound(&frame.start_bound);
            if let Some(end) = &frame.end_bound {
                self.check_frame_bound(end);
            }
        }
    }

    fn check_frame_bound(&mut self, bound: &WindowFrameBound) {
        if let WindowFrameBound::Preceding(Some(expr)) | WindowFrameBound::Following(Some(expr)) =
            bound
        {
            self.check_expr(expr);
        }
    }
}

fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Join(constraint)
        | JoinOperator::Inner(constraint)
        | JoinOperator::Left(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::Right(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint)
        | JoinOperator::Semi(constraint)
        | JoinOperator::LeftSemi(constraint)
        | JoinOperator::RightSemi(constraint)
        | JoinOperator::Anti(constraint)
        | JoinOperator::LeftAnti(constraint)
        | JoinOperator::RightAnti(constraint) => Some(constraint),
        JoinOperator::AsOf { constraint, .. } => Some(constraint),
        _ => None,
    }
}
