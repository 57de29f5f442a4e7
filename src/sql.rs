use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHost {
        slug: String,
        email: Option<String>,
    },
    DeleteHost {
        slug: String,
    },
    InsertBooking {
        slug: String,
        start: Ms,
        end: Ms,
        guest: Guest,
    },
    InsertBlock {
        slug: String,
        start: Ms,
        end: Ms,
    },
    DeleteBlock {
        id: Ulid,
    },
    SelectAvailability {
        slug: String,
        start: Ms,
        end: Ms,
    },
    SelectHosts,
    SelectBlocks {
        slug: String,
    },
    SelectBookings {
        slug: String,
    },
}

/// Row shape a statement produces, known before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSet {
    Availability,
    Hosts,
    Blocks,
    Bookings,
}

impl Command {
    pub fn row_set(&self) -> Option<RowSet> {
        match self {
            Command::InsertHost { .. } | Command::SelectHosts => Some(RowSet::Hosts),
            Command::InsertBooking { .. } | Command::SelectBookings { .. } => Some(RowSet::Bookings),
            Command::InsertBlock { .. } | Command::SelectBlocks { .. } => Some(RowSet::Blocks),
            Command::SelectAvailability { .. } => Some(RowSet::Availability),
            Command::DeleteHost { .. } | Command::DeleteBlock { .. } => None,
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(stmts.swap_remove(0)),
        n => Err(SqlError::Unsupported(format!("{n} statements in one query"))),
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row shape of a statement that may still contain `$n` placeholders.
/// Used to describe prepared statements before their parameters are bound.
pub fn describe_sql(sql: &str) -> Option<RowSet> {
    let table = match parse_statement(sql).ok()? {
        Statement::Insert(insert) => insert_table_name(&insert).ok()?,
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok()?,
            _ => return None,
        },
        _ => return None,
    };
    match table.as_str() {
        "availability" => Some(RowSet::Availability),
        "hosts" => Some(RowSet::Hosts),
        "blocks" => Some(RowSet::Blocks),
        "bookings" => Some(RowSet::Bookings),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Named VALUES of a single-row INSERT. Without a column list, values bind to
/// `default_columns` in order.
struct InsertRow {
    table: &'static str,
    fields: Vec<(String, Expr)>,
}

impl InsertRow {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| expr)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

const HOST_COLUMNS: &[&str] = &["slug", "email"];
const BOOKING_COLUMNS: &[&str] = &["slug", "start", "end", "guest_name", "guest_email", "note"];
const BLOCK_COLUMNS: &[&str] = &["slug", "start", "end"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "hosts" => {
            let row = insert_row(insert, "hosts", HOST_COLUMNS)?;
            Ok(Command::InsertHost {
                slug: parse_string(row.require("slug")?)?,
                email: row.get("email").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                slug: parse_string(row.require("slug")?)?,
                start: parse_ts(row.require("start")?)?,
                end: parse_ts(row.require("end")?)?,
                guest: Guest {
                    name: parse_string(row.require("guest_name")?)?,
                    email: parse_string(row.require("guest_email")?)?,
                    note: row.get("note").map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        "blocks" => {
            let row = insert_row(insert, "blocks", BLOCK_COLUMNS)?;
            Ok(Command::InsertBlock {
                slug: parse_string(row.require("slug")?)?,
                start: parse_ts(row.require("start")?)?,
                end: parse_ts(row.require("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<InsertRow, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() && !(insert.columns.is_empty() && values.len() < columns.len()) {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    for (i, column) in columns.iter().enumerate() {
        if !default_columns.contains(&column.as_str()) {
            return Err(SqlError::UnknownColumn(table, column.clone()));
        }
        if columns[..i].contains(column) {
            return Err(SqlError::DuplicateColumn(table, column.clone()));
        }
    }
    Ok(InsertRow {
        table,
        fields: columns.into_iter().zip(values).collect(),
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "blocks" => {
            let id = extract_where_eq(&delete.selection, "id")?;
            Ok(Command::DeleteBlock { id: parse_ulid(id)? })
        }
        "hosts" => {
            let slug = extract_where_eq(&delete.selection, "slug")?;
            Ok(Command::DeleteHost { slug: parse_string(slug)? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Default)]
struct Filters {
    slug: Option<String>,
    start: Option<Ms>,
    end: Option<Ms>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            slug: filters.slug.ok_or(SqlError::MissingFilter("slug"))?,
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "hosts" => Ok(Command::SelectHosts),
        "blocks" => Ok(Command::SelectBlocks {
            slug: filters.slug.ok_or(SqlError::MissingFilter("slug"))?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            slug: filters.slug.ok_or(SqlError::MissingFilter("slug"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("slug") {
                    filters.slug = Some(parse_string(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(parse_ts(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(parse_ts(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_eq<'a>(selection: &'a Option<Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => Ok(right),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

/// A timestamp: integer Unix milliseconds, or an ISO-8601 string. Strings
/// without an offset are taken as UTC.
fn parse_ts(expr: &Expr) -> Result<Ms, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_ts(expr).map(|ms| -ms);
    }
    match extract_value(expr) {
        Some(Value::Number(n, _)) => n
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad timestamp {n}: {e}"))),
        Some(Value::SingleQuotedString(s)) => parse_ts_str(s),
        Some(value) => Err(SqlError::Parse(format!("expected timestamp, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

pub fn parse_ts_str(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    Err(SqlError::Parse(format!("bad timestamp: {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    DuplicateColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::DuplicateColumn(t, c) => write!(f, "{t}: column {c} given twice"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
