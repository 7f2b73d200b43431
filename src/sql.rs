use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SelectItem, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::catalog::{CatalogService, CustomerProfile};
use crate::engine::BookingFilter;
use crate::lifecycle::BookingStatus;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Create the stylist, or patch it when the id already exists.
    UpsertStylist {
        id: Ulid,
        name: Option<String>,
        active: Option<bool>,
    },
    /// Add the window, or replace its span/active flag when the id exists.
    UpsertWindow(WeeklyWindow),
    DeleteWindow {
        id: Ulid,
    },
    UpsertService(CatalogService),
    UpsertCustomer(CustomerProfile),
    InsertBooking(BookingRequest),
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectSlots {
        stylist_id: Ulid,
        date: chrono::NaiveDate,
        duration: Minutes,
        granularity: Option<Minutes>,
    },
    SelectSchedules {
        stylist_id: Ulid,
    },
    SelectStylists,
    SelectServices,
    SelectBooking {
        id: Ulid,
    },
    SelectBookings(BookingFilter),
    SelectCustomerBookings {
        customer_id: Ulid,
        upcoming: bool,
    },
    SelectAgenda {
        stylist_id: Ulid,
        date: chrono::NaiveDate,
    },
}

impl Command {
    /// Commands only the administrator may run. Booking ownership is
    /// enforced by the engine itself.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::UpsertStylist { .. }
                | Command::UpsertWindow(_)
                | Command::DeleteWindow { .. }
                | Command::UpsertService(_)
                | Command::UpsertCustomer(_)
                | Command::SetBookingStatus { .. }
                | Command::SelectAgenda { .. }
        )
    }
}

/// Parse exactly one statement (extended query protocol).
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    parse_statement(&stmts[0])
}

/// Parse a `;`-separated batch (simple query protocol). Nothing runs if any
/// statement fails to parse.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    parse_statements(sql)?.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts)
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let optional = |i: usize| values.get(i).filter(|e| !is_null(e));

    match table.as_str() {
        "stylists" => {
            require_arity("stylists", &values, 2)?;
            Ok(Command::UpsertStylist {
                id: parse_ulid(&values[0])?,
                name: optional(1).map(parse_text).transpose()?,
                active: optional(2).map(parse_bool).transpose()?,
            })
        }
        "schedules" => {
            require_arity("schedules", &values, 5)?;
            let start = parse_time(&values[3])?;
            let end = parse_time(&values[4])?;
            if start >= end {
                return Err(SqlError::Parse(format!("window start {start} must be before end {end}")));
            }
            Ok(Command::UpsertWindow(WeeklyWindow {
                id: parse_ulid(&values[0])?,
                stylist_id: parse_ulid(&values[1])?,
                day: parse_day(&values[2])?,
                span: Span::between(start, end),
                active: optional(5).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "services" => {
            require_arity("services", &values, 4)?;
            Ok(Command::UpsertService(CatalogService {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                price: parse_u64(&values[2])?,
                duration: parse_u32(&values[3])?,
                active: optional(4).map(parse_bool).transpose()?.unwrap_or(true),
            }))
        }
        "customers" => {
            require_arity("customers", &values, 4)?;
            Ok(Command::UpsertCustomer(CustomerProfile {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                phone: optional(2).map(parse_text).transpose()?,
                email: parse_text(&values[3])?,
            }))
        }
        "bookings" => {
            require_arity("bookings", &values, 6)?;
            Ok(Command::InsertBooking(BookingRequest {
                id: parse_ulid(&values[0])?,
                customer_id: parse_ulid(&values[1])?,
                stylist_id: parse_ulid(&values[2])?,
                service_ids: parse_ulid_list(&values[3])?,
                date: parse_date_expr(&values[4])?,
                start: parse_time(&values[5])?,
                notes: optional(6).map(parse_text).transpose()?.unwrap_or_default(),
                contact: ContactOverrides {
                    name: optional(7).map(parse_text).transpose()?,
                    phone: optional(8).map(parse_text).transpose()?,
                    email: optional(9).map(parse_text).transpose()?,
                },
            }))
        }
        "booking_status" => {
            require_arity("booking_status", &values, 2)?;
            Ok(Command::SetBookingStatus {
                id: parse_ulid(&values[0])?,
                status: parse_status(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "schedules" => Ok(Command::DeleteWindow { id }),
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if !select
        .projection
        .iter()
        .all(|item| matches!(item, SelectItem::Wildcard(_)))
    {
        return Err(SqlError::Unsupported("only SELECT * is supported".into()));
    }
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut predicates = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut predicates)?;
    }
    let mut filters = Filters { table: table.clone(), predicates };

    let cmd = match table.as_str() {
        "slots" => Command::SelectSlots {
            stylist_id: filters.required("stylist_id", parse_ulid)?,
            date: filters.required("booking_date", parse_date_expr)?,
            duration: filters.required("duration", parse_u32)?,
            granularity: filters.optional("granularity", parse_u32)?,
        },
        "schedules" => Command::SelectSchedules {
            stylist_id: filters.required("stylist_id", parse_ulid)?,
        },
        "stylists" => Command::SelectStylists,
        "services" => Command::SelectServices,
        "agenda" => Command::SelectAgenda {
            stylist_id: filters.required("stylist_id", parse_ulid)?,
            date: filters.required("booking_date", parse_date_expr)?,
        },
        "customer_bookings" => Command::SelectCustomerBookings {
            customer_id: filters.required("customer_id", parse_ulid)?,
            upcoming: filters.optional("upcoming", parse_bool)?.unwrap_or(false),
        },
        "bookings" => match filters.optional("id", parse_ulid)? {
            Some(id) => Command::SelectBooking { id },
            None => Command::SelectBookings(parse_booking_filter(&mut filters)?),
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

fn parse_booking_filter(filters: &mut Filters) -> Result<BookingFilter, SqlError> {
    let mut filter = BookingFilter {
        status: filters.optional("status", parse_status)?,
        stylist_id: filters.optional("stylist_id", parse_ulid)?,
        customer_id: filters.optional("customer_id", parse_ulid)?,
        upcoming: filters.optional("upcoming", parse_bool)?.unwrap_or(false),
        limit: filters.optional("page_size", parse_u32)?.map(|n| n as usize),
        offset: filters.optional("page_offset", parse_u32)?.unwrap_or(0) as usize,
        ..Default::default()
    };
    if let Some(day) = filters.optional("booking_date", parse_date_expr)? {
        filter.from = Some(day);
        filter.to = Some(day);
    }
    if let Some(from) = filters.take_cmp("booking_date", CmpOp::GtEq, parse_date_expr)? {
        filter.from = Some(from);
    }
    if let Some(to) = filters.take_cmp("booking_date", CmpOp::LtEq, parse_date_expr)? {
        filter.to = Some(to);
    }
    Ok(filter)
}

// ── WHERE clause ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    GtEq,
    LtEq,
}

#[derive(Debug)]
struct Predicate {
    column: String,
    op: CmpOp,
    value: Expr,
}

/// Flatten `a AND b AND ...` into column comparisons.
fn collect_predicates(expr: &Expr, out: &mut Vec<Predicate>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_predicates(left, out)?;
                    return collect_predicates(right, out);
                }
                ast::BinaryOperator::Eq => CmpOp::Eq,
                ast::BinaryOperator::GtEq => CmpOp::GtEq,
                ast::BinaryOperator::LtEq => CmpOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("comparison on {left}")))?;
            out.push(Predicate { column, op, value: (**right).clone() });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

/// Predicates still to be consumed. Anything left over when the table's
/// parser is done is an unknown filter.
struct Filters {
    table: String,
    predicates: Vec<Predicate>,
}

impl Filters {
    fn take_cmp<T>(
        &mut self,
        column: &'static str,
        op: CmpOp,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        let Some(pos) = self.predicates.iter().position(|p| p.column == column && p.op == op) else {
            return Ok(None);
        };
        let predicate = self.predicates.remove(pos);
        parse(&predicate.value).map(Some)
    }

    fn optional<T>(
        &mut self,
        column: &'static str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.take_cmp(column, CmpOp::Eq, parse)
    }

    fn required<T>(
        &mut self,
        column: &'static str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<T, SqlError> {
        self.optional(column, parse)?.ok_or(SqlError::MissingFilter(column))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.predicates.first() {
            None => Ok(()),
            Some(p) => Err(SqlError::Unsupported(format!("filter on {}.{}", self.table, p.column))),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn require_arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// String or bare number literal as text.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.as_str()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

/// `'id1,id2,...'`, order preserved.
fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    literal_text(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))))
        .collect()
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_time(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    parse_text(expr)?
        .parse()
        .map_err(|e: ParseTimeError| SqlError::Parse(e.to_string()))
}

fn parse_date_expr(expr: &Expr) -> Result<chrono::NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

fn parse_day(expr: &Expr) -> Result<DayOfWeek, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v)
        .ok()
        .and_then(DayOfWeek::new)
        .ok_or_else(|| SqlError::Parse(format!("day_of_week {v} out of range 0..=6")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_text(expr)?
        .parse()
        .map_err(|e: crate::lifecycle::ParseStatusError| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn date(s: &str) -> chrono::NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_insert_stylist() {
        let cmd = parse_sql(&format!("INSERT INTO stylists (id, name) VALUES ('{A}', 'Ann')")).unwrap();
        assert_eq!(cmd, Command::UpsertStylist { id: ulid(A), name: Some("Ann".into()), active: None });

        let cmd = parse_sql(&format!("INSERT INTO stylists VALUES ('{A}', NULL, false)")).unwrap();
        assert_eq!(cmd, Command::UpsertStylist { id: ulid(A), name: None, active: Some(false) });
        assert!(cmd.requires_admin());
    }

    #[test]
    fn parse_insert_schedule() {
        let sql = format!(
            "INSERT INTO schedules (id, stylist_id, day_of_week, start_time, end_time) VALUES ('{A}', '{B}', 1, '09:00', '17:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertWindow(w) => {
                assert_eq!(w.id, ulid(A));
                assert_eq!(w.stylist_id, ulid(B));
                assert_eq!(w.day.number(), 1);
                assert_eq!(w.start().to_string(), "09:00");
                assert_eq!(w.end().to_string(), "17:00");
                assert!(w.active);
            }
            other => panic!("expected UpsertWindow, got {other:?}"),
        }

        let inactive = format!("INSERT INTO schedules VALUES ('{A}', '{B}', 6, '09:00', '12:00', false)");
        assert!(matches!(parse_sql(&inactive).unwrap(), Command::UpsertWindow(w) if !w.active));
    }

    #[test]
    fn parse_insert_schedule_rejects_bad_values() {
        for (day, start, end) in [("7", "09:00", "17:00"), ("1", "17:00", "09:00"), ("1", "9:00", "17:00"), ("1", "09:00", "24:00")] {
            let sql = format!("INSERT INTO schedules VALUES ('{A}', '{B}', {day}, '{start}', '{end}')");
            assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))), "{day} {start} {end}");
        }
    }

    #[test]
    fn parse_delete_schedule() {
        let cmd = parse_sql(&format!("DELETE FROM schedules WHERE id = '{A}'")).unwrap();
        assert_eq!(cmd, Command::DeleteWindow { id: ulid(A) });
    }

    #[test]
    fn parse_insert_service_and_customer() {
        let cmd = parse_sql(&format!("INSERT INTO services VALUES ('{A}', 'Cut', 800, 30)")).unwrap();
        assert_eq!(
            cmd,
            Command::UpsertService(CatalogService { id: ulid(A), name: "Cut".into(), price: 800, duration: 30, active: true })
        );

        let cmd = parse_sql(&format!("INSERT INTO customers VALUES ('{B}', 'Mei', NULL, 'mei@example.com')")).unwrap();
        assert_eq!(
            cmd,
            Command::UpsertCustomer(CustomerProfile { id: ulid(B), name: "Mei".into(), phone: None, email: "mei@example.com".into() })
        );
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!(
            "INSERT INTO bookings (id, customer_id, stylist_id, service_ids, booking_date, start_time) \
             VALUES ('{A}', '{B}', '{C}', '{A}, {B}', '2025-06-02', '14:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.id, ulid(A));
                assert_eq!(req.customer_id, ulid(B));
                assert_eq!(req.stylist_id, ulid(C));
                assert_eq!(req.service_ids, vec![ulid(A), ulid(B)]);
                assert_eq!(req.date, date("2025-06-02"));
                assert_eq!(req.start.to_string(), "14:00");
                assert_eq!(req.notes, "");
                assert_eq!(req.contact, ContactOverrides::default());
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_overrides() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{A}', '{B}', '{C}', '{A}', '2025-06-02', '09:30', 'it''s short', NULL, '0912', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.notes, "it's short");
                assert_eq!(req.contact.name, None);
                assert_eq!(req.contact.phone.as_deref(), Some("0912"));
                assert_eq!(req.contact.email, None);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_rejects_bad_date_and_arity() {
        let bad_date = format!("INSERT INTO bookings VALUES ('{A}', '{B}', '{C}', '{A}', '2025-13-02', '09:30')");
        assert!(matches!(parse_sql(&bad_date), Err(SqlError::Parse(_))));
        let short = format!("INSERT INTO bookings VALUES ('{A}', '{B}', '{C}')");
        assert!(matches!(parse_sql(&short), Err(SqlError::WrongArity("bookings", 6, 3))));
    }

    #[test]
    fn parse_status_update_and_cancel() {
        let cmd = parse_sql(&format!("INSERT INTO booking_status VALUES ('{A}', 'confirmed')")).unwrap();
        assert_eq!(cmd, Command::SetBookingStatus { id: ulid(A), status: BookingStatus::Confirmed });
        assert!(cmd.requires_admin());

        let bad = format!("INSERT INTO booking_status VALUES ('{A}', 'done')");
        assert!(matches!(parse_sql(&bad), Err(SqlError::Parse(_))));

        let cmd = parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")).unwrap();
        assert_eq!(cmd, Command::CancelBooking { id: ulid(A) });
        assert!(!cmd.requires_admin());
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!("SELECT * FROM slots WHERE stylist_id = '{A}' AND booking_date = '2025-06-02' AND duration = 60");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots { stylist_id: ulid(A), date: date("2025-06-02"), duration: 60, granularity: None }
        );

        let sql = format!(
            "SELECT * FROM slots WHERE (stylist_id = '{A}' AND booking_date = '2025-06-02') AND duration = '45' AND granularity = 15"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots { duration: 45, granularity: Some(15), .. }
        ));
    }

    #[test]
    fn parse_select_slots_requires_filters() {
        let sql = format!("SELECT * FROM slots WHERE stylist_id = '{A}' AND duration = 60");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("booking_date"))));
        let sql = format!("SELECT * FROM slots WHERE stylist_id = '{A}' AND booking_date = '2025-06-02' AND duration = 60 AND colour = 'red'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
        let sql = format!("SELECT * FROM slots WHERE stylist_id = '{A}' OR duration = 60");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_simple_tables() {
        assert_eq!(parse_sql("SELECT * FROM stylists").unwrap(), Command::SelectStylists);
        assert_eq!(parse_sql("SELECT * FROM services").unwrap(), Command::SelectServices);
        assert_eq!(
            parse_sql(&format!("SELECT * FROM schedules WHERE stylist_id = '{A}'")).unwrap(),
            Command::SelectSchedules { stylist_id: ulid(A) }
        );
        assert!(matches!(parse_sql("SELECT id FROM stylists"), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_bookings() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::SelectBooking { id: ulid(A) }
        );
        assert_eq!(parse_sql("SELECT * FROM bookings").unwrap(), Command::SelectBookings(BookingFilter::default()));

        let sql = format!(
            "SELECT * FROM bookings WHERE status = 'pending' AND booking_date >= '2025-06-01' AND booking_date <= '2025-06-30' \
             AND stylist_id = '{B}' AND page_size = 10 AND page_offset = 20"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings(BookingFilter {
                status: Some(BookingStatus::Pending),
                from: Some(date("2025-06-01")),
                to: Some(date("2025-06-30")),
                stylist_id: Some(ulid(B)),
                limit: Some(10),
                offset: 20,
                ..Default::default()
            })
        );

        let sql = format!("SELECT * FROM bookings WHERE customer_id = '{C}' AND upcoming = true AND booking_date = '2025-06-02'");
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings(f) => {
                assert_eq!(f.customer_id, Some(ulid(C)));
                assert!(f.upcoming);
                assert_eq!(f.from, Some(date("2025-06-02")));
                assert_eq!(f.to, Some(date("2025-06-02")));
            }
            other => panic!("expected SelectBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_agenda_and_customer_bookings() {
        let cmd = parse_sql(&format!("SELECT * FROM agenda WHERE stylist_id = '{A}' AND booking_date = '2025-06-02'")).unwrap();
        assert_eq!(cmd, Command::SelectAgenda { stylist_id: ulid(A), date: date("2025-06-02") });
        assert!(cmd.requires_admin());

        let cmd = parse_sql(&format!("SELECT * FROM customer_bookings WHERE customer_id = '{B}' AND upcoming = 't'")).unwrap();
        assert_eq!(cmd, Command::SelectCustomerBookings { customer_id: ulid(B), upcoming: true });
    }

    #[test]
    fn parse_batch_keeps_order() {
        let sql = format!("INSERT INTO stylists VALUES ('{A}', 'Ann'); SELECT * FROM stylists;");
        let cmds = parse_batch(&sql).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::UpsertStylist { .. }));
        assert_eq!(cmds[1], Command::SelectStylists);

        let bad = format!("INSERT INTO stylists VALUES ('{A}', 'Ann'); SELECT * FROM slots");
        assert!(matches!(parse_batch(&bad), Err(SqlError::MissingFilter("stylist_id"))));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("SELEC * FROM x"), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql(&format!("INSERT INTO foobar VALUES ('{A}')")), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql(&format!("DELETE FROM stylists WHERE id = '{A}'")), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql("DELETE FROM bookings"), Err(SqlError::MissingFilter("id"))));
        assert!(matches!(parse_sql("UPDATE bookings SET status = 'confirmed'"), Err(SqlError::Unsupported(_))));
        assert!(matches!(parse_sql("SELECT 1; SELECT 2"), Err(SqlError::Unsupported(_))));
        let two_rows = format!("INSERT INTO stylists VALUES ('{A}', 'a'), ('{B}', 'b')");
        assert!(matches!(parse_sql(&two_rows), Err(SqlError::Unsupported(_))));
    }
}
