use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{self, ChairtimeAuthSource};
use crate::catalog::{CatalogError, CatalogService};
use crate::engine::{EngineError, Slot};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::{Tenant, TenantManager};

pub struct ChairtimeHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ChairtimeQueryParser>,
}

impl ChairtimeHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ChairtimeQueryParser),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Caller> {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        auth::caller_from_user(user).ok_or_else(|| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            user_error("28000", format!("unknown user {user:?}: expected admin or a customer ULID"))
        })
    }

    /// Execute one parsed statement, recording query metrics.
    async fn run(&self, tenant: &Tenant, caller: Caller, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(tenant, caller, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, tenant: &Tenant, caller: Caller, cmd: Command) -> PgWireResult<Response> {
        if cmd.requires_admin() && !caller.is_admin() {
            return Err(user_error("42501", "permission denied: administrator only"));
        }
        let engine = &tenant.engine;

        match cmd {
            Command::UpsertStylist { id, name, active } => {
                if engine.get_stylist(&id).is_some() {
                    engine
                        .update_stylist(id, StylistPatch { name, active })
                        .await
                        .map_err(engine_err)?;
                } else {
                    engine.create_stylist(id, name).await.map_err(engine_err)?;
                    if active == Some(false) {
                        engine
                            .update_stylist(id, StylistPatch { name: None, active })
                            .await
                            .map_err(engine_err)?;
                    }
                }
                Ok(inserted())
            }
            Command::UpsertWindow(window) => {
                match engine.get_window(window.id).await {
                    Ok(existing) => {
                        if existing.stylist_id != window.stylist_id || existing.day != window.day {
                            return Err(user_error(
                                "22023",
                                format!("window {}: stylist and day_of_week cannot change", window.id),
                            ));
                        }
                        engine
                            .update_window(window.id, window.span, window.active)
                            .await
                            .map_err(engine_err)?;
                    }
                    Err(EngineError::NotFound(_)) => engine.add_window(window).await.map_err(engine_err)?,
                    Err(e) => return Err(engine_err(e)),
                }
                Ok(inserted())
            }
            Command::DeleteWindow { id } => {
                engine.remove_window(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::UpsertService(service) => {
                tenant.directory.upsert_service(service).map_err(catalog_err)?;
                Ok(inserted())
            }
            Command::UpsertCustomer(customer) => {
                tenant.directory.upsert_customer(customer).map_err(catalog_err)?;
                Ok(inserted())
            }
            Command::InsertBooking(req) => {
                engine.create_booking(caller, req).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SetBookingStatus { id, status } => {
                engine.update_status(caller, id, status).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(caller, id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectSlots {
                stylist_id,
                date,
                duration,
                granularity,
            } => {
                let slots = engine
                    .compute_slots(stylist_id, date, duration, granularity)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<_> = slots.map(|slot| slot_row(&schema, slot, duration)).collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSchedules { stylist_id } => {
                let windows = engine.active_windows(stylist_id).await.map_err(engine_err)?;
                let schema = Arc::new(schedules_schema());
                let rows: Vec<_> = windows.iter().map(|w| window_row(&schema, w)).collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectStylists => {
                let stylists = engine.list_stylists().await;
                let schema = Arc::new(stylists_schema());
                let rows: Vec<_> = stylists.iter().map(|s| stylist_row(&schema, s)).collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectServices => {
                let services = tenant.directory.services();
                let schema = Arc::new(services_schema());
                let rows: Vec<_> = services.iter().map(|s| service_row(&schema, s)).collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBooking { id } => {
                let reservation = engine.get_booking(caller, id).await.map_err(engine_err)?;
                Ok(bookings_response(&[reservation]))
            }
            Command::SelectBookings(filter) => {
                let found = engine.list_bookings(caller, filter).await.map_err(engine_err)?;
                Ok(bookings_response(&found))
            }
            Command::SelectCustomerBookings { customer_id, upcoming } => {
                let found = engine
                    .customer_bookings(caller, customer_id, upcoming)
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(&found))
            }
            Command::SelectAgenda { stylist_id, date } => {
                let found = engine.stylist_bookings(stylist_id, date).await.map_err(engine_err)?;
                Ok(bookings_response(&found))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

// ── Result schemas and rows ──────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("available", Type::BOOL),
    ]
}

fn schedules_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("stylist_id", Type::VARCHAR),
        field("day_of_week", Type::INT4),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn stylists_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("price", Type::INT8),
        field("duration", Type::INT4),
        field("active", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("customer_id", Type::VARCHAR),
        field("stylist_id", Type::VARCHAR),
        field("service_ids", Type::VARCHAR),
        field("services", Type::VARCHAR),
        field("booking_date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("total_duration", Type::INT4),
        field("total_price", Type::INT8),
        field("status", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("customer_email", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

/// Result columns for a statement, from its target table. Used by Describe,
/// where `$n` placeholders keep the statement from being fully parsed.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_once(" from ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .unwrap_or_default();
    match table {
        "slots" => slots_schema(),
        "schedules" => schedules_schema(),
        "stylists" => stylists_schema(),
        "services" => services_schema(),
        "bookings" | "customer_bookings" | "agenda" => bookings_schema(),
        _ => vec![],
    }
}

fn to_i32(v: Minutes) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn slot_row(schema: &Arc<Vec<FieldInfo>>, slot: Slot, duration: Minutes) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&slot.start.to_string())?;
    encoder.encode_field(&slot.start.checked_add(duration).map(|t| t.to_string()))?;
    encoder.encode_field(&slot.available)?;
    Ok(encoder.take_row())
}

fn window_row(schema: &Arc<Vec<FieldInfo>>, w: &WeeklyWindow) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&w.id.to_string())?;
    encoder.encode_field(&w.stylist_id.to_string())?;
    encoder.encode_field(&i32::from(w.day.number()))?;
    encoder.encode_field(&w.start().to_string())?;
    encoder.encode_field(&w.end().to_string())?;
    encoder.encode_field(&w.active)?;
    Ok(encoder.take_row())
}

fn stylist_row(schema: &Arc<Vec<FieldInfo>>, s: &StylistInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.name)?;
    encoder.encode_field(&s.active)?;
    Ok(encoder.take_row())
}

fn service_row(schema: &Arc<Vec<FieldInfo>>, s: &CatalogService) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.name)?;
    encoder.encode_field(&to_i64(s.price))?;
    encoder.encode_field(&to_i32(s.duration))?;
    encoder.encode_field(&s.active)?;
    Ok(encoder.take_row())
}

fn booking_row(schema: &Arc<Vec<FieldInfo>>, r: &Reservation) -> PgWireResult<DataRow> {
    let service_ids: Vec<String> = r.services.iter().map(|s| s.id.to_string()).collect();
    let service_names: Vec<&str> = r.services.iter().map(|s| s.name.as_str()).collect();

    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.customer_id.to_string())?;
    encoder.encode_field(&r.stylist_id.to_string())?;
    encoder.encode_field(&service_ids.join(","))?;
    encoder.encode_field(&service_names.join(", "))?;
    encoder.encode_field(&r.date.to_string())?;
    encoder.encode_field(&r.start.to_string())?;
    encoder.encode_field(&r.end.to_string())?;
    encoder.encode_field(&to_i32(r.total_duration))?;
    encoder.encode_field(&to_i64(r.total_price))?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&r.customer_name)?;
    encoder.encode_field(&r.customer_phone)?;
    encoder.encode_field(&r.customer_email)?;
    encoder.encode_field(&r.created_at)?;
    Ok(encoder.take_row())
}

fn bookings_response(reservations: &[Reservation]) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<_> = reservations.iter().map(|r| booking_row(&schema, r)).collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for ChairtimeHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let caller = self.resolve_caller(client)?;
        let cmds = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run(&tenant, caller, cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairtimeQueryParser;

#[async_trait]
impl QueryParser for ChairtimeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairtimeHandler {
    type Statement = String;
    type QueryParser = ChairtimeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let caller = self.resolve_caller(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&tenant, caller, cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_literal = !in_literal;
            i += 1;
        } else if bytes[i] == b'$' && !in_literal {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// One left-to-right pass over the statement text. Bound values are quoted
/// and emitted as-is, never scanned again; `$n` inside a quoted literal or
/// past the bound parameters stays untouched.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let bound = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                if let Some(param) = bound {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(text) => {
                            out.push('\'');
                            out.push_str(&text.replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairtimeFactory {
    handler: Arc<ChairtimeHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<ChairtimeAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ChairtimeFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, admin_password: String) -> Self {
        let auth_source = ChairtimeAuthSource::new(password, admin_password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ChairtimeHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairtimeFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<ChairtimeFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: impl Into<String>) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message.into())))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotUnavailable { .. } => "23P01",
        EngineError::AccessDenied(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidTransition(_) => "55000",
        EngineError::WalError(_) => "58030",
        EngineError::InvalidService(_)
        | EngineError::InvalidStylist(_)
        | EngineError::DuplicateWindow { .. }
        | EngineError::InvalidInput(_)
        | EngineError::LimitExceeded(_) => "22023",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn catalog_err(e: CatalogError) -> PgWireError {
    let code = match e {
        CatalogError::Invalid(_) => "22023",
        CatalogError::Io(_) | CatalogError::Json(_) => "58030",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
