use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream;
use futures::Sink;
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

use crate::auth::{Credentials, Principal, SlotKeeperAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, RowSet};
use crate::tenant::TenantManager;

pub struct SlotKeeperHandler {
    tenant_manager: Arc<TenantManager>,
    credentials: Arc<Credentials>,
    query_parser: Arc<SlotKeeperQueryParser>,
}

impl SlotKeeperHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, credentials: Arc<Credentials>) -> Self {
        Self {
            tenant_manager,
            credentials,
            query_parser: Arc::new(SlotKeeperQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    fn resolve_principal<C: ClientInfo>(&self, client: &C) -> Principal {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        self.credentials.principal_for(user)
    }

    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let principal = self.resolve_principal(client);
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(&engine, &principal, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        principal: &Principal,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertHost { slug, email } => {
                let host = engine
                    .create_host(principal, &slug, email)
                    .await
                    .map_err(engine_err)?;
                query_response(RowSet::Hosts, vec![host_row(&host)])
            }
            Command::DeleteHost { slug } => {
                engine.delete_host(principal, &slug).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { slug, start, end, guest } => {
                let booking = engine
                    .create_booking(&slug, start, end, guest)
                    .await
                    .map_err(engine_err)?;
                query_response(RowSet::Bookings, vec![booking_row(&booking)])
            }
            Command::InsertBlock { slug, start, end } => {
                let block = engine
                    .set_block(principal, &slug, start, end)
                    .await
                    .map_err(engine_err)?;
                query_response(RowSet::Blocks, vec![block_row(&block)])
            }
            Command::DeleteBlock { id } => {
                engine.delete_block(principal, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability { slug, start, end } => {
                let slots = engine
                    .get_availability(&slug, start, end)
                    .await
                    .map_err(engine_err)?;
                query_response(RowSet::Availability, slots.iter().map(slot_row).collect())
            }
            Command::SelectHosts => {
                let hosts = engine.list_hosts().await;
                query_response(RowSet::Hosts, hosts.iter().map(host_row).collect())
            }
            Command::SelectBlocks { slug } => {
                let blocks = engine.get_blocks(principal, &slug).await.map_err(engine_err)?;
                query_response(RowSet::Blocks, blocks.iter().map(block_row).collect())
            }
            Command::SelectBookings { slug } => {
                let bookings = engine
                    .get_bookings(principal, &slug)
                    .await
                    .map_err(engine_err)?;
                query_response(RowSet::Bookings, bookings.iter().map(booking_row).collect())
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

/// Timestamps go out as RFC 3339 UTC with millisecond precision.
pub fn format_ts(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

fn columns(row_set: RowSet) -> &'static [&'static str] {
    match row_set {
        RowSet::Availability => &["id", "kind", "start", "end", "label", "guest_name", "guest_email"],
        RowSet::Hosts => &["id", "slug", "email", "created_at"],
        RowSet::Blocks => &["id", "host_id", "start", "end", "kind"],
        RowSet::Bookings => &[
            "id",
            "host_id",
            "start",
            "end",
            "guest_name",
            "guest_email",
            "note",
            "status",
            "created_at",
        ],
    }
}

fn schema(row_set: RowSet) -> Vec<FieldInfo> {
    columns(row_set)
        .iter()
        .map(|name| FieldInfo::new(name.to_string(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    sql::describe_sql(sql).map(schema).unwrap_or_default()
}

type TextRow = Vec<Option<String>>;

fn slot_row(slot: &AvailabilitySlot) -> TextRow {
    vec![
        Some(slot.id.to_string()),
        Some(slot.kind.as_str().to_string()),
        Some(format_ts(slot.start)),
        Some(format_ts(slot.end)),
        Some(slot.label.clone()),
        slot.guest_name.clone(),
        slot.guest_email.clone(),
    ]
}

fn host_row(host: &HostInfo) -> TextRow {
    vec![
        Some(host.id.to_string()),
        Some(host.slug.clone()),
        host.email.clone(),
        Some(format_ts(host.created_at)),
    ]
}

fn block_row(block: &BlockInfo) -> TextRow {
    vec![
        Some(block.id.to_string()),
        Some(block.host_id.to_string()),
        Some(format_ts(block.start)),
        Some(format_ts(block.end)),
        Some(block.kind.as_str().to_string()),
    ]
}

fn booking_row(booking: &BookingInfo) -> TextRow {
    vec![
        Some(booking.id.to_string()),
        Some(booking.host_id.to_string()),
        Some(format_ts(booking.start)),
        Some(format_ts(booking.end)),
        Some(booking.guest.name.clone()),
        Some(booking.guest.email.clone()),
        booking.guest.note.clone(),
        Some(booking.status.as_str().to_string()),
        Some(format_ts(booking.created_at)),
    ]
}

fn query_response(row_set: RowSet, rows: Vec<TextRow>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema(row_set));
    let rows: Vec<PgWireResult<DataRow>> = rows
        .into_iter()
        .map(|fields| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for field in &fields {
                encoder.encode_field(field)?;
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

#[async_trait]
impl SimpleQueryHandler for SlotKeeperHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotKeeperQueryParser;

#[async_trait]
impl QueryParser for SlotKeeperQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotKeeperHandler {
    type Statement = String;
    type QueryParser = SlotKeeperQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    // Single pass over the statement text; substituted values are never rescanned
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            result.push_str(&sql[copied..i]);
            match param {
                Some(text) => {
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end.max(i + 1);
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotKeeperFactory {
    handler: Arc<SlotKeeperHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotKeeperAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotKeeperFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, credentials: Arc<Credentials>) -> Self {
        let auth_source = SlotKeeperAuthSource::new(credentials.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotKeeperHandler::new(tenant_manager, credentials)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotKeeperFactory {
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
    tenant_manager: Arc<TenantManager>,
    credentials: Arc<Credentials>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotKeeperFactory::new(tenant_manager, credentials));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_client_error() {
        tracing::debug!(kind = e.kind(), "request rejected: {e}");
    } else {
        tracing::error!(kind = e.kind(), "request failed: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
