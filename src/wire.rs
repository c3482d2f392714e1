use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::CarshareAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct CarshareHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CarshareQueryParser>,
}

/// A booking joined with whatever the query knows about its vehicle and renter.
struct BookingRow {
    booking: Booking,
    owner_id: Option<Ulid>,
    vehicle: VehicleSummary,
    renter: Option<UserProfile>,
}

fn executed(tag: &str) -> PgWireResult<Vec<Response>> {
    Ok(vec![Response::Execution(Tag::new(tag).with_rows(1))])
}

impl CarshareHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CarshareQueryParser),
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

    /// Parse, execute and record request metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::RegisterUser {
                id,
                full_name,
                email,
            } => {
                engine
                    .register_user(id, full_name, email)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::ListVehicle {
                id,
                owner_id,
                price_per_day,
                availability,
                summary,
            } => {
                engine
                    .list_vehicle(id, owner_id, price_per_day, availability, summary)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::SetAvailability { id, availability } => {
                engine
                    .set_availability(id, availability)
                    .await
                    .map_err(engine_err)?;
                executed("UPDATE")
            }
            Command::CreateBooking {
                id,
                vehicle_id,
                renter_id,
                dates,
                total_price,
            } => {
                engine
                    .create_booking(id, vehicle_id, renter_id, &dates, total_price)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .update_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                executed("UPDATE")
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                executed("DELETE")
            }
            Command::SelectBookingsForRenter { renter_id } => {
                let rows = engine
                    .list_bookings_for_renter(renter_id)
                    .await
                    .into_iter()
                    .map(|r| BookingRow {
                        booking: r.booking,
                        owner_id: Some(r.owner_id),
                        vehicle: r.vehicle,
                        renter: None,
                    });
                booking_response(rows)
            }
            Command::SelectBookingsForOwner { owner_id } => {
                let rows = engine
                    .list_bookings_for_owner(owner_id)
                    .await
                    .into_iter()
                    .map(|r| BookingRow {
                        booking: r.booking,
                        owner_id: Some(owner_id),
                        vehicle: r.vehicle,
                        renter: r.renter,
                    });
                booking_response(rows)
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                let vehicle = engine.get_vehicle(booking.vehicle_id).await;
                let renter = engine.get_user(&booking.renter_id);
                let row = BookingRow {
                    owner_id: vehicle.as_ref().map(|v| v.owner_id),
                    vehicle: vehicle.map(|v| v.summary).unwrap_or_default(),
                    renter,
                    booking,
                };
                booking_response(std::iter::once(row))
            }
            Command::SelectAvailability {
                vehicle_id,
                from,
                to,
            } => {
                let dates = engine
                    .free_dates(vehicle_id, from, to)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let vid = vehicle_id.to_string();
                let rows: Vec<PgWireResult<_>> = dates
                    .into_iter()
                    .map(|date| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&vid)?;
                        encoder.encode_field(&date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::BeginJourney {
                booking_id,
                inspection,
            } => {
                engine
                    .begin_journey(booking_id, inspection)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::EndJourney {
                booking_id,
                inspection,
            } => {
                engine
                    .end_journey(booking_id, inspection)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::SelectJourney { booking_id } => {
                let record = engine.get_journey(booking_id).await.map_err(engine_err)?;
                let schema = Arc::new(journey_schema());
                let row = encode_journey(&schema, &record);
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(vec![row]),
                ))])
            }
            Command::InsertNotification {
                user_id,
                booking_id,
                message,
            } => {
                engine
                    .append_notification(user_id, booking_id, message)
                    .await
                    .map_err(engine_err)?;
                executed("INSERT")
            }
            Command::SelectNotifications { user_id } => {
                let notifications = engine.list_notifications(user_id).await;
                let schema = Arc::new(notification_schema());
                let rows: Vec<PgWireResult<_>> = notifications
                    .iter()
                    .map(|n| {
                        let vehicle_id = engine.get_vehicle_for_booking(&n.booking_id);
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&n.id.to_string())?;
                        encoder.encode_field(&n.user_id.to_string())?;
                        encoder.encode_field(&n.booking_id.to_string())?;
                        encoder.encode_field(&vehicle_id.map(|v| v.to_string()))?;
                        encoder.encode_field(&n.message)?;
                        encoder.encode_field(&n.is_read)?;
                        encoder.encode_field(&n.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::MarkNotificationRead { id } => {
                engine
                    .mark_notification_read(id)
                    .await
                    .map_err(engine_err)?;
                executed("UPDATE")
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("vehicle_id"),
        text_field("renter_id"),
        text_field("owner_id"),
        text_field("dates"),
        text_field("start_date"),
        text_field("end_date"),
        int_field("total_price"),
        text_field("status"),
        int_field("created_at"),
        text_field("make"),
        text_field("model"),
        text_field("location"),
        text_field("renter_name"),
        text_field("renter_email"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("vehicle_id"), text_field("date")]
}

fn journey_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("booking_id"),
        int_field("mileage_before"),
        text_field("notes_before"),
        text_field("media_before"),
        int_field("recorded_before"),
        int_field("mileage_after"),
        text_field("notes_after"),
        text_field("media_after"),
        int_field("recorded_after"),
    ]
}

fn notification_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("user_id"),
        text_field("booking_id"),
        text_field("vehicle_id"),
        text_field("message"),
        FieldInfo::new("is_read".into(), None, None, Type::BOOL, FieldFormat::Text),
        int_field("created_at"),
    ]
}

fn booking_response(rows: impl Iterator<Item = BookingRow>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = rows.map(|row| encode_booking(&schema, &row)).collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, row: &BookingRow) -> PgWireResult<DataRow> {
    let b = &row.booking;
    let dates = b
        .reserved_dates()
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.vehicle_id.to_string())?;
    encoder.encode_field(&b.renter_id.to_string())?;
    encoder.encode_field(&row.owner_id.map(|o| o.to_string()))?;
    encoder.encode_field(&dates)?;
    encoder.encode_field(&b.range.start.to_string())?;
    encoder.encode_field(&b.range.end.to_string())?;
    encoder.encode_field(&b.total_price)?;
    encoder.encode_field(&b.status.to_string())?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&row.vehicle.make)?;
    encoder.encode_field(&row.vehicle.model)?;
    encoder.encode_field(&row.vehicle.location)?;
    encoder.encode_field(&row.renter.as_ref().and_then(|r| r.full_name.clone()))?;
    encoder.encode_field(&row.renter.as_ref().and_then(|r| r.email.clone()))?;
    Ok(encoder.take_row())
}

fn media_json(media: &[String]) -> PgWireResult<String> {
    serde_json::to_string(media).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "XX000".into(),
            format!("media encoding: {e}"),
        )))
    })
}

fn encode_journey(schema: &Arc<Vec<FieldInfo>>, record: &JourneyRecord) -> PgWireResult<DataRow> {
    let before = &record.before;
    let after = record.after.as_ref();
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&record.id.to_string())?;
    encoder.encode_field(&record.booking_id.to_string())?;
    encoder.encode_field(&i64::from(before.mileage))?;
    encoder.encode_field(&before.notes)?;
    encoder.encode_field(&media_json(&before.media)?)?;
    encoder.encode_field(&before.recorded_at)?;
    encoder.encode_field(&after.map(|a| i64::from(a.mileage)))?;
    encoder.encode_field(&after.and_then(|a| a.notes.clone()))?;
    encoder.encode_field(&after.map(|a| media_json(&a.media)).transpose()?)?;
    encoder.encode_field(&after.map(|a| a.recorded_at))?;
    Ok(encoder.take_row())
}

/// Result columns for a SELECT, chosen by the table after FROM.
/// Statements with `$N` placeholders cannot go through the parser before binding.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    let table = upper
        .split_once(" FROM ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .unwrap_or_default()
        .trim_end_matches(';')
        .trim_matches('"');
    match table {
        "BOOKINGS" => bookings_schema(),
        "AVAILABILITY" => availability_schema(),
        "JOURNEYS" => journey_schema(),
        "NOTIFICATIONS" => notification_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CarshareHandler {
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
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CarshareQueryParser;

#[async_trait]
impl QueryParser for CarshareQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CarshareHandler {
    type Statement = String;
    type QueryParser = CarshareQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PgWireError::UserError(Box::new(ErrorInfo::new(
                    "ERROR".into(),
                    "XX000".into(),
                    "statement produced no response".into(),
                )))
            })
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote inside a literal closes and reopens it, which nets out.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start..end, n));
                }
                i = end;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|(_, n)| *n).max().unwrap_or(0)
}

/// Replace each placeholder once, left to right, with its bound value quoted as a SQL
/// string (`NULL` when unbound). Bound values are never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CarshareFactory {
    handler: Arc<CarshareHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<CarshareAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl CarshareFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CarshareAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CarshareHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CarshareFactory {
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
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CarshareFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    if e.is_retryable() {
        tracing::error!("storage failure: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE id = $1"), 1);
        assert_eq!(
            count_params("INSERT INTO bookings VALUES ($1, $2, $3, $4, $10)"),
            10
        );
        assert_eq!(count_params("SELECT 'costs $' FROM notifications"), 0);
    }

    #[test]
    fn count_params_skips_quoted_text() {
        assert_eq!(count_params("SELECT * FROM journeys WHERE booking_id = '$7'"), 0);
        assert_eq!(count_params(r#"SELECT "$3" FROM bookings WHERE id = $1"#), 1);
    }

    #[test]
    fn bind_params_does_not_rescan_values() {
        let sql = "INSERT INTO pre_journey_checks (booking_id, mileage, notes, media) \
                   VALUES ($1, $2, $3, $4)";
        let bound = bind_params(sql, &[Some("B1"), Some("100"), Some("paid $1 for fuel"), None]);
        assert_eq!(
            bound,
            "INSERT INTO pre_journey_checks (booking_id, mileage, notes, media) \
             VALUES ('B1', '100', 'paid $1 for fuel', NULL)"
        );
    }

    #[test]
    fn bind_params_leaves_literals_and_unbound_alone() {
        let sql = "UPDATE notifications SET message = 'it''s $1' WHERE id = $1 AND x = $12";
        assert_eq!(
            bind_params(sql, &[Some("O'Hara")]),
            "UPDATE notifications SET message = 'it''s $1' WHERE id = 'O''Hara' AND x = $12"
        );
        assert_eq!(bind_params("SELECT $1, $10", &[Some("a"); 10]), "SELECT 'a', 'a'");
    }

    #[test]
    fn result_schema_by_table() {
        let cols = |sql: &str| -> Vec<String> {
            result_schema(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            cols("select * from availability where vehicle_id = $1"),
            ["vehicle_id", "date"]
        );
        assert_eq!(cols("SELECT * FROM bookings WHERE id = $1").len(), 15);
        assert_eq!(cols("SELECT * FROM journeys WHERE booking_id = $1")[6], "mileage_after");
        assert_eq!(cols("SELECT * FROM \"notifications\";")[5], "is_read");
        assert!(cols("INSERT INTO bookings VALUES ($1)").is_empty());
        assert!(cols("SELECT * FROM unknown").is_empty());
    }
}
