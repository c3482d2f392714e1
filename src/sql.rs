use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::InspectionInput;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterUser {
        id: Ulid,
        full_name: Option<String>,
        email: Option<String>,
    },
    ListVehicle {
        id: Ulid,
        owner_id: Ulid,
        price_per_day: Cents,
        availability: Availability,
        summary: VehicleSummary,
    },
    SetAvailability {
        id: Ulid,
        availability: Availability,
    },
    CreateBooking {
        id: Ulid,
        vehicle_id: Ulid,
        renter_id: Ulid,
        dates: Vec<NaiveDate>,
        total_price: Cents,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectBookingsForRenter {
        renter_id: Ulid,
    },
    SelectBookingsForOwner {
        owner_id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectAvailability {
        vehicle_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    BeginJourney {
        booking_id: Ulid,
        inspection: InspectionInput,
    },
    EndJourney {
        booking_id: Ulid,
        inspection: InspectionInput,
    },
    SelectJourney {
        booking_id: Ulid,
    },
    InsertNotification {
        user_id: Ulid,
        booking_id: Ulid,
        message: String,
    },
    SelectNotifications {
        user_id: Ulid,
    },
    MarkNotificationRead {
        id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Positional column order used when an INSERT names no columns.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    match table {
        "users" => Some(&["id", "full_name", "email"]),
        "vehicles" => Some(&[
            "id",
            "owner_id",
            "price_per_day",
            "availability",
            "make",
            "model",
            "location",
        ]),
        "bookings" => Some(&["id", "vehicle_id", "renter_id", "dates", "total_price"]),
        "pre_journey_checks" | "post_journey_checks" => {
            Some(&["booking_id", "mileage", "notes", "media"])
        }
        "notifications" => Some(&["user_id", "booking_id", "message"]),
        _ => None,
    }
}

/// One VALUES row with its column names.
struct Row {
    columns: Vec<String>,
    values: Vec<Expr>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?)
    }

    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map_or(Ok(None), parse_text_or_null)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::WrongArity(columns.len(), values.len()));
    }
    let row = Row { columns, values };

    match table.as_str() {
        "users" => Ok(Command::RegisterUser {
            id: row.ulid("id")?,
            full_name: row.text("full_name")?,
            email: row.text("email")?,
        }),
        "vehicles" => Ok(Command::ListVehicle {
            id: row.ulid("id")?,
            owner_id: row.ulid("owner_id")?,
            price_per_day: parse_i64(row.required("price_per_day")?)?,
            availability: Availability::from_dates(parse_date_list(&row.text("availability")?)?),
            summary: VehicleSummary {
                make: row.text("make")?,
                model: row.text("model")?,
                location: row.text("location")?,
            },
        }),
        "bookings" => Ok(Command::CreateBooking {
            id: row.ulid("id")?,
            vehicle_id: row.ulid("vehicle_id")?,
            renter_id: row.ulid("renter_id")?,
            dates: parse_date_list(&row.text("dates")?)?,
            total_price: parse_i64(row.required("total_price")?)?,
        }),
        "pre_journey_checks" => Ok(Command::BeginJourney {
            booking_id: row.ulid("booking_id")?,
            inspection: parse_inspection(&row)?,
        }),
        "post_journey_checks" => Ok(Command::EndJourney {
            booking_id: row.ulid("booking_id")?,
            inspection: parse_inspection(&row)?,
        }),
        "notifications" => Ok(Command::InsertNotification {
            user_id: row.ulid("user_id")?,
            booking_id: row.ulid("booking_id")?,
            message: row
                .text("message")?
                .ok_or(SqlError::MissingColumn("message"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_inspection(row: &Row) -> Result<InspectionInput, SqlError> {
    let mileage = parse_i64(row.required("mileage")?)?;
    Ok(InspectionInput {
        mileage: u32::try_from(mileage)
            .map_err(|_| SqlError::Parse(format!("mileage {mileage} out of range")))?,
        notes: row.text("notes")?,
        media: split_list(&row.text("media")?),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set exactly one column".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
        }
        AssignmentTarget::Tuple(_) => {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        }
    };
    let value = &assignment.value;

    match (table.as_str(), column.as_str()) {
        ("vehicles", "availability") => Ok(Command::SetAvailability {
            id,
            availability: Availability::from_dates(parse_date_list(&parse_text_or_null(value)?)?),
        }),
        ("bookings", "status") => {
            let raw = parse_text_or_null(value)?.ok_or(SqlError::MissingColumn("status"))?;
            let status = BookingStatus::parse(&raw)
                .ok_or_else(|| SqlError::Parse(format!("unknown booking status: {raw}")))?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        ("notifications", "is_read") => {
            if !parse_bool(value)? {
                return Err(SqlError::Unsupported("notifications cannot be marked unread".into()));
            }
            Ok(Command::MarkNotificationRead { id })
        }
        ("vehicles" | "bookings" | "notifications", _) => {
            Err(SqlError::Unsupported(format!("UPDATE {table} SET {column}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Column filters collected from a WHERE clause of ANDed comparisons.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    lower: Option<NaiveDate>,
    upper: Option<NaiveDate>,
}

impl Filters {
    fn ulid(&self, column: &str) -> Option<Result<Ulid, SqlError>> {
        self.eq
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| parse_ulid(e))
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            if let Some(id) = filters.ulid("id") {
                Ok(Command::SelectBooking { id: id? })
            } else if let Some(renter_id) = filters.ulid("renter_id") {
                Ok(Command::SelectBookingsForRenter {
                    renter_id: renter_id?,
                })
            } else if let Some(owner_id) = filters.ulid("owner_id") {
                Ok(Command::SelectBookingsForOwner { owner_id: owner_id? })
            } else {
                Err(SqlError::MissingFilter("id, renter_id or owner_id"))
            }
        }
        "availability" => Ok(Command::SelectAvailability {
            vehicle_id: filters
                .ulid("vehicle_id")
                .ok_or(SqlError::MissingFilter("vehicle_id"))??,
            from: filters.lower.ok_or(SqlError::MissingFilter("date >="))?,
            to: filters.upper.ok_or(SqlError::MissingFilter("date <="))?,
        }),
        "journeys" => Ok(Command::SelectJourney {
            booking_id: filters
                .ulid("booking_id")
                .ok_or(SqlError::MissingFilter("booking_id"))??,
        }),
        "notifications" => Ok(Command::SelectNotifications {
            user_id: filters
                .ulid("user_id")
                .ok_or(SqlError::MissingFilter("user_id"))??,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    filters.eq.push((col, (**right).clone()));
                }
                Ok(())
            }
            ast::BinaryOperator::GtEq if expr_column_name(left).as_deref() == Some("date") => {
                filters.lower = Some(parse_date(right)?);
                Ok(())
            }
            ast::BinaryOperator::LtEq if expr_column_name(left).as_deref() == Some("date") => {
                filters.upper = Some(parse_date(right)?);
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse(format!("integer out of range: -{expr}")));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected integer, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_date_str(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match parse_text_or_null(expr)? {
        Some(s) => parse_date_str(&s),
        None => Err(SqlError::Parse("date cannot be NULL".into())),
    }
}

/// Split a comma-separated list, dropping blank entries. NULL is the empty list.
fn split_list(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_date_list(raw: &Option<String>) -> Result<Vec<NaiveDate>, SqlError> {
    split_list(raw).iter().map(|s| parse_date_str(s)).collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    /// Expected column count, given value count.
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_register_user() {
        let sql = format!("INSERT INTO users (id, full_name, email) VALUES ('{A}', 'Ada L', NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RegisterUser {
                id: ulid(A),
                full_name: Some("Ada L".into()),
                email: None,
            }
        );
    }

    #[test]
    fn parse_list_vehicle_positional() {
        let sql = format!(
            "INSERT INTO vehicles VALUES ('{A}', '{B}', 4500, '2024-06-02,2024-06-01', 'Toyota', 'Yaris', 'Leeds')"
        );
        match parse_sql(&sql).unwrap() {
            Command::ListVehicle {
                id,
                owner_id,
                price_per_day,
                availability,
                summary,
            } => {
                assert_eq!(id, ulid(A));
                assert_eq!(owner_id, ulid(B));
                assert_eq!(price_per_day, 4500);
                assert_eq!(
                    availability,
                    Availability::from_dates([d("2024-06-01"), d("2024-06-02")])
                );
                assert_eq!(summary.make.as_deref(), Some("Toyota"));
                assert_eq!(summary.location.as_deref(), Some("Leeds"));
            }
            other => panic!("expected ListVehicle, got {other:?}"),
        }
    }

    #[test]
    fn parse_list_vehicle_named_subset_is_open() {
        let sql = format!(
            "INSERT INTO vehicles (owner_id, id, price_per_day) VALUES ('{B}', '{A}', 3000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::ListVehicle {
                id,
                owner_id,
                availability,
                summary,
                ..
            } => {
                assert_eq!(id, ulid(A));
                assert_eq!(owner_id, ulid(B));
                assert_eq!(availability, Availability::Open);
                assert_eq!(summary, VehicleSummary::default());
            }
            other => panic!("expected ListVehicle, got {other:?}"),
        }
    }

    #[test]
    fn parse_create_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, vehicle_id, renter_id, dates, total_price) \
             VALUES ('{A}', '{B}', '{A}', '2024-06-01, 2024-06-03', 9000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::CreateBooking {
                dates, total_price, ..
            } => {
                assert_eq!(dates, vec![d("2024-06-01"), d("2024-06-03")]);
                assert_eq!(total_price, 9000);
            }
            other => panic!("expected CreateBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_create_booking_bad_date() {
        let sql = format!(
            "INSERT INTO bookings (id, vehicle_id, renter_id, dates, total_price) \
             VALUES ('{A}', '{B}', '{A}', '2024-13-01', 9000)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_arity_mismatch() {
        let sql = format!("INSERT INTO users (id, email) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(2, 1))));
    }

    #[test]
    fn parse_missing_required_column() {
        let sql = format!("INSERT INTO bookings (id, vehicle_id) VALUES ('{A}', '{B}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("renter_id"))
        ));
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'Confirmed' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateBookingStatus {
                id: ulid(A),
                status: BookingStatus::Confirmed,
            }
        );
    }

    #[test]
    fn parse_update_unknown_status() {
        let sql = format!("UPDATE bookings SET status = 'approved' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_set_availability_empty_is_open() {
        let sql = format!("UPDATE vehicles SET availability = '' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetAvailability {
                id: ulid(A),
                availability: Availability::Open,
            }
        );
    }

    #[test]
    fn parse_mark_notification_read() {
        let sql = format!("UPDATE notifications SET is_read = true WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::MarkNotificationRead { id: ulid(A) }
        );

        let sql = format!("UPDATE notifications SET is_read = false WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'confirmed'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_booking_is_cancel() {
        let sql = format!("DELETE FROM bookings WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CancelBooking { id: ulid(A) }
        );

        let sql = format!("DELETE FROM vehicles WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_select_bookings_by_filter() {
        let sql = format!("SELECT * FROM bookings WHERE renter_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookingsForRenter { renter_id: ulid(A) }
        );
        let sql = format!("SELECT * FROM bookings WHERE owner_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookingsForOwner { owner_id: ulid(B) }
        );
        let sql = format!("SELECT * FROM bookings WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBooking { id: ulid(A) }
        );
        assert!(parse_sql("SELECT * FROM bookings").is_err());
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE vehicle_id = '{A}' AND \"date\" >= '2024-06-01' AND \"date\" <= '2024-06-30'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                vehicle_id: ulid(A),
                from: d("2024-06-01"),
                to: d("2024-06-30"),
            }
        );
    }

    #[test]
    fn parse_select_availability_missing_bound() {
        let sql = format!("SELECT * FROM availability WHERE vehicle_id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_journey_checks() {
        let sql = format!(
            "INSERT INTO pre_journey_checks (booking_id, mileage, notes, media) \
             VALUES ('{A}', 12000, 'scratch on door', 'media/1.jpg, media/2.jpg')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::BeginJourney {
                booking_id: ulid(A),
                inspection: InspectionInput {
                    mileage: 12000,
                    notes: Some("scratch on door".into()),
                    media: vec!["media/1.jpg".into(), "media/2.jpg".into()],
                },
            }
        );

        let sql = format!("INSERT INTO post_journey_checks (booking_id, mileage) VALUES ('{A}', 12400)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::EndJourney {
                booking_id: ulid(A),
                inspection: InspectionInput {
                    mileage: 12400,
                    notes: None,
                    media: vec![],
                },
            }
        );
    }

    #[test]
    fn parse_negative_mileage_rejected() {
        let sql = format!("INSERT INTO pre_journey_checks (booking_id, mileage) VALUES ('{A}', -5)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_journey_and_notifications() {
        let sql = format!("SELECT * FROM journeys WHERE booking_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectJourney { booking_id: ulid(A) }
        );
        let sql = format!("SELECT * FROM notifications WHERE user_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectNotifications { user_id: ulid(B) }
        );
    }

    #[test]
    fn parse_insert_notification() {
        let sql = format!(
            "INSERT INTO notifications (user_id, booking_id, message) VALUES ('{A}', '{B}', 'Booking confirmed')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertNotification {
                user_id: ulid(A),
                booking_id: ulid(B),
                message: "Booking confirmed".into(),
            }
        );
    }

    #[test]
    fn parse_bad_ulid() {
        let sql = "SELECT * FROM bookings WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn negated_integer_overflow_is_an_error() {
        let sql = format!(
            "INSERT INTO bookings (id, vehicle_id, renter_id, dates, total_price) \
             VALUES ('{A}', '{B}', '{A}', '2024-06-01', -'-9223372036854775808')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));

        let sql = format!(
            "INSERT INTO bookings (id, vehicle_id, renter_id, dates, total_price) \
             VALUES ('{A}', '{B}', '{A}', '2024-06-01', -'-9000')"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::CreateBooking { total_price: 9000, .. }
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
