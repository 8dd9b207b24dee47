//! Database effects over a per-context rusqlite pool.
//!
//! The pool is lazily grown to `DB_POOL_PER_REQUEST` connections, each
//! health-checked before reuse and closed at context teardown. Contexts
//! never share connections; there is no global pool.
//!
//! - `DbRead(query, params)`: parameter-bound query, full materialisation,
//!   rows as a JSON array of objects with canonical key ordering.
//! - `DbWrite(statement, params)`: explicit transaction (`BEGIN` … `COMMIT`,
//!   `ROLLBACK` on any failure); result carries the affected-row count;
//!   backend error text is truncated to 1 KiB.

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use msq_core::config::DB_POOL_PER_REQUEST;
use msq_core::decimal::Decimal;
use msq_core::json::JsonValue;
use msq_core::value::{Value, MAX_SAFE_INT};

use crate::{EffectContext, EffectError};

/// Cap on backend error text entering a cached outcome.
const ERROR_TEXT_MAX: usize = 1024;

pub(crate) fn truncate_error(msg: String) -> String {
    if msg.len() <= ERROR_TEXT_MAX {
        msg
    } else {
        let mut cut = ERROR_TEXT_MAX;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg[..cut].to_string()
    }
}

pub struct DbPool {
    path: String,
    conns: Vec<Connection>,
}

impl DbPool {
    pub fn new(path: &str) -> DbPool {
        DbPool {
            path: path.to_string(),
            conns: Vec::new(),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.conns.len()
    }

    /// Take a healthy connection, evicting dead ones; open a fresh one while
    /// the pool is under its cap. The caller returns it via `put_back`.
    fn take(&mut self) -> Result<Connection, EffectError> {
        while let Some(conn) = self.conns.pop() {
            let alive: Result<i64, _> = conn.query_row("SELECT 1", [], |r| r.get(0));
            if alive.is_ok() {
                return Ok(conn);
            }
            // Dead connection: drop it and keep scanning.
        }
        Connection::open(&self.path)
            .map_err(|e| EffectError::DbRead(truncate_error(e.to_string())))
    }

    fn put_back(&mut self, conn: Connection) {
        if self.conns.len() < DB_POOL_PER_REQUEST {
            self.conns.push(conn);
        }
        // Beyond the cap the connection drops and closes here.
    }

    /// Close every pooled connection (context wipe).
    pub fn close_all(&mut self) {
        self.conns.clear();
    }
}

/// Convert a guest argument into a SQL parameter.
fn bind_param(v: &Value) -> Result<rusqlite::types::Value, EffectError> {
    use rusqlite::types::Value as Sql;
    Ok(match v {
        Value::Int(n) => Sql::Integer(*n),
        Value::Str(s) => Sql::Text(s.clone()),
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Dec(d) => Sql::Text(d.canonical_string()),
        Value::None => Sql::Null,
        Value::Some(inner) => bind_param(inner)?,
        other => {
            return Err(EffectError::DbRead(format!(
                "{} cannot bind as a SQL parameter",
                other.type_name()
            )))
        }
    })
}

fn params_from_args(args: &[Value]) -> Result<Vec<rusqlite::types::Value>, EffectError> {
    match args.get(1) {
        None | Some(Value::None) => Ok(Vec::new()),
        Some(Value::List(items)) => items.iter().map(bind_param).collect(),
        Some(other) => Err(EffectError::DbRead(format!(
            "params must be a list, got {}",
            other.type_name()
        ))),
    }
}

fn query_from_args(args: &[Value], what: &str) -> Result<String, EffectError> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(EffectError::Invalid(format!("{what} requires a query string"))),
    }
}

/// A result cell into the JSON ADT. Exact values only: REAL columns are
/// admitted solely when their shortest decimal form fits the decimal domain.
fn cell_to_json(cell: ValueRef<'_>) -> Result<JsonValue, EffectError> {
    Ok(match cell {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(n) => {
            if !(-MAX_SAFE_INT..=MAX_SAFE_INT).contains(&n) {
                JsonValue::Decimal(n.to_string())
            } else {
                JsonValue::Int(n)
            }
        }
        ValueRef::Real(f) => {
            let text = format!("{f}");
            let d = Decimal::parse(&text).map_err(|_| {
                EffectError::DbRead(format!("REAL column value {text} is not an exact decimal"))
            })?;
            JsonValue::Decimal(d.canonical_string())
        }
        ValueRef::Text(t) => JsonValue::Str(
            std::str::from_utf8(t)
                .map_err(|_| EffectError::DbRead("non-UTF-8 text column".to_string()))?
                .to_string(),
        ),
        ValueRef::Blob(b) => JsonValue::Str(hex::encode(b)),
    })
}

/// `DbRead` handler.
pub fn db_read(ctx: &mut EffectContext, args: &[Value]) -> Result<JsonValue, EffectError> {
    let query = query_from_args(args, "DbRead")?;
    let params = params_from_args(args)?;
    let conn = ctx.db.take()?;
    let result = run_read(&conn, &query, &params);
    ctx.db.put_back(conn);
    result
}

fn run_read(
    conn: &Connection,
    query: &str,
    params: &[rusqlite::types::Value],
) -> Result<JsonValue, EffectError> {
    let map_err = |e: rusqlite::Error| EffectError::DbRead(truncate_error(e.to_string()));
    let mut stmt = conn.prepare(query).map_err(map_err)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(map_err)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_err)? {
        let mut fields = Vec::with_capacity(column_names.len());
        for (i, name) in column_names.iter().enumerate() {
            let cell = row.get_ref(i).map_err(map_err)?;
            fields.push((name.clone(), cell_to_json(cell)?));
        }
        let obj = JsonValue::object(fields)
            .map_err(|_| EffectError::DbRead("duplicate column name in result".to_string()))?;
        out.push(obj);
    }
    Ok(JsonValue::Array(out))
}

/// `DbWrite` handler. A replay never reaches this function: the cached
/// outcome short-circuits at the registry.
pub fn db_write(ctx: &mut EffectContext, args: &[Value]) -> Result<JsonValue, EffectError> {
    let statement = query_from_args(args, "DbWrite")?;
    let params = params_from_args(args).map_err(|e| match e {
        EffectError::DbRead(m) => EffectError::DbWrite(m),
        other => other,
    })?;
    let mut conn = ctx.db.take().map_err(|e| match e {
        EffectError::DbRead(m) => EffectError::DbWrite(m),
        other => other,
    })?;
    let result = run_write(&mut conn, &statement, &params);
    ctx.db.put_back(conn);
    result
}

fn run_write(
    conn: &mut Connection,
    statement: &str,
    params: &[rusqlite::types::Value],
) -> Result<JsonValue, EffectError> {
    let map_err = |e: rusqlite::Error| EffectError::DbWrite(truncate_error(e.to_string()));
    let tx = conn.transaction().map_err(map_err)?;
    let affected = match tx.execute(statement, rusqlite::params_from_iter(params.iter())) {
        Ok(n) => n,
        Err(e) => {
            // Drop rolls the transaction back; surface the backend text.
            return Err(map_err(e));
        }
    };
    tx.commit().map_err(map_err)?;
    Ok(JsonValue::object_unchecked(vec![(
        "rows_affected".to_string(),
        JsonValue::Int(affected as i64),
    )]))
}
