//! JSON endpoints used by the browser client.

use axum::{
    Extension, Json,
    extract::{Multipart, Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use tokio::task;
use tracing::{debug, info};

use crate::app::SharedState;
use crate::auth::{Credentials, Registration, User};
use crate::charts::{ChartKind, ChartOptions, render_chart};
use crate::error::{AppError, Result};
use crate::export::{ExportFormat, to_csv, to_xlsx};
use crate::loader::parse_upload;
use crate::schema::infer_schema;
use crate::table::TableMeta;

pub const SESSION_COOKIE: &str = "session";

/// Username of the authenticated caller, set by the auth middleware
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Resolves the session cookie to a user, if any
pub fn session_user(state: &SharedState, jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.validate(cookie.value()))
}

/// Authentication middleware
///
/// Passes the request on with a [`CurrentUser`] extension when the session
/// cookie is valid, otherwise answers 401.
pub async fn require_auth(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match session_user(&state, &jar) {
        Some(username) => {
            request.extensions_mut().insert(CurrentUser(username));
            let response = next.run(request).await;
            renew_session_cookie(&state, &jar, response)
        }
        None => AppError::Unauthorized("login required".to_string()).into_response(),
    }
}

/// Re-sends the session cookie so its max-age follows the server's sliding
/// idle expiry
pub fn renew_session_cookie(state: &SharedState, jar: &CookieJar, response: Response) -> Response {
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => {
            let renewed = CookieJar::new().add(session_cookie(state, cookie.value().to_string()));
            (renewed, response).into_response()
        }
        None => response,
    }
}

/// Session cookie carrying `token`; its max-age is the idle timeout
pub fn session_cookie(state: &SharedState, token: String) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.session_idle.as_secs() as i64);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

/// Revokes the caller's session and clears the cookie
pub fn end_session(state: &SharedState, jar: CookieJar) -> CookieJar {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.revoke(cookie.value());
    }
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

/// Runs CPU-bound work such as Argon2 hashing off the async workers
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))?
}

/// Validates and stores a new account
pub async fn register_user(state: &SharedState, form: Registration) -> Result<User> {
    let state = state.clone();
    run_blocking(move || {
        state
            .users
            .register(&form.username, &form.password, form.confirm_password.as_deref())
    })
    .await
}

pub async fn register(
    State(state): State<SharedState>,
    Json(form): Json<Registration>,
) -> Result<(StatusCode, Json<JsonValue>)> {
    let user = register_user(&state, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": format!("user {} registered", user.username) })),
    ))
}

/// Checks credentials and starts a session
pub async fn start_session(state: &SharedState, credentials: Credentials) -> Result<String> {
    let username = credentials.username.trim().to_string();
    let verifier = state.clone();
    let name = username.clone();
    let valid = run_blocking(move || verifier.users.verify(&name, &credentials.password)).await?;
    if !valid {
        return Err(AppError::Unauthorized("invalid username or password".to_string()));
    }
    info!(username = %username, "user logged in");
    Ok(state.sessions.create(&username))
}

pub async fn login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(credentials): Json<Credentials>,
) -> Result<(CookieJar, Json<JsonValue>)> {
    let username = credentials.username.trim().to_string();
    let token = start_session(&state, credentials).await?;
    let body = json!({
        "message": "login successful",
        "username": username,
    });
    Ok((jar.add(session_cookie(&state, token)), Json(body)))
}

pub async fn logout(State(state): State<SharedState>, jar: CookieJar) -> (CookieJar, Json<JsonValue>) {
    (end_session(&state, jar), Json(json!({ "message": "logged out" })))
}

pub async fn check_session(Extension(user): Extension<CurrentUser>) -> Json<JsonValue> {
    Json(json!({ "user_id": user.0, "username": user.0 }))
}

pub async fn get_tables(State(state): State<SharedState>) -> Json<JsonValue> {
    let details = state.tables().list_tables();
    let names: Vec<&str> = details.iter().map(|m| m.name.as_str()).collect();
    Json(json!({ "tables": names, "details": details }))
}

/// Reads the `file` field of a multipart upload, parses it and stores the
/// resulting table under the caller's name
///
/// # Errors
/// * `EmptyInput` when no file was sent
/// * any loader, schema or store error
pub async fn ingest_upload(
    state: &SharedState,
    owner: &str,
    mut multipart: Multipart,
) -> Result<TableMeta> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation(format!("failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(|| AppError::EmptyInput("no file uploaded".to_string()))?;
    if filename.is_empty() {
        return Err(AppError::EmptyInput("no file selected".to_string()));
    }

    let parsed = parse_upload(&filename, &bytes)?;
    let (columns, rows) = infer_schema(&parsed.headers, parsed.rows, &state.schema);

    let meta = state
        .tables_mut()
        .create_table(&parsed.table_name, columns, rows, owner)?;
    info!(
        table = %meta.name,
        rows = meta.row_count,
        columns = meta.column_count,
        owner,
        "stored uploaded table"
    );
    Ok(meta)
}

pub async fn upload(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JsonValue>)> {
    let meta = ingest_upload(&state, &user.0, multipart).await?;
    let columns: Vec<String> = state
        .tables()
        .get_schema(&meta.name)?
        .iter()
        .map(|c| c.name.clone())
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("file uploaded as table {}", meta.name),
            "table_name": meta.name,
            "row_count": meta.row_count,
            "columns": columns,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TableQuery {
    pub table_name: String,
}

pub async fn table_schema(
    State(state): State<SharedState>,
    Query(query): Query<TableQuery>,
) -> Result<Json<JsonValue>> {
    let tables = state.tables();
    let schema = tables.get_schema(&query.table_name)?;
    let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
    Ok(Json(json!({ "columns": names, "schema": schema })))
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub table_name: String,
    #[serde(default)]
    pub filters: HashMap<String, JsonValue>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Filter values may arrive as strings, numbers or null
fn filter_strings(raw: HashMap<String, JsonValue>) -> HashMap<String, String> {
    raw.into_iter()
        .filter_map(|(column, value)| raw_text(&value).map(|text| (column, text)))
        .collect()
}

/// Text form of a JSON scalar; `None` for null
fn raw_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub async fn filter_data(
    State(state): State<SharedState>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<JsonValue>> {
    let filters = filter_strings(request.filters);
    debug!(table = %request.table_name, filters = filters.len(), page = request.page, "filter query");

    let tables = state.tables();
    let page = tables.query_rows(&request.table_name, &filters, request.page, request.limit)?;
    let table = tables.table(&request.table_name)?;
    let data: Vec<JsonValue> = page.rows.iter().map(|row| table.row_to_json(row)).collect();

    Ok(Json(json!({
        "data": data,
        "total_records": page.total_records,
        "total_pages": page.total_pages,
        "page": page.page,
        "limit": page.page_size,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CellUpdate {
    pub table_name: String,
    pub row_id: u64,
    pub column: String,
    #[serde(default)]
    pub value: JsonValue,
}

pub async fn update_cell(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(update): Json<CellUpdate>,
) -> Result<Json<JsonValue>> {
    let raw = raw_text(&update.value).unwrap_or_default();
    let stored = state
        .tables_mut()
        .update_cell(&update.table_name, update.row_id, &update.column, &raw)?;
    info!(
        table = %update.table_name,
        row_id = update.row_id,
        column = %update.column,
        user = %user.0,
        "cell updated"
    );
    Ok(Json(json!({
        "row_id": update.row_id,
        "column": update.column,
        "value": stored.to_json(),
    })))
}

pub async fn delete_table(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TableQuery>,
) -> Result<Json<JsonValue>> {
    state.tables_mut().delete_table(&query.table_name)?;
    info!(table = %query.table_name, user = %user.0, "table deleted");
    Ok(Json(json!({ "message": format!("table {} deleted", query.table_name) })))
}

pub async fn analyze_table(
    State(state): State<SharedState>,
    Query(query): Query<TableQuery>,
) -> Result<Json<JsonValue>> {
    let report = state.insights.analyze_table(&state.tables(), &query.table_name)?;
    Ok(Json(serde_json::to_value(report)?))
}

pub async fn table_summary(
    State(state): State<SharedState>,
    Query(query): Query<TableQuery>,
) -> Result<Json<JsonValue>> {
    let summary = state.tables().table_summary(&query.table_name)?;
    let mut object = serde_json::Map::new();
    for (column, counts) in summary {
        let entries: Vec<JsonValue> = counts
            .iter()
            .map(|entry| {
                let mut item = serde_json::Map::new();
                item.insert(column.clone(), entry.value.to_json());
                item.insert("count".to_string(), json!(entry.count));
                JsonValue::Object(item)
            })
            .collect();
        object.insert(column, JsonValue::Array(entries));
    }
    Ok(Json(json!({ "summary": object })))
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub table_name: String,
    pub column: String,
    pub kind: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub async fn chart(
    State(state): State<SharedState>,
    Query(query): Query<ChartQuery>,
) -> Result<Response> {
    let kind = ChartKind::parse(query.kind.as_deref().unwrap_or("bar"))?;
    let counts = {
        let tables = state.tables();
        if tables.table(&query.table_name)?.rows.is_empty() {
            return Err(AppError::EmptyInput(format!(
                "table `{}` has no rows to chart",
                query.table_name
            )));
        }
        tables.column_summary(&query.table_name, &query.column)?
    };

    let defaults = ChartOptions::default();
    let options = ChartOptions {
        title: format!("{} ({})", query.column, query.table_name),
        width: query.width.unwrap_or(defaults.width).clamp(200, 2000),
        height: query.height.unwrap_or(defaults.height).clamp(150, 2000),
        kind,
        ..defaults
    };
    let png = render_chart(&counts, &options)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub table_name: String,
    pub format: Option<String>,
}

pub async fn export(
    State(state): State<SharedState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let format = ExportFormat::parse(query.format.as_deref().unwrap_or("csv"))?;
    let bytes = {
        let tables = state.tables();
        let table = tables.table(&query.table_name)?;
        match format {
            ExportFormat::Csv => to_csv(table)?,
            ExportFormat::Xlsx => to_xlsx(table)?,
        }
    };

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        query.table_name,
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_values_become_strings() {
        let raw: HashMap<String, JsonValue> = serde_json::from_value(json!({
            "region": "east",
            "amount": 12,
            "note": null,
        }))
        .unwrap();
        let filters = filter_strings(raw);
        assert_eq!(filters.get("region").map(String::as_str), Some("east"));
        assert_eq!(filters.get("amount").map(String::as_str), Some("12"));
        assert!(!filters.contains_key("note"));
    }

    #[test]
    fn test_filter_request_defaults() {
        let request: FilterRequest = serde_json::from_value(json!({ "table_name": "sales" })).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.limit, 10);
        assert!(request.filters.is_empty());
    }
}
