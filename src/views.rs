//! Server-rendered HTML pages and the form posts behind them.

use axum::{
    Extension, Form,
    extract::{Multipart, Path, Query, Request, State},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

use crate::api::{
    CurrentUser, end_session, ingest_upload, register_user, renew_session_cookie, session_cookie, session_user,
    start_session,
};
use crate::app::SharedState;
use crate::auth::{Credentials, Registration};
use crate::error::{AppError, Result};

const FILTER_PREFIX: &str = "f_";
const DEFAULT_PAGE_SIZE: usize = 25;

const TEMPLATES: [(&str, &str); 6] = [
    ("login", include_str!("templates/login.hbs")),
    ("signup", include_str!("templates/signup.hbs")),
    ("tables", include_str!("templates/tables.hbs")),
    ("table", include_str!("templates/table.hbs")),
    ("insights", include_str!("templates/insights.hbs")),
    ("graphs", include_str!("templates/graphs.hbs")),
];

/// Compiled page templates
#[derive(Debug)]
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    /// Compiles every page template
    ///
    /// # Errors
    /// * `InternalError` if a template does not compile
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry
            .register_partial("header", include_str!("templates/header.hbs"))
            .map_err(|e| AppError::Internal(format!("template `header`: {}", e)))?;
        registry
            .register_partial("footer", include_str!("templates/footer.hbs"))
            .map_err(|e| AppError::Internal(format!("template `footer`: {}", e)))?;
        for (name, source) in TEMPLATES {
            registry
                .register_template_string(name, source)
                .map_err(|e| AppError::Internal(format!("template `{}`: {}", name, e)))?;
        }
        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>> {
        self.registry
            .render(name, data)
            .map(Html)
            .map_err(|e| AppError::Internal(format!("failed to render `{}`: {}", name, e)))
    }
}

/// Error shown as an HTML page instead of JSON
pub struct PageError(AppError);

impl From<AppError> for PageError {
    fn from(err: AppError) -> Self {
        PageError(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        warn!(kind = self.0.kind(), "page request failed: {}", self.0);
        let body = format!(
            "<!DOCTYPE html><html><head><title>{status}</title></head><body>\
             <h1>{status}</h1><p>{message}</p><p><a href=\"/\">Back to tables</a></p></body></html>",
            status = status,
            message = handlebars::html_escape(&self.0.to_string()),
        );
        (status, Html(body)).into_response()
    }
}

type PageResult = std::result::Result<Html<String>, PageError>;

/// Page middleware: like [`crate::api::require_auth`] but redirects to the login page
pub async fn require_login(
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
        None => Redirect::to("/login").into_response(),
    }
}

fn redirect_with_error(path: &str, err: &AppError) -> Redirect {
    Redirect::to(&format!("{}?error={}", path, urlencoding::encode(&err.to_string())))
}

pub async fn login_page(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> PageResult {
    Ok(state.views.render(
        "login",
        &json!({
            "title": "Login",
            "error": params.get("error"),
            "registered": params.contains_key("registered"),
        }),
    )?)
}

pub async fn signup_page(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> PageResult {
    Ok(state
        .views
        .render("signup", &json!({ "title": "Sign up", "error": params.get("error") }))?)
}

pub async fn handle_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Response {
    match start_session(&state, credentials).await {
        Ok(token) => (jar.add(session_cookie(&state, token)), Redirect::to("/")).into_response(),
        Err(err) => redirect_with_error("/login", &err).into_response(),
    }
}

pub async fn handle_signup(
    State(state): State<SharedState>,
    Form(form): Form<Registration>,
) -> Redirect {
    match register_user(&state, form).await {
        Ok(_) => Redirect::to("/login?registered=1"),
        Err(err) => redirect_with_error("/signup", &err),
    }
}

pub async fn handle_logout(State(state): State<SharedState>, jar: CookieJar) -> (CookieJar, Redirect) {
    (end_session(&state, jar), Redirect::to("/login"))
}

pub async fn tables_page(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Query(params): Query<HashMap<String, String>>,
) -> PageResult {
    let tables: Vec<_> = state
        .tables()
        .list_tables()
        .into_iter()
        .map(|meta| {
            json!({
                "name": meta.name,
                "row_count": meta.row_count,
                "column_count": meta.column_count,
                "owner": meta.owner,
                "created_at": meta.created_at.format("%Y-%m-%d %H:%M").to_string(),
            })
        })
        .collect();

    Ok(state.views.render(
        "tables",
        &json!({
            "title": "Tables",
            "username": user.0,
            "tables": tables,
            "error": params.get("error"),
        }),
    )?)
}

pub async fn handle_upload(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    multipart: Multipart,
) -> Redirect {
    match ingest_upload(&state, &user.0, multipart).await {
        Ok(meta) => Redirect::to(&format!("/tables/{}", urlencoding::encode(&meta.name))),
        Err(err) => redirect_with_error("/", &err),
    }
}

pub async fn handle_delete(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> Redirect {
    match state.tables_mut().delete_table(&name) {
        Ok(()) => {
            tracing::info!(table = %name, user = %user.0, "table deleted");
            Redirect::to("/")
        }
        Err(err) => redirect_with_error("/", &err),
    }
}

/// Query string for a page of the table view, keeping the active filters
fn page_link(name: &str, filters: &[(String, String)], page: usize, limit: usize) -> String {
    let mut link = format!("/tables/{}?page={}&limit={}", urlencoding::encode(name), page, limit);
    for (column, value) in filters {
        link.push_str(&format!(
            "&{}={}",
            urlencoding::encode(&format!("{}{}", FILTER_PREFIX, column)),
            urlencoding::encode(value)
        ));
    }
    link
}

pub async fn table_page(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> PageResult {
    let page = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let mut filters: Vec<(String, String)> = params
        .iter()
        .filter_map(|(key, value)| {
            let column = key.strip_prefix(FILTER_PREFIX)?;
            (!value.trim().is_empty()).then(|| (column.to_string(), value.clone()))
        })
        .collect();
    filters.sort();
    let filter_map: HashMap<String, String> = filters.iter().cloned().collect();

    let tables = state.tables();
    let result = tables.query_rows(&name, &filter_map, page, limit)?;
    let table = tables.table(&name)?;

    let columns: Vec<_> = table
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "kind": c.kind.to_string(),
                "field": format!("{}{}", FILTER_PREFIX, c.name),
                "filter": filter_map.get(&c.name).cloned().unwrap_or_default(),
            })
        })
        .collect();
    let rows: Vec<_> = result
        .rows
        .iter()
        .map(|row| {
            json!({
                "id": row.id,
                "cells": table
                    .columns
                    .iter()
                    .zip(&row.values)
                    .map(|(c, v)| json!({ "column": c.name, "value": v.to_string(), "null": v.is_null() }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    let prev = (result.page > 1).then(|| page_link(&name, &filters, result.page - 1, result.page_size));
    let next = (result.page < result.total_pages)
        .then(|| page_link(&name, &filters, result.page + 1, result.page_size));

    Ok(state.views.render(
        "table",
        &json!({
            "title": name,
            "table_name": name,
            "columns": columns,
            "rows": rows,
            "limit": result.page_size,
            "page": result.page,
            "total_pages": result.total_pages,
            "total_records": result.total_records,
            "prev": prev,
            "next": next,
        }),
    )?)
}

pub async fn insights_page(State(state): State<SharedState>, Path(name): Path<String>) -> PageResult {
    let report = state.insights.analyze_table(&state.tables(), &name)?;
    let data = serde_json::to_value(&report).map_err(AppError::from)?;
    Ok(state.views.render(
        "insights",
        &json!({ "title": format!("Insights: {}", name), "table_name": name, "report": data }),
    )?)
}

pub async fn graphs_page(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> PageResult {
    let kind = crate::charts::ChartKind::parse(params.get("kind").map(String::as_str).unwrap_or("bar"))?;
    let columns: Vec<_> = state
        .tables()
        .get_schema(&name)?
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "src": format!(
                    "/chart?table_name={}&column={}&kind={}",
                    urlencoding::encode(&name),
                    urlencoding::encode(&c.name),
                    kind.as_str()
                ),
            })
        })
        .collect();

    let kinds: Vec<_> = ["bar", "line", "pie", "doughnut"]
        .iter()
        .map(|k| json!({ "name": k, "selected": *k == kind.as_str() }))
        .collect();

    Ok(state.views.render(
        "graphs",
        &json!({
            "title": format!("Graphs: {}", name),
            "table_name": name,
            "columns": columns,
            "kinds": kinds,
        }),
    )?)
}
