use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post},
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::auth::{InMemorySessionStore, SessionStore, UserStore};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::insights::InsightsEngine;
use crate::schema::SchemaConfig;
use crate::store::TableStore;
use crate::views::{self, Views};

/// Everything the handlers share
pub struct AppState {
    tables: RwLock<TableStore>,
    pub users: UserStore,
    pub sessions: Arc<dyn SessionStore>,
    pub schema: SchemaConfig,
    pub insights: InsightsEngine,
    pub views: Views,
    pub session_idle: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// State backed by the data directory: users.json plus table snapshots
    pub fn open(config: &ServerConfig, sessions: Arc<dyn SessionStore>) -> Result<Self> {
        let tables = TableStore::open(config.tables_dir(), config.store_config())?;
        let users = UserStore::open(config.users_file())?;
        Self::with_stores(config, tables, users, sessions)
    }

    /// State that keeps nothing on disk
    pub fn in_memory(config: &ServerConfig) -> Result<Self> {
        let sessions = Arc::new(InMemorySessionStore::new(config.session_idle_timeout()));
        Self::with_stores(
            config,
            TableStore::new(config.store_config()),
            UserStore::in_memory(),
            sessions,
        )
    }

    fn with_stores(
        config: &ServerConfig,
        tables: TableStore,
        users: UserStore,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        Ok(Self {
            tables: RwLock::new(tables),
            users,
            sessions,
            schema: config.schema_config(),
            insights: InsightsEngine::new(config.insights_config()),
            views: Views::new()?,
            session_idle: config.session_idle_timeout(),
        })
    }

    pub fn tables(&self) -> RwLockReadGuard<'_, TableStore> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tables_mut(&self) -> RwLockWriteGuard<'_, TableStore> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the application router
///
/// JSON endpoints answer 401 without a valid session; HTML pages redirect
/// to the login page instead.
///
/// # Arguments
/// * `state` - Shared application state
/// * `upload_limit` - Maximum request body size for uploads, in bytes
pub fn router(state: SharedState, upload_limit: usize) -> Router {
    let protected_api = Router::new()
        .route("/check_session", get(api::check_session))
        .route("/get_tables", get(api::get_tables))
        .route("/upload", post(api::upload).layer(DefaultBodyLimit::max(upload_limit)))
        .route("/table_schema", get(api::table_schema))
        .route("/filter_data", post(api::filter_data))
        .route("/update_cell", post(api::update_cell))
        .route("/delete_table", delete(api::delete_table))
        .route("/analyze_table", get(api::analyze_table))
        .route("/table_summary", get(api::table_summary))
        .route("/chart", get(api::chart))
        .route("/export", get(api::export))
        .route_layer(middleware::from_fn_with_state(state.clone(), api::require_auth));

    let protected_pages = Router::new()
        .route("/", get(views::tables_page))
        .route(
            "/tables/upload",
            post(views::handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/tables/:name", get(views::table_page))
        .route("/tables/:name/delete", post(views::handle_delete))
        .route("/insights/:name", get(views::insights_page))
        .route("/graphs/:name", get(views::graphs_page))
        .route_layer(middleware::from_fn_with_state(state.clone(), views::require_login));

    Router::new()
        .route("/health", get(api::health))
        .route("/register", post(api::register))
        .route("/login", get(views::login_page).post(api::login))
        .route("/logout", post(api::logout))
        .route("/signup", get(views::signup_page))
        .route("/auth/login", post(views::handle_login))
        .route("/auth/signup", post(views::handle_signup))
        .route("/auth/logout", post(views::handle_logout))
        .merge(protected_api)
        .merge(protected_pages)
        .with_state(state)
}

fn cors_layer(origins: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.trim() == "*" {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Periodically drops sessions that have been idle too long
async fn purge_sessions(sessions: Arc<dyn SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let removed = sessions.purge_expired();
        if removed > 0 {
            info!("purged {} expired session(s)", removed);
        }
    }
}

/// Runs the web server until the process is stopped
pub async fn run(config: ServerConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let sessions: Arc<dyn SessionStore> =
        Arc::new(InMemorySessionStore::new(config.session_idle_timeout()));
    let state = Arc::new(AppState::open(&config, sessions.clone())?);

    info!(
        tables = state.tables().list_tables().len(),
        data_dir = %config.data_dir.display(),
        "loaded stored tables"
    );
    info!("session idle timeout: {} minutes", config.session_idle_minutes);
    info!("upload limit: {} MB", config.upload_limit_mb);

    tokio::spawn(purge_sessions(sessions, config.session_purge_interval()));

    let app = router(state, config.upload_limit_bytes()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors_origin)),
    );

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("listening on http://{}", listener.local_addr()?);
    if config.host == "0.0.0.0" {
        if let Ok(ip) = local_ip_address::local_ip() {
            info!("reachable on the local network at http://{}:{}", ip, config.port);
        }
    }

    axum::serve(listener, app).await?;
    Ok(())
}
