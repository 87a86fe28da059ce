use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use structopt::StructOpt;
use tower_http::trace::TraceLayer;
use veritron_api::{AuthToken, Uuid};
use veritron_core::Service;

mod db;
mod error;
mod extractors;
mod feeds;
mod handlers;

use db::PgStore;
use error::Error;
use extractors::AppState;
use feeds::ItemFeeds;

#[derive(Debug, StructOpt)]
#[structopt(name = "veritron-server", about = "Credibility votes and live comments on news items")]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[structopt(long, env = "VERITRON_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Token to use for the admin routes, which are all refused if unset
    #[structopt(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<Uuid>,
}

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(service: Service, admin_token: Option<AuthToken>) -> Router {
    Router::new()
        .route(
            "/api/admin/create-viewer",
            post(handlers::admin_create_viewer),
        )
        .route("/api/admin/create-item", post(handlers::admin_create_item))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/items", get(handlers::list_items))
        .route("/api/item/:id", get(handlers::get_item))
        .route("/api/item/:id/toggle-vote", post(handlers::toggle_vote))
        .route(
            "/api/item/:id/comments",
            get(handlers::list_comments).post(handlers::submit_comment),
        )
        .route("/ws/item/:id/comments", get(handlers::comment_feed))
        .with_state(AppState {
            service,
            admin_token,
        })
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::from_args();

    let pool = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("failed applying migrations")?;

    let feeds = ItemFeeds::new();
    let _listener = feeds::spawn_comment_listener(pool.clone(), feeds.clone()).await?;
    let service = Service::from_backend(Arc::new(PgStore::new(pool, feeds)));

    if opt.admin_token.is_none() {
        tracing::info!("no admin token set, admin routes are disabled");
    }
    let app = app(service, opt.admin_token.map(AuthToken));

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
