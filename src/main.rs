use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::net::UnixListener as StdUnixListener;

use threadline::api::{self, AppState};
use threadline::auth::AuthService;
use threadline::config::Config;
use threadline::store::Store;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // Initialize store
    let store = Arc::new(Store::new(&config.database_path).map_err(|e| {
        log::error!("Failed to initialize database {}: {}", config.database_path, e);
        io::Error::new(io::ErrorKind::Other, e)
    })?);
    log::info!("Database: {}", config.database_path);

    let auth_service = Arc::new(AuthService::new(config.jwt_secret.clone(), config.jwt_issuer.clone()));
    let state = web::Data::new(AppState::new(store));

    // Reconcile follower mirrors left behind by an interrupted write
    match state.graph.repair_follow_graph() {
        Ok(report) => log::debug!("Follow graph check: {:?}", report),
        Err(e) => log::error!("Follow graph repair failed: {}", e),
    }

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // AuthService is registered on its own for the auth extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(state.clone())
            .configure(api::configure_routes)
    })
    .workers(1);

    // Bind to Unix socket or TCP port
    #[cfg(unix)]
    if let Some(ref socket) = config.socket_path {
        if std::path::Path::new(socket).exists() {
            std::fs::remove_file(socket)?;
        }

        log::info!("Starting threadline server on Unix socket: {}", socket);
        let listener = StdUnixListener::bind(socket)?;
        return server.listen_uds(listener)?.run().await;
    }

    log::info!("Starting threadline server on port {}", config.port);
    server.bind(("0.0.0.0", config.port))?.run().await
}
