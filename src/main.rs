mod config;
mod database;
mod error;
mod model;
mod ranking;
mod relations;
mod routes;
mod validation;

use actix_web::{middleware::Logger, web, App, HttpServer};
use config::Config;
use log::{error, info};

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("filmorate=debug,actix_web=info"),
    )
    .init();

    let to_io = |err: error::Error| {
        error!("{}", err);
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    };
    let config = Config::load().map_err(to_io)?;
    let db = database::open(config.db_path.as_deref()).map_err(to_io)?;
    match &config.db_path {
        Some(path) => info!("database at {}", path.display()),
        None => info!("using a temporary database"),
    }
    let db = web::Data::new(db);

    info!("listening on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(db.clone())
            .configure(routes::configure)
    })
    .bind(config.bind_address())?
    .run()
    .await
}
