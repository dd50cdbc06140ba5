use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use realcheck::classifier::{ModelOptions, SharedModel};
use realcheck::config::AppConfig;
use realcheck::routes::{AppState, configure_routes};
use std::env;
use std::sync::Arc;

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    let inference = config
        .inference()
        .map_err(|e| startup_error("Invalid inference configuration", e))?;

    let model = SharedModel::new(
        &config.model_path,
        ModelOptions {
            device: config.device,
            labels: inference.classification.labels.clone(),
        },
    );
    let handle = model
        .get_or_load()
        .map_err(|e| startup_error("Model loading failed", e))?;
    log::info!(
        "Serving {} on {:?} (threshold {})",
        model.path().display(),
        handle.device(),
        inference.classification.threshold
    );
    drop(handle);

    std::fs::create_dir_all(&config.upload_dir)?;
    let state = web::Data::new(AppState {
        model,
        inference,
        upload_dir: config.upload_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(server_state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    if let Ok(mut state) = Arc::try_unwrap(state.into_inner()) {
        if state.model.unload().is_some() {
            log::info!("Model released");
        }
    }
    log::info!("Server stopped");
    Ok(())
}
