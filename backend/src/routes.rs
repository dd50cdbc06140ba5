use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use log::{error, warn};
use shared::{ErrorResponse, HealthResponse, PredictionResponse};
use std::path::PathBuf;

use crate::classifier::{InferenceService, ModelLoadError, PredictError, SharedModel};
use crate::config::InferenceConfig;
use crate::upload::{UploadError, receive_image};

/// Everything the handlers share. The model slot is filled at startup; a
/// handler that finds it empty retries the load.
pub struct AppState {
    pub model: SharedModel,
    pub inference: InferenceConfig,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn service(&self) -> Result<InferenceService, ModelLoadError> {
        let model = self.model.get_or_load()?;
        Ok(InferenceService::new(model, self.inference.clone()))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let device = state
        .model
        .get()
        .map(|model| format!("{:?}", model.device()))
        .unwrap_or_else(|| "unloaded".to_string());
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".into(),
        message: "Server is running".into(),
        model_loaded: state.model.is_loaded(),
        device,
    })
}

async fn predict(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let upload = match receive_image(payload, &state.upload_dir, state.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(e) => return upload_error_response(e),
    };

    // The upload moves into the blocking task and is removed when it finishes.
    // A model that failed to load at startup is retried there too.
    let outcome = web::block(move || state.service().map(|service| service.predict(upload.path()))).await;

    match outcome {
        Ok(Ok(Ok(result))) => HttpResponse::Ok().json(PredictionResponse::from(&result)),
        Ok(Ok(Err(PredictError::Decode(e)))) => {
            warn!("Rejected upload: {}", e);
            HttpResponse::UnprocessableEntity().json(ErrorResponse::new(e.to_string()))
        }
        Ok(Ok(Err(PredictError::Inference(e)))) => {
            error!("Error during prediction: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string()))
        }
        Ok(Err(e)) => {
            error!("Model unavailable: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Model not loaded"))
        }
        Err(e) => {
            error!("Prediction task failed: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Prediction task failed"))
        }
    }
}

fn upload_error_response(e: UploadError) -> HttpResponse {
    let body = ErrorResponse::new(e.to_string());
    match e {
        UploadError::TooLarge(_) => HttpResponse::PayloadTooLarge().json(body),
        UploadError::Io(ref io) => {
            error!("Failed to store upload: {}", io);
            HttpResponse::InternalServerError().json(body)
        }
        _ => HttpResponse::BadRequest().json(body),
    }
}
