use clap::Parser;
use realcheck::classifier::{InferenceService, ModelHandle, ModelOptions, PredictionResult};
use realcheck::config::{DevicePreference, InferenceConfig};
use shared::{ImageClass, PredictionResponse};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "classify")]
#[command(about = "Classify one image as real or AI-generated", long_about = None)]
struct Cli {
    /// Image to analyze
    image: PathBuf,

    /// Model checkpoint
    #[arg(short, long, env = "MODEL_PATH", default_value = "models/my_face_classifier.pth")]
    model: PathBuf,

    /// Inference config (YAML); built-in defaults when omitted
    #[arg(short, long, env = "INFERENCE_CONFIG")]
    config: Option<PathBuf>,

    /// auto, cpu or cuda
    #[arg(short, long, env = "DEVICE", default_value = "auto")]
    device: DevicePreference,

    /// Print the JSON response instead of the report
    #[arg(long)]
    json: bool,
}

const RULE: &str = "============================================================";

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));
    let cli = Cli::parse();

    if !cli.image.is_file() {
        eprintln!("Error: Image not found at {}", cli.image.display());
        return ExitCode::FAILURE;
    }
    if !cli.model.is_file() {
        eprintln!("Error: Model not found at {}", cli.model.display());
        eprintln!("Pass --model or set MODEL_PATH");
        return ExitCode::FAILURE;
    }

    let config = match &cli.config {
        Some(path) => match InferenceConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => InferenceConfig::default(),
    };

    let options = ModelOptions {
        device: cli.device,
        labels: config.classification.labels.clone(),
    };
    let model = match ModelHandle::load(&cli.model, &options) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            eprintln!("Error loading model: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let service = InferenceService::new(model, config);

    match service.predict(&cli.image) {
        Ok(result) if cli.json => match serde_json::to_string_pretty(&PredictionResponse::from(&result)) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Ok(result) => {
            print_report(&cli, &service, &result);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error during prediction: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_report(cli: &Cli, service: &InferenceService, result: &PredictionResult) {
    let (color_start, color_end) = match result.class() {
        ImageClass::AiGenerated => ("\x1b[95m", "\x1b[0m"),
        ImageClass::Real => ("\x1b[92m", "\x1b[0m"),
    };
    let details = result.probabilities();

    println!("{}", RULE);
    println!("AI Image Detection");
    println!("{}", RULE);
    println!("Model:  {} ({:?})", cli.model.display(), service.model().device());
    println!("Image:  {}", cli.image.display());
    println!();
    println!("Classification: {}{}{}", color_start, result.label(), color_end);
    println!("Confidence:     {}{}{}", color_start, result.percentage(), color_end);
    println!();
    println!("Detailed probabilities:");
    println!(
        "  AI-Generated: {:.4} ({:.2}%)",
        details.ai_generated_probability,
        details.ai_generated_probability * 100.0
    );
    println!(
        "  Real Image:   {:.4} ({:.2}%)",
        details.real_image_probability,
        details.real_image_probability * 100.0
    );
    println!();
    println!("Raw sigmoid output: {:.4}", result.raw_probability());
    println!("{}", RULE);
    println!("{}", result.band().describe(result.class()));
    println!("{}", RULE);
}
