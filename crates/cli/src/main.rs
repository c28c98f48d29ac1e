use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sdgen_cli::config::ClientConfig;
use sdgen_cli::driver;
use sdgen_client::api::GatewayApi;
use sdgen_client::client::JobClient;
use sdgen_client::memory::InMemoryService;
use sdgen_client::service::{RemoteService, RemoteStatus};
use sdgen_core::job::{
    GenerationParams, JobRequest, DEFAULT_GUIDANCE_SCALE, DEFAULT_HEIGHT, DEFAULT_SEED,
    DEFAULT_STEPS, DEFAULT_WIDTH,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sdgen", version, about = "Submit image generation jobs and save the result as BMP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a prompt, wait for the job, and save the image.
    Generate {
        #[arg(short, long)]
        prompt: String,

        #[arg(long)]
        negative_prompt: Option<String>,

        #[arg(long, default_value_t = DEFAULT_WIDTH)]
        width: u32,

        #[arg(long, default_value_t = DEFAULT_HEIGHT)]
        height: u32,

        #[arg(long, default_value_t = DEFAULT_STEPS)]
        steps: u32,

        #[arg(long, default_value_t = DEFAULT_GUIDANCE_SCALE)]
        guidance: f32,

        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        #[arg(short, long, default_value = "generated_image.bmp")]
        output: PathBuf,

        /// Overrides SDGEN_GATEWAY_URL.
        #[arg(long)]
        gateway_url: Option<String>,

        /// Overrides SDGEN_MAX_ATTEMPTS.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Overrides SDGEN_RETRY_DELAY_SECS.
        #[arg(long)]
        retry_delay_secs: Option<u64>,

        /// Run against an in-process service instead of the gateway.
        #[arg(long)]
        offline: bool,
    },
    /// Save the placeholder gradient without contacting any service.
    Demo {
        #[arg(long, default_value_t = DEFAULT_WIDTH)]
        width: u32,

        #[arg(long, default_value_t = DEFAULT_HEIGHT)]
        height: u32,

        #[arg(short, long, default_value = "demo_generated_image.bmp")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sdgen: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_json);

    let result = match cli.command {
        Command::Generate {
            prompt,
            negative_prompt,
            width,
            height,
            steps,
            guidance,
            seed,
            output,
            gateway_url,
            max_attempts,
            retry_delay_secs,
            offline,
        } => {
            if let Some(url) = gateway_url {
                config.gateway_url = url;
            }
            if let Some(attempts) = max_attempts {
                config.max_attempts = attempts;
            }
            if let Some(secs) = retry_delay_secs {
                config.retry_delay = Duration::from_secs(secs);
            }

            let params = GenerationParams {
                prompt,
                negative_prompt,
                width,
                height,
                num_inference_steps: steps,
                guidance_scale: guidance,
                seed,
            };
            run_generate(&config, params, &output, offline).await
        }
        Command::Demo {
            width,
            height,
            output,
        } => driver::demo_to_file(width, height, &output)
            .map(|bytes| println!("Saved {} ({bytes} bytes)", output.display()))
            .context("Demo failed"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "sdgen failed");
            eprintln!("sdgen: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_generate(
    config: &ClientConfig,
    params: GenerationParams,
    output: &std::path::Path,
    offline: bool,
) -> anyhow::Result<()> {
    let request = JobRequest::new(params).context("Invalid generation parameters")?;
    let policy = config.retry_policy().context("Invalid retry policy")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, cancelling job wait");
            cancel.cancel();
        }
    });

    let service: Arc<dyn RemoteService> = if offline {
        tracing::info!("Using in-process service");
        Arc::new(
            InMemoryService::new()
                .with_status_script([Ok(RemoteStatus::Pending), Ok(RemoteStatus::Completed)]),
        )
    } else {
        let api = GatewayApi::with_timeout(config.gateway_url.clone(), config.request_timeout)
            .context("Failed to build gateway client")?;
        tracing::info!(gateway = %api.base_url(), "Using gateway");
        Arc::new(api)
    };

    let mut client = JobClient::new(service).with_max_payload_bytes(config.max_payload_bytes);
    match driver::generate_to_file(&mut client, request, policy, &cancel, output).await {
        Ok(outcome) => {
            println!(
                "Saved {} ({} bytes, job {}, {})",
                output.display(),
                outcome.bytes_written,
                outcome.handle,
                outcome.source.as_str(),
            );
            Ok(())
        }
        Err(e) => {
            let kind = e.kind();
            Err(anyhow::Error::new(e).context(format!("{kind} stage failed")))
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sdgen=info,sdgen_cli=info,sdgen_client=info".into());

    let (plain, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
