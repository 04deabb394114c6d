use subscription_module::service::{run_service, ServiceConfig};
use subscription_module::BoxError;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env()?;
    info!(
        "starting subscription bot (trial {} days, channel {})",
        config.lifecycle.trial_length.num_days(),
        config.channel_id
    );
    run_service(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!("cannot listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
