use srf02_ranger::bridge::PollContext;
use srf02_ranger::engine::MeasurementEngine;
use srf02_ranger::sensor::RangeBus;
use srf02_ranger::sensor::mock::MockBus;
use srf02_ranger::{api, config};
use std::net::SocketAddr;

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "srf02d starting"
    );

    let bus = open_bus(&config)?;
    let engine = MeasurementEngine::new(bus, config.engine_settings());
    match engine.probe() {
        Ok(revision) => tracing::info!(
            bus = config.i2c_bus(),
            address = format_args!("{:#04x}", config.i2c_address()),
            revision = revision,
            "SRF02 attached"
        ),
        Err(err) => tracing::warn!(error = %err, "SRF02 did not answer probe, continuing"),
    }

    let poll = PollContext::for_engine(&engine);
    let waker = poll.waker();
    if config.continuous_on_start() {
        poll.activate(srf02_ranger::events::PROXIMITY_CHANNEL, true)?;
    }

    let app = api::router(api::ApiState::new(engine.clone(), poll));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    waker.shutdown();
    engine.detach()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn open_bus(config: &config::Config) -> Result<Box<dyn RangeBus>, srf02_ranger::error::AppError> {
    if config.simulate() {
        tracing::warn!("Simulated SRF02 in use, readings are synthetic");
        return Ok(Box::new(MockBus::looping(SIMULATED_SWEEP_CM)));
    }

    #[cfg(target_os = "linux")]
    {
        use srf02_ranger::sensor::srf02::Srf02Bus;
        let bus = Srf02Bus::open(config.i2c_bus(), config.i2c_address())?;
        Ok(Box::new(bus))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(srf02_ranger::error::AppError::I2c(
            "SRF02 access requires Linux, enable [bus].simulate".to_string(),
        ))
    }
}

const SIMULATED_SWEEP_CM: [u16; 8] = [120, 118, 115, 96, 80, 82, 101, 119];

#[cfg(test)]
mod tests {
    use super::config;

    #[test]
    fn default_config_is_valid_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _config = config::load_default()?;
        Ok(())
    }
}
