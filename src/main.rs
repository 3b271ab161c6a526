use clap::Parser;
use icewarden_lib::turn::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    // RUST_LOG wins over --debug
    let default_level = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    settings.validate()?;

    // Media sessions are provided by an embedding application; the binary
    // provisions and serves the RTC config on its own.
    icewarden_lib::run(settings, None).await
}
