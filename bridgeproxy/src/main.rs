use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config, args.overrides.as_deref())?;
    config.validate()?;

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_signal.cancel();
        });
    }

    server::serve(server::ServeConfig {
        listen_address: args.listen,
        config,
        shutdown_signal,
        log_filter: args.log_filter,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
    .await
}
