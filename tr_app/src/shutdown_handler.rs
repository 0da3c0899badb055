use tokio_util::sync::CancellationToken;

/// Cancels `shutdown` on Ctrl+C
pub fn setup(shutdown: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    })
}
