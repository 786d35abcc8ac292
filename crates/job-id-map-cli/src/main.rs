use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match job_id_map_cli::run() {
        Ok(code) => code,
        Err(error) => {
            let reason = format!("{error:#}");
            tracing::error!(%reason, "job-id-map failed");
            ExitCode::FAILURE
        }
    }
}
