use std::process::ExitCode;

use aadclient::{Error, Settings};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    let settings = Settings::load()?;
    let outcome = aadclient::run(&settings).await?;

    println!(
        "Access token: {}",
        outcome.access_token.secret().expose_secret()
    );
    for (path, response) in &outcome.responses {
        println!(
            "Obtained response from secured endpoint {}: {}",
            path,
            serde_json::to_string(response)?
        );
    }

    Ok(())
}
