//! Logs in from `MICLOUD_*` variables and prints the account's devices.
//!
//! ```text
//! MICLOUD_USERNAME=... MICLOUD_PASSWORD=... MICLOUD_REGION=de \
//!     RUST_LOG=micloud=debug cargo run --example list_devices
//! ```
use micloud_sdk::{MiCloudSdkClient, SdkError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SdkError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sdk = match MiCloudSdkClient::from_env().await {
        Ok(sdk) => sdk,
        Err(err) => {
            if let Some(url) = err.two_factor_url() {
                eprintln!("open {url} in a browser to confirm this login, then retry");
            }
            return Err(err);
        }
    };

    for device in sdk.get_devices().await? {
        let state = if device.is_online { "online" } else { "offline" };
        println!(
            "{:<12} {:<32} {:<28} {}",
            device.did, device.name, device.model, state
        );
    }
    Ok(())
}
