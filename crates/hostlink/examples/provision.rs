//! Provision a freshly booted host
//!
//! Waits for the host to accept SSH, runs a setup script on it and
//! optionally drops into an interactive shell:
//!
//! ```text
//! RUST_LOG=hostlink=debug cargo run --example provision -- \
//!     substance@10.0.0.5 ~/.substance/id_rsa bootstrap.sh [--shell]
//! ```

use anyhow::{anyhow, bail, Result};
use hostlink::{ConnectOptions, ConnectionManager, RetryPolicy};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: provision <[user@]host[:port]> <private-key> <script> [--shell]");
    }
    let shell = args.iter().any(|arg| arg == "--shell");

    let options = ConnectOptions::new(&args[0], &args[1]);
    let policy = RetryPolicy::new(200, Duration::from_secs(120));

    println!("🚀 Waiting for {} to accept SSH...", options.hostname);
    let mut manager = ConnectionManager::ssh2();
    let mut session = manager
        .connect_with_policy(&options, &policy)
        .into_result()
        .map_err(|e| anyhow!("could not reach {}: {}", options.hostname, e))?;
    println!("✅ Connected (session {})", session.id());

    let result = session
        .run_script(&args[2], true)
        .catch_error(hostlink::ErrorKind::FileTransfer, |err| {
            hostlink::Outcome::Failure(hostlink::LinkError::Configuration(format!(
                "could not upload {}: {}",
                args[2], err
            )))
        })
        .into_result()?;
    info!("Script finished with {:?}", result.exit_code());

    if !result.success() {
        println!("❌ Script exited with {:?}", result.exit_code());
        println!("{}", result.stderr().text());
    } else {
        println!("✅ Script completed");
    }

    if shell {
        session.interactive().into_result()?;
    }

    session.close().into_result()?;
    Ok(())
}
