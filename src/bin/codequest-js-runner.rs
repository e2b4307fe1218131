//! Runs one script for `ProcessEngine`: reads a request from stdin, evaluates
//! it and prints the reply on stdout. The parent kills this process when the
//! run overstays its time limit.

use anyhow::Context as _;
use codequest::boa::run_script;
use codequest::process::{RunnerReply, RunnerRequest};
use std::io::{Read, Write};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("reading request")?;
    let RunnerRequest { script, limits } =
        serde_json::from_slice(&raw).context("decoding request")?;

    // Boa recurses on the native stack, so the run gets a thread sized by the limits.
    let worker = std::thread::Builder::new()
        .name("codequest-js".to_string())
        .stack_size(limits.thread_stack_bytes)
        .spawn(move || run_script(&script, &limits))
        .context("spawning interpreter thread")?;
    let outcome = worker
        .join()
        .map_err(|_| anyhow::anyhow!("interpreter thread panicked"))?;
    if let Err(e) = &outcome {
        tracing::debug!("script failed: {}", e);
    }

    let reply = serde_json::to_vec(&RunnerReply::from(outcome))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&reply)?;
    stdout.flush()?;
    Ok(())
}
