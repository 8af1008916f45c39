//! Service manager readiness notification.

use std::time::Duration;

use anyhow::{Context, Result};

const NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Send `state` to the socket named by `NOTIFY_SOCKET`.
///
/// Returns `Ok(false)` when no socket is configured.
pub fn notify(state: &str) -> Result<bool> {
    let Some(path) = std::env::var_os(NOTIFY_SOCKET) else {
        return Ok(false);
    };
    send(&path.to_string_lossy(), state)?;
    Ok(true)
}

#[cfg(unix)]
fn send(path: &str, state: &str) -> Result<()> {
    use std::os::unix::net::UnixDatagram;

    let socket = UnixDatagram::unbound().context("create notify socket")?;
    if let Some(name) = path.strip_prefix('@') {
        return send_abstract(&socket, name, state);
    }
    socket
        .send_to(state.as_bytes(), path)
        .with_context(|| format!("send {state} to {path}"))?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &std::os::unix::net::UnixDatagram, name: &str, state: &str) -> Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())
        .with_context(|| format!("abstract notify socket @{name}"))?;
    socket
        .send_to_addr(state.as_bytes(), &addr)
        .with_context(|| format!("send {state} to @{name}"))?;
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn send_abstract(_socket: &std::os::unix::net::UnixDatagram, name: &str, _state: &str) -> Result<()> {
    Err(anyhow::anyhow!("abstract notify socket @{name} is only supported on linux"))
}

#[cfg(not(unix))]
fn send(path: &str, _state: &str) -> Result<()> {
    Err(anyhow::anyhow!("notify socket {path} requires a unix platform"))
}

/// Log the outcome of a notification; failures never stop the server.
pub fn notify_logged(state: &str) {
    match notify(state) {
        Ok(true) => tracing::info!(state, "service manager notified"),
        Ok(false) => tracing::info!(state, "NOTIFY_SOCKET not set; skipping notification"),
        Err(err) => tracing::warn!(state, error = %format!("{err:#}"), "service notification failed"),
    }
}

/// Block until `url` answers any HTTP request, retrying every `interval`.
pub async fn wait_for_backend(url: &str, interval: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("build readiness client")?;
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match client.get(url).send().await {
            Ok(resp) => {
                tracing::info!(url, status = resp.status().as_u16(), attempts, "backend reachable");
                return Ok(());
            }
            Err(err) => {
                if attempts == 1 {
                    tracing::info!(url, "waiting for backend");
                }
                tracing::debug!(url, attempts, error = %err, "backend not reachable yet");
            }
        }
        tokio::time::sleep(interval).await;
    }
}
