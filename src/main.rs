use std::path::PathBuf;

use clap::Parser;
use gatewarden::cli::{Cli, Commands};
use gatewarden::error::GatewardenError;
use gatewarden::policy::reload;
use gatewarden::proxy::{ProxyServer, Runtime, SHUTDOWN_GRACE};
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            project_file,
            public_dir,
        } => cmd_start(project_file, public_dir).await?,
        Commands::Status => cmd_status().await?,
        Commands::Reload => cmd_reload().await?,
    }

    Ok(())
}

fn env_port(name: &str, default: u16) -> anyhow::Result<u16> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid port: {}", name, value)),
        _ => Ok(default),
    }
}

async fn cmd_start(project_file: PathBuf, public_dir: PathBuf) -> anyhow::Result<()> {
    let proxy_port = env_port("PROXY_PORT", 3000)?;
    let server_port = env_port("SERVER_PORT", 4000)?;
    let current_project = std::env::var("CURRENT_PROJECT")
        .map_err(|_| GatewardenError::ConfigEnvVar("CURRENT_PROJECT".to_string()))?;

    println!("Gatewarden starting for project: {current_project}");
    println!("Project file: {}", project_file.display());
    println!("Origin: localhost:{server_port}");

    let runtime = Runtime::new(
        current_project,
        proxy_port,
        server_port,
        project_file,
        public_dir,
    );

    if let Err(e) = runtime.policy.reload() {
        warn!("failed to load endpoints (starting with none): {}", e);
    }
    println!("Endpoints loaded: {}", runtime.policy.endpoints().len());

    // Keep the watcher alive for the life of the server.
    let _watcher = match reload::start_file_watcher(runtime.policy.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("project file watcher unavailable: {}", e);
            None
        }
    };

    let server = ProxyServer::new(runtime.clone());
    let addr = server.start(&format!("0.0.0.0:{proxy_port}")).await?;
    println!("Proxy running on {addr}");

    let mut shutdown = runtime.shutdown_signal();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = shutdown.changed() => {
            // Disabled via the control plane; let the listener drain.
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            println!("Proxy disabled, exiting.");
        }
    }
    Ok(())
}

fn control_plane_url(path: &str) -> anyhow::Result<String> {
    let proxy_port = env_port("PROXY_PORT", 3000)?;
    Ok(format!("http://127.0.0.1:{proxy_port}{path}"))
}

async fn cmd_status() -> anyhow::Result<()> {
    let url = control_plane_url("/api/proxy/status")?;
    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response.json().await?;
            println!("Gatewarden Status");
            println!("─────────────────");
            println!("Project:     {}", status["project"].as_str().unwrap_or("?"));
            println!("Enabled:     {}", status["enabled"]);
            println!("Proxy port:  {}", status["proxyPort"]);
            println!("Origin port: {}", status["serverPort"]);
        }
        Err(_) => {
            println!("No running Gatewarden instance found at {url}.");
            println!("Run 'gatewarden start' to begin serving.");
        }
    }
    Ok(())
}

async fn cmd_reload() -> anyhow::Result<()> {
    let url = control_plane_url("/api/reload-endpoints")?;
    let client = reqwest::Client::new();
    match client.post(&url).send().await {
        Ok(response) if response.status().is_success() => {
            println!("Endpoints reloaded.");
        }
        Ok(response) => {
            anyhow::bail!("reload failed: {}", response.text().await.unwrap_or_default());
        }
        Err(_) => {
            anyhow::bail!("no running Gatewarden instance found at {url}");
        }
    }
    Ok(())
}
