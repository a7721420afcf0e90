//! runletctl - command-line client for a runlet server
//!
//! Authenticates with a client certificate and prints each response the way
//! a shell user expects: ids, list lines, raw log output.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use runlet_protocol::{
    ErrorResponse, HealthResponse, ListResponse, LogResponse, ProcessRef, PurgeResponse,
    StartRequest, StatusResponse, StopResponse,
};
use serde::de::DeserializeOwned;

const DEFAULT_SERVER_URL: &str = "https://localhost:8443";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let client = RunletClient::new(&cli.server, &cli.cert, &cli.key, &cli.ca)?;

    match cli.command {
        Command::Start { command } => handle_start(&client, &command, cli.json).await,
        Command::Stop { id } => handle_stop(&client, &id, cli.json).await,
        Command::List => handle_list(&client, cli.json).await,
        Command::Status { id } => handle_status(&client, &id, cli.json).await,
        Command::Log { id } => handle_log(&client, &id, cli.json).await,
        Command::Purge => handle_purge(&client, cli.json).await,
        Command::Health => handle_health(&client, cli.json).await,
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "runletctl",
    author,
    version,
    about = "Start, stop and inspect processes on a runlet server."
)]
struct Cli {
    /// Runlet server URL
    #[arg(long, short = 's', default_value = DEFAULT_SERVER_URL, env = "RUNLET_SERVER")]
    server: String,

    /// Client certificate (PEM)
    #[arg(long, default_value = "cert/cert.pem", env = "RUNLET_CLIENT_CERT")]
    cert: PathBuf,

    /// Client private key (PEM)
    #[arg(long, default_value = "cert/key.pem", env = "RUNLET_CLIENT_KEY")]
    key: PathBuf,

    /// Certificate used to verify the server (PEM)
    #[arg(long, default_value = "server_cert.pem", env = "RUNLET_SERVER_CA")]
    ca: PathBuf,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a command on the server
    Start {
        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Kill a running process
    Stop {
        /// Process identifier
        id: String,
    },
    /// List your processes
    List,
    /// Show how a process exited, or "active"
    Status {
        /// Process identifier
        id: String,
    },
    /// Print a process's combined output
    Log {
        /// Process identifier
        id: String,
    },
    /// Forget terminated processes
    Purge,
    /// Check that the server is up
    Health,
}

struct RunletClient {
    base_url: String,
    client: reqwest::Client,
}

impl RunletClient {
    fn new(base_url: &str, cert: &Path, key: &Path, ca: &Path) -> Result<Self> {
        let mut pem = read_file(cert)?;
        pem.extend_from_slice(b"\n");
        pem.extend(read_file(key)?);
        let identity = reqwest::Identity::from_pem(&pem).context("loading client identity")?;

        let ca = reqwest::Certificate::from_pem(&read_file(ca)?)
            .with_context(|| format!("parsing server certificate {}", ca.display()))?;

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .add_root_certificate(ca)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context("sending request to server")?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("sending request to server")?;
        decode(response).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("sending request to server")?;
        decode(response).await
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Decode a success body, or turn the server's error body into an error.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await.context("reading response body")?;

    if !status.is_success() {
        return match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(body) => Err(anyhow!("{}", body.error)),
            Err(_) => Err(anyhow!("server returned {status}")),
        };
    }

    serde_json::from_slice(&bytes).context("decoding server response")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

async fn handle_start(client: &RunletClient, command: &[String], json: bool) -> Result<()> {
    let request = StartRequest {
        command: command.join(" "),
    };
    let response: ProcessRef = client.post_json("/start", &request).await?;
    if json {
        return print_json(&response);
    }
    println!("{}", response.uuid);
    Ok(())
}

async fn handle_stop(client: &RunletClient, id: &str, json: bool) -> Result<()> {
    let request = ProcessRef {
        uuid: id.to_string(),
    };
    let response: StopResponse = client.post_json("/stop", &request).await?;
    if json {
        return print_json(&response);
    }
    println!("{}", response.status);
    Ok(())
}

async fn handle_list(client: &RunletClient, json: bool) -> Result<()> {
    let response: ListResponse = client.get("/list", &[]).await?;
    if json {
        return print_json(&response.processes);
    }
    for line in &response.list {
        println!("{line}");
    }
    Ok(())
}

async fn handle_status(client: &RunletClient, id: &str, json: bool) -> Result<()> {
    let response: StatusResponse = client.get("/status", &[("id", id)]).await?;
    if json {
        return print_json(&response);
    }
    match response.status {
        Some(state) => println!("{state}"),
        None => println!("active"),
    }
    Ok(())
}

async fn handle_log(client: &RunletClient, id: &str, json: bool) -> Result<()> {
    let response: LogResponse = client.get("/log", &[("id", id)]).await?;
    if json {
        return print_json(&response);
    }

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(response.log.as_bytes())
        .context("writing log output")?;
    stdout.flush().ok();
    if response.truncated {
        eprintln!("(output truncated by server)");
    }
    Ok(())
}

async fn handle_purge(client: &RunletClient, json: bool) -> Result<()> {
    let response: PurgeResponse = client.post("/purge").await?;
    if json {
        return print_json(&response);
    }
    println!("purged {} processes", response.purged);
    Ok(())
}

async fn handle_health(client: &RunletClient, json: bool) -> Result<()> {
    let response: HealthResponse = client.get("/health", &[]).await?;
    if json {
        return print_json(&response);
    }
    println!(
        "Server is running at {} (version {})",
        client.base_url, response.version
    );
    Ok(())
}
