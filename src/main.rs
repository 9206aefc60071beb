use color_eyre::eyre::{Result, WrapErr, bail};
use std::time::Duration;
use tcpcom::client::{ClientConfigBuilder, TcpClient};
use tcpcom::http::{HttpConfig, HttpResponse, HttpServer};
use tcpcom::server::{ServerConfig, ServerState, TcpServer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const USAGE: &str = "Usage:
  tcpcom server [port] [--timeout SECS] [--verbose]
  tcpcom client <host> <port> [--verbose]
  tcpcom http [port] [--verbose]
  tcpcom version";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let timeout_secs = option_value(&args, "--timeout")
        .map(|v| v.parse::<i64>().wrap_err("Invalid --timeout value"))
        .transpose()?
        .unwrap_or(0);
    let positional: Vec<&str> = positional_args(&args);

    // Initialize logging
    let filter = if verbose { "tcpcom=debug" } else { "tcpcom=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match positional.first().copied().unwrap_or("server") {
        "server" => {
            let port = parse_port(positional.get(1), 22000)?;
            let config = ServerConfig::new(port)
                .with_timeout_secs(timeout_secs)
                .with_verbose(verbose);
            run_echo_server(config).await
        }
        "client" => {
            let (Some(host), Some(port)) = (positional.get(1), positional.get(2)) else {
                bail!("{USAGE}");
            };
            let port = parse_port(Some(port), 22000)?;
            run_client(host, port, verbose).await
        }
        "http" => {
            let port = parse_port(positional.get(1), 8080)?;
            run_http_server(HttpConfig::new(port).with_verbose(verbose)).await
        }
        "version" => {
            println!("tcpcom {}", tcpcom::VERSION);
            Ok(())
        }
        other => bail!("Unknown mode: {other}\n{USAGE}"),
    }
}

async fn run_echo_server(config: ServerConfig) -> Result<()> {
    info!(address = %config.bind_addr, timeout = ?config.idle_timeout, "Starting echo server");

    let server = TcpServer::start(config, |server, state| {
        println!("{state}");
        if let ServerState::Message(msg) = state {
            server.send_message(msg);
        }
    })
    .await;

    if !server.is_running() {
        bail!("Port is in use");
    }
    server.run_until_ctrl_c().await.wrap_err("Failed to run echo server")
}

async fn run_client(host: &str, port: u16, verbose: bool) -> Result<()> {
    let config = ClientConfigBuilder::new().verbose(verbose).build();
    let client = TcpClient::with_config(host, port, config, |_, state| println!("{state}"));
    client
        .connect(Duration::from_secs(10))
        .await
        .wrap_err_with(|| format!("Failed to connect to {host}:{port}"))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !client.is_connected() {
            break;
        }
        match client.send_message(line, Duration::from_secs(2)).await {
            Some(reply) => println!("reply: {reply}"),
            None => println!("no reply"),
        }
    }

    client.disconnect();
    Ok(())
}

async fn run_http_server(config: HttpConfig) -> Result<()> {
    info!(address = %config.bind_addr, "Starting HTTP server");

    let server = HttpServer::start(config, |request| {
        let params: Vec<String> = request
            .params
            .iter()
            .map(|(k, v)| format!("<li>{k} = {v}</li>"))
            .collect();
        Ok(HttpResponse::new(format!(
            "<html><body><p>{} requested {}</p><ul>{}</ul></body></html>",
            request.client_ip,
            request.path,
            params.join("")
        )))
    })
    .await;

    if !server.is_running() {
        bail!("Port is in use");
    }
    tokio::signal::ctrl_c().await?;
    server.terminate();
    server.wait().await;
    Ok(())
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn positional_args(args: &[String]) -> Vec<&str> {
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--timeout" => {
                iter.next();
            }
            a if a.starts_with('-') => {}
            a => positional.push(a),
        }
    }
    positional
}

fn parse_port(arg: Option<&&str>, default: u16) -> Result<u16> {
    match arg {
        Some(port) => port.parse().wrap_err_with(|| format!("Invalid port: {port}")),
        None => Ok(default),
    }
}
