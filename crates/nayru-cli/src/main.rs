//! nayru CLI — standalone voice server.
//!
//! ```text
//! nayru serve --kokoro-url http://localhost:8880 [--port 2003] [--voice af_heart]
//! nayru speak "hello world" [--server http://localhost:2003]
//! nayru stop / skip / pause / resume / status [--server ...]
//! ```
//!
//! `serve` runs the engine and HTTP API; every other subcommand is a thin
//! client against a running server. Exit codes: 0 success, 1 server
//! unreachable or non-success response, 2 invalid arguments.

use clap::{Parser, Subcommand};

use nayru_lib::nayru_core::types::{TtsConfig, MAX_SPEED, MIN_SPEED};
use nayru_lib::server;
use nayru_lib::tts::TtsEngine;

const DEFAULT_SERVER: &str = "http://localhost:2003";

/// nayru — voice server with TTS playback
#[derive(Parser)]
#[command(name = "nayru", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the nayru voice server
    Serve {
        /// Listen port
        #[arg(long, default_value = "2003")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Default TTS voice
        #[arg(long, default_value = "af_heart")]
        voice: String,
        /// Upstream TTS server URL (no default — distributions disagree on ports)
        #[arg(long)]
        kokoro_url: String,
        /// TTS playback speed
        #[arg(long, default_value = "1.0", value_parser = parse_speed)]
        speed: f32,
    },
    /// Send text to the running server for speech
    Speak {
        /// Text to speak
        text: String,
        /// Server URL
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Stop all speech
    Stop {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Skip current clip
    Skip {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Pause playback
    Pause {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Resume playback
    Resume {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get server status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

fn parse_speed(raw: &str) -> Result<f32, String> {
    let speed: f32 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if (MIN_SPEED..=MAX_SPEED).contains(&speed) {
        Ok(speed)
    } else {
        Err(format!("speed must be within [{MIN_SPEED}, {MAX_SPEED}]"))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            host,
            voice,
            kokoro_url,
            speed,
        } => {
            let mut config = TtsConfig::new(kokoro_url);
            config.voice = voice;
            config.speed = speed;

            let engine = TtsEngine::new(config);
            let app = server::router(engine);

            let addr = format!("{host}:{port}");
            eprintln!("nayru listening on {addr}");

            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("nayru: failed to bind {addr}: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("nayru: server error: {e}");
                std::process::exit(1);
            }
        }

        Command::Speak { text, server } => {
            let body = serde_json::json!({ "text": text });
            post_json(&server, "speak", Some(body)).await;
        }

        Command::Stop { server } => post_json(&server, "stop", None).await,
        Command::Skip { server } => post_json(&server, "skip", None).await,
        Command::Pause { server } => post_json(&server, "pause", None).await,
        Command::Resume { server } => post_json(&server, "resume", None).await,

        Command::Status { server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/status"))
                .send()
                .await;
            finish(resp).await;
        }
    }
}

/// POST to an endpoint and exit with the response's fate.
async fn post_json(server: &str, endpoint: &str, body: Option<serde_json::Value>) {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{server}/{endpoint}"));
    if let Some(body) = body {
        req = req.json(&body);
    }
    finish(req.send().await).await;
}

/// Print the response body; exit 1 on transport failure or non-2xx.
async fn finish(resp: Result<reqwest::Response, reqwest::Error>) {
    match resp {
        Ok(resp) => {
            let ok = resp.status().is_success();
            println!("{}", resp.text().await.unwrap_or_default());
            if !ok {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("nayru: request failed: {e}");
            std::process::exit(1);
        }
    }
}
