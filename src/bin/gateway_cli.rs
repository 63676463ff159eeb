use std::io::{self, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use genai_gateway::GenerationGateway;
use genai_gateway::config::GatewayConfig;
use genai_gateway::core::traits::ProviderAdapter;
use genai_gateway::core::types::{
    Capability, ConversationTurn, GenerationOptions, TextFragment, TextRequest,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

struct CliConfig {
    system_prompt: String,
    model: Option<String>,
    max_output_tokens: Option<u32>,
    stream: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = parse_config(std::env::args().skip(1).collect())?;
    let gateway = GenerationGateway::from_config(GatewayConfig::from_env()?)?;

    eprintln!(
        "gateway_cli: default={}, stream={}, commands=/exit /quit /clear /image /speak /providers /catalog",
        gateway.routing().primary_for(Capability::Text),
        cli.stream
    );

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut speech_count = 0_u32;
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        let bytes = stdin.read_line(&mut input)?;
        if bytes == 0 {
            break;
        }

        let user_text = input.trim();
        if user_text.is_empty() {
            continue;
        }

        if user_text.eq_ignore_ascii_case("/exit") || user_text.eq_ignore_ascii_case("/quit") {
            break;
        }

        if user_text.eq_ignore_ascii_case("/clear") {
            history.clear();
            println!("(history cleared)");
            continue;
        }

        if user_text.eq_ignore_ascii_case("/catalog") {
            println!("{}", gateway.registry().catalog().export_catalog_json()?);
            continue;
        }

        if user_text.eq_ignore_ascii_case("/providers") {
            for capability in Capability::ALL {
                match gateway.select(capability).await {
                    Ok(adapter) => println!("{capability}: {} ({})", adapter.name(), adapter.id()),
                    Err(error) => println!("{capability}: {error}"),
                }
            }
            continue;
        }

        if let Some(prompt) = user_text.strip_prefix("/image ") {
            let envelope = gateway
                .generate_image(prompt.trim(), &GenerationOptions::default())
                .await;
            match envelope.into_result() {
                Ok(payload) => println!("image: {} base64 chars", payload.image.len()),
                Err(error) => eprintln!("[ERROR] {error}"),
            }
            continue;
        }

        if let Some(text) = user_text.strip_prefix("/speak ") {
            let envelope = gateway
                .generate_audio(text.trim(), &GenerationOptions::default())
                .await;
            match envelope.into_result() {
                Ok(payload) => {
                    speech_count += 1;
                    let path = format!("speech-{speech_count}.wav");
                    std::fs::write(&path, BASE64.decode(payload.audio)?)?;
                    println!("audio ({}) written to {path}", payload.mime_type);
                }
                Err(error) => eprintln!("[ERROR] {error}"),
            }
            continue;
        }

        let request = TextRequest::new(cli.system_prompt.clone(), history.clone(), user_text)
            .with_options(cli.options());

        let reply = if cli.stream {
            stream_reply(&gateway, request).await?
        } else {
            match gateway.generate_text(&request).await.into_result() {
                Ok(payload) => {
                    println!("{}", payload.text);
                    Some(payload.text)
                }
                Err(error) => {
                    eprintln!("[ERROR] {error}");
                    None
                }
            }
        };

        if let Some(reply) = reply {
            history.push(ConversationTurn::user(user_text));
            history.push(ConversationTurn::assistant(reply));
        }
    }

    Ok(())
}

async fn stream_reply(
    gateway: &GenerationGateway,
    request: TextRequest,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut stream = gateway.stream_text(request).await;
    let mut reply = String::new();

    while let Some(fragment) = stream.next().await {
        match fragment {
            TextFragment::Delta(text) => {
                print!("{text}");
                io::stdout().flush()?;
                reply.push_str(&text);
            }
            TextFragment::Error(error) => {
                println!();
                eprintln!("[ERROR] {error}");
                return Ok(None);
            }
        }
    }

    println!();
    Ok(Some(reply))
}

impl CliConfig {
    fn options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::default();
        if let Some(model) = &self.model {
            options = options.with_model(model.clone());
        }
        if let Some(max_output_tokens) = self.max_output_tokens {
            options = options.with_max_tokens(max_output_tokens);
        }
        options
    }
}

fn print_help() {
    println!(
        "\
gateway_cli

Usage:
  gateway_cli [--system <prompt>] [--model <model>] [--max-output-tokens <n>] [--no-stream]

Environment:
  AI_PROVIDER, AI_TEXT_PROVIDER, AI_IMAGE_PROVIDER, AI_AUDIO_PROVIDER
  FALLBACK_PROVIDERS (comma-separated)
  AI_REQUEST_TIMEOUT_MS, AI_STREAM_DELAY_MS
  OPENROUTER_API_KEY, DEEPSEEK_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, TOGETHER_API_KEY
  RUST_LOG (log filter, default warn)

Commands:
  /image <prompt>   generate an image
  /speak <text>     synthesize speech into speech-<n>.wav
  /providers        show which backend serves each capability
  /catalog          print the provider catalog as JSON
  /clear            clear conversation history
  /exit, /quit      leave"
    );
}

fn parse_config(args: Vec<String>) -> Result<CliConfig, Box<dyn std::error::Error>> {
    let mut config = CliConfig {
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        model: None,
        max_output_tokens: None,
        stream: true,
    };

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--system" => {
                let value = args.get(i + 1).ok_or("missing value for --system")?;
                config.system_prompt = value.clone();
                i += 2;
            }
            "--model" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --model")?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    return Err("--model must be non-empty".into());
                }
                config.model = Some(value);
                i += 2;
            }
            "--max-output-tokens" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --max-output-tokens")?;
                config.max_output_tokens = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| "--max-output-tokens must be a positive integer")?,
                );
                i += 2;
            }
            "--no-stream" => {
                config.stream = false;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    Ok(config)
}
