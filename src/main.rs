use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_session::native::{CpalCaptureSource, CpalSinkFactory};
use voice_session::types::Speaker;
use voice_session::{utils, Config, SessionController, WsConnector};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// WebSocket endpoint of the voice service
    #[arg(long)]
    url: Option<String>,
    /// Microphone to capture from
    #[arg(long)]
    input_device: Option<String>,
    /// Device to play replies on
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

const HELP: &str = "commands: p = pause/resume microphone, s = skip audio, q = end conversation";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if args.list_devices {
        println!("Available inputs:\n{}", utils::device::get_available_inputs()?);
        println!("Available outputs:\n{}", utils::device::get_available_outputs()?);
        return Ok(());
    }

    if let Some(url) = args.url {
        config.set_url(url).context("Invalid --url")?;
    }
    if args.input_device.is_some() {
        config.input_device = args.input_device;
    }
    if args.output_device.is_some() {
        config.output_device = args.output_device;
    }

    let mut controller = SessionController::new(
        WsConnector::new(config.channel_config()),
        CpalCaptureSource::new(
            config.input_device.clone(),
            config.wire_sample_rate,
            config.chunk_ms,
        ),
        CpalSinkFactory::new(config.output_device.clone(), config.wire_sample_rate),
    );

    controller
        .start()
        .await
        .context("Could not start the conversation")?;
    println!("connected to {}, listening. {}", config.url, HELP);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut printed = 0;
    let mut shown_transcript = String::new();

    while controller.is_running() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => controller.end(),
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(command)) => match command.trim() {
                    "p" => {
                        if controller.toggle_listening() {
                            println!("[listening]");
                        } else {
                            println!("[paused]");
                        }
                    }
                    "s" => controller.skip_audio(),
                    "q" => controller.end(),
                    "" => {}
                    _ => println!("{}", HELP),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            event = controller.next_event() => {
                if let Some(event) = event {
                    controller.handle_event(event);
                }
            }
        }

        let conversation = controller.conversation();
        for turn in &conversation.turns()[printed..] {
            let who = match turn.speaker() {
                Speaker::User => "you",
                Speaker::Assistant => "assistant",
            };
            println!("{}: {}", who, turn.text());
        }
        printed = conversation.turns().len();

        let transcript = conversation.current_transcript();
        if transcript != shown_transcript {
            if !transcript.is_empty() {
                println!("  ... {}", transcript);
            }
            shown_transcript = transcript;
        }
    }

    if let Some(reason) = controller.last_end() {
        println!("conversation ended: {:?}", reason);
    }
    Ok(())
}
