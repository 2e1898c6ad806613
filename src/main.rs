use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use office_npcs::config::{self, Config};
use office_npcs::dialogue::{
    DialogueController, DialogueInput, DialogueState, InputMode, RelayVoicePipeline, WhatlangDetector,
};
use office_npcs::office::{Office, OfficeCommand, parse_command};
use office_npcs::voice::{
    AudioCapture, AudioPlayback, DecodedAudio, OpenAiSpeech, WhisperTranscriber, sine_tone, write_tone_wav,
};
use office_npcs::{OpenAiChat, RelayServer, RelayServices};

/// Office NPCs - talk to the HR director and the CEO, by text or voice
#[derive(Parser)]
#[command(name = "office-npcs", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/office-npcs/config.toml)
    #[arg(short, long, env = "OFFICE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice relay server
    Relay {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Walk the office and talk to the NPCs
    Play,
    /// Test microphone input and utterance detection
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Write a 2 second 440Hz test tone
    CreateAudio {
        /// Output WAV path
        #[arg(default_value = "test_audio.wav")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,office_npcs=info",
        1 => "info,office_npcs=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::CreateAudio { path } = &cli.command {
        write_tone_wav(path, 440.0, 2.0)?;
        println!("Created {}", path.display());
        return Ok(());
    }

    let file = cli
        .config
        .as_deref()
        .map_or_else(config::load_config_file, config::load_config_file_from);
    let config = Config::from_sources(file, |key| std::env::var(key).ok())?;

    match cli.command {
        Command::Relay { host, port } => relay(config, host, port).await,
        Command::Play => play(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::CreateAudio { .. } => Ok(()),
    }
}

async fn relay(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.relay.host = host;
    }
    if let Some(port) = port {
        config.relay.port = port;
    }

    let key = config.require_openai_key()?;
    let services = RelayServices {
        transcriber: Arc::new(WhisperTranscriber::new(
            key.clone(),
            &config.llm.base_url,
            &config.voice.stt_model,
        )?),
        chat: Arc::new(OpenAiChat::new(key.clone(), &config.llm.base_url, &config.llm.model)?),
        synthesizer: Arc::new(OpenAiSpeech::new(
            key,
            &config.llm.base_url,
            &config.voice.tts_model,
            config.voice.tts_speed,
        )?),
    };

    tracing::info!(
        addr = %config.relay.bind_addr(),
        model = %config.llm.model,
        stt = %config.voice.stt_model,
        tts = %config.voice.tts_model,
        "starting relay"
    );

    RelayServer::new(config.relay, services).run().await?;
    Ok(())
}

async fn play(config: Config) -> anyhow::Result<()> {
    let key = config.require_openai_key()?;
    let chat = Arc::new(OpenAiChat::new(key, &config.llm.base_url, &config.llm.model)?);
    let detector = Box::new(WhatlangDetector::new(&config.dialogue.expected_language)?);
    let voice = Arc::new(RelayVoicePipeline::new(config.client.clone(), config.capture.clone()));

    let mut dialogue = DialogueController::new(chat, detector, voice, Handle::current());
    let mut office = Office::new(&config.dialogue);

    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    print_help();

    let tick = Duration::from_secs_f64(1.0 / f64::from(config.dialogue.frame_rate));
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut view = View::default();

    'game: loop {
        ticker.tick().await;

        loop {
            let line = match lines.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'game,
            };
            if !handle_line(&line, &mut office, &mut dialogue) {
                break 'game;
            }
        }

        dialogue.update();
        if let Some(role) = office.check_interactions(&mut dialogue, Instant::now()) {
            let persona = role.persona();
            println!("\n-- {} ({}) --", persona.name, persona.title);
            println!("   type to talk, V toggles voice, Q ends the conversation");
        }
        view.render(&dialogue);
    }

    if dialogue.is_active() {
        let command = dialogue.exit();
        office.apply(&command);
    }
    println!("Goodbye.");
    Ok(())
}

/// Apply one line of input; returns false to quit
fn handle_line(line: &str, office: &mut Office, dialogue: &mut DialogueController) -> bool {
    let in_dialogue = dialogue.is_active();

    match parse_command(line, in_dialogue) {
        None => println!("?  w/a/s/d to walk, turn <deg>, look, quit"),
        Some(OfficeCommand::Quit) => return false,
        Some(OfficeCommand::Walk(steps)) => {
            for (dx, dz) in steps {
                office.player.step(dx, dz);
            }
        }
        Some(OfficeCommand::Turn(degrees)) => office.player.turn(degrees),
        Some(OfficeCommand::Look) => {
            let [x, _, z] = office.player.position;
            println!("You are at ({x:.1}, {z:.1}) facing {:.0} degrees.", office.player.yaw);
            for npc in office.npcs() {
                let persona = npc.role.persona();
                let [nx, _, nz] = npc.position;
                println!("  {} ({}) stands at ({nx:.1}, {nz:.1})", persona.name, persona.title);
            }
        }
        Some(OfficeCommand::Say(text)) => {
            if dialogue.state() == DialogueState::Active(InputMode::Voice) {
                println!("(voice mode is on; press V to type)");
            } else {
                for c in text.chars() {
                    dialogue.handle_input(DialogueInput::Char(c));
                }
                dialogue.handle_input(DialogueInput::Submit);
            }
        }
        Some(OfficeCommand::ToggleVoice) => {
            dialogue.handle_input(DialogueInput::ToggleVoice);
        }
        Some(OfficeCommand::EndConversation) => {
            if let Some(command) = dialogue.handle_input(DialogueInput::Exit) {
                office.apply(&command);
                println!("-- conversation ended --");
            }
        }
    }
    true
}

/// Prints dialogue output when it changes
#[derive(Default)]
struct View {
    npc_message: String,
    notice: Option<String>,
    awaiting: bool,
}

impl View {
    fn render(&mut self, dialogue: &DialogueController) {
        if !dialogue.is_active() {
            self.npc_message.clear();
            self.notice = None;
            self.awaiting = false;
            return;
        }

        if dialogue.is_awaiting_reply() && !self.awaiting {
            println!("   ...");
        }
        self.awaiting = dialogue.is_awaiting_reply();

        if dialogue.npc_message() != self.npc_message {
            self.npc_message = dialogue.npc_message().to_string();
            let name = dialogue.current_npc().map_or("NPC", |role| role.persona().name);
            println!("{name}: {}", self.npc_message);
        }

        let notice = dialogue.notice().map(str::to_string);
        if notice != self.notice {
            if let Some(text) = &notice {
                println!("[{text}]");
            }
            self.notice = notice;
        }
    }
}

fn print_help() {
    println!("Welcome to the office.");
    println!("Walk with w/a/s/d (e.g. 'www'), turn with 'turn 90', 'look' to get your bearings, 'quit' to leave.");
    println!("Walk up to Sarah (HR) or Michael (CEO) to start a conversation.\n");
}

async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone; each detected utterance is listed.\n");

    let (tx, mut rx) = mpsc::channel(config.capture.queue_capacity);
    let mut capture = AudioCapture::new(config.capture.clone());
    capture.start(tx)?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz, threshold: {}", config.capture.silence_threshold);
    println!("---");

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    let mut count = 0usize;

    loop {
        tokio::select! {
            () = &mut deadline => break,
            Some(utterance) = rx.recv() => {
                count += 1;
                print_utterance(count, utterance.samples(), sample_rate);
            }
        }
    }

    let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
    while let Ok(utterance) = rx.try_recv() {
        count += 1;
        print_utterance(count, utterance.samples(), sample_rate);
    }

    println!("\n---");
    if count == 0 {
        println!("No speech detected. Check your input device and levels,");
        println!("or lower capture.silence_threshold in the config file.");
    } else {
        println!("{count} utterance(s) detected. Your mic is working!");
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn print_utterance(index: usize, samples: &[f32], sample_rate: u32) {
    let seconds = samples.len() as f32 / sample_rate as f32;
    let peak = office_npcs::voice::segmenter::peak_amplitude(samples);
    println!("[{index:3}] {seconds:.2}s | peak {peak:.3}");
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000;
    let clip = DecodedAudio {
        samples: sine_tone(440.0, 2.0, sample_rate).into_iter().map(|s| s * 0.3).collect(),
        sample_rate,
    };

    let playback = AudioPlayback::new();
    tokio::task::spawn_blocking(move || playback.play_blocking(&clip)).await??;

    println!("Done! Did you hear the tone?");
    Ok(())
}
