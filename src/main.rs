mod cli;

use cmafplay::{config, generate, server};
use cmafplay_media::Demuxer;
use cmafplay_playback::{
    CountingFrameSink, HttpFetcher, PassthroughDecodeService, PlaybackSession, SystemAudioOutput,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "cmafplay=trace,cmafplay_media=trace,cmafplay_playback=trace,tower_http=debug".to_string()
        } else {
            "cmafplay=debug,cmafplay_media=info,cmafplay_playback=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            directory,
            host,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(port, directory, host, cli.config.as_deref()))
        }
        Commands::Play { url } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play(&url, cli.config.as_deref()))
        }
        Commands::Probe { init, segments } => probe(&init, &segments),
        Commands::Generate {
            directory,
            segments,
            segment_duration,
            no_audio,
        } => {
            let options = generate::GenerateOptions {
                segments,
                segment_duration,
                audio: !no_audio,
                ..Default::default()
            };
            let stream = generate::generate_stream(&directory, &options)?;
            println!(
                "Wrote {} files to {} ({:.1}s, {} video / {} audio samples)",
                stream.files.len(),
                directory.display(),
                stream.duration_secs,
                stream.video_samples,
                stream.audio_samples
            );
            Ok(())
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

async fn serve(
    port: Option<u16>,
    directory: Option<PathBuf>,
    host: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Positional arguments override config
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(directory) = directory {
        config.server.directory = directory;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    config::validate_config(&config)?;

    server::start_server(&config.server).await
}

async fn play(url: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let url = Url::parse(url).with_context(|| format!("Invalid manifest URL: {}", url))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        on_signal.cancel();
    });

    let sink = CountingFrameSink::new();
    let session = PlaybackSession::new(
        Arc::new(HttpFetcher::new(config.player.request_timeout())),
        Arc::new(PassthroughDecodeService::new()),
        sink.clone(),
    )
    .with_audio_output(SystemAudioOutput::new())
    .with_config(config.player.session_config())
    .with_cancellation(cancel);

    tracing::info!("Playing {}", url);

    match session.play(&url).await {
        Ok(report) => {
            println!("{}", report);
            if let Some(ts) = sink.last_timestamp_us() {
                println!("last frame: {:.3}s", ts as f64 / 1_000_000.0);
            }
            Ok(())
        }
        Err(e) => match e.user_message() {
            Some(message) => anyhow::bail!(message),
            None => {
                tracing::info!("Playback cancelled");
                Ok(())
            }
        },
    }
}

fn probe(init: &Path, segments: &[PathBuf]) -> Result<()> {
    let data = std::fs::read(init).with_context(|| format!("Failed to read {:?}", init))?;

    let mut demuxer = Demuxer::new();
    let tracks = demuxer.parse_init(&data)?;

    println!("File: {}", init.display());
    match &tracks.video {
        Some(video) => println!(
            "Video: track {} {} {}x{} (timescale {})",
            video.track_id, video.codec, video.coded_width, video.coded_height, video.timescale
        ),
        None => println!("Video: none"),
    }
    match &tracks.audio {
        Some(audio) => println!(
            "Audio: track {} {} {} Hz {}ch (timescale {})",
            audio.track_id, audio.codec, audio.sample_rate, audio.channels, audio.timescale
        ),
        None => println!("Audio: none"),
    }
    for fallback in &tracks.fallbacks {
        println!("Fallback: {:?}", fallback);
    }

    for path in segments {
        let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let segment = demuxer.parse_media(&Bytes::from(data), None)?;

        print!(
            "\n{}: {} video, {} audio samples",
            path.display(),
            segment.video.len(),
            segment.audio.len()
        );
        if segment.dropped > 0 {
            print!(", {} dropped", segment.dropped);
        }
        println!();
        if let (Some(first), Some(last)) = (segment.video.first(), segment.video.last()) {
            println!(
                "  video {:.3}s - {:.3}s, {} key",
                first.timestamp_us as f64 / 1_000_000.0,
                (last.timestamp_us + last.duration_us) as f64 / 1_000_000.0,
                segment.video.iter().filter(|s| s.is_key()).count()
            );
        }
        for fallback in &segment.fallbacks {
            println!("  Fallback: {:?}", fallback);
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Directory: {}", config.server.directory.display());
            println!(
                "  Player: sync threshold {}ms, refresh {}ms",
                config.player.sync_threshold_ms, config.player.refresh_interval_ms
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
