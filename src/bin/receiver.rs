//! PCM Stream Receiver
//!
//! Receives the stream from the configured transport and plays it on the
//! configured output. Usage: `receiver [config.toml]`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcm_stream_receiver::{
    audio::device::list_output_devices,
    config::{AppConfig, OutputConfig, OutputKind, TransportConfig, TransportKind},
    receiver::Receiver,
    sink::{
        BlockingSink, CallbackSink, CpalBlockingDevice, CpalRealtimeBackend, PlaybackSink,
        RawDevice,
    },
    transport::{
        udp::UdpMode, CaptureSource, ChunkSource, Interface, PcapFileReader, ShmemSource,
        UdpSource,
    },
};

type BoxedSource = Box<dyn ChunkSource + Send>;

fn open_source(config: &TransportConfig) -> Result<BoxedSource> {
    let source: BoxedSource = match config.kind {
        TransportKind::Unicast => Box::new(UdpSource::bind(
            UdpMode::Unicast,
            &config.interface(),
            config.port,
            config.idle_timeout(),
        )?),
        TransportKind::Multicast => Box::new(UdpSource::bind(
            UdpMode::Multicast {
                group: config.multicast_group,
            },
            &config.interface(),
            config.port,
            config.idle_timeout(),
        )?),
        TransportKind::SharedMemory => {
            let path = config
                .shmem_path
                .as_ref()
                .context("shared-memory transport needs shmem_path")?;
            Box::new(ShmemSource::open(
                path,
                config.poll_interval(),
                config.idle_timeout(),
            )?)
        }
        TransportKind::Capture => match (&config.capture_path, config.interface()) {
            (Some(path), _) => {
                let reader = PcapFileReader::open(path)?.with_idle_wait(config.idle_timeout());
                Box::new(CaptureSource::new(reader, config.port))
            }
            (None, Interface::Name(name)) => open_live_capture(&name, config)?,
            (None, _) => anyhow::bail!("capture transport needs capture_path or an interface name"),
        },
    };
    Ok(source)
}

#[cfg(target_os = "linux")]
fn open_live_capture(interface: &str, config: &TransportConfig) -> Result<BoxedSource> {
    let capture = pcm_stream_receiver::transport::LiveCapture::open(interface, config.idle_timeout())?;
    Ok(Box::new(CaptureSource::new(capture, config.port)))
}

#[cfg(not(target_os = "linux"))]
fn open_live_capture(interface: &str, _config: &TransportConfig) -> Result<BoxedSource> {
    anyhow::bail!("live capture on {} needs Linux; replay a capture_path instead", interface)
}

fn open_sink(config: &OutputConfig) -> Result<PlaybackSink> {
    let sink = match config.kind {
        OutputKind::Raw => BlockingSink::new(
            Box::new(RawDevice::stdout()),
            config.target_latency_ms,
        )
        .into(),
        OutputKind::Device => BlockingSink::new(
            Box::new(CpalBlockingDevice::new(config.device.clone())),
            config.target_latency_ms,
        )
        .into(),
        OutputKind::Realtime => {
            let backend = CpalRealtimeBackend::new(config.device.as_deref())?;
            tracing::info!("Audio host: {}", CpalRealtimeBackend::host_name());
            CallbackSink::new(
                Box::new(backend),
                config.target_latency_ms,
                config.auto_connect,
            )
            .into()
        }
    };
    Ok(sink)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout may carry raw PCM, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting PCM stream receiver");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    config.validate()?;

    if config.output.kind != OutputKind::Raw {
        for device in list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            tracing::info!(
                "Output device {}{}: rates {:?}, channels {:?}",
                device.name,
                default_marker,
                device.sample_rates,
                device.channels
            );
        }
    }

    let source = open_source(&config.transport).context("opening transport")?;
    let sink = open_sink(&config.output).context("opening output")?;

    let mut receiver = Receiver::new(source, sink);
    let shutdown = receiver.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    tokio::task::spawn_blocking(move || receiver.run())
        .await
        .context("receiver thread panicked")??;

    Ok(())
}
