use std::sync::Arc;

use serde::Serialize;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use webm_bus::{
    demux::SourceFile,
    pipeline::{Collaborators, Completion, Pipeline, StartRequest, base_name},
};

use crate::{config::AppConfig, preview::Preview};

mod config;
mod preview;
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
mod uploader;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("webm_bus", log::LevelFilter::Debug)
        .filter_module("lowres_upload", log::LevelFilter::Debug)
        .init();
}

#[cfg(feature = "ffmpeg")]
fn collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    use webm_bus::{
        ffmpeg::{FfmpegCodecs, FfmpegDemuxerFactory},
        webm::WebmMuxerFactory,
    };

    webm_bus::init()?;
    Ok(Collaborators {
        codecs: Arc::new(FfmpegCodecs::new(config.encoder().hardware_acceleration)),
        demuxers: Arc::new(FfmpegDemuxerFactory),
        muxers: Arc::new(WebmMuxerFactory),
        uploader: Arc::new(uploader::HttpUploader::new(config.upload_url())),
    })
}

#[cfg(not(feature = "ffmpeg"))]
fn collaborators(_config: &AppConfig) -> anyhow::Result<Collaborators> {
    anyhow::bail!("no codec backend compiled in, rebuild with `--features ffmpeg`")
}

/// One line of output per finished run.
#[derive(Serialize)]
struct Report<'a> {
    file: &'a str,
    #[serde(flatten)]
    completion: &'a Completion,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        eprintln!("usage: lowres-upload <file>...");
        std::process::exit(2);
    }

    let config = config::config();
    let pipeline = Arc::new(
        Pipeline::new(collaborators(config)?).with_threshold(config.segment_threshold()),
    );
    log::info!(
        "uploading {} file(s) to {} as {} {}",
        files.len(),
        config.upload_url(),
        config.encoder().codec,
        config.encoder().resolution()
    );

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Completion)>();
    let mut runs = JoinSet::new();
    for file in files {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        let tx = tx.clone();
        let preview = Preview::new(
            base_name(&file),
            config.preview_dir().cloned(),
            config.preview_interval(),
        );
        runs.spawn(async move {
            let name = file.clone();
            let request = StartRequest {
                file: SourceFile::new(&file),
                encoder_config: config.encoder().clone(),
                render_frame: preview.callback(),
                send_message: Box::new(move |completion| {
                    let _ = tx.send((name, completion));
                }),
            };
            let state = pipeline.start_with_cancel(request, cancel).await;
            log::info!("{}: {}, {} frames rendered", file, state, preview.frames());
        });
    }
    drop(tx);

    let mut failed = 0;
    loop {
        tokio::select! {
            report = rx.recv() => match report {
                Some((file, completion)) => {
                    if !completion.is_done() {
                        failed += 1;
                    }
                    let line = serde_json::to_string(&Report {
                        file: &file,
                        completion: &completion,
                    })?;
                    println!("{}", line);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted, cancelling runs");
                cancel.cancel();
            },
        }
    }
    while runs.join_next().await.is_some() {}

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
