//! Fixed-rate tick loop around a single streamer

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use replaystream_core::{Config, ReplayVersion, SessionStreamer};

use crate::{ListArgs, PlayArgs, RecordArgs};

/// What a finished recording left on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub session: String,
    pub chunks: u32,
    pub time_ms: u32,
}

pub struct Driver {
    streamer: SessionStreamer,
    version: ReplayVersion,
    interval: Interval,
    last_tick: Instant,
}

impl Driver {
    pub fn new(config: &Config, version: ReplayVersion, period: Duration) -> Result<Self> {
        let streamer = SessionStreamer::from_config(config)?;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            streamer,
            version,
            interval,
            last_tick: Instant::now(),
        })
    }

    /// Wait for the next period and advance the streamer by the real elapsed time.
    async fn tick(&mut self) -> Result<()> {
        tokio::select! {
            now = self.interval.tick() => {
                let delta = now.saturating_duration_since(self.last_tick);
                self.last_tick = now;
                self.streamer.tick(delta);
            }
            _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        }
        if let Some(err) = self.streamer.last_error() {
            bail!("streamer failed: {err}");
        }
        Ok(())
    }

    async fn wait_for<T>(&mut self, what: &str, mut rx: oneshot::Receiver<T>) -> Result<T> {
        loop {
            match rx.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Closed) => bail!("{what}: request was dropped"),
                Err(TryRecvError::Empty) => {}
            }
            self.tick().await.with_context(|| format!("while {what}"))?;
        }
    }

    /// Tick until every queued request went through.
    async fn drain(&mut self, what: &str) -> Result<()> {
        while self.streamer.has_pending_requests() || self.streamer.is_streaming() {
            self.tick().await.with_context(|| format!("while {what}"))?;
        }
        Ok(())
    }

    pub async fn record(&mut self, args: RecordArgs) -> Result<Recording> {
        let payload = tokio::fs::read(&args.input)
            .await
            .with_context(|| format!("failed to read {}", args.input.display()))?;
        let frame_bytes = args.chunk_bytes.max(1);

        let ready = self.streamer.start_streaming(
            "",
            &args.friendly,
            &args.users,
            true,
            &self.version,
        )?;
        let header = format!("{}:{}", args.input.display(), payload.len());
        self.streamer.header_archive().write_bytes(header.as_bytes());

        let ready = self.wait_for("starting the upload", ready).await?;
        if !ready.ready {
            bail!("the server did not accept the recording");
        }
        let session = self.streamer.session().unwrap_or_default().to_string();
        info!(%session, bytes = payload.len(), "recording");

        let mut time_ms = 0u32;
        let mut offset = 0usize;
        for (frame, data) in payload.chunks(frame_bytes).enumerate() {
            self.streamer.streaming_archive().write_bytes(data);
            offset += data.len();
            time_ms = time_ms.saturating_add(args.frame_ms);
            self.streamer.update_total_demo_time(time_ms);

            if args.checkpoint_every.is_some_and(|every| every > 0 && (frame + 1) % every == 0) {
                if let Some(checkpoint) = self.streamer.checkpoint_archive() {
                    checkpoint.write_bytes(offset.to_string().as_bytes());
                }
                self.streamer.flush_checkpoint(time_ms)?;
                debug!(frame, time_ms, offset, "checkpoint captured");
            }
            self.tick().await.context("while recording")?;
        }

        self.streamer.flush_stream()?;
        let chunks = self.streamer.chunk_index();
        self.streamer.stop_streaming()?;
        self.drain("finishing the upload").await?;
        info!(%session, chunks, time_ms, "recording finished");
        println!("{session}");
        Ok(Recording {
            session,
            chunks,
            time_ms,
        })
    }

    pub async fn play(&mut self, args: PlayArgs) -> Result<()> {
        let users: Vec<String> = args.user.into_iter().collect();
        let ready = self
            .streamer
            .start_streaming(&args.session, "", &users, false, &self.version)?;
        let ready = self.wait_for("opening the session", ready).await?;
        if !ready.ready {
            bail!("session {} could not be opened", args.session);
        }
        let header = self.streamer.header_archive().read_available();
        info!(
            session = %args.session,
            header = %String::from_utf8_lossy(&header),
            live = self.streamer.is_live(),
            checkpoints = self.streamer.checkpoints().len(),
            "playing back"
        );

        if let Some(goto_ms) = args.goto_ms {
            let done = self.streamer.goto_time_ms(goto_ms)?;
            let result = self.wait_for("seeking", done).await?;
            if !result.success {
                bail!("seeking to {goto_ms}ms failed");
            }
            let state = self
                .streamer
                .checkpoint_archive()
                .map(|archive| archive.read_available())
                .unwrap_or_default();
            info!(
                goto_ms,
                residual_ms = result.residual_ms,
                checkpoint = %String::from_utf8_lossy(&state),
                "resumed from checkpoint"
            );
        }

        let mut output = tokio::fs::File::create(&args.output)
            .await
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut written = 0usize;
        loop {
            if self.streamer.is_data_available() {
                let data = self.streamer.streaming_archive().read_available();
                output.write_all(&data).await?;
                written += data.len();
            }
            if self.streamer.streaming_archive().at_end() {
                break;
            }
            self.tick().await.context("while downloading")?;
        }
        output.flush().await?;

        self.streamer.stop_streaming()?;
        if let Err(e) = self.drain("closing the session").await {
            warn!(error = %e, "viewer was not deregistered");
        }
        info!(session = %args.session, bytes = written, output = %args.output.display(), "playback finished");
        Ok(())
    }

    pub async fn list(&mut self, args: ListArgs) -> Result<()> {
        let rx = match args.recent.as_deref() {
            Some(viewer) => self.streamer.enumerate_recent_streams(&self.version, viewer),
            None => self.streamer.enumerate_streams(
                &self.version,
                args.user.as_deref(),
                args.meta.as_deref(),
            ),
        };
        let replays = self.wait_for("listing sessions", rx).await??;
        for replay in &replays {
            println!(
                "{}\t{}\t{}\t{}ms\t{} viewers",
                replay.session_name,
                if replay.is_live { "live" } else { "final" },
                replay.friendly_name,
                replay.demo_time_ms,
                replay.num_viewers
            );
        }
        info!(count = replays.len(), "sessions listed");
        Ok(())
    }
}
