//! Fragment ingest: feeds an fMP4 byte stream into the fragment buffer.
//!
//! The stream comes from stdin or from a file the encoder is still writing.
//! A followed file is polled at EOF until no new data has arrived for the
//! configured idle timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use liverelay_media::{BoxSplitter, IngestOutcome, SplitEvent};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::state::LiveState;

const READ_CHUNK: usize = 64 * 1024;

/// Where the fMP4 stream is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestInput {
    Stdin,
    File(PathBuf),
}

impl IngestInput {
    /// `-` means stdin, anything else is a path.
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Stdin => "stdin".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Counters for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub session_id: Option<Uuid>,
    pub bytes_read: u64,
    pub init_segments: u64,
    pub fragments: u64,
    pub gaps: u64,
    /// Fragments seen before any init segment.
    pub orphan_fragments: u64,
    pub parse_errors: u64,
}

/// Drives the buffer from a byte stream. The only buffer writer.
pub struct IngestSource {
    live: Arc<LiveState>,
    config: IngestConfig,
}

impl IngestSource {
    pub fn new(live: Arc<LiveState>, config: IngestConfig) -> Self {
        Self { live, config }
    }

    /// Ingest from `input` until the stream ends.
    pub async fn run(&self, input: IngestInput) -> Result<IngestSummary> {
        let label = input.label();
        match input {
            IngestInput::Stdin => self.run_reader(tokio::io::stdin(), &label, false).await,
            IngestInput::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("Failed to open ingest input: {:?}", path))?;
                self.run_reader(file, &label, true).await
            }
        }
    }

    /// Ingest from any reader. With `follow`, EOF is treated as "no data
    /// yet" until the idle timeout expires.
    pub async fn run_reader<R>(
        &self,
        mut reader: R,
        source: &str,
        follow: bool,
    ) -> Result<IngestSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut summary = IngestSummary {
            session_id: self.live.start_recording(source),
            ..Default::default()
        };
        if summary.session_id.is_none() {
            tracing::warn!(source, "Ingesting while streaming is disabled; fragments are dropped");
        }

        let mut splitter = BoxSplitter::new(self.config.max_box_size);
        let mut sequencer = Sequencer::default();
        let mut chunk = vec![0u8; READ_CHUNK];
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let mut last_data = Instant::now();

        let result = loop {
            let n = match reader.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => break Err(anyhow::Error::new(e).context("Failed to read ingest input")),
            };

            if n == 0 {
                if !follow || last_data.elapsed() >= idle_timeout {
                    break Ok(());
                }
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            last_data = Instant::now();
            summary.bytes_read += n as u64;

            match splitter.push(&chunk[..n]) {
                Ok(events) => {
                    for event in events {
                        self.apply(event, &mut sequencer, &mut summary);
                    }
                }
                Err(e) => {
                    tracing::warn!(source, error = %e, "Malformed fMP4 input, resynchronizing");
                    summary.parse_errors += 1;
                    splitter.reset();
                }
            }
        };

        if splitter.buffered_len() > 0 {
            tracing::debug!(pending = splitter.buffered_len(), "Incomplete box at end of input");
        }

        self.live.stop_recording();
        tracing::info!(
            source,
            fragments = summary.fragments,
            init_segments = summary.init_segments,
            bytes = summary.bytes_read,
            gaps = summary.gaps,
            "Ingest finished"
        );

        result.map(|_| summary)
    }

    fn apply(&self, event: SplitEvent, sequencer: &mut Sequencer, summary: &mut IngestSummary) {
        let buffer = self.live.buffer();
        match event {
            SplitEvent::Init(payload) => {
                tracing::info!(size = payload.len(), "Init segment received");
                buffer.on_init_segment(payload);
                sequencer.restart();
                summary.init_segments += 1;
            }
            SplitEvent::Fragment { sequence, payload } => {
                if !sequencer.started {
                    tracing::debug!(size = payload.len(), "Fragment before init segment dropped");
                    summary.orphan_fragments += 1;
                    return;
                }

                let sequence = sequencer.next(sequence);
                match buffer.on_fragment_complete(sequence, payload) {
                    IngestOutcome::Accepted => summary.fragments += 1,
                    IngestOutcome::AcceptedWithGap { .. } => {
                        summary.fragments += 1;
                        summary.gaps += 1;
                    }
                    IngestOutcome::Ignored(_) => {}
                }
            }
        }
    }
}

/// Assigns buffer sequence numbers, preferring the encoder's `mfhd` value.
#[derive(Debug, Default)]
struct Sequencer {
    started: bool,
    next: u64,
}

impl Sequencer {
    fn restart(&mut self) {
        self.started = true;
        self.next = 1;
    }

    fn next(&mut self, from_stream: Option<u32>) -> u64 {
        let sequence = match from_stream {
            Some(n) if n > 0 => n as u64,
            _ => self.next,
        };
        self.next = sequence + 1;
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingMode;
    use liverelay_media::FragmentBuffer;

    fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(box_type);
        out.extend_from_slice(body);
        out
    }

    fn init_segment() -> Vec<u8> {
        let mut out = make_box(b"ftyp", b"isom\0\0\0\0");
        out.extend(make_box(b"moov", &[0u8; 16]));
        out
    }

    fn fragment(sequence: Option<u32>) -> Vec<u8> {
        let moof_body = match sequence {
            Some(n) => {
                let mut mfhd = vec![0u8; 4];
                mfhd.extend_from_slice(&n.to_be_bytes());
                make_box(b"mfhd", &mfhd)
            }
            None => make_box(b"traf", &[0u8; 8]),
        };
        let mut out = make_box(b"moof", &moof_body);
        out.extend(make_box(b"mdat", &[0xAB; 32]));
        out
    }

    fn live() -> Arc<LiveState> {
        let buffer = Arc::new(FragmentBuffer::new(15));
        buffer.set_enabled(true);
        LiveState::new(buffer, StreamingMode::StreamOnly, 60)
    }

    #[tokio::test]
    async fn test_ingest_stream_with_mfhd() {
        let live = live();
        let mut stream = init_segment();
        for n in 1..=4 {
            stream.extend(fragment(Some(n)));
        }

        let source = IngestSource::new(live.clone(), IngestConfig::default());
        let summary = source
            .run_reader(std::io::Cursor::new(stream), "test", false)
            .await
            .unwrap();

        assert!(summary.session_id.is_some());
        assert_eq!(summary.init_segments, 1);
        assert_eq!(summary.fragments, 4);
        assert_eq!(summary.gaps, 0);

        let buffer = live.buffer();
        assert!(buffer.init_segment().unwrap().has_ftyp());
        assert_eq!(buffer.window().latest, 4);
        assert!(!live.is_recording());
    }

    #[tokio::test]
    async fn test_counter_fallback_without_mfhd() {
        let live = live();
        let mut stream = init_segment();
        for _ in 0..3 {
            stream.extend(fragment(None));
        }

        let source = IngestSource::new(live.clone(), IngestConfig::default());
        let summary = source
            .run_reader(std::io::Cursor::new(stream), "test", false)
            .await
            .unwrap();

        assert_eq!(summary.fragments, 3);
        let sequences: Vec<u64> = live
            .buffer()
            .buffered_fragments()
            .iter()
            .map(|f| f.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fragments_before_init_are_dropped() {
        let live = live();
        let mut stream = fragment(Some(1));
        stream.extend(init_segment());
        stream.extend(fragment(Some(1)));

        let source = IngestSource::new(live.clone(), IngestConfig::default());
        let summary = source
            .run_reader(std::io::Cursor::new(stream), "test", false)
            .await
            .unwrap();

        assert_eq!(summary.orphan_fragments, 1);
        assert_eq!(summary.fragments, 1);
    }

    #[tokio::test]
    async fn test_gap_is_counted() {
        let live = live();
        let mut stream = init_segment();
        stream.extend(fragment(Some(1)));
        stream.extend(fragment(Some(3)));

        let source = IngestSource::new(live.clone(), IngestConfig::default());
        let summary = source
            .run_reader(std::io::Cursor::new(stream), "test", false)
            .await
            .unwrap();

        assert_eq!(summary.fragments, 2);
        assert_eq!(summary.gaps, 1);
        assert_eq!(live.buffer().stats().gap_count, 1);
    }

    #[tokio::test]
    async fn test_oversized_box_resynchronizes() {
        let live = live();
        let reader = tokio_test::io::Builder::new()
            .read(&init_segment())
            .read(&[0x10, 0, 0, 0, b'm', b'd', b'a', b't'])
            .build();

        let config = IngestConfig {
            max_box_size: 1024,
            ..IngestConfig::default()
        };
        let source = IngestSource::new(live.clone(), config);
        let summary = source.run_reader(reader, "test", false).await.unwrap();

        assert_eq!(summary.init_segments, 1);
        assert_eq!(summary.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_follow_stops_after_idle_timeout() {
        let live = live();
        let mut stream = init_segment();
        stream.extend(fragment(Some(1)));

        let config = IngestConfig {
            poll_interval_ms: 10,
            idle_timeout_secs: 0,
            ..IngestConfig::default()
        };
        let source = IngestSource::new(live.clone(), config);
        let summary = source
            .run_reader(std::io::Cursor::new(stream), "test", true)
            .await
            .unwrap();

        assert_eq!(summary.fragments, 1);
    }

    #[tokio::test]
    async fn test_follow_growing_file() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.mp4");
        let mut writer = tokio::fs::File::create(&path).await.unwrap();
        writer.write_all(&init_segment()).await.unwrap();
        writer.flush().await.unwrap();

        let live = live();
        let config = IngestConfig {
            poll_interval_ms: 10,
            idle_timeout_secs: 1,
            ..IngestConfig::default()
        };
        let source = IngestSource::new(live.clone(), config);
        let task = tokio::spawn({
            let path = path.clone();
            async move { source.run(IngestInput::File(path)).await }
        });

        for n in 1..=3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.write_all(&fragment(Some(n))).await.unwrap();
            writer.flush().await.unwrap();
        }

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.fragments, 3);
        assert_eq!(live.buffer().window().latest, 3);
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let source = IngestSource::new(live(), IngestConfig::default());
        let result = source
            .run(IngestInput::File(PathBuf::from("/nonexistent/live.mp4")))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_input_parse() {
        assert_eq!(IngestInput::parse("-"), IngestInput::Stdin);
        assert_eq!(
            IngestInput::parse("/tmp/a.mp4"),
            IngestInput::File(PathBuf::from("/tmp/a.mp4"))
        );
        assert_eq!(IngestInput::Stdin.label(), "stdin");
    }
}
