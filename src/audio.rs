use async_trait::async_trait;
use hound::WavWriter;
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::VoxchatError;

/// Read size for the capture tool's stdout.
const CHUNK_SIZE: usize = 4096;

/// How long a capture tool gets to fail on a missing or denied device.
const STARTUP_GRACE_MS: u64 = 300;

/// Finalized recording, handed to the backend unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: &'static str,
}

/// Raw little-endian 16-bit PCM chunks, in capture order.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    chunks: Vec<Vec<u8>>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenate all chunks into one WAV clip. Consumes the buffer.
    pub fn finalize(self, sample_rate: u32, channels: u16) -> Result<AudioClip, VoxchatError> {
        let pcm: Vec<u8> = self.chunks.concat();
        if pcm.len() % 2 != 0 {
            debug!("Dropping trailing odd byte from {} byte capture", pcm.len());
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| VoxchatError::Microphone(format!("failed to start WAV: {}", e)))?;
            for frame in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([frame[0], frame[1]]))
                    .map_err(|e| VoxchatError::Microphone(format!("failed to write WAV: {}", e)))?;
            }
            writer
                .finalize()
                .map_err(|e| VoxchatError::Microphone(format!("failed to finalize WAV: {}", e)))?;
        }

        Ok(AudioClip {
            bytes: cursor.into_inner(),
            file_name: "audio.wav".to_string(),
            mime: "audio/wav",
        })
    }
}

/// The microphone device, held exclusively between `open` and `close`.
#[async_trait]
pub trait Microphone: Send {
    /// Acquire the device and start buffering audio.
    async fn open(&mut self) -> Result<(), VoxchatError>;

    /// Stop capture, release the device and return the finalized clip.
    async fn close(&mut self) -> Result<AudioClip, VoxchatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTool {
    PwRecord,
    Parecord,
    Arecord,
}

impl CaptureTool {
    pub const ALL: [CaptureTool; 3] = [
        CaptureTool::PwRecord,
        CaptureTool::Parecord,
        CaptureTool::Arecord,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            CaptureTool::PwRecord => "pw-record",
            CaptureTool::Parecord => "parecord",
            CaptureTool::Arecord => "arecord",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.binary() == name)
    }

    /// Arguments that stream raw s16le PCM to stdout.
    pub fn args(&self, sample_rate: u32, channels: u8) -> Vec<String> {
        match self {
            CaptureTool::PwRecord => vec![
                "--rate".to_string(),
                sample_rate.to_string(),
                "--channels".to_string(),
                channels.to_string(),
                "--format".to_string(),
                "s16".to_string(),
                "-".to_string(),
            ],
            CaptureTool::Parecord => vec![
                "--raw".to_string(),
                format!("--rate={}", sample_rate),
                format!("--channels={}", channels),
                "--format=s16le".to_string(),
            ],
            CaptureTool::Arecord => vec![
                "-q".to_string(),
                "-t".to_string(),
                "raw".to_string(),
                "-f".to_string(),
                "S16_LE".to_string(),
                "-r".to_string(),
                sample_rate.to_string(),
                "-c".to_string(),
                channels.to_string(),
            ],
        }
    }

    /// Resolve a configured preference ("auto" or a tool name) to an
    /// installed tool.
    pub fn detect(preference: &str) -> Result<Self, VoxchatError> {
        if preference == "auto" {
            let found = Self::ALL
                .into_iter()
                .find(|tool| which::which(tool.binary()).is_ok());
            return found.ok_or_else(|| {
                VoxchatError::Microphone(
                    "no capture tool found (install pw-record, parecord or arecord)".to_string(),
                )
            });
        }

        let tool = Self::from_name(preference).ok_or_else(|| {
            VoxchatError::Microphone(format!("unknown capture tool '{}'", preference))
        })?;
        if which::which(tool.binary()).is_err() {
            return Err(VoxchatError::Microphone(format!(
                "capture tool '{}' is not installed",
                tool.binary()
            )));
        }
        Ok(tool)
    }
}

/// Microphone backed by a PCM capture process writing to stdout.
pub struct ProcessMicrophone {
    config: AudioConfig,
    child: Option<Child>,
    reader: Option<JoinHandle<std::io::Result<RecordingBuffer>>>,
}

impl ProcessMicrophone {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            child: None,
            reader: None,
        }
    }
}

#[async_trait]
impl Microphone for ProcessMicrophone {
    async fn open(&mut self) -> Result<(), VoxchatError> {
        if self.child.is_some() {
            return Err(VoxchatError::Microphone("microphone already open".to_string()));
        }

        let tool = CaptureTool::detect(&self.config.capture)?;
        info!(
            "Opening microphone via {} ({} Hz, {} ch)",
            tool.binary(),
            self.config.sample_rate,
            self.config.channels
        );

        let mut child = Command::new(tool.binary())
            .args(tool.args(self.config.sample_rate, self.config.channels))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VoxchatError::Microphone(format!("failed to start {}: {}", tool.binary(), e))
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            VoxchatError::Microphone(format!("{} has no stdout", tool.binary()))
        })?;

        let reader = tokio::spawn(async move {
            let mut buffer = RecordingBuffer::new();
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buffer.push(chunk[..n].to_vec());
            }
            Ok(buffer)
        });

        tokio::time::sleep(Duration::from_millis(STARTUP_GRACE_MS)).await;

        if let Some(status) = child.try_wait()? {
            reader.abort();
            let stderr = match child.stderr.take() {
                Some(pipe) => drain_stderr(tool.binary(), pipe).await,
                None => String::new(),
            };
            return Err(VoxchatError::Microphone(format!(
                "{} exited with {}: {}",
                tool.binary(),
                status,
                stderr.trim()
            )));
        }

        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    async fn close(&mut self) -> Result<AudioClip, VoxchatError> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| VoxchatError::Microphone("microphone is not open".to_string()))?;
        let reader = self
            .reader
            .take()
            .ok_or_else(|| VoxchatError::Microphone("capture reader missing".to_string()))?;

        if let Err(e) = child.start_kill() {
            warn!("Failed to signal capture process: {}", e);
        }
        child.wait().await?;

        let buffer = reader
            .await
            .map_err(|e| VoxchatError::Microphone(format!("capture task failed: {}", e)))??;

        info!(
            "Microphone released: {} chunks, {} bytes",
            buffer.chunk_count(),
            buffer.byte_len()
        );

        buffer.finalize(self.config.sample_rate, self.config.channels as u16)
    }
}

/// Whatever the capture tool wrote to stderr, or empty if it was unreadable.
async fn drain_stderr<R: AsyncRead + Unpin>(binary: &str, mut pipe: R) -> String {
    let mut stderr = String::new();
    if let Err(e) = pipe.read_to_string(&mut stderr).await {
        debug!("Failed to read {} stderr: {}", binary, e);
    }
    stderr
}
