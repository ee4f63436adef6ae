use tracing::{error, info, warn};

use crate::api::{Backend, Transcription};
use crate::audio::{AudioClip, Microphone};
use crate::error::VoxchatError;

/// Delivered to the transcription callback when anything after the
/// microphone fails, so the caller's pipeline is the same either way.
pub const TRANSCRIBE_APOLOGY: &str = "Sorry, I could not transcribe the audio. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Processing,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "idle"),
            RecorderState::Recording => write!(f, "recording"),
            RecorderState::Processing => write!(f, "processing"),
        }
    }
}

/// One microphone, cycled `Idle -> Recording -> Processing -> Idle`.
pub struct VoiceRecorder {
    state: RecorderState,
    microphone: Box<dyn Microphone>,
}

impl VoiceRecorder {
    pub fn new(microphone: Box<dyn Microphone>) -> Self {
        Self {
            state: RecorderState::Idle,
            microphone,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// The toggle control is disabled while a clip is being transcribed.
    pub fn can_toggle(&self) -> bool {
        self.state != RecorderState::Processing
    }

    /// Idle -> Recording. On failure the recorder stays idle and the error
    /// is for the caller to alert on.
    pub async fn start(&mut self) -> Result<(), VoxchatError> {
        if self.state != RecorderState::Idle {
            return Err(VoxchatError::Microphone(format!(
                "cannot start recording while {}",
                self.state
            )));
        }

        match self.microphone.open().await {
            Ok(()) => {
                info!("Recording started");
                self.state = RecorderState::Recording;
                Ok(())
            }
            Err(e) => {
                error!("Could not access microphone: {}", e);
                Err(e)
            }
        }
    }

    /// Recording -> Processing: release the device and finalize the clip.
    /// Returns `None` when no recording is in progress.
    pub async fn finish(&mut self) -> Option<Result<AudioClip, VoxchatError>> {
        if self.state != RecorderState::Recording {
            warn!("Stop requested while {}, ignoring", self.state);
            return None;
        }

        self.state = RecorderState::Processing;
        let clip = self.microphone.close().await;
        if let Err(ref e) = clip {
            error!("Failed to finalize recording: {}", e);
        }
        Some(clip)
    }

    /// Processing -> Idle. Yields the text for the transcription callback.
    pub fn settle(&mut self, outcome: Result<Transcription, VoxchatError>) -> String {
        if self.state != RecorderState::Processing {
            warn!("Transcription settled while {}", self.state);
        }
        self.state = RecorderState::Idle;

        match outcome {
            Ok(transcription) => {
                if !transcription.success {
                    warn!("Backend reported an unsuccessful transcription");
                }
                info!("Transcribed {} chars", transcription.text.len());
                transcription.text
            }
            Err(e) => {
                error!("Transcription error: {}", e);
                TRANSCRIBE_APOLOGY.to_string()
            }
        }
    }

    pub async fn stop_and_transcribe(&mut self, backend: &dyn Backend) -> Option<String> {
        let clip = self.finish().await?;
        let outcome = match clip {
            Ok(clip) => backend.transcribe(clip).await,
            Err(e) => Err(e),
        };
        Some(self.settle(outcome))
    }

    /// The record button: start when idle, stop and transcribe when
    /// recording, nothing while processing. The callback receives exactly
    /// one string per completed cycle.
    pub async fn toggle<F>(
        &mut self,
        backend: &dyn Backend,
        on_transcription: F,
    ) -> Result<(), VoxchatError>
    where
        F: FnOnce(String) + Send,
    {
        match self.state {
            RecorderState::Idle => self.start().await,
            RecorderState::Recording => {
                if let Some(text) = self.stop_and_transcribe(backend).await {
                    on_transcription(text);
                }
                Ok(())
            }
            RecorderState::Processing => {
                warn!("Toggle received while processing, ignoring");
                Ok(())
            }
        }
    }

    /// Release the device if a recording is still open; the audio is dropped.
    pub async fn shutdown(&mut self) {
        if self.state == RecorderState::Recording {
            if let Err(e) = self.microphone.close().await {
                warn!("Failed to release microphone on shutdown: {}", e);
            }
        }
        self.state = RecorderState::Idle;
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct MicProbe {
        pub opens: Arc<AtomicUsize>,
        pub held: Arc<AtomicBool>,
    }

    impl MicProbe {
        pub fn is_held(&self) -> bool {
            self.held.load(Ordering::SeqCst)
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    pub struct FakeMicrophone {
        pub deny: bool,
        pub fail_close: bool,
        pub probe: MicProbe,
    }

    impl FakeMicrophone {
        pub fn new() -> (Self, MicProbe) {
            let probe = MicProbe::default();
            (
                Self {
                    deny: false,
                    fail_close: false,
                    probe: probe.clone(),
                },
                probe,
            )
        }
    }

    #[async_trait]
    impl Microphone for FakeMicrophone {
        async fn open(&mut self) -> Result<(), VoxchatError> {
            self.probe.opens.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(VoxchatError::Microphone("permission denied".to_string()));
            }
            self.probe.held.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<AudioClip, VoxchatError> {
            self.probe.held.store(false, Ordering::SeqCst);
            if self.fail_close {
                return Err(VoxchatError::Microphone("device unplugged".to_string()));
            }
            Ok(AudioClip {
                bytes: b"RIFF....WAVE".to_vec(),
                file_name: "audio.wav".to_string(),
                mime: "audio/wav",
            })
        }
    }
}
