//! Two-channel audio playback with stop-before-start discipline.
//!
//! The section channel carries a listening section's ambient track, the
//! question channel carries per-question or per-group clips. Each channel
//! owns at most one loaded sound; starting a new one always releases the
//! previous one first and waits a short grace period before acquiring the
//! next resource.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::AudioError;
use crate::navigation::UnitKey;
use crate::traits::{AudioDevice, SoundHandle};

/// Which audio channel an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioScope {
    Section,
    Question,
}

/// Lifecycle of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Playing { url: String, handle: SoundHandle },
    /// Played to the end; the sound stays loaded until released.
    Finished { url: String, handle: SoundHandle },
}

impl ChannelState {
    fn handle(&self) -> Option<SoundHandle> {
        match self {
            ChannelState::Idle => None,
            ChannelState::Playing { handle, .. } | ChannelState::Finished { handle, .. } => {
                Some(*handle)
            }
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ChannelState::Idle => None,
            ChannelState::Playing { url, .. } | ChannelState::Finished { url, .. } => Some(url),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, ChannelState::Playing { .. })
    }
}

/// Status report from the platform player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished,
    Error(String),
}

pub struct AudioOrchestrator {
    device: Arc<dyn AudioDevice>,
    grace: Duration,
    section: ChannelState,
    question: ChannelState,
    section_autoplayed: bool,
    units_autoplayed: HashSet<UnitKey>,
    notice: Option<AudioError>,
}

impl AudioOrchestrator {
    pub fn new(device: Arc<dyn AudioDevice>, grace: Duration) -> Self {
        Self {
            device,
            grace,
            section: ChannelState::Idle,
            question: ChannelState::Idle,
            section_autoplayed: false,
            units_autoplayed: HashSet::new(),
            notice: None,
        }
    }

    pub fn state(&self, scope: AudioScope) -> &ChannelState {
        match scope {
            AudioScope::Section => &self.section,
            AudioScope::Question => &self.question,
        }
    }

    pub fn is_playing(&self, scope: AudioScope) -> bool {
        self.state(scope).is_playing()
    }

    pub async fn play_section(&mut self, url: &str) -> Result<(), AudioError> {
        self.play(AudioScope::Section, url).await
    }

    pub async fn play_question(&mut self, url: &str) -> Result<(), AudioError> {
        self.play(AudioScope::Question, url).await
    }

    pub async fn stop_section(&mut self) {
        self.release(AudioScope::Section).await;
    }

    pub async fn stop_question(&mut self) {
        self.release(AudioScope::Question).await;
    }

    pub async fn stop_all(&mut self) {
        self.release(AudioScope::Section).await;
        self.release(AudioScope::Question).await;
    }

    /// Forget which audio was auto-played; called on every section entry.
    pub fn begin_section_entry(&mut self) {
        self.section_autoplayed = false;
        self.units_autoplayed.clear();
    }

    /// Forget which units auto-played; their keys refer to a replaced plan.
    pub fn reset_unit_autoplay(&mut self) {
        self.units_autoplayed.clear();
    }

    /// Play the section track unless it already auto-played for this entry.
    ///
    /// Returns whether playback was attempted.
    pub async fn autoplay_section(&mut self, url: &str) -> Result<bool, AudioError> {
        if self.section_autoplayed {
            return Ok(false);
        }
        self.section_autoplayed = true;
        self.play_section(url).await.map(|()| true)
    }

    /// Play a unit's clip the first time the unit is displayed in this entry.
    pub async fn autoplay_question(&mut self, unit: UnitKey, url: &str) -> Result<bool, AudioError> {
        if !self.units_autoplayed.insert(unit) {
            return Ok(false);
        }
        self.play_question(url).await.map(|()| true)
    }

    /// Apply a status update from the platform player for `scope`.
    pub async fn on_playback_event(&mut self, scope: AudioScope, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Finished => {
                let channel = self.channel_mut(scope);
                if let ChannelState::Playing { url, handle } = channel {
                    debug!(?scope, %url, "audio finished");
                    *channel = ChannelState::Finished {
                        url: std::mem::take(url),
                        handle: *handle,
                    };
                }
            }
            PlaybackEvent::Error(message) => {
                warn!(?scope, "audio playback error: {message}");
                self.release(scope).await;
                self.notice = Some(AudioError::Playback(message));
            }
        }
    }

    /// Take the pending user-visible notice, if any.
    pub fn take_notice(&mut self) -> Option<AudioError> {
        self.notice.take()
    }

    async fn play(&mut self, scope: AudioScope, url: &str) -> Result<(), AudioError> {
        if self.release(scope).await {
            tokio::time::sleep(self.grace).await;
        }
        match self.device.load_and_play(url).await {
            Ok(handle) => {
                debug!(?scope, %url, "audio started");
                *self.channel_mut(scope) = ChannelState::Playing {
                    url: url.to_string(),
                    handle,
                };
                Ok(())
            }
            Err(e) => {
                warn!(?scope, "audio failed to start: {e}");
                *self.channel_mut(scope) = ChannelState::Idle;
                self.notice = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Stop and unload the channel's sound. Returns whether one was loaded.
    async fn release(&mut self, scope: AudioScope) -> bool {
        let previous = std::mem::take(self.channel_mut(scope));
        let Some(handle) = previous.handle() else {
            return false;
        };
        if previous.is_playing() {
            if let Err(e) = self.device.stop(handle).await {
                warn!(?scope, "failed to stop audio: {e}");
            }
        }
        if let Err(e) = self.device.unload(handle).await {
            warn!(?scope, "failed to unload audio: {e}");
        }
        debug!(?scope, url = previous.url().unwrap_or_default(), "audio released");
        true
    }

    fn channel_mut(&mut self, scope: AudioScope) -> &mut ChannelState {
        match scope {
            AudioScope::Section => &mut self.section,
            AudioScope::Question => &mut self.question,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAudioDevice;
    use crate::model::{GroupId, QuestionId};

    const GRACE: Duration = Duration::from_millis(100);

    fn orchestrator() -> (Arc<MockAudioDevice>, AudioOrchestrator) {
        let device = Arc::new(MockAudioDevice::new());
        let audio = AudioOrchestrator::new(device.clone(), GRACE);
        (device, audio)
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_section_audio_leaves_only_the_new_track() {
        let (device, mut audio) = orchestrator();
        audio.play_section("a.mp3").await.unwrap();
        audio.play_section("b.mp3").await.unwrap();

        assert_eq!(device.loaded_urls(), vec!["b.mp3"]);
        assert_eq!(device.playing_urls(), vec!["b.mp3"]);
        assert_eq!(audio.state(AudioScope::Section).url(), Some("b.mp3"));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_delay_only_after_release() {
        let (_device, mut audio) = orchestrator();
        let start = tokio::time::Instant::now();
        audio.play_question("q1.mp3").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        audio.play_question("q2.mp3").await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= GRACE && waited < GRACE * 2, "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn channels_are_independent() {
        let (device, mut audio) = orchestrator();
        audio.play_section("track.mp3").await.unwrap();
        audio.play_question("clip.mp3").await.unwrap();
        assert_eq!(device.playing_urls(), vec!["clip.mp3", "track.mp3"]);

        audio.stop_question().await;
        assert!(audio.is_playing(AudioScope::Section));
        assert!(!audio.is_playing(AudioScope::Question));

        audio.stop_all().await;
        assert!(device.loaded_urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn load_failure_resets_channel_and_leaves_notice() {
        let (device, mut audio) = orchestrator();
        device.fail_url("broken.mp3");
        audio.play_section("ok.mp3").await.unwrap();

        let err = audio.play_section("broken.mp3").await.unwrap_err();
        assert!(matches!(err, AudioError::Load { .. }));
        assert_eq!(*audio.state(AudioScope::Section), ChannelState::Idle);
        assert!(device.loaded_urls().is_empty());
        assert!(audio.take_notice().is_some());
        assert!(audio.take_notice().is_none());

        // Retry is possible once the channel is idle again.
        audio.play_section("ok.mp3").await.unwrap();
        assert!(audio.is_playing(AudioScope::Section));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_track_is_released_on_next_play() {
        let (device, mut audio) = orchestrator();
        audio.play_section("a.mp3").await.unwrap();
        audio
            .on_playback_event(AudioScope::Section, PlaybackEvent::Finished)
            .await;
        assert!(matches!(
            audio.state(AudioScope::Section),
            ChannelState::Finished { .. }
        ));
        assert!(!audio.is_playing(AudioScope::Section));
        assert_eq!(device.loaded_urls(), vec!["a.mp3"]);

        audio.play_section("a.mp3").await.unwrap();
        assert_eq!(device.loaded_urls(), vec!["a.mp3"]);
        assert_eq!(device.load_history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_releases_resource() {
        let (device, mut audio) = orchestrator();
        audio.play_question("clip.mp3").await.unwrap();
        audio
            .on_playback_event(AudioScope::Question, PlaybackEvent::Error("decoder".into()))
            .await;
        assert!(device.loaded_urls().is_empty());
        assert!(matches!(audio.take_notice(), Some(AudioError::Playback(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_fires_once_per_entry() {
        let (device, mut audio) = orchestrator();
        assert!(audio.autoplay_section("listen.mp3").await.unwrap());
        assert!(!audio.autoplay_section("listen.mp3").await.unwrap());

        let group = UnitKey::Group(GroupId::new(7));
        let single = UnitKey::Question(QuestionId::new(3));
        assert!(audio.autoplay_question(group, "g.mp3").await.unwrap());
        assert!(audio.autoplay_question(single, "s.mp3").await.unwrap());
        assert!(!audio.autoplay_question(group, "g.mp3").await.unwrap());

        audio.begin_section_entry();
        assert!(audio.autoplay_section("listen.mp3").await.unwrap());
        assert_eq!(
            device.load_history(),
            vec!["listen.mp3", "g.mp3", "s.mp3", "listen.mp3"]
        );
    }
}
