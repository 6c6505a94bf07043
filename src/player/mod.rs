//! Local audio playback with a play queue.
//!
//! [`Player`] owns the playlist and queue bookkeeping and reports changes on a
//! typed event channel. Actual audio output happens behind [`AudioBackend`].

pub mod decode;
pub mod output;
pub mod session;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PlayerConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    PlaylistUpdated(Vec<PathBuf>),
    QueueUpdated(Vec<PathBuf>),
    TrackChanged(Option<PathBuf>),
    PlaybackStateChanged(bool),
    /// Playback position as a fraction of the track length.
    Progress(f64),
    TagImage(Option<Arc<Vec<u8>>>),
}

/// Notifications coming back from the audio backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    EndOfStream,
    Failed(String),
    TagImage(Option<Arc<Vec<u8>>>),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("audio backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub trait AudioBackend {
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn seek(&mut self, fraction: f64) -> Result<()>;
    fn set_volume(&mut self, volume: f32) -> Result<()>;
    /// Current position as a fraction of the loaded track, if known.
    fn position(&self) -> Option<f64>;
    fn try_event(&mut self) -> Option<BackendEvent>;
}

/// Control surface the UI drives playback through.
pub trait PlaybackEngine {
    fn load(&mut self, files: Vec<PathBuf>, queue: Option<Vec<PathBuf>>) -> Result<(), PlayerError>;
    fn play_pause(&mut self) -> Result<(), PlayerError>;
    fn seek(&mut self, fraction: f64) -> Result<(), PlayerError>;
    fn add_to_queue(&mut self, files: &[PathBuf]);
    fn remove_from_queue(&mut self, files: &[PathBuf]);
    fn next(&mut self) -> Result<(), PlayerError>;
}

pub struct Player<B: AudioBackend> {
    backend: B,
    shuffle: bool,
    playlist: Vec<PathBuf>,
    queue: Vec<PathBuf>,
    current: Option<PathBuf>,
    playing: bool,
    events: Sender<PlayerEvent>,
}

impl<B: AudioBackend> Player<B> {
    pub fn new(mut backend: B, config: &PlayerConfig) -> (Self, Receiver<PlayerEvent>) {
        if let Err(err) = backend.set_volume(config.volume) {
            log::warn!("Failed to set player volume: {:#}", err);
        }
        let (tx, rx) = unbounded();
        let player = Self {
            backend,
            shuffle: config.shuffle,
            playlist: Vec::new(),
            queue: Vec::new(),
            current: None,
            playing: false,
            events: tx,
        };
        (player, rx)
    }

    pub fn playlist(&self) -> &[PathBuf] {
        &self.playlist
    }

    pub fn queue(&self) -> &[PathBuf] {
        &self.queue
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Switch to `file` and start playing it.
    pub fn select(&mut self, file: PathBuf) -> Result<(), PlayerError> {
        self.load_file(file)?;
        self.play_pause()
    }

    /// Handle pending backend notifications.
    pub fn poll(&mut self) {
        while let Some(event) = self.backend.try_event() {
            match event {
                BackendEvent::EndOfStream => {
                    if let Err(err) = self.play_next() {
                        log::error!("{}", err);
                    }
                }
                BackendEvent::Failed(reason) => {
                    self.stop();
                    log::error!("Playback error: {}", reason);
                }
                BackendEvent::TagImage(data) => self.emit(PlayerEvent::TagImage(data)),
            }
        }
    }

    /// Report the playback position; called once per second by the UI loop.
    pub fn tick_progress(&mut self) {
        if !self.playing {
            return;
        }
        match self.backend.position() {
            Some(fraction) => self.emit(PlayerEvent::Progress(fraction)),
            None => log::warn!("Couldn't fetch current track position"),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // the receiver lives as long as the app loop
        let _ = self.events.send(event);
    }

    fn emit_queue(&self) {
        self.emit(PlayerEvent::QueueUpdated(self.queue.clone()));
    }

    fn set_current(&mut self, file: Option<PathBuf>) {
        self.current = file;
        self.emit(PlayerEvent::TrackChanged(self.current.clone()));
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            self.playing = playing;
            self.emit(PlayerEvent::PlaybackStateChanged(playing));
        }
    }

    fn load_file(&mut self, file: PathBuf) -> Result<(), PlayerError> {
        if let Some(current) = self.current.clone() {
            self.queue.retain(|f| f != &current);
            self.stop();
        }

        self.backend.load(&file)?;
        if !self.queue.contains(&file) {
            self.queue.push(file.clone());
        }
        self.set_current(Some(file));
        self.emit_queue();
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Err(err) = self.backend.stop() {
            log::warn!("Failed to stop playback: {:#}", err);
        }
        self.set_playing(false);
        if self.current.is_some() {
            self.set_current(None);
        }
    }

    /// Drop the finished track from the queue and continue at its position.
    fn play_next(&mut self) -> Result<(), PlayerError> {
        let Some(finished) = self.current.clone() else {
            log::debug!("No audio file selected");
            return Ok(());
        };
        self.stop();

        let index = match self.queue.iter().position(|f| f == &finished) {
            Some(i) => {
                self.queue.remove(i);
                i
            }
            None => 1,
        };

        if !self.queue.is_empty() {
            let next = self.queue.get(index).unwrap_or(&self.queue[0]).clone();
            self.load_file(next)?;
            self.play_pause()?;
        }
        self.emit_queue();
        Ok(())
    }
}

impl<B: AudioBackend> PlaybackEngine for Player<B> {
    fn load(&mut self, files: Vec<PathBuf>, queue: Option<Vec<PathBuf>>) -> Result<(), PlayerError> {
        if files.is_empty() {
            return Ok(());
        }
        self.playlist = files;
        self.queue = match queue {
            Some(queue) if !queue.is_empty() => queue,
            _ => self.playlist.clone(),
        };
        if self.shuffle {
            self.queue.shuffle(&mut rand::thread_rng());
        }

        self.emit(PlayerEvent::PlaylistUpdated(self.playlist.clone()));
        self.emit_queue();
        let first = self.queue[0].clone();
        self.load_file(first)
    }

    fn play_pause(&mut self) -> Result<(), PlayerError> {
        if self.current.is_none() {
            log::debug!("No audio file selected");
            return Ok(());
        }
        if self.playing {
            self.backend.pause()?;
            self.set_playing(false);
        } else {
            self.backend.play()?;
            self.set_playing(true);
        }
        Ok(())
    }

    fn seek(&mut self, fraction: f64) -> Result<(), PlayerError> {
        if self.current.is_some() {
            self.backend.seek(fraction.clamp(0.0, 1.0))?;
        }
        Ok(())
    }

    fn add_to_queue(&mut self, files: &[PathBuf]) {
        let mut updated = false;
        for file in files {
            if !self.queue.contains(file) {
                self.queue.push(file.clone());
                updated = true;
            }
        }
        if updated {
            self.emit_queue();
        }
    }

    fn remove_from_queue(&mut self, files: &[PathBuf]) {
        let before = self.queue.len();
        self.queue.retain(|f| !files.contains(f));
        if self.queue.len() != before {
            self.emit_queue();
        }
    }

    fn next(&mut self) -> Result<(), PlayerError> {
        self.play_next()
    }
}
