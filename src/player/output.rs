use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::decode::{decode_track, DecodedTrack};
use super::{AudioBackend, BackendEvent};

#[derive(Debug)]
enum Command {
    Load(PathBuf),
    Play,
    Pause,
    Seek(f64),
    Stop,
    Volume(f32),
    Shutdown,
}

/// Playback state shared between the control thread and the device callback.
#[derive(Default)]
struct Playback {
    track: Option<Arc<DecodedTrack>>,
    /// Read position in source frames.
    cursor: f64,
    /// Source frames consumed per output frame.
    step: f64,
    playing: bool,
    volume: f32,
    finished: bool,
}

impl Playback {
    fn load(&mut self, track: Arc<DecodedTrack>, device_rate: u32) {
        self.step = track.sample_rate as f64 / device_rate.max(1) as f64;
        self.track = Some(track);
        self.cursor = 0.0;
        self.playing = false;
        self.finished = false;
    }

    fn position(&self) -> Option<f64> {
        let track = self.track.as_ref()?;
        let frames = track.frames();
        (frames > 0).then(|| (self.cursor / frames as f64).min(1.0))
    }

    fn seek(&mut self, fraction: f64) {
        if let Some(track) = &self.track {
            self.cursor = fraction.clamp(0.0, 1.0) * track.frames() as f64;
        }
    }

    /// Fill an interleaved output buffer with `channels` channels.
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let Some(track) = self.track.clone().filter(|_| self.playing) else {
            out.fill(0.0);
            return;
        };
        let frames = track.frames();
        let src_channels = track.channels;

        for frame in out.chunks_mut(channels.max(1)) {
            let index = self.cursor as usize;
            if index >= frames {
                frame.fill(0.0);
                self.playing = false;
                self.finished = true;
                continue;
            }
            let base = index * src_channels;
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = track.samples[base + c.min(src_channels - 1)] * self.volume;
            }
            self.cursor += self.step;
        }
    }
}

/// Audio output through the default cpal device.
///
/// A control thread owns the device stream and decodes tracks; the stream
/// callback reads from the shared [`Playback`].
pub struct CpalBackend {
    commands: Sender<Command>,
    events: Receiver<BackendEvent>,
    playback: Arc<Mutex<Playback>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new() -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let playback = Arc::new(Mutex::new(Playback {
            volume: 1.0,
            ..Playback::default()
        }));

        let shared = Arc::clone(&playback);
        let worker = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || run_output(shared, cmd_rx, event_tx, ready_tx))
            .context("Failed to spawn audio output thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                anyhow::bail!("Audio output unavailable: {}", reason);
            }
            Err(_) => anyhow::bail!("Audio output thread exited during setup"),
        }

        Ok(Self {
            commands: cmd_tx,
            events: event_rx,
            playback,
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Audio output thread is gone"))
    }
}

impl AudioBackend for CpalBackend {
    fn load(&mut self, path: &Path) -> Result<()> {
        self.send(Command::Load(path.to_path_buf()))
    }

    fn play(&mut self) -> Result<()> {
        self.send(Command::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.send(Command::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(Command::Stop)
    }

    fn seek(&mut self, fraction: f64) -> Result<()> {
        self.send(Command::Seek(fraction))
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.send(Command::Volume(volume))
    }

    fn position(&self) -> Option<f64> {
        self.playback.lock().ok()?.position()
    }

    fn try_event(&mut self) -> Option<BackendEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_output(
    playback: Arc<Mutex<Playback>>,
    commands: Receiver<Command>,
    events: Sender<BackendEvent>,
    ready: Sender<Result<(), String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no output device found".into()));
        return;
    };
    let supported = match device.default_output_config() {
        Ok(config) => config,
        Err(err) => {
            let _ = ready.send(Err(format!("no supported config: {}", err)));
            return;
        }
    };

    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_state = Arc::clone(&playback);
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match callback_state.lock() {
            Ok(mut playback) => playback.render(data, channels),
            Err(_) => data.fill(0.0),
        },
        |err| log::error!("Audio stream error: {}", err),
        None,
    );
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(format!("failed to build stream: {}", err)));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready.send(Err(format!("failed to start stream: {}", err)));
        return;
    }

    log::info!(
        "Audio output: {} ({}Hz, {} channels)",
        device.name().unwrap_or_else(|_| "unknown".into()),
        device_rate,
        channels
    );
    let _ = ready.send(Ok(()));

    loop {
        match commands.recv_timeout(Duration::from_millis(50)) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => handle_command(command, &playback, &events, device_rate),
            Err(RecvTimeoutError::Timeout) => {}
        }

        let finished = match playback.lock() {
            Ok(mut playback) => std::mem::take(&mut playback.finished),
            Err(_) => false,
        };
        if finished {
            let _ = events.send(BackendEvent::EndOfStream);
        }
    }
    log::debug!("Audio output thread finished");
}

fn handle_command(
    command: Command,
    playback: &Mutex<Playback>,
    events: &Sender<BackendEvent>,
    device_rate: u32,
) {
    if let Command::Load(path) = command {
        match decode_track(&path) {
            Ok(mut track) => {
                let image = track.tag_image.take().map(Arc::new);
                if let Ok(mut playback) = playback.lock() {
                    playback.load(Arc::new(track), device_rate);
                }
                let _ = events.send(BackendEvent::TagImage(image));
            }
            Err(err) => {
                let _ = events.send(BackendEvent::Failed(format!("{:#}", err)));
            }
        }
        return;
    }

    let Ok(mut playback) = playback.lock() else {
        return;
    };
    match command {
        Command::Play => playback.playing = playback.track.is_some(),
        Command::Pause => playback.playing = false,
        Command::Seek(fraction) => playback.seek(fraction),
        Command::Stop => {
            playback.track = None;
            playback.playing = false;
            playback.finished = false;
        }
        Command::Volume(volume) => playback.volume = volume.clamp(0.0, 1.0),
        Command::Load(_) | Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(frames: usize, rate: u32) -> Arc<DecodedTrack> {
        Arc::new(DecodedTrack {
            samples: (0..frames).flat_map(|i| [i as f32, -(i as f32)]).collect(),
            channels: 2,
            sample_rate: rate,
            tag_image: None,
        })
    }

    fn playing(track: Arc<DecodedTrack>, device_rate: u32) -> Playback {
        let mut playback = Playback {
            volume: 1.0,
            ..Playback::default()
        };
        playback.load(track, device_rate);
        playback.playing = true;
        playback
    }

    #[test]
    fn paused_output_is_silent() {
        let mut playback = playing(stereo(4, 100), 100);
        playback.playing = false;
        let mut out = [1.0f32; 4];
        playback.render(&mut out, 2);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(playback.cursor, 0.0);
    }

    #[test]
    fn renders_frames_and_flags_end_of_track() {
        let mut playback = playing(stereo(3, 100), 100);
        let mut out = [9.0f32; 8];
        playback.render(&mut out, 2);
        assert_eq!(out, [0.0, 0.0, 1.0, -1.0, 2.0, -2.0, 0.0, 0.0]);
        assert!(playback.finished);
        assert!(!playback.playing);
    }

    #[test]
    fn resamples_by_stepping_source_frames() {
        let mut playback = playing(stereo(8, 200), 100);
        let mut out = [0.0f32; 3];
        // mono device takes the first source channel
        playback.render(&mut out, 1);
        assert_eq!(out, [0.0, 2.0, 4.0]);
        assert_eq!(playback.position(), Some(6.0 / 8.0));
    }

    #[test]
    fn volume_and_seek_apply() {
        let mut playback = playing(stereo(10, 100), 100);
        playback.volume = 0.5;
        playback.seek(0.5);
        let mut out = [0.0f32; 2];
        playback.render(&mut out, 2);
        assert_eq!(out, [2.5, -2.5]);
    }
}
