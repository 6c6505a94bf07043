//! The UI thread: input, stream intake, collaborator events and repaints.

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use image::{DynamicImage, RgbaImage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analyzer::ini;
use crate::analyzer::reader::{stream_channel, StreamEvent};
use crate::analyzer::supervisor::{CavaLauncher, Supervisor};
use crate::analyzer::StreamFormat;
use crate::cli::Cli;
use crate::color::autocolor::{AutoColor, ImageSource};
use crate::color::palette::Palette;
use crate::color::ColorState;
use crate::config::ConfigStore;
use crate::player::output::CpalBackend;
use crate::player::session::{self, Session};
use crate::player::{PlaybackEngine, Player, PlayerEvent};
use crate::render::canvas::{self, Canvas};
use crate::render::spectrum::{Spectrum, UpdateOutcome};
use crate::render::term::TerminalSurface;

const SEEK_STEP: f64 = 0.05;
const SCALE_STEP: f32 = 1.1;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Quit,
    PlayPause,
    Next,
    Seek(f64),
    RestartAnalyzer,
    ToggleAutoColor,
    ToggleImage,
    ToggleTagImage,
    SaveColor,
    Scale(f32),
}

pub fn action_for(key: KeyEvent) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let action = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        KeyCode::Char(' ') => Action::PlayPause,
        KeyCode::Char('n') => Action::Next,
        KeyCode::Left => Action::Seek(-SEEK_STEP),
        KeyCode::Right => Action::Seek(SEEK_STEP),
        KeyCode::Char('r') => Action::RestartAnalyzer,
        KeyCode::Char('a') => Action::ToggleAutoColor,
        KeyCode::Char('i') => Action::ToggleImage,
        KeyCode::Char('t') => Action::ToggleTagImage,
        KeyCode::Char('s') => Action::SaveColor,
        KeyCode::Char('+') | KeyCode::Char('=') => Action::Scale(SCALE_STEP),
        KeyCode::Char('-') => Action::Scale(1.0 / SCALE_STEP),
        _ => return None,
    };
    Some(action)
}

/// Background artwork, decoded once and rescaled per surface size.
#[derive(Default)]
struct Background {
    source: Option<DynamicImage>,
    scaled: Option<RgbaImage>,
}

impl Background {
    fn set(&mut self, image: Option<DynamicImage>, width: u32, height: u32) {
        self.source = image;
        self.rescale(width, height);
    }

    fn rescale(&mut self, width: u32, height: u32) {
        self.scaled = self
            .source
            .as_ref()
            .map(|image| canvas::cover(image, width, height));
    }
}

pub struct App {
    store: ConfigStore,
    palette: Palette,
    ini_path: PathBuf,
    session_path: PathBuf,

    surface: TerminalSurface,
    canvas: Canvas,
    spectrum: Spectrum,
    colors: ColorState,
    background: Background,

    supervisor: Supervisor<CavaLauncher>,
    stream: Receiver<StreamEvent>,

    player: Option<Player<CpalBackend>>,
    player_events: Option<Receiver<PlayerEvent>>,
    track: Option<PathBuf>,
    playing: bool,
    progress: f64,

    autocolor: AutoColor,
    tag_image: Option<Arc<Vec<u8>>>,
    color_key: Option<String>,

    dirty: bool,
    quit: bool,
}

impl App {
    pub fn new(cli: &Cli, store: ConfigStore) -> Result<Self> {
        let config = store.get().clone();
        let dir = store
            .path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(crate::config::config_dir);
        let ini_path = dir.join("cava.ini");
        let palette = Palette::open(dir.join("colors.toml"));

        let (sender, stream) = stream_channel(config.analyzer.queue_capacity);
        let format = StreamFormat::new(config.analyzer.bars, config.analyzer.bit_format);
        let launcher = CavaLauncher::new(config.analyzer.command.clone(), ini_path.clone());
        let supervisor = Supervisor::new(launcher, config.analyzer.fifo.clone(), format, sender)?;

        let (player, player_events) = if cli.no_player {
            log::info!("Starting without audio player function");
            (None, None)
        } else {
            match CpalBackend::new() {
                Ok(backend) => {
                    let (player, events) = Player::new(backend, &config.player);
                    (Some(player), Some(events))
                }
                Err(err) => {
                    log::info!("Starting without audio player function: {:#}", err);
                    (None, None)
                }
            }
        };

        let surface = TerminalSurface::new(config.ui.status)?;
        let (width, height) = surface.canvas_size();
        let mut spectrum = Spectrum::new(
            config.draw.clone(),
            config.offset.clone(),
            config.analyzer.bars,
        );
        spectrum.size_update(width, height);

        let mut app = Self {
            palette,
            ini_path,
            session_path: session::default_session_path(),
            surface,
            canvas: Canvas::new(width, height),
            spectrum,
            colors: ColorState::from_config(&config.color),
            background: Background::default(),
            supervisor,
            stream,
            player,
            player_events,
            track: None,
            playing: false,
            progress: 0.0,
            autocolor: AutoColor::new(config.autocolor.clone(), config.color.autofg.a),
            tag_image: None,
            color_key: None,
            dirty: true,
            quit: false,
            store,
        };
        app.load_session(cli);
        app.refresh_image();
        Ok(app)
    }

    fn load_session(&mut self, cli: &Cli) {
        let Some(player) = self.player.as_mut() else {
            return;
        };

        let mut files = session::filter_audio(&cli.files);
        let mut queue = None;
        if cli.restore {
            match Session::load(&self.session_path) {
                Ok(Some(saved)) => {
                    files = saved.playlist;
                    queue = Some(saved.queue);
                }
                Ok(None) => log::warn!("Can't restore previous player session"),
                Err(err) => log::warn!("Can't restore previous player session: {:#}", err),
            }
        }

        if let Err(err) = player.load(files, queue) {
            log::error!("{}", err);
        }
        if cli.play {
            if let Err(err) = player.play_pause() {
                log::error!("{}", err);
            }
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.start_analyzer();

        let tick = Duration::from_secs_f64(1.0 / self.store.get().ui.fps.max(1) as f64);
        let mut last_progress = Instant::now();

        while !self.quit {
            let started = Instant::now();

            self.drain_stream();
            self.drain_player();
            self.drain_colors();

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                if let Some(player) = self.player.as_mut() {
                    player.tick_progress();
                }
                last_progress = Instant::now();
            }

            if self.dirty {
                self.render()?;
                self.dirty = false;
            }

            self.handle_input(tick.saturating_sub(started.elapsed()))?;
        }
        Ok(())
    }

    pub fn shutdown(mut self) {
        log::debug!("Shutting down");
        if let Err(err) = self.supervisor.close() {
            log::error!("{}", err);
        }

        if let Some(player) = self.player.as_mut() {
            let session = Session {
                playlist: player.playlist().to_vec(),
                queue: player.queue().to_vec(),
            };
            if let Err(err) = session.save(&self.session_path) {
                log::warn!("Failed to save player session: {:#}", err);
            }
            player.stop();
        }

        let config = self.store.get_mut();
        self.colors.store_into(&mut config.color);
        config.draw.scale = self.spectrum.scale();
        if let Err(err) = self.store.save() {
            log::error!("Failed to save config: {:#}", err);
        }
    }

    fn start_analyzer(&mut self) {
        if let Err(err) = ini::write_config(&self.store.get().analyzer, &self.ini_path) {
            log::error!("{:#}", err);
            return;
        }
        if let Err(err) = self.supervisor.start() {
            log::error!("{}", err);
        }
    }

    fn restart_analyzer(&mut self) {
        let analyzer = &self.store.get().analyzer;
        if let Err(err) = ini::write_config(analyzer, &self.ini_path) {
            log::error!("{:#}", err);
            return;
        }
        let format = StreamFormat::new(analyzer.bars, analyzer.bit_format);
        if format != self.supervisor.format() {
            self.supervisor.set_format(format);
            self.spectrum.set_bars(format.bars);
        }
        if let Err(err) = self.supervisor.restart() {
            log::error!("{}", err);
        }
    }

    fn drain_stream(&mut self) {
        while let Ok(event) = self.stream.try_recv() {
            match event {
                StreamEvent::Frame(frame) => match self.spectrum.update(frame) {
                    UpdateOutcome::Repaint | UpdateOutcome::Settle => self.dirty = true,
                    UpdateOutcome::Suppressed => {}
                },
                StreamEvent::Stopped => {
                    if let Err(err) = self.supervisor.on_stream_end() {
                        log::error!("{}", err);
                    }
                    self.dirty = true;
                }
            }
        }
    }

    fn drain_player(&mut self) {
        let Some(player) = self.player.as_mut() else {
            return;
        };
        player.poll();

        let Some(events) = self.player_events.as_ref() else {
            return;
        };
        let pending: Vec<PlayerEvent> = events.try_iter().collect();
        for event in pending {
            match event {
                PlayerEvent::TrackChanged(track) => {
                    self.track = track;
                    self.progress = 0.0;
                }
                PlayerEvent::PlaybackStateChanged(playing) => self.playing = playing,
                PlayerEvent::Progress(fraction) => self.progress = fraction,
                PlayerEvent::TagImage(data) => {
                    self.tag_image = data;
                    self.refresh_image();
                }
                PlayerEvent::PlaylistUpdated(list) => {
                    log::debug!("Playlist updated: {} files", list.len())
                }
                PlayerEvent::QueueUpdated(queue) => {
                    log::debug!("Queue updated: {} files", queue.len())
                }
            }
            self.dirty = true;
        }
    }

    fn drain_colors(&mut self) {
        while let Some(update) = self.autocolor.try_recv() {
            if self.color_key.as_deref() != Some(update.key.as_str()) {
                log::debug!("Dropping stale color for {}", update.key);
                continue;
            }
            self.colors.set_auto_color(update.color);
            self.dirty = true;
        }
    }

    /// Current artwork source and the key its saved color is stored under.
    fn image_source(&self) -> Option<(String, ImageSource)> {
        let image = &self.store.get().image;
        if image.usetag {
            if let (Some(data), Some(track)) = (&self.tag_image, &self.track) {
                return Some((track.display().to_string(), ImageSource::Bytes(data.clone())));
            }
        }
        image
            .default
            .as_ref()
            .map(|path| (path.display().to_string(), ImageSource::File(path.clone())))
    }

    /// Reload the background and recompute the auto color after a source change.
    fn refresh_image(&mut self) {
        let source = self.image_source();
        let (width, height) = (self.canvas.width(), self.canvas.height());

        let picture = source.as_ref().and_then(|(key, source)| match source.load() {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("Can't load background image {}: {}", key, err);
                None
            }
        });
        self.background.set(picture, width, height);
        self.color_key = source.as_ref().map(|(key, _)| key.clone());
        self.dirty = true;

        if self.colors.is_auto() {
            if let Some((key, source)) = source {
                self.request_color(key, source);
            }
        }
    }

    fn request_color(&mut self, key: String, source: ImageSource) {
        if let Some(saved) = self.palette.get(&key) {
            log::debug!("Using saved color {} for {}", saved, key);
            self.colors.set_auto_color(saved);
            return;
        }
        if let Err(err) = self.autocolor.request(key, source) {
            log::error!("{}", err);
        }
    }

    fn handle_input(&mut self, timeout: Duration) -> Result<()> {
        let mut wait = timeout;
        while let Some(event) = self.surface.poll_event(wait)? {
            wait = Duration::ZERO;
            match event {
                Event::Key(key) => {
                    if let Some(action) = action_for(key) {
                        self.apply(action);
                    }
                }
                Event::Resize(cols, rows) => self.resize(cols, rows)?,
                _ => {}
            }
            if self.quit {
                break;
            }
        }
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.surface.resize(cols, rows)?;
        let (width, height) = self.surface.canvas_size();
        self.canvas.resize(width, height);
        self.spectrum.size_update(width, height);
        self.background.rescale(width, height);
        self.dirty = true;
        Ok(())
    }

    fn apply(&mut self, action: Action) {
        let result = match action {
            Action::Quit => {
                self.quit = true;
                Ok(())
            }
            Action::PlayPause => self.with_player(|p| p.play_pause()),
            Action::Next => self.with_player(|p| p.next()),
            Action::Seek(delta) => {
                let target = (self.progress + delta).clamp(0.0, 1.0);
                self.with_player(|p| p.seek(target))
            }
            Action::RestartAnalyzer => {
                self.restart_analyzer();
                Ok(())
            }
            Action::ToggleAutoColor => {
                let auto = !self.colors.is_auto();
                self.colors.set_auto(auto);
                if auto && self.colors.auto_color().is_none() {
                    if let Some((key, source)) = self.image_source() {
                        self.request_color(key, source);
                    }
                }
                Ok(())
            }
            Action::ToggleImage => {
                let image = &mut self.store.get_mut().image;
                image.show = !image.show;
                Ok(())
            }
            Action::ToggleTagImage => {
                let image = &mut self.store.get_mut().image;
                image.usetag = !image.usetag;
                self.refresh_image();
                Ok(())
            }
            Action::SaveColor => {
                self.save_color();
                Ok(())
            }
            Action::Scale(factor) => {
                self.spectrum.set_scale(self.spectrum.scale() * factor);
                Ok(())
            }
        };
        if let Err(err) = result {
            log::error!("{}", err);
        }
        self.dirty = true;
    }

    fn with_player<F>(&mut self, f: F) -> Result<(), crate::player::PlayerError>
    where
        F: FnOnce(&mut Player<CpalBackend>) -> Result<(), crate::player::PlayerError>,
    {
        match self.player.as_mut() {
            Some(player) => f(player),
            None => {
                log::debug!("Audio player is not available");
                Ok(())
            }
        }
    }

    fn save_color(&mut self) {
        let (Some(key), Some(color)) = (self.color_key.clone(), self.colors.auto_color()) else {
            log::warn!("No detected color to save");
            return;
        };
        self.palette.insert(key.clone(), color);
        match self.palette.save() {
            Ok(()) => log::info!("Saved color {} for {}", color, key),
            Err(err) => log::error!("Failed to save color palette: {:#}", err),
        }
    }

    fn status_line(&self) -> String {
        let track = self
            .track
            .as_ref()
            .and_then(|t| t.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "no track".into());
        let state = if self.playing { ">" } else { "||" };
        let color = if self.colors.is_auto() { "auto" } else { "manual" };
        format!(
            " {} {} {:>3.0}% | analyzer {:?} | color {} {} | x{:.2}",
            state,
            track,
            self.progress * 100.0,
            self.supervisor.state(),
            color,
            self.colors.foreground(),
            self.spectrum.scale()
        )
    }

    fn render(&mut self) -> Result<()> {
        self.canvas.clear(self.colors.background());
        if self.store.get().image.show {
            if let Some(background) = &self.background.scaled {
                self.canvas.blit_background(background);
            }
        }
        self.spectrum.paint(&mut self.canvas, self.colors.foreground());

        let status = self.status_line();
        self.surface.present(&self.canvas, Some(&status))?;
        Ok(())
    }
}
