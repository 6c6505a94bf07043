//! Lifecycle of the external analyzer process and its pipe reader.

use anyhow::{Context, Result};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::fifo;
use super::reader::{spawn_reader, ReaderHandle, StreamSender};
use super::StreamFormat;

/// How long a finished stream waits for its reader thread to wind down.
const READER_EXIT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    NotStarted,
    Running,
    Restarting,
    Closing,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to launch analyzer: {0:#}")]
    Launch(anyhow::Error),
    #[error("failed to start analyzer stream reader: {0}")]
    Reader(#[source] io::Error),
    #[error("can't restart analyzer, old stream reader is still alive")]
    ReaderStillAlive,
    #[error("analyzer restart is already in progress")]
    RestartInProgress,
    #[error("analyzer is already running")]
    AlreadyRunning,
    #[error("analyzer process was unexpectedly terminated")]
    UnexpectedTermination,
    #[error("analyzer is shutting down")]
    Closing,
    #[error("analyzer pipe error: {0:#}")]
    Pipe(anyhow::Error),
}

/// A launched analyzer process.
pub trait AnalyzerProcess: Send {
    fn is_running(&mut self) -> bool;
    fn kill(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher {
    fn launch(&mut self) -> Result<Box<dyn AnalyzerProcess>>;
}

/// Launches `<command> -p <config>` with output discarded.
pub struct CavaLauncher {
    command: String,
    config_path: PathBuf,
}

impl CavaLauncher {
    pub fn new(command: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            config_path: config_path.into(),
        }
    }
}

impl ProcessLauncher for CavaLauncher {
    fn launch(&mut self) -> Result<Box<dyn AnalyzerProcess>> {
        log::debug!("Launching {} process...", self.command);
        let child = Command::new(&self.command)
            .arg("-p")
            .arg(&self.config_path)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'. Is it installed?", self.command))?;
        log::debug!("{} launched with pid {}", self.command, child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl AnalyzerProcess for ChildProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

/// Owns the analyzer process and its reader thread.
///
/// Transitions:
/// `NotStarted -> Running` on launch, `Running -> Restarting` on request,
/// `Restarting -> Running` once the old reader is gone, `Running -> NotStarted`
/// when the stream dies on its own, and anything `-> Closing` on shutdown.
/// Crashes are never retried automatically.
///
/// Every reader ends with exactly one `Stopped`. Stops that belong to an
/// older reader than the current one are ignored.
pub struct Supervisor<L: ProcessLauncher> {
    launcher: L,
    fifo: PathBuf,
    format: StreamFormat,
    sender: StreamSender,
    state: AnalyzerState,
    process: Option<Box<dyn AnalyzerProcess>>,
    reader: Option<ReaderHandle>,
    readers_spawned: u64,
    stops_seen: u64,
}

impl<L: ProcessLauncher> Supervisor<L> {
    /// Creates the pipe if needed; nothing is launched yet.
    pub fn new(
        launcher: L,
        fifo: PathBuf,
        format: StreamFormat,
        sender: StreamSender,
    ) -> Result<Self, SupervisorError> {
        fifo::ensure_fifo(&fifo).map_err(SupervisorError::Pipe)?;
        Ok(Self {
            launcher,
            fifo,
            format,
            sender,
            state: AnalyzerState::NotStarted,
            process: None,
            reader: None,
            readers_spawned: 0,
            stops_seen: 0,
        })
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// New frame layout, applied at the next start.
    pub fn set_format(&mut self, format: StreamFormat) {
        self.format = format;
    }

    /// Spawn a reader, then launch the analyzer.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        match self.state {
            AnalyzerState::Running => return Err(SupervisorError::AlreadyRunning),
            AnalyzerState::Closing => return Err(SupervisorError::Closing),
            AnalyzerState::NotStarted | AnalyzerState::Restarting => {}
        }
        self.reap_reader()?;

        let reader = spawn_reader(self.fifo.clone(), self.format, self.sender.clone())
            .map_err(SupervisorError::Reader)?;
        self.reader = Some(reader);
        self.readers_spawned += 1;

        match self.launcher.launch() {
            Ok(process) => {
                self.process = Some(process);
                self.state = AnalyzerState::Running;
                log::info!(
                    "Analyzer running: {} bars, {}",
                    self.format.bars,
                    self.format.bit_format.as_str()
                );
                Ok(())
            }
            Err(err) => {
                self.state = AnalyzerState::NotStarted;
                self.release_reader();
                Err(SupervisorError::Launch(err))
            }
        }
    }

    /// Restart the analyzer, e.g. after its config changed.
    ///
    /// A running process is killed; the respawn happens in [`Self::on_stream_end`]
    /// once the reader has drained. After a crash this starts directly. While a
    /// restart is pending the request is refused until the old reader's stop
    /// has been delivered.
    pub fn restart(&mut self) -> Result<(), SupervisorError> {
        match self.state {
            AnalyzerState::Running => {
                log::debug!("Restarting analyzer process (normal mode)...");
                self.state = AnalyzerState::Restarting;
                self.kill_process();
                fifo::wake_reader(&self.fifo);
                Ok(())
            }
            AnalyzerState::NotStarted => {
                log::warn!("Restarting analyzer process (after crash)...");
                self.start()
            }
            AnalyzerState::Restarting => {
                if self.awaiting_stop() {
                    Err(SupervisorError::RestartInProgress)
                } else {
                    // the stop arrived but the reader was slow to exit
                    self.start()
                }
            }
            AnalyzerState::Closing => Err(SupervisorError::Closing),
        }
    }

    /// Handle the reader's end-of-stream notification.
    pub fn on_stream_end(&mut self) -> Result<(), SupervisorError> {
        log::debug!("Analyzer stream reader deactivated");
        self.stops_seen += 1;
        if self.stops_seen < self.readers_spawned {
            log::debug!("Ignoring end-of-stream from a previous reader");
            return Ok(());
        }
        match self.state {
            AnalyzerState::Restarting => self.start(),
            AnalyzerState::Running => {
                self.state = AnalyzerState::NotStarted;
                if self.process.as_mut().is_some_and(|p| p.is_running()) {
                    // the stream is gone, a surviving writer has nobody to talk to
                    self.kill_process();
                }
                self.process = None;
                Err(SupervisorError::UnexpectedTermination)
            }
            AnalyzerState::NotStarted | AnalyzerState::Closing => Ok(()),
        }
    }

    /// Stop everything and remove the pipe.
    pub fn close(&mut self) -> Result<(), SupervisorError> {
        self.state = AnalyzerState::Closing;
        self.kill_process();
        self.release_reader();
        fifo::remove_fifo(&self.fifo).map_err(SupervisorError::Pipe)
    }

    /// The current reader's `Stopped` has not been handled yet.
    fn awaiting_stop(&self) -> bool {
        self.stops_seen < self.readers_spawned
    }

    fn kill_process(&mut self) {
        if let Some(process) = self.process.as_mut() {
            if process.is_running() {
                if let Err(err) = process.kill() {
                    log::warn!("Failed to kill analyzer process: {}", err);
                }
            }
        }
    }

    /// Nudge a reader parked in `open()` until it exits or the grace period ends.
    fn release_reader(&self) {
        let deadline = Instant::now() + READER_EXIT_GRACE;
        while self.reader.as_ref().is_some_and(ReaderHandle::is_alive) {
            if Instant::now() >= deadline {
                log::debug!("Analyzer stream reader did not exit yet");
                break;
            }
            fifo::wake_reader(&self.fifo);
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Join the previous reader, refusing to continue while it still runs.
    fn reap_reader(&mut self) -> Result<(), SupervisorError> {
        if let Some(reader) = self.reader.take() {
            if let Err(alive) = reader.wait_exit(READER_EXIT_GRACE) {
                self.reader = Some(alive);
                return Err(SupervisorError::ReaderStillAlive);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::reader::{stream_channel, StreamEvent};
    use crate::analyzer::BitFormat;
    use crossbeam_channel::Receiver;
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const BARS: usize = 4;

    type SharedWriter = Arc<Mutex<Option<File>>>;

    /// Stands in for the analyzer: opens the pipe and writes a fixed payload.
    struct ScriptedLauncher {
        fifo: PathBuf,
        payload: Vec<u8>,
        hold_open: bool,
        close_on_kill: bool,
        fail: bool,
        launches: Arc<AtomicUsize>,
        writer: SharedWriter,
    }

    struct ScriptedProcess {
        writer: SharedWriter,
        close_on_kill: bool,
        killed: bool,
    }

    impl AnalyzerProcess for ScriptedProcess {
        fn is_running(&mut self) -> bool {
            !self.killed
        }

        fn kill(&mut self) -> io::Result<()> {
            self.killed = true;
            if self.close_on_kill {
                self.writer.lock().unwrap().take();
            }
            Ok(())
        }
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(&mut self) -> Result<Box<dyn AnalyzerProcess>> {
            if self.fail {
                anyhow::bail!("no such analyzer");
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            let mut pipe = std::fs::OpenOptions::new().write(true).open(&self.fifo)?;
            pipe.write_all(&self.payload)?;
            if self.hold_open {
                *self.writer.lock().unwrap() = Some(pipe);
            }
            Ok(Box::new(ScriptedProcess {
                writer: self.writer.clone(),
                close_on_kill: self.close_on_kill,
                killed: false,
            }))
        }
    }

    struct Harness {
        supervisor: Supervisor<ScriptedLauncher>,
        events: Receiver<StreamEvent>,
        launches: Arc<AtomicUsize>,
        writer: SharedWriter,
        fifo: PathBuf,
    }

    fn harness(name: &str, payload: Vec<u8>, hold_open: bool, close_on_kill: bool) -> Harness {
        let fifo = std::env::temp_dir().join(format!(
            "cavalcade-supervisor-{}-{}",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&fifo);
        let launches = Arc::new(AtomicUsize::new(0));
        let writer: SharedWriter = Arc::new(Mutex::new(None));
        let launcher = ScriptedLauncher {
            fifo: fifo.clone(),
            payload,
            hold_open,
            close_on_kill,
            fail: false,
            launches: launches.clone(),
            writer: writer.clone(),
        };
        let (sender, events) = stream_channel(16);
        let format = StreamFormat::new(BARS, BitFormat::Bit8);
        let supervisor = Supervisor::new(launcher, fifo.clone(), format, sender).unwrap();
        Harness {
            supervisor,
            events,
            launches,
            writer,
            fifo,
        }
    }

    fn next_event(events: &Receiver<StreamEvent>) -> StreamEvent {
        events
            .recv_timeout(Duration::from_secs(5))
            .expect("reader produced no event")
    }

    #[test]
    fn unexpected_end_goes_idle_until_explicit_start() {
        // fewer bytes than one frame, then the writer closes
        let mut h = harness("crash", vec![1, 2], false, true);

        h.supervisor.start().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);
        assert_eq!(next_event(&h.events), StreamEvent::Stopped);

        let err = h.supervisor.on_stream_end().unwrap_err();
        assert!(matches!(err, SupervisorError::UnexpectedTermination));
        assert_eq!(h.supervisor.state(), AnalyzerState::NotStarted);
        assert_eq!(h.launches.load(Ordering::SeqCst), 1, "no automatic restart");

        h.supervisor.start().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);
        assert_eq!(h.launches.load(Ordering::SeqCst), 2);

        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
        h.supervisor.close().unwrap();
        assert!(!h.fifo.exists());
    }

    #[test]
    fn restart_respawns_after_reader_drains() {
        let mut h = harness("restart", vec![255; BARS], true, true);

        h.supervisor.start().unwrap();
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));

        h.supervisor.restart().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Restarting);
        assert_eq!(next_event(&h.events), StreamEvent::Stopped);

        h.supervisor.on_stream_end().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);
        assert_eq!(h.launches.load(Ordering::SeqCst), 2);
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));

        h.supervisor.close().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Closing);
        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
    }

    #[test]
    fn restart_is_refused_while_old_reader_lives() {
        // the killed process keeps its write end open, so the reader never drains
        let mut h = harness("race", vec![255; BARS], true, false);

        h.supervisor.start().unwrap();
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));
        h.supervisor.restart().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Restarting);

        let err = h.supervisor.restart().unwrap_err();
        assert!(matches!(err, SupervisorError::RestartInProgress));
        assert_eq!(h.supervisor.state(), AnalyzerState::Restarting);
        assert!(h.events.is_empty(), "refused restart touched the stream");
        assert!(h.supervisor.process.is_some());
        assert!(h.writer.lock().unwrap().is_some(), "old writer still open");
        assert!(h.supervisor.reader.as_ref().is_some_and(ReaderHandle::is_alive));
        assert_eq!(h.launches.load(Ordering::SeqCst), 1);

        let err = h.supervisor.on_stream_end().unwrap_err();
        assert!(matches!(err, SupervisorError::ReaderStillAlive));
        assert_eq!(h.supervisor.state(), AnalyzerState::Restarting);
        assert_eq!(h.launches.load(Ordering::SeqCst), 1, "no second process");

        // release the pipe so the reader can finish
        h.writer.lock().unwrap().take();
        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
        h.supervisor.close().unwrap();
    }

    fn wait_for_reader_exit(supervisor: &Supervisor<ScriptedLauncher>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.reader.as_ref().is_some_and(ReaderHandle::is_alive) {
            assert!(Instant::now() < deadline, "reader never exited");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn second_restart_waits_for_pending_stop() {
        let mut h = harness("restart-twice", vec![255; BARS], true, true);

        h.supervisor.start().unwrap();
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));
        h.supervisor.restart().unwrap();

        // the old reader is gone but its stop is still queued
        wait_for_reader_exit(&h.supervisor);
        let err = h.supervisor.restart().unwrap_err();
        assert!(matches!(err, SupervisorError::RestartInProgress));
        assert_eq!(h.supervisor.state(), AnalyzerState::Restarting);
        assert_eq!(h.launches.load(Ordering::SeqCst), 1);

        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
        h.supervisor.on_stream_end().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);
        assert_eq!(h.launches.load(Ordering::SeqCst), 2);
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));

        h.supervisor.close().unwrap();
    }

    #[test]
    fn stop_from_failed_launch_does_not_end_next_run() {
        let mut h = harness("stale-stop", vec![255; BARS], true, true);
        h.supervisor.launcher.fail = true;
        assert!(h.supervisor.start().is_err());

        // start again before the first reader's stop is handled
        h.supervisor.launcher.fail = false;
        h.supervisor.start().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);

        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
        h.supervisor.on_stream_end().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::Running);
        assert!(h.supervisor.process.as_mut().is_some_and(|p| p.is_running()));
        assert!(matches!(next_event(&h.events), StreamEvent::Frame(_)));

        h.supervisor.close().unwrap();
    }

    #[test]
    fn launch_failure_leaves_supervisor_idle() {
        let mut h = harness("fail", Vec::new(), false, true);
        h.supervisor.launcher.fail = true;

        let err = h.supervisor.start().unwrap_err();
        assert!(matches!(err, SupervisorError::Launch(_)));
        assert_eq!(h.supervisor.state(), AnalyzerState::NotStarted);

        // the reader was woken and reports end-of-stream, which is ignored
        assert_eq!(next_event(&h.events), StreamEvent::Stopped);
        h.supervisor.on_stream_end().unwrap();
        assert_eq!(h.supervisor.state(), AnalyzerState::NotStarted);

        h.supervisor.close().unwrap();
        assert!(matches!(h.supervisor.start(), Err(SupervisorError::Closing)));
    }
}
