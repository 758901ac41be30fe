use crate::errors::DeckError;
use crate::hotkeys::KeyInput;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub trait ProcessRunner: Send + Sync {
    /// Runs the command to completion, capturing both output streams.
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DeckError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, DeckError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DeckError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), DeckError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), DeckError>;
    fn draw(&self, frame: &str) -> Result<(), DeckError>;
    /// Blocks for the next key. `None` means the input source is exhausted.
    fn read_key(&self) -> Result<Option<KeyInput>, DeckError>;
    /// Returns a key only if one arrives within `timeout`.
    fn poll_key(&self, timeout: Duration) -> Result<Option<KeyInput>, DeckError>;

    fn enter_interactive(&self) -> Result<(), DeckError> {
        Ok(())
    }

    fn leave_interactive(&self) -> Result<(), DeckError> {
        Ok(())
    }
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DeckError> {
        std::fs::read_to_string(path).map_err(|e| DeckError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DeckError> {
        std::fs::write(path, contents).map_err(|e| DeckError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), DeckError> {
        std::fs::create_dir_all(path).map_err(|e| DeckError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Default)]
pub struct ProductionProcessRunner;

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DeckError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args).stdin(std::process::Stdio::null());
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .map_err(|e| DeckError::Process(format!("{}: {e}", request.program)))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl ProductionTerminal {
    fn next_press(&self) -> Result<Option<KeyInput>, DeckError> {
        use crossterm::event::{self, Event, KeyEventKind};

        match event::read().map_err(|e| DeckError::Io(e.to_string()))? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(KeyInput::from(key))),
            _ => Ok(None),
        }
    }
}

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn write_line(&self, line: &str) -> Result<(), DeckError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| DeckError::Io(e.to_string()))
    }

    fn draw(&self, frame: &str) -> Result<(), DeckError> {
        use crossterm::cursor::MoveTo;
        use crossterm::execute;
        use crossterm::terminal::{Clear, ClearType};
        use std::io::Write;

        let mut out = std::io::stdout();
        execute!(out, Clear(ClearType::All), MoveTo(0, 0))
            .map_err(|e| DeckError::Io(e.to_string()))?;
        // Raw mode does not translate \n into a carriage return.
        let text = frame.replace('\n', "\r\n");
        out.write_all(text.as_bytes())
            .map_err(|e| DeckError::Io(e.to_string()))?;
        out.flush().map_err(|e| DeckError::Io(e.to_string()))
    }

    fn read_key(&self) -> Result<Option<KeyInput>, DeckError> {
        loop {
            if let Some(key) = self.next_press()? {
                return Ok(Some(key));
            }
        }
    }

    fn poll_key(&self, timeout: Duration) -> Result<Option<KeyInput>, DeckError> {
        let ready =
            crossterm::event::poll(timeout).map_err(|e| DeckError::Io(e.to_string()))?;
        if !ready {
            return Ok(None);
        }
        self.next_press()
    }

    fn enter_interactive(&self) -> Result<(), DeckError> {
        crossterm::terminal::enable_raw_mode().map_err(|e| DeckError::Io(e.to_string()))
    }

    fn leave_interactive(&self) -> Result<(), DeckError> {
        crossterm::terminal::disable_raw_mode().map_err(|e| DeckError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    step: Duration,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            step: Duration::ZERO,
        }
    }

    /// Every call to `now` advances the clock by `step` after reading it.
    pub fn ticking(now: SystemTime, step: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            step,
        }
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        let mut now = self.now.lock().expect("clock lock");
        let current = *now;
        *now += self.step;
        current
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DeckError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| DeckError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), DeckError> {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> Result<(), DeckError> {
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    draws: Arc<Mutex<Vec<String>>>,
    keys: Arc<Mutex<VecDeque<KeyInput>>>,
    polled_keys: Arc<Mutex<VecDeque<KeyInput>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn enqueue_keys<K: Into<KeyInput>>(&self, keys: impl IntoIterator<Item = K>) {
        let mut queue = self.keys.lock().expect("keys lock");
        queue.extend(keys.into_iter().map(Into::into));
    }

    /// Keys handed out by `poll_key`, e.g. a cancel pressed while a batch runs.
    pub fn enqueue_polled_keys<K: Into<KeyInput>>(&self, keys: impl IntoIterator<Item = K>) {
        let mut queue = self.polled_keys.lock().expect("polled keys lock");
        queue.extend(keys.into_iter().map(Into::into));
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        self.draws.lock().expect("draw lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, _line: &str) -> Result<(), DeckError> {
        Ok(())
    }

    fn draw(&self, frame: &str) -> Result<(), DeckError> {
        self.draws
            .lock()
            .expect("draw lock")
            .push(frame.to_string());
        Ok(())
    }

    fn read_key(&self) -> Result<Option<KeyInput>, DeckError> {
        Ok(self.keys.lock().expect("keys lock").pop_front())
    }

    fn poll_key(&self, _timeout: Duration) -> Result<Option<KeyInput>, DeckError> {
        Ok(self
            .polled_keys
            .lock()
            .expect("polled keys lock")
            .pop_front())
    }
}

/// Replays queued outputs in order and records every request it was given.
#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<VecDeque<Result<ProcessOutput, DeckError>>>>,
    requests: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, DeckError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(output);
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DeckError> {
        self.requests.lock().expect("requests lock").push(request);
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(DeckError::Process("no fake response queued".to_string())))
    }
}
