//! In-memory stand-ins for the FTP servers and the hypervisor tool

use async_trait::async_trait;
use mxgui_bootstrap::services::{
    CommandError, CommandOutput, CommandRunner, TransferConnector, TransferError, TransferSession,
};
use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::sync::Mutex;
use std::time::Duration;

/// Entry every fake listing carries and the retriever must skip
pub const SENTINEL: &str = ".backup";

/// How long a stalling operation hangs; longer than any test transfer timeout
pub const STALL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
struct FakeMixer {
    files: Vec<(String, Vec<u8>)>,
    fail_connect: bool,
    fail_list: bool,
    failing_files: HashSet<String>,
    stall_list: bool,
    stalling_files: HashSet<String>,
}

/// Transfer connector serving fixed files per mixer address
#[derive(Default)]
pub struct FakeConnector {
    mixers: Mutex<HashMap<String, FakeMixer>>,
    connects: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(self, address: &str, f: impl FnOnce(&mut FakeMixer)) -> Self {
        f(self
            .mixers
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default());
        self
    }

    pub fn with_files(self, address: &str, files: &[(&str, &str)]) -> Self {
        self.update(address, |mixer| {
            mixer.files.extend(
                files
                    .iter()
                    .map(|(name, content)| (name.to_string(), content.as_bytes().to_vec())),
            )
        })
    }

    pub fn failing_connect(self, address: &str) -> Self {
        self.update(address, |mixer| mixer.fail_connect = true)
    }

    pub fn failing_list(self, address: &str) -> Self {
        self.update(address, |mixer| mixer.fail_list = true)
    }

    pub fn failing_file(self, address: &str, file: &str) -> Self {
        self.update(address, |mixer| {
            mixer.failing_files.insert(file.to_string());
        })
    }

    /// Listing hangs without an answer
    pub fn stalling_list(self, address: &str) -> Self {
        self.update(address, |mixer| mixer.stall_list = true)
    }

    /// Downloading `file` hangs and leaves the session unusable
    pub fn stalling_file(self, address: &str, file: &str) -> Self {
        self.update(address, |mixer| {
            mixer.stalling_files.insert(file.to_string());
        })
    }

    /// Number of sessions opened to `address`
    pub fn connect_count(&self, address: &str) -> usize {
        self.connects
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    pub fn total_connects(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl TransferConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn TransferSession>, TransferError> {
        self.connects.lock().unwrap().push(address.to_string());
        let mixer = self.mixers.lock().unwrap().get(address).cloned();
        match mixer {
            Some(mixer) if !mixer.fail_connect => Ok(Box::new(FakeSession { mixer, open: true })),
            _ => Err(TransferError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

struct FakeSession {
    mixer: FakeMixer,
    open: bool,
}

#[async_trait]
impl TransferSession for FakeSession {
    async fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        if self.mixer.stall_list {
            self.open = false;
            tokio::time::sleep(STALL).await;
        }
        if self.mixer.fail_list {
            return Err(TransferError::List {
                dir: dir.to_string(),
                reason: "426 connection closed; transfer aborted".to_string(),
            });
        }
        let mut entries = vec![format!("{}/{}", dir, SENTINEL)];
        entries.extend(
            self.mixer
                .files
                .iter()
                .map(|(name, _)| format!("{}/{}", dir, name)),
        );
        Ok(entries)
    }

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let name = path.rsplit('/').next().unwrap_or(path);
        if !self.open {
            return Err(TransferError::Closed);
        }
        if self.mixer.stalling_files.contains(name) {
            self.open = false;
            tokio::time::sleep(STALL).await;
            return Err(TransferError::Closed);
        }
        if self.mixer.failing_files.contains(name) {
            return Err(TransferError::Retrieve {
                path: path.to_string(),
                reason: "550 file unavailable".to_string(),
            });
        }
        self.mixer
            .files
            .iter()
            .find(|(file, _)| file == name)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| TransferError::Retrieve {
                path: path.to_string(),
                reason: "550 no such file".to_string(),
            })
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Hypervisor runner that records every call
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    fail_when: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with an argument containing `pattern`
    pub fn fail_when(pattern: &str) -> Self {
        Self {
            fail_when: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose first argument is `subcommand`
    pub fn calls_of(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(_, args)| args.first().map(String::as_str) == Some(subcommand))
            .map(|(_, args)| args)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        if let Some(pattern) = &self.fail_when {
            if args.iter().any(|a| a.contains(pattern.as_str())) {
                return Err(CommandError::Failed {
                    program: program.to_string(),
                    status: Some(1),
                    stderr: "VBOX_E_FILE_ERROR".to_string(),
                });
            }
        }
        Ok(CommandOutput {
            status: Some(0),
            ..CommandOutput::default()
        })
    }
}

/// Loopback listener standing in for a reachable mixer
///
/// The kernel completes the handshake from the backlog, so nothing needs
/// to accept.
pub struct LiveMixer {
    _listener: TcpListener,
    pub address: String,
}

pub fn reachable_address() -> LiveMixer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    LiveMixer {
        _listener: listener,
        address,
    }
}

/// Loopback address nothing listens on
pub fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}
