//! FTP connector and backup retriever against a minimal loopback FTP server
//!
//! The server speaks just enough of the protocol for login, passive-mode
//! NLST and RETR. Files listed in `stalling` hang on RETR and then drop the
//! connection.

use mxgui_bootstrap::services::{BackupRetriever, FtpConnector};
use mxgui_common::report::BackupStatus;
use mxgui_common::{BootstrapConfig, Mixer, ModelType};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HANG: Duration = Duration::from_secs(3);

fn reply(writer: &mut TcpStream, line: &str) -> bool {
    writer.write_all(format!("{}\r\n", line).as_bytes()).is_ok()
}

#[derive(Clone)]
struct StubFtp {
    files: Vec<(&'static str, &'static str)>,
    stalling: Vec<&'static str>,
}

impl StubFtp {
    /// Serve on a loopback port until the test binary exits
    fn start(self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for control in listener.incoming().flatten() {
                let server = self.clone();
                thread::spawn(move || server.handle(control));
            }
        });
        port
    }

    fn handle(&self, control: TcpStream) {
        let mut writer = control.try_clone().unwrap();
        let mut reader = BufReader::new(control);
        let mut data: Option<TcpListener> = None;

        if !reply(&mut writer, "220 stub ready") {
            return;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let line = line.trim_end();
            let (command, argument) = line.split_once(' ').unwrap_or((line, ""));

            let ok = match command.to_ascii_uppercase().as_str() {
                "USER" => reply(&mut writer, "331 password please"),
                "PASS" => reply(&mut writer, "230 logged in"),
                "TYPE" => reply(&mut writer, "200 type set"),
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                    let port = listener.local_addr().unwrap().port();
                    data = Some(listener);
                    reply(
                        &mut writer,
                        &format!(
                            "227 Entering Passive Mode (127,0,0,1,{},{})",
                            port >> 8,
                            port & 0xff
                        ),
                    )
                }
                "NLST" => {
                    let names: String = self
                        .files
                        .iter()
                        .map(|(name, _)| format!("{}\r\n", name))
                        .collect();
                    self.send(&mut writer, data.take(), names.as_bytes())
                }
                "RETR" => {
                    let name = argument.rsplit('/').next().unwrap_or(argument);
                    if self.stalling.iter().any(|file| *file == name) {
                        thread::sleep(HANG);
                        return;
                    }
                    match self.files.iter().find(|(file, _)| *file == name) {
                        Some((_, content)) => {
                            self.send(&mut writer, data.take(), content.as_bytes())
                        }
                        None => reply(&mut writer, "550 no such file"),
                    }
                }
                "QUIT" => {
                    let _ = reply(&mut writer, "221 bye");
                    return;
                }
                _ => reply(&mut writer, "502 not implemented"),
            };
            if !ok {
                return;
            }
        }
    }

    fn send(&self, writer: &mut TcpStream, data: Option<TcpListener>, payload: &[u8]) -> bool {
        let Some(listener) = data else {
            return writer.write_all(b"425 use PASV first\r\n").is_ok();
        };
        if writer.write_all(b"150 opening data connection\r\n").is_err() {
            return false;
        }
        let Ok((mut stream, _)) = listener.accept() else {
            return false;
        };
        let _ = stream.write_all(payload);
        drop(stream);
        writer.write_all(b"226 transfer complete\r\n").is_ok()
    }
}

fn retriever(port: u16, share: &std::path::Path) -> BackupRetriever {
    let mut transfer = BootstrapConfig::default().transfer;
    transfer.port = port;
    transfer.timeout_secs = 1;
    let connector = Arc::new(FtpConnector::from_config(&transfer));
    BackupRetriever::new(connector, share.to_path_buf(), &transfer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_backup_downloads_every_file() {
    let port = StubFtp {
        files: vec![("show1", "one"), ("show2", "two")],
        stalling: Vec::new(),
    }
    .start();
    let temp_dir = TempDir::new().unwrap();

    // The inventory port is ignored; the transfer port is dialed
    let mixer = Mixer::new("FTP_OK", "127.0.0.1:1", "", ModelType::Mc96);
    let outcome = retriever(port, temp_dir.path())
        .retrieve(&mixer, &CancellationToken::new())
        .await;

    assert_eq!(outcome.status, BackupStatus::Completed);
    assert_eq!(outcome.downloaded, vec!["show1", "show2"]);
    let productions = temp_dir.path().join("FTP_OK/productions");
    assert_eq!(std::fs::read_to_string(productions.join("show1")).unwrap(), "one");
    assert_eq!(std::fs::read_to_string(productions.join("show2")).unwrap(), "two");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ftp_stalled_download_reconnects_for_remaining_files() {
    let port = StubFtp {
        files: vec![("fast1", "1"), ("slow", "2"), ("fast2", "3")],
        stalling: vec!["slow"],
    }
    .start();
    let temp_dir = TempDir::new().unwrap();

    let mixer = Mixer::new("FTP_STALL", "127.0.0.1", "", ModelType::Mc96);
    let started = Instant::now();
    let outcome = retriever(port, temp_dir.path())
        .retrieve(&mixer, &CancellationToken::new())
        .await;

    assert!(started.elapsed() < HANG);
    assert_eq!(outcome.status, BackupStatus::Partial);
    assert_eq!(outcome.downloaded, vec!["fast1", "fast2"]);
    assert_eq!(outcome.failed_files.len(), 1);
    assert_eq!(outcome.failed_files[0].file, "slow");
    let productions = temp_dir.path().join("FTP_STALL/productions");
    assert_eq!(std::fs::read_to_string(productions.join("fast2")).unwrap(), "3");
    assert!(!productions.join("slow").exists());
}
