//! Loopback FTP server for tests
//!
//! Plain FTP, passive mode, one in-memory file system shared by all sessions.
//! Accepts any user name with the password `s3cret`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

pub(crate) const PASSWORD: &str = "s3cret";

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    logins: Vec<(String, String)>,
}

pub(crate) struct FakeFtpServer {
    port: u16,
    state: Arc<Mutex<State>>,
}

impl FakeFtpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(session(stream, shared.clone()));
            }
        });
        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn dirs(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.iter().cloned().collect()
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().logins.clone()
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

async fn reply(write: &mut OwnedWriteHalf, line: &str) {
    let _ = write.write_all(format!("{}\r\n", line).as_bytes()).await;
}

async fn session(stream: TcpStream, state: Arc<Mutex<State>>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut user = String::new();
    let mut data: Option<TcpListener> = None;

    reply(&mut write, "220 fake ftp ready").await;

    while let Ok(Some(line)) = lines.next_line().await {
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let arg = arg.to_string();
        let response = match command {
            "USER" => {
                user = arg;
                "331 password required".to_string()
            }
            "PASS" if arg == PASSWORD => {
                state.lock().unwrap().logins.push((user.clone(), arg));
                "230 logged in".to_string()
            }
            "PASS" => "530 login incorrect".to_string(),
            "TYPE" => "200 type set".to_string(),
            "MKD" => {
                if state.lock().unwrap().dirs.insert(arg) {
                    "257 created".to_string()
                } else {
                    "550 exists".to_string()
                }
            }
            "RMD" => {
                if state.lock().unwrap().dirs.remove(&arg) {
                    "250 removed".to_string()
                } else {
                    "550 no such directory".to_string()
                }
            }
            "DELE" => {
                if state.lock().unwrap().files.remove(&arg).is_some() {
                    "250 deleted".to_string()
                } else {
                    "550 no such file".to_string()
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                data = Some(listener);
                format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256)
            }
            "STOR" => match data.take() {
                Some(listener) => {
                    reply(&mut write, "150 ready").await;
                    let (mut conn, _) = listener.accept().await.unwrap();
                    let mut content = Vec::new();
                    let _ = conn.read_to_end(&mut content).await;
                    state.lock().unwrap().files.insert(arg, content);
                    "226 stored".to_string()
                }
                None => "425 use PASV first".to_string(),
            },
            "NLST" => match data.take() {
                Some(listener) => {
                    reply(&mut write, "150 listing").await;
                    let (mut conn, _) = listener.accept().await.unwrap();
                    let listing: String = {
                        let state = state.lock().unwrap();
                        state
                            .files
                            .keys()
                            .chain(state.dirs.iter())
                            .filter(|p| parent(p) == arg)
                            .map(|p| format!("{}\r\n", file_name(p)))
                            .collect()
                    };
                    let _ = conn.write_all(listing.as_bytes()).await;
                    let _ = conn.shutdown().await;
                    "226 done".to_string()
                }
                None => "425 use PASV first".to_string(),
            },
            "QUIT" => {
                reply(&mut write, "221 bye").await;
                break;
            }
            _ => "502 not implemented".to_string(),
        };
        reply(&mut write, &response).await;
    }
}
