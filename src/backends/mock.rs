//! In-memory engine for testing.
//!
//! [`MockEngine`] is a [`Connector`] whose streams are served by a scripted
//! engine running on an in-memory duplex pipe. It speaks the same line
//! protocol as the real daemon, so everything above the transport is
//! exercised unchanged.

use crate::backends::{BoxedStream, Connector};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinSet;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Default virus definitions version reported for `VPS`.
pub const MOCK_VPS_VERSION: &str = "24011004";

/// What the mock engine answers to one `SCAN` command.
///
/// Lines may contain `{path}`, which is replaced by the requested path.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    lines: Vec<String>,
    delay: Option<Duration>,
    complete: bool,
}

impl ScriptedReply {
    /// A single clean result line.
    pub fn clean() -> Self {
        Self::lines(["SCAN {path}"])
    }

    /// A single detection line naming `malware`.
    pub fn infected(malware: impl Into<String>) -> Self {
        Self::lines([format!("SCAN {{path}}\t[L]0.0\t{}", malware.into())])
    }

    /// An engine fault for the path.
    pub fn engine_error(code: u16, message: impl Into<String>) -> Self {
        Self::lines([format!("{} {}\tSCAN {{path}}", code, message.into())]).without_completion()
    }

    /// Arbitrary result lines.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            delay: None,
            complete: true,
        }
    }

    /// Waits before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Omits the `200 SCAN OK` line after the results.
    pub fn without_completion(mut self) -> Self {
        self.complete = false;
        self
    }

    fn render(&self, path: &str) -> Vec<String> {
        let mut rendered: Vec<String> = self
            .lines
            .iter()
            .map(|line| format!("{}\r\n", line.replace("{path}", path)))
            .collect();
        if self.complete {
            rendered.push("200 SCAN OK\r\n".to_string());
        }
        rendered
    }
}

impl Default for ScriptedReply {
    fn default() -> Self {
        Self::clean()
    }
}

#[derive(Debug)]
struct Script {
    replies: HashMap<String, ScriptedReply>,
    default_reply: ScriptedReply,
    silent: HashSet<String>,
    vps_lines: Vec<String>,
    greeting: Option<String>,
    chunk_size: Option<usize>,
    refuse_next: u32,
    unavailable: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            replies: HashMap::new(),
            default_reply: ScriptedReply::clean(),
            silent: HashSet::new(),
            vps_lines: vec![format!("VPS {}", MOCK_VPS_VERSION)],
            greeting: None,
            chunk_size: None,
            refuse_next: 0,
            unavailable: false,
        }
    }
}

#[derive(Debug)]
struct Stats {
    commands: Mutex<Vec<String>>,
    connections: AtomicU64,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    kill: watch::Sender<u64>,
}

impl Default for Stats {
    fn default() -> Self {
        let (kill, _) = watch::channel(0);
        Self {
            commands: Mutex::new(Vec::new()),
            connections: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
            kill,
        }
    }
}

/// A scripted engine reachable through the [`Connector`] interface.
///
/// Clones share the same script and statistics.
///
/// # Examples
///
/// ```rust
/// use scanline::backends::{MockEngine, ScriptedReply};
/// use std::time::Duration;
///
/// let engine = MockEngine::new()
///     .with_reply("/tmp/eicar.com", ScriptedReply::infected("EICAR Test-NOT virus!!!"))
///     .with_reply(
///         "/tmp/slow.bin",
///         ScriptedReply::clean().with_delay(Duration::from_millis(50)),
///     )
///     .with_silent_path("/tmp/hang.bin");
///
/// assert_eq!(engine.connection_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    script: Arc<RwLock<Script>>,
    stats: Arc<Stats>,
}

impl MockEngine {
    /// Creates an engine that reports every path clean.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::RwLockReadGuard<'_, Script> {
        self.script
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script_mut(&self) -> std::sync::RwLockWriteGuard<'_, Script> {
        self.script
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Scripts the reply for one path.
    pub fn with_reply(self, path: impl Into<String>, reply: ScriptedReply) -> Self {
        self.add_reply(path, reply);
        self
    }

    /// Sets the reply for paths without a scripted one.
    pub fn with_default_reply(self, reply: ScriptedReply) -> Self {
        self.script_mut().default_reply = reply;
        self
    }

    /// Never answers `SCAN` for `path`.
    pub fn with_silent_path(self, path: impl Into<String>) -> Self {
        self.script_mut().silent.insert(path.into());
        self
    }

    /// Sets the lines sent in answer to `VPS`.
    pub fn with_vps_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_mut().vps_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Sends `line` as soon as a connection opens.
    pub fn with_greeting(self, line: impl Into<String>) -> Self {
        self.script_mut().greeting = Some(line.into());
        self
    }

    /// Delivers output in writes of at most `size` bytes.
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.script_mut().chunk_size = Some(size.max(1));
        self
    }

    /// Scripts the reply for one path (shared-reference version).
    pub fn add_reply(&self, path: impl Into<String>, reply: ScriptedReply) {
        self.script_mut().replies.insert(path.into(), reply);
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        self.script_mut().refuse_next = count;
    }

    /// Refuses every connection attempt while `unavailable` is set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.script_mut().unavailable = unavailable;
    }

    /// Closes every open connection from the engine side.
    pub fn drop_connections(&self) {
        self.stats.kill.send_modify(|generation| *generation += 1);
    }

    /// Commands received so far, without line terminators.
    pub fn commands(&self) -> Vec<String> {
        self.stats
            .commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of connections accepted.
    pub fn connection_count(&self) -> u64 {
        self.stats.connections.load(Ordering::Relaxed)
    }

    /// Highest number of `SCAN` commands the engine was answering at once.
    pub fn max_outstanding(&self) -> usize {
        self.stats.max_outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockEngine {
    fn address(&self) -> String {
        "mock://engine".to_string()
    }

    async fn connect(&self) -> io::Result<BoxedStream> {
        {
            let mut script = self.script_mut();
            if script.unavailable {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "mock engine unavailable",
                ));
            }
            if script.refuse_next > 0 {
                script.refuse_next -= 1;
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "mock engine refused connection",
                ));
            }
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        let kill = self.stats.kill.subscribe();
        tokio::spawn(serve(server, self.clone(), kill));
        Ok(Box::new(client))
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>;

async fn serve(stream: DuplexStream, engine: MockEngine, mut kill: watch::Receiver<u64>) {
    let (reader, writer) = tokio::io::split(stream);
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
    let chunk_size = engine.script().chunk_size;

    let greeting = engine.script().greeting.clone();
    if let Some(greeting) = greeting {
        if write_lines(&writer, &[format!("{}\r\n", greeting)], chunk_size)
            .await
            .is_err()
        {
            return;
        }
    }

    let mut responders = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
            _ = kill.changed() => break,
        };

        engine
            .stats
            .commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.clone());

        if line == "VPS" {
            let reply: Vec<String> = engine
                .script()
                .vps_lines
                .iter()
                .map(|l| format!("{}\r\n", l))
                .collect();
            let writer = writer.clone();
            responders.spawn(async move {
                let _ = write_lines(&writer, &reply, chunk_size).await;
            });
        } else if let Some(path) = line.strip_prefix("SCAN ") {
            let reply = {
                let script = engine.script();
                if script.silent.contains(path) {
                    continue;
                }
                script
                    .replies
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| script.default_reply.clone())
            };
            let rendered = reply.render(path);
            let writer = writer.clone();
            let stats = engine.stats.clone();

            let current = stats.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            stats.max_outstanding.fetch_max(current, Ordering::SeqCst);

            responders.spawn(async move {
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                let (last, body) = match rendered.split_last() {
                    Some((last, body)) => (Some(last.clone()), body.to_vec()),
                    None => (None, Vec::new()),
                };
                let _ = write_lines(&writer, &body, chunk_size).await;
                // The client may issue the next command once it sees the last line.
                stats.outstanding.fetch_sub(1, Ordering::SeqCst);
                if let Some(last) = last {
                    let _ = write_lines(&writer, &[last], chunk_size).await;
                }
            });
        } else {
            let writer = writer.clone();
            responders.spawn(async move {
                let _ = write_lines(&writer, &["501 Unknown command\r\n".to_string()], chunk_size)
                    .await;
            });
        }
    }

    responders.abort_all();
}

async fn write_lines(
    writer: &SharedWriter,
    lines: &[String],
    chunk_size: Option<usize>,
) -> io::Result<()> {
    let mut writer = writer.lock().await;
    for line in lines {
        match chunk_size {
            Some(size) => {
                for chunk in line.as_bytes().chunks(size) {
                    writer.write_all(chunk).await?;
                    writer.flush().await?;
                    tokio::task::yield_now().await;
                }
            }
            None => writer.write_all(line.as_bytes()).await?,
        }
    }
    writer.flush().await
}
