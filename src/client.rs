//! Connection manager for spot sources.
//!
//! This module owns the live socket: a telnet session to a DX cluster node,
//! or a UDP socket receiving WSJT-X status datagrams. For clusters it runs
//! the login handshake, working out which of the two supported node
//! dialects is on the other end, and configures the station location.
//!
//! Nothing here retries on its own. The caller decides when to reconnect;
//! the hourly attempt quota lives here so it survives reconnects.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::geo::LatLng;
use crate::ratelimit::ConnectQuota;

/// Lines to read while waiting for a dialect banner.
pub const BANNER_LINES: usize = 50;

/// Lines to read while waiting for a command to be confirmed.
pub const CONFIRM_LINES: usize = 10;

/// Lines a heartbeat may pass over (spots keep arriving) before giving up.
pub const HEARTBEAT_LINES: usize = 200;

/// Maximum number of extra login commands.
pub const MAX_EXTRA_COMMANDS: usize = 4;

/// Largest datagram accepted from the UDP source.
const MAX_DATAGRAM: usize = 8192;

/// Which kind of spot source to connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Telnet DX cluster node, dialect detected at login.
    #[default]
    Cluster,
    /// UDP status datagrams from WSJT-X or a compatible application.
    Wsjtx,
}

/// The two cluster node command sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Dialect {
    /// DX Spider.
    Spider,
    /// AR-Cluster.
    ArCluster,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Spider => "DX Spider",
            Dialect::ArCluster => "AR-Cluster",
        }
    }

    /// Command announcing the station's grid locator.
    pub fn grid_command(&self, grid: &str) -> String {
        match self {
            Dialect::Spider => format!("set/qra {}", grid),
            Dialect::ArCluster => format!("set station grid {}", grid),
        }
    }

    /// Command announcing the station's latitude and longitude.
    pub fn location_command(&self, station: LatLng) -> String {
        match self {
            Dialect::Spider => format!("set/location {}", format_location(station)),
            Dialect::ArCluster => format!("set station latlon {}", format_location(station)),
        }
    }

    /// A command with no side effects, used to probe an idle session.
    pub fn heartbeat_command(&self) -> &'static str {
        "sh/time"
    }

    /// Whether `line` is this dialect's command prompt.
    ///
    /// DX Spider prompts end in `" >"` (`N0CALL de GB7DJK 15-Oct-2026 2156Z dxspider >`);
    /// AR-Cluster puts the `>` right after the node call (`N0CALL de W3LPL-2>`).
    pub fn is_prompt(&self, line: &str) -> bool {
        let line = line.trim_end();
        let Some(head) = line.strip_suffix('>') else {
            return false;
        };
        match self {
            Dialect::Spider => head.ends_with(' '),
            Dialect::ArCluster => head.chars().last().is_some_and(|c| !c.is_whitespace()),
        }
    }
}

/// A line that looks like any node's prompt.
fn is_any_prompt(line: &str) -> bool {
    line.trim_end().ends_with('>')
}

/// Identify the node dialect from banner lines.
pub fn detect_dialect<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<Dialect> {
    lines.into_iter().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        if lower.contains("spider") {
            Some(Dialect::Spider)
        } else if lower.contains("ar-cluster") {
            Some(Dialect::ArCluster)
        } else {
            None
        }
    })
}

/// Format a location as `DD MM N DDD MM W`, the form both dialects accept.
pub fn format_location(ll: LatLng) -> String {
    fn dm(value: f64) -> (u32, u32) {
        let total_minutes = (value.abs() * 60.0).round() as u32;
        (total_minutes / 60, total_minutes % 60)
    }
    let (lat_d, lat_m) = dm(ll.lat_deg());
    let (lng_d, lng_m) = dm(ll.lng_deg());
    format!(
        "{} {} {} {} {} {}",
        lat_d,
        lat_m,
        if ll.lat >= 0.0 { 'N' } else { 'S' },
        lng_d,
        lng_m,
        if ll.lng >= 0.0 { 'E' } else { 'W' }
    )
}

/// Handshake failures. The session is torn down.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Cluster node dialect not recognized")]
    UnknownDialect,

    #[error("No banner or prompt within {0} lines")]
    NoBanner(usize),

    #[error("No prompt after {command:?}")]
    NoConfirmation { command: String },

    #[error("Timed out waiting for the node")]
    Timeout,

    #[error("Node closed the connection")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why a connect attempt failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Too many connection attempts this hour, next allowed at {}", .resets_at.format("%H:%MZ"))]
    RateLimited { resets_at: DateTime<Utc> },

    #[error("Login failed: {0}")]
    HandshakeFailed(HandshakeError),

    #[error("Connection failed: {0}")]
    Transport(io::Error),

    #[error("Bad source address: {0}")]
    BadAddress(String),
}

impl From<HandshakeError> for ConnectError {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::Io(io) => ConnectError::Transport(io),
            HandshakeError::Closed => ConnectError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "closed by node during login",
            )),
            other => ConnectError::HandshakeFailed(other),
        }
    }
}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Transport(e)
    }
}

/// Heartbeat failures. The caller should close and reconnect.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Not connected")]
    NotConnected,

    #[error("No prompt in reply to heartbeat")]
    NoPrompt,

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Settings for [`SpotClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    /// Join `host` as a multicast group (UDP only).
    pub multicast: bool,
    /// Identity sent at login, usually the station call sign.
    pub login: String,
    /// Extra commands sent after login, at most [`MAX_EXTRA_COMMANDS`].
    pub commands: Vec<String>,
    pub station: LatLng,
    pub max_connects_per_hour: u32,
    pub connect_timeout: Duration,
    /// Timeout for each line read during login and heartbeat.
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Cluster,
            host: "dxc.nc7j.com".to_string(),
            port: 7373,
            multicast: false,
            login: "N0CALL".to_string(),
            commands: Vec::new(),
            station: LatLng::from_degrees(0.0, 0.0),
            max_connects_per_hour: 10,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the telnet session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    DetectingDialect,
    Authenticating { done: usize, total: usize },
    Live,
}

/// A successfully opened source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    Cluster(Dialect),
    Wsjtx { local_addr: SocketAddr },
}

/// One unit of input from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Line(String),
    Datagram(Vec<u8>),
}

/// Everything a drain pass collected, plus the error that ended it, if any.
#[derive(Debug, Default)]
pub struct Drain {
    pub items: Vec<Incoming>,
    pub error: Option<io::Error>,
}

/// Splits a byte stream into lines, dropping `\r`.
///
/// Nodes leave the cursor on the prompt, so an unterminated tail that looks
/// like a prompt is released as a line once the stream has gone quiet.
/// A `>` at a read boundary alone says nothing; the rest of the line may be
/// in the next segment.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    ready: VecDeque<String>,
}

/// Quiet time after which a prompt-like tail counts as a prompt.
pub const PROMPT_SETTLE: Duration = Duration::from_millis(200);

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.partial).into_owned();
                    self.ready.push_back(line);
                    self.partial.clear();
                }
                b'\r' | 0 => {}
                _ => self.partial.push(b),
            }
        }
    }

    pub fn pop(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
        self.ready.clear();
    }

    fn has_prompt_tail(&self) -> bool {
        if self.partial.is_empty() {
            return false;
        }
        let tail = String::from_utf8_lossy(&self.partial);
        is_any_prompt(&tail) && !tail.starts_with("DX de")
    }

    /// Release a prompt-like tail as a line. Call only when no more bytes
    /// are coming for now.
    pub fn release_prompt_tail(&mut self) -> bool {
        if !self.has_prompt_tail() {
            return false;
        }
        let tail = String::from_utf8_lossy(&self.partial).into_owned();
        self.ready.push_back(tail);
        self.partial.clear();
        true
    }

    /// Return the next line, reading from `stream` as needed.
    pub async fn next_line<S>(&mut self, stream: &mut S, wait: Duration) -> Result<String, HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(line) = self.pop() {
                trace!("< {}", line);
                return Ok(line);
            }

            let prompt_pending = self.has_prompt_tail();
            let limit = if prompt_pending { wait.min(PROMPT_SETTLE) } else { wait };
            match timeout(limit, stream.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(HandshakeError::Closed),
                Ok(Ok(n)) => self.push(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if prompt_pending => {
                    self.release_prompt_tail();
                }
                Err(_) => return Err(HandshakeError::Timeout),
            }
        }
    }
}

async fn send_line<S>(stream: &mut S, line: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    debug!("> {}", line);
    stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
    stream.flush().await
}

/// Read until `dialect`'s prompt, within `budget` lines.
///
/// Lines that are not the prompt are handed to `skipped`.
async fn await_prompt<S>(
    stream: &mut S,
    lines: &mut LineBuffer,
    dialect: Dialect,
    budget: usize,
    wait: Duration,
    mut skipped: impl FnMut(String),
) -> Result<bool, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    for _ in 0..budget {
        let line = lines.next_line(stream, wait).await?;
        if dialect.is_prompt(&line) {
            return Ok(true);
        }
        skipped(line);
    }
    Ok(false)
}

/// Run the cluster login on an open stream.
///
/// Sends the login identity, detects the dialect from the banner, sets the
/// station grid and location, then sends any extra commands. Every command
/// must be answered by a prompt within [`CONFIRM_LINES`] lines.
pub async fn login<S>(
    stream: &mut S,
    lines: &mut LineBuffer,
    config: &ClientConfig,
    state: &mut ConnectionState,
) -> Result<Dialect, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let wait = config.read_timeout;

    *state = ConnectionState::DetectingDialect;
    send_line(stream, &config.login).await?;

    let mut dialect = None;
    let mut at_prompt = false;
    for _ in 0..BANNER_LINES {
        let line = lines.next_line(stream, wait).await?;
        if let Some(found) = detect_dialect([line.as_str()]) {
            info!("Cluster node is {}", found.name());
            at_prompt = found.is_prompt(&line);
            dialect = Some(found);
            break;
        }
        if is_any_prompt(&line) {
            warn!("Prompt without a dialect banner: {}", line);
            return Err(HandshakeError::UnknownDialect);
        }
    }
    let dialect = dialect.ok_or(HandshakeError::NoBanner(BANNER_LINES))?;

    // Banner seen mid-greeting: sync up on the first prompt.
    if !at_prompt && !await_prompt(stream, lines, dialect, BANNER_LINES, wait, |_| ()).await? {
        return Err(HandshakeError::NoBanner(BANNER_LINES));
    }

    let grid = config.station.to_grid();
    let mut commands = vec![
        dialect.grid_command(&grid),
        dialect.location_command(config.station),
    ];
    commands.extend(config.commands.iter().take(MAX_EXTRA_COMMANDS).cloned());

    let total = commands.len();
    for (done, command) in commands.into_iter().enumerate() {
        *state = ConnectionState::Authenticating { done, total };
        send_line(stream, &command).await?;
        if !await_prompt(stream, lines, dialect, CONFIRM_LINES, wait, |_| ()).await? {
            return Err(HandshakeError::NoConfirmation { command });
        }
    }

    Ok(dialect)
}

enum Transport {
    Telnet {
        stream: TcpStream,
        lines: LineBuffer,
        dialect: Dialect,
    },
    Udp {
        socket: UdpSocket,
    },
}

/// Owns the connection to the configured spot source.
pub struct SpotClient {
    config: ClientConfig,
    quota: ConnectQuota,
    transport: Option<Transport>,
    state: ConnectionState,
    /// Lines read while waiting on a heartbeat, delivered by the next drain.
    held: VecDeque<String>,
}

impl SpotClient {
    pub fn new(config: ClientConfig) -> Self {
        let quota = ConnectQuota::new(config.max_connects_per_hour);
        Self {
            config,
            quota,
            transport: None,
            state: ConnectionState::Disconnected,
            held: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn quota(&self) -> &ConnectQuota {
        &self.quota
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn dialect(&self) -> Option<Dialect> {
        match &self.transport {
            Some(Transport::Telnet { dialect, .. }) => Some(*dialect),
            _ => None,
        }
    }

    /// Open the configured source now.
    pub async fn connect(&mut self) -> Result<Ready, ConnectError> {
        self.connect_at(Utc::now()).await
    }

    /// Open the configured source, counting the attempt against the hour of `now`.
    pub async fn connect_at(&mut self, now: DateTime<Utc>) -> Result<Ready, ConnectError> {
        self.close();

        if !self.quota.try_acquire(now) {
            let resets_at = self.quota.resets_at(now);
            warn!(
                "Connection quota of {}/hour used up until {}",
                self.quota.max_per_hour(),
                resets_at
            );
            return Err(ConnectError::RateLimited { resets_at });
        }

        let result = match self.config.kind {
            SourceKind::Cluster => self.open_cluster().await,
            SourceKind::Wsjtx => self.open_udp().await,
        };

        match result {
            Ok((transport, ready)) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Live;
                Ok(ready)
            }
            Err(e) => {
                warn!("Connect to {}:{} failed: {}", self.config.host, self.config.port, e);
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open_cluster(&mut self) -> Result<(Transport, Ready), ConnectError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to {}...", addr);
        self.state = ConnectionState::Connecting;

        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;

        let mut lines = LineBuffer::default();
        let dialect = login(&mut stream, &mut lines, &self.config, &mut self.state).await?;
        info!("Logged in to {} ({})", addr, dialect.name());

        Ok((
            Transport::Telnet {
                stream,
                lines,
                dialect,
            },
            Ready::Cluster(dialect),
        ))
    }

    async fn open_udp(&mut self) -> Result<(Transport, Ready), ConnectError> {
        self.state = ConnectionState::Connecting;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.port)).await?;

        if self.config.multicast {
            let group: Ipv4Addr = self
                .config
                .host
                .parse()
                .map_err(|_| ConnectError::BadAddress(self.config.host.clone()))?;
            if !group.is_multicast() {
                return Err(ConnectError::BadAddress(self.config.host.clone()));
            }
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            info!("Joined multicast group {}", group);
        }

        let local_addr = socket.local_addr()?;
        info!("Listening for status datagrams on {}", local_addr);
        Ok((Transport::Udp { socket }, Ready::Wsjtx { local_addr }))
    }

    /// Collect everything the source has ready without waiting for more.
    pub async fn drain(&mut self) -> Drain {
        let mut drain = Drain::default();
        drain.items.extend(self.held.drain(..).map(Incoming::Line));

        // Let the reactor publish readiness for data already received.
        tokio::task::yield_now().await;

        match &mut self.transport {
            Some(Transport::Telnet { stream, lines, .. }) => {
                let mut buf = [0u8; 4096];
                let mut read_any = false;
                loop {
                    match stream.try_read(&mut buf) {
                        Ok(0) => {
                            drain.error = Some(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "closed by node",
                            ));
                            break;
                        }
                        Ok(n) => {
                            read_any = true;
                            lines.push(&buf[..n]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            drain.error = Some(e);
                            break;
                        }
                    }
                }
                // A tail left untouched for a whole pass has stalled.
                if !read_any {
                    lines.release_prompt_tail();
                }
                while let Some(line) = lines.pop() {
                    drain.items.push(Incoming::Line(line));
                }
            }
            Some(Transport::Udp { socket }) => {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                loop {
                    match socket.try_recv_from(&mut buf) {
                        Ok((n, _)) => drain.items.push(Incoming::Datagram(buf[..n].to_vec())),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            drain.error = Some(e);
                            break;
                        }
                    }
                }
            }
            None => {}
        }

        drain
    }

    /// Probe an idle telnet session with a no-op command.
    ///
    /// Lines that arrive before the prompt are kept for the next drain.
    /// UDP sources have nothing to probe and always succeed.
    pub async fn heartbeat(&mut self) -> Result<(), HeartbeatError> {
        let wait = self.config.read_timeout;
        let held = &mut self.held;
        match &mut self.transport {
            None => Err(HeartbeatError::NotConnected),
            Some(Transport::Udp { .. }) => Ok(()),
            Some(Transport::Telnet {
                stream,
                lines,
                dialect,
            }) => {
                send_line(stream, dialect.heartbeat_command())
                    .await
                    .map_err(HandshakeError::from)?;
                let seen = await_prompt(stream, lines, *dialect, HEARTBEAT_LINES, wait, |line| {
                    held.push_back(line)
                })
                .await?;
                if seen {
                    debug!("Heartbeat answered");
                    Ok(())
                } else {
                    Err(HeartbeatError::NoPrompt)
                }
            }
        }
    }

    /// Close whatever is open. Safe to call at any time.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Closed connection to {}:{}", self.config.host, self.config.port);
        }
        self.held.clear();
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    const SPIDER_PROMPT: &str = "N0CALL de GB7DJK 15-Oct-2026 2156Z dxspider >";
    const AR_PROMPT: &str = "N0CALL de W3LPL-2>";

    fn test_config() -> ClientConfig {
        ClientConfig {
            login: "N0CALL".to_string(),
            station: LatLng::from_degrees(38.7, -104.8),
            read_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// A scripted node: greets with `banner` after login, then answers every
    /// command with `reply` lines followed by `prompt`.
    async fn fake_node<S>(stream: S, banner: Vec<String>, reply: Vec<String>, prompt: Option<String>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read, mut write) = tokio::io::split(stream);
        let mut commands = BufReader::new(read).lines();
        let mut first = true;
        while let Ok(Some(_command)) = commands.next_line().await {
            let mut out = String::new();
            let lines = if first { &banner } else { &reply };
            first = false;
            for line in lines {
                out.push_str(line);
                out.push_str("\r\n");
            }
            if let Some(p) = &prompt {
                out.push_str(p);
                out.push(' ');
            }
            if write.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_dialect() {
        assert_eq!(
            detect_dialect(["Hello", "Welcome to DXSpider V1.57 build 560"]),
            Some(Dialect::Spider)
        );
        assert_eq!(
            detect_dialect(["Running AR-Cluster Version 6"]),
            Some(Dialect::ArCluster)
        );
        assert_eq!(detect_dialect(["login:", "Welcome"]), None);
        assert_eq!(detect_dialect(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_prompts() {
        assert!(Dialect::Spider.is_prompt(SPIDER_PROMPT));
        assert!(Dialect::Spider.is_prompt("N0CALL de GB7DJK 15-Oct-2026 2156Z dxspider > "));
        assert!(!Dialect::Spider.is_prompt(AR_PROMPT));
        assert!(Dialect::ArCluster.is_prompt(AR_PROMPT));
        assert!(!Dialect::ArCluster.is_prompt(SPIDER_PROMPT));
        assert!(!Dialect::Spider.is_prompt("DX de KD0AA: 14025.0 W1AW 2156Z"));
        assert!(!Dialect::ArCluster.is_prompt(">"));
    }

    #[test]
    fn test_commands() {
        let station = LatLng::from_degrees(38.7, -104.8);
        assert_eq!(format_location(station), "38 42 N 104 48 W");
        assert_eq!(Dialect::Spider.grid_command("DM78ph"), "set/qra DM78ph");
        assert_eq!(
            Dialect::ArCluster.location_command(station),
            "set station latlon 38 42 N 104 48 W"
        );
        assert_eq!(
            format_location(LatLng::from_degrees(-33.5, 151.25)),
            "33 30 S 151 15 E"
        );
    }

    #[test]
    fn test_line_buffer() {
        let mut lines = LineBuffer::default();
        lines.push(b"first\r\nsec");
        assert_eq!(lines.pop().as_deref(), Some("first"));
        assert_eq!(lines.pop(), None);
        lines.push(b"ond\n");
        assert_eq!(lines.pop().as_deref(), Some("second"));

        lines.push(b"N0CALL de W3LPL-2>");
        assert_eq!(lines.pop(), None);
        assert!(lines.release_prompt_tail());
        assert_eq!(lines.pop().as_deref(), Some("N0CALL de W3LPL-2>"));
        assert!(!lines.release_prompt_tail());
    }

    #[test]
    fn test_line_buffer_split_after_arrow() {
        let mut lines = LineBuffer::default();
        lines.push(b"Welcome -->");
        lines.push(b" running DXSpider V1.57\r\n");
        assert_eq!(lines.pop().as_deref(), Some("Welcome --> running DXSpider V1.57"));
        assert_eq!(lines.pop(), None);
    }

    #[tokio::test]
    async fn test_login_banner_split_after_arrow() {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut commands = BufReader::new(read).lines();
            let mut first = true;
            while let Ok(Some(_command)) = commands.next_line().await {
                if first {
                    first = false;
                    write.write_all(b"Node menu ->").await.unwrap();
                    write.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    write.write_all(b" DXSpider cluster\r\n").await.unwrap();
                }
                let prompt = format!("{}\r\n", SPIDER_PROMPT);
                write.write_all(prompt.as_bytes()).await.unwrap();
            }
        });

        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let dialect = login(&mut client, &mut lines, &test_config(), &mut state)
            .await
            .unwrap();
        assert_eq!(dialect, Dialect::Spider);
    }

    #[tokio::test]
    async fn test_prompt_tail_released_after_quiet() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        server.write_all(AR_PROMPT.as_bytes()).await.unwrap();

        let mut lines = LineBuffer::default();
        let line = lines.next_line(&mut client, Duration::from_secs(2)).await.unwrap();
        assert_eq!(line, AR_PROMPT);
    }

    #[tokio::test]
    async fn test_login_spider() {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(fake_node(
            server,
            strings(&["Hello N0CALL", "Welcome to DXSpider"]),
            strings(&["ok"]),
            Some(SPIDER_PROMPT.to_string()),
        ));

        let mut client = client;
        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let config = ClientConfig {
            commands: strings(&["set/dx/filter", "set/page 0"]),
            ..test_config()
        };
        let dialect = login(&mut client, &mut lines, &config, &mut state).await.unwrap();

        assert_eq!(dialect, Dialect::Spider);
        assert_eq!(state, ConnectionState::Authenticating { done: 3, total: 4 });
    }

    #[tokio::test]
    async fn test_login_ar_cluster() {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(fake_node(
            server,
            strings(&["Welcome to W3LPL", "Running AR-Cluster Version 6.1"]),
            Vec::new(),
            Some(AR_PROMPT.to_string()),
        ));

        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let dialect = login(&mut client, &mut lines, &test_config(), &mut state)
            .await
            .unwrap();
        assert_eq!(dialect, Dialect::ArCluster);
    }

    #[tokio::test]
    async fn test_login_unknown_dialect() {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(fake_node(
            server,
            strings(&["Welcome to some other node"]),
            Vec::new(),
            Some("node>".to_string()),
        ));

        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let err = login(&mut client, &mut lines, &test_config(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::UnknownDialect));
    }

    #[tokio::test]
    async fn test_login_missing_confirmation() {
        let (mut client, server) = tokio::io::duplex(1 << 16);
        let chatter: Vec<String> = (0..CONFIRM_LINES + 2).map(|i| format!("line {}", i)).collect();
        tokio::spawn(fake_node(
            server,
            strings(&["Welcome to DXSpider", SPIDER_PROMPT]),
            chatter,
            None,
        ));

        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let err = login(&mut client, &mut lines, &test_config(), &mut state)
            .await
            .unwrap_err();
        match err {
            HandshakeError::NoConfirmation { command } => assert!(command.starts_with("set/qra")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_closed_by_node() {
        let (mut client, server) = tokio::io::duplex(4096);
        drop(server);

        let mut lines = LineBuffer::default();
        let mut state = ConnectionState::Connecting;
        let err = login(&mut client, &mut lines, &test_config(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Closed | HandshakeError::Io(_)));
        assert!(matches!(ConnectError::from(err), ConnectError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_drain_and_heartbeat_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let spot = "DX de KD0AA:     18100.0  JR1FYS       FT8                            2156Z";
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut commands = BufReader::new(read).lines();
            let mut n = 0;
            while let Ok(Some(command)) = commands.next_line().await {
                n += 1;
                let mut out = String::new();
                if n == 1 {
                    out.push_str("Welcome to DXSpider\r\n");
                }
                if command == "sh/time" {
                    out.push_str(spot);
                    out.push_str("\r\n15-Oct-2026 2200Z\r\n");
                }
                out.push_str(SPIDER_PROMPT);
                out.push_str("\r\n");
                if n == 3 {
                    out.push_str(spot);
                    out.push_str("\r\n");
                }
                write.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let mut client = SpotClient::new(ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..test_config()
        });
        let ready = client.connect().await.unwrap();
        assert_eq!(ready, Ready::Cluster(Dialect::Spider));
        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Live);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let drain = client.drain().await;
        assert!(drain.error.is_none());
        assert_eq!(drain.items, vec![Incoming::Line(spot.to_string())]);

        client.heartbeat().await.unwrap();
        let drain = client.drain().await;
        assert_eq!(drain.items.first(), Some(&Incoming::Line(spot.to_string())));

        client.close();
        client.close();
        assert!(!client.is_connected());
        assert!(matches!(client.heartbeat().await, Err(HeartbeatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_without_network() {
        // Grab a free port, then close it so connects are refused.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = SpotClient::new(ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            max_connects_per_hour: 2,
            ..test_config()
        });
        let t = Utc.with_ymd_and_hms(2026, 10, 15, 14, 10, 0).unwrap();

        for _ in 0..2 {
            assert!(matches!(client.connect_at(t).await, Err(ConnectError::Transport(_))));
        }
        let err = client.connect_at(t).await.unwrap_err();
        assert!(matches!(err, ConnectError::RateLimited { .. }));
        assert_eq!(client.quota().attempts(t), 2);

        let next_hour = t + TimeDelta::hours(1);
        assert!(matches!(
            client.connect_at(next_hour).await,
            Err(ConnectError::Transport(_))
        ));
        assert_eq!(client.quota().attempts(next_hour), 1);
    }

    #[tokio::test]
    async fn test_udp_source_receives_datagrams() {
        let mut client = SpotClient::new(ClientConfig {
            kind: SourceKind::Wsjtx,
            port: 0,
            ..test_config()
        });
        let Ready::Wsjtx { local_addr } = client.connect().await.unwrap() else {
            panic!("expected a UDP source");
        };

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, local_addr.port()));
        sender.send_to(b"one", target).await.unwrap();
        sender.send_to(b"two", target).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let drain = client.drain().await;
        assert!(drain.error.is_none());
        assert_eq!(
            drain.items,
            vec![
                Incoming::Datagram(b"one".to_vec()),
                Incoming::Datagram(b"two".to_vec())
            ]
        );
        assert!(client.heartbeat().await.is_ok());
    }

    #[tokio::test]
    async fn test_multicast_requires_group_address() {
        let mut client = SpotClient::new(ClientConfig {
            kind: SourceKind::Wsjtx,
            host: "127.0.0.1".to_string(),
            port: 0,
            multicast: true,
            ..test_config()
        });
        assert!(matches!(client.connect().await, Err(ConnectError::BadAddress(_))));
        assert!(!client.is_connected());
    }
}
