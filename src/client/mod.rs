//! NUT (Network UPS Tools) client.
//!
//! Speaks the small text protocol of `upsd`: a `LIST VAR <ups>` request
//! is answered with a `BEGIN LIST VAR` line, one `VAR <ups> <name>
//! "<value>"` line per variable and an `END LIST VAR` line. That is the
//! whole exchange this daemon needs.
//!
//! The connection is lazy: it is opened on the first poll and dropped on
//! any failed exchange, so the next poll reconnects from scratch.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::sample::{MISSING, Sample};

/// Default port of the NUT daemon.
pub const DEFAULT_PORT: u16 = 3493;

/// Error type for NUT communication.
#[derive(Debug)]
pub enum ClientError {
    /// Socket-level failure.
    Io(std::io::Error),
    /// Unexpected or malformed response line.
    Protocol(String),
    /// `ERR <token>` response from the server.
    Server(String),
    /// UPS spec string could not be parsed.
    BadUpsSpec(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "NUT connection: {}", e),
            ClientError::Protocol(msg) => write!(f, "NUT protocol: {}", msg),
            ClientError::Server(token) => write!(f, "NUT server error: {}", token),
            ClientError::BadUpsSpec(msg) => write!(f, "invalid UPS spec: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

/// Where to find a UPS: `name@host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsSpec {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl UpsSpec {
    /// Parses the NUT-style `name@host[:port]` notation. Host defaults
    /// to `localhost`, port to [`DEFAULT_PORT`].
    pub fn parse(spec: &str) -> Result<Self, ClientError> {
        let (name, addr) = match spec.split_once('@') {
            Some((name, addr)) => (name, addr),
            None => (spec, "localhost"),
        };
        if name.is_empty() {
            return Err(ClientError::BadUpsSpec(format!(
                "missing UPS name in {:?}",
                spec
            )));
        }
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ClientError::BadUpsSpec(format!("bad port in {:?}", spec))
                })?;
                (host, port)
            }
            None => (addr, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(ClientError::BadUpsSpec(format!(
                "missing host in {:?}",
                spec
            )));
        }
        Ok(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
        })
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for UpsSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

/// Client for one UPS behind one NUT daemon.
pub struct UpsClient {
    spec: UpsSpec,
    timeout: Duration,
    conn: Option<BufReader<TcpStream>>,
}

impl UpsClient {
    pub fn new(spec: UpsSpec, timeout: Duration) -> Self {
        Self {
            spec,
            timeout,
            conn: None,
        }
    }

    pub fn spec(&self) -> &UpsSpec {
        &self.spec
    }

    /// Probes the connection. Used at startup for an early diagnostic;
    /// polling reconnects on its own either way.
    pub fn try_connect(&mut self) -> Result<(), ClientError> {
        if self.conn.is_none() {
            self.conn = Some(connect(&self.spec, self.timeout)?);
        }
        Ok(())
    }

    /// Fetches the full variable set of the UPS.
    pub fn fetch_vars(&mut self) -> Result<HashMap<String, String>, ClientError> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => connect(&self.spec, self.timeout)?,
        };
        let vars = list_vars(&mut conn, &self.spec.name)?;
        // only a healthy connection is kept for the next poll
        self.conn = Some(conn);
        Ok(vars)
    }

    /// Polls the UPS once and maps the result into a sample stamped
    /// with the current time.
    pub fn read_sample(&mut self) -> Result<Sample, ClientError> {
        let vars = self.fetch_vars()?;
        Ok(sample_from_vars(&vars, Utc::now().timestamp()))
    }
}

impl Drop for UpsClient {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            let _ = conn.get_mut().write_all(b"LOGOUT\n");
        }
    }
}

fn connect(spec: &UpsSpec, timeout: Duration) -> Result<BufReader<TcpStream>, ClientError> {
    let addr = spec.addr();
    let mut last_err: Option<std::io::Error> = None;
    let mut stream = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = match stream {
        Some(s) => s,
        None => {
            let e = last_err.unwrap_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, format!("{} did not resolve", addr))
            });
            return Err(ClientError::Io(e));
        }
    };
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    debug!(addr = %addr, "connected to NUT daemon");
    Ok(BufReader::new(stream))
}

/// One `LIST VAR` round trip on an established connection.
fn list_vars(
    conn: &mut BufReader<TcpStream>,
    ups: &str,
) -> Result<HashMap<String, String>, ClientError> {
    conn.get_mut()
        .write_all(format!("LIST VAR {}\n", ups).as_bytes())?;

    let mut line = String::new();
    if conn.read_line(&mut line)? == 0 {
        return Err(ClientError::Protocol("connection closed".to_string()));
    }
    let first = line.trim_end();
    if let Some(token) = first.strip_prefix("ERR ") {
        return Err(ClientError::Server(token.to_string()));
    }
    if !first.starts_with("BEGIN LIST VAR") {
        return Err(ClientError::Protocol(format!(
            "expected BEGIN LIST VAR, got {:?}",
            first
        )));
    }

    let mut vars = HashMap::new();
    loop {
        line.clear();
        if conn.read_line(&mut line)? == 0 {
            return Err(ClientError::Protocol(
                "connection closed mid-response".to_string(),
            ));
        }
        let trimmed = line.trim_end();
        if trimmed.starts_with("END LIST VAR") {
            break;
        }
        match parse_var_line(trimmed, ups) {
            Some((name, value)) => {
                vars.insert(name, value);
            }
            None => {
                return Err(ClientError::Protocol(format!(
                    "unexpected line {:?}",
                    trimmed
                )));
            }
        }
    }
    Ok(vars)
}

/// Parses one `VAR <ups> <name> "<value>"` line into a name/value pair.
fn parse_var_line(line: &str, ups: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("VAR ")?;
    let rest = rest.strip_prefix(ups)?;
    let rest = rest.strip_prefix(' ')?;
    let (name, value) = rest.split_once(' ')?;
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}

/// Maps the NUT variable set into a sample. Missing or unparsable
/// readings become the `-1.0` placeholder.
pub fn sample_from_vars(vars: &HashMap<String, String>, epoch: i64) -> Sample {
    let get = |name: &str| vars.get(name).and_then(|v| v.parse::<f64>().ok());
    Sample {
        epoch,
        // consumer units often expose only the output side
        volt_in: get("input.voltage")
            .or_else(|| get("output.voltage"))
            .unwrap_or(MISSING),
        volt_bat: get("battery.voltage").unwrap_or(MISSING),
        charge_bat: get("battery.charge").unwrap_or(MISSING),
        load_ups: get("ups.load").unwrap_or(MISSING),
        runtime_bat: get("battery.runtime").unwrap_or(MISSING),
    }
}
