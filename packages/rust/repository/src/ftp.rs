//! Anonymous passive-mode FTP retrieval.
//!
//! Only what module repositories need: log in, switch to binary, `PASV`,
//! `RETR` one file, quit.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, instrument};
use url::Url;

use scriptorium_shared::{NetworkError, Result, ScriptoriumError};

const DEFAULT_PORT: u16 = 21;

/// A complete server reply: code plus the text of its last line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    url: String,
}

impl Control {
    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code = parse_code(&first).ok_or_else(|| protocol(&self.url, &first))?;
        // Multi-line replies start with "123-" and end with "123 ".
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                if line.starts_with(&terminator) {
                    return Ok(Reply {
                        code,
                        text: line[4..].to_string(),
                    });
                }
            }
        }
        Ok(Reply {
            code,
            text: first.get(4..).unwrap_or("").to_string(),
        })
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| io_error(&self.url, &e))?;
        if n == 0 {
            return Err(NetworkError::ConnectionReset(format!("{}: control connection closed", self.url)).into());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply> {
        debug!(command = cmd.split(' ').next().unwrap_or(cmd), "ftp command");
        self.writer
            .write_all(format!("{cmd}\r\n").as_bytes())
            .await
            .map_err(|e| io_error(&self.url, &e))?;
        self.read_reply().await
    }
}

/// Download the file at an `ftp://` URL.
#[instrument(skip_all, fields(url = %url))]
pub async fn retrieve(url: &Url, timeout: Duration) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, retrieve_inner(url)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(url.to_string()).into()),
    }
}

async fn retrieve_inner(url: &Url) -> Result<Vec<u8>> {
    let host = url
        .host_str()
        .ok_or_else(|| NetworkError::Protocol(format!("{url}: missing host")))?;
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| io_error(url.as_str(), &e))?;
    let peer = stream
        .peer_addr()
        .map_err(|e| io_error(url.as_str(), &e))?
        .ip();
    let label = url.to_string();
    let (read, writer) = stream.into_split();
    let mut ctl = Control {
        reader: BufReader::new(read),
        writer,
        url: label.clone(),
    };

    expect(&label, ctl.read_reply().await?, &[220])?;
    let user = ctl.command("USER anonymous").await?;
    match user.code {
        230 => {}
        331 => expect(&label, ctl.command("PASS anonymous@").await?, &[230, 202])?,
        _ => return Err(reply_error(&label, &user)),
    }
    expect(&label, ctl.command("TYPE I").await?, &[200])?;

    let pasv = ctl.command("PASV").await?;
    expect(&label, pasv.clone(), &[227])?;
    let data_addr = parse_pasv(&pasv.text, peer).ok_or_else(|| protocol(&label, &pasv.text))?;
    let mut data = TcpStream::connect(data_addr)
        .await
        .map_err(|e| io_error(&label, &e))?;

    let path = percent_decode(url.path());
    expect(&label, ctl.command(&format!("RETR {path}")).await?, &[125, 150])?;

    let mut body = Vec::new();
    data.read_to_end(&mut body)
        .await
        .map_err(|e| io_error(&label, &e))?;
    drop(data);

    expect(&label, ctl.read_reply().await?, &[226, 250])?;
    // Best effort; the file is already complete.
    let _ = ctl.command("QUIT").await;
    Ok(body)
}

fn expect(url: &str, reply: Reply, codes: &[u16]) -> Result<()> {
    if codes.contains(&reply.code) {
        Ok(())
    } else {
        Err(reply_error(url, &reply))
    }
}

fn reply_error(url: &str, reply: &Reply) -> ScriptoriumError {
    let detail = format!("{url}: {} {}", reply.code, reply.text);
    match reply.code {
        550 => NetworkError::NotFound(url.to_string()),
        530 | 532 => NetworkError::AuthFailed(detail),
        421 | 425 | 426 | 450 | 451 => NetworkError::ConnectionReset(detail),
        _ => NetworkError::Protocol(detail),
    }
    .into()
}

fn protocol(url: &str, line: &str) -> ScriptoriumError {
    NetworkError::Protocol(format!("{url}: unexpected reply '{line}'")).into()
}

fn io_error(url: &str, e: &std::io::Error) -> ScriptoriumError {
    use std::io::ErrorKind;
    let detail = format!("{url}: {e}");
    match e.kind() {
        ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused(detail),
        ErrorKind::TimedOut => NetworkError::Timeout(detail),
        _ => NetworkError::ConnectionReset(detail),
    }
    .into()
}

fn parse_code(line: &str) -> Option<u16> {
    line.get(..3)?.parse().ok()
}

/// The data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
/// reply. The advertised host is ignored in favour of the control peer.
fn parse_pasv(text: &str, peer: IpAddr) -> Option<SocketAddr> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<_>>()?;
    if numbers.len() != 6 || numbers.iter().any(|n| *n > 255) {
        return None;
    }
    Some(SocketAddr::new(peer, numbers[4] * 256 + numbers[5]))
}

fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(Ok(v)) = path.get(i + 1..i + 3).map(|hex| u8::from_str_radix(hex, 16)) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
