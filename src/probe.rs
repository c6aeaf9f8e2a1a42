//! Connectivity checks against the storage host: ICMP reachability, TCP port,
//! share listing, and subnet sweeps for discovering hosts.

use std::net::{Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::cmd;
use crate::config::{DEFAULT_PORT, StorageConfig};
use crate::errors::MountError;
use crate::signals::CancelToken;

/// Seconds `ping` waits for the single echo reply.
const PING_WAIT_SECS: u32 = 3;

/// Bound on the TCP connect to the SMB port.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on `smbclient -L`.
const LIST_SHARES_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-host bounds during a subnet sweep.
const SCAN_PING_WAIT_SECS: u32 = 1;
const SCAN_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const SCAN_WORKERS: usize = 32;

/// Smallest prefix `scan` accepts (1022 hosts).
const MIN_SCAN_PREFIX: u8 = 22;

pub const DEFAULT_SCAN_RANGE: &str = "192.168.1.0/24";

/// Outcome of a connectivity check. Data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub host: String,
    pub port: u16,
    pub reachable: bool,
    pub port_open: bool,
    pub ping_ok: bool,
    pub detail: String,
}

impl ProbeResult {
    /// The mount error this result gates on, if any.
    pub fn failure(&self) -> Option<MountError> {
        if !self.reachable {
            Some(MountError::Unreachable {
                host: self.host.clone(),
                detail: self.detail.clone(),
            })
        } else if !self.port_open {
            Some(MountError::PortClosed {
                host: self.host.clone(),
                port: self.port,
                detail: self.detail.clone(),
            })
        } else {
            None
        }
    }
}

/// Result of one TCP connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortState {
    Open,
    /// The host answered with a reset: it is up, the port is closed.
    Refused,
    /// No answer (timeout, no route, resolution failure).
    Silent(String),
}

pub trait Probe {
    fn check(&self, cfg: &StorageConfig) -> ProbeResult;
}

/// Probe backed by the system `ping` and real TCP connects.
pub struct NetworkProbe {
    pub connect_timeout: Duration,
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl Probe for NetworkProbe {
    fn check(&self, cfg: &StorageConfig) -> ProbeResult {
        let host = cfg.server_address.as_str();
        let ping_ok = ping(host, PING_WAIT_SECS);
        let port_state = tcp_connect(host, cfg.port, self.connect_timeout);
        let result = summarize(host, cfg.port, ping_ok, &port_state);
        tracing::debug!(
            host,
            port = cfg.port,
            ping_ok,
            ?port_state,
            reachable = result.reachable,
            port_open = result.port_open,
            "probe finished"
        );
        result
    }
}

/// Combine the two checks. A refused connection proves the host is up even
/// when ICMP is filtered.
pub fn summarize(host: &str, port: u16, ping_ok: bool, port_state: &PortState) -> ProbeResult {
    let (reachable, port_open, detail) = match port_state {
        PortState::Open => (true, true, format!("port {port} is open")),
        PortState::Refused => (
            true,
            false,
            format!("host answered but refused port {port}"),
        ),
        PortState::Silent(why) if ping_ok => (
            true,
            false,
            format!("host answers ping but port {port} is unreachable: {why}"),
        ),
        PortState::Silent(why) => (false, false, format!("no response from host: {why}")),
    };
    ProbeResult {
        host: host.to_string(),
        port,
        reachable,
        port_open,
        ping_ok,
        detail,
    }
}

/// Send one ICMP echo; `true` if a reply arrived within `wait_secs`.
pub fn ping(host: &str, wait_secs: u32) -> bool {
    let wait = wait_secs.to_string();
    #[cfg(target_os = "linux")]
    let args = ["-c", "1", "-W", wait.as_str(), host];
    #[cfg(not(target_os = "linux"))]
    let args = ["-c", "1", "-t", wait.as_str(), host];
    let bound = Some(Duration::from_secs(u64::from(wait_secs) + 2));
    match cmd::run_capture_timeout("ping", &args, bound) {
        Ok(out) => out.status == 0,
        Err(e) => {
            tracing::debug!("cannot run ping: {e}");
            false
        }
    }
}

/// Try a TCP connect to every address `host` resolves to.
pub fn tcp_connect(host: &str, port: u16, timeout: Duration) -> PortState {
    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => return PortState::Silent(format!("cannot resolve {host}: {e}")),
    };
    let mut last = PortState::Silent(format!("{host} has no addresses"));
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return PortState::Open,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                last = PortState::Refused;
            }
            Err(e) => {
                if last != PortState::Refused {
                    last = PortState::Silent(e.to_string());
                }
            }
        }
    }
    last
}

/// One share advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareInfo {
    pub name: String,
    pub kind: String,
    pub comment: String,
}

/// List shares with `smbclient -L`. Authenticates from `credential_file`
/// (`-A`) when given, anonymously (`-N`) otherwise.
pub fn list_shares(
    cfg: &StorageConfig,
    credential_file: Option<&Path>,
) -> Result<Vec<ShareInfo>, String> {
    let mut args = vec![
        "-L".to_string(),
        format!("//{}", cfg.server_address),
        "-p".to_string(),
        cfg.port.to_string(),
        "-g".to_string(),
    ];
    match credential_file {
        Some(path) => {
            args.push("-A".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        None => args.push("-N".to_string()),
    }
    let out = cmd::run_capture_timeout("smbclient", &args, Some(LIST_SHARES_TIMEOUT))?;
    if out.status != 0 {
        let msg = if out.stderr.trim().is_empty() {
            out.stdout.trim()
        } else {
            out.stderr.trim()
        };
        return Err(format!("smbclient failed: {msg}"));
    }
    Ok(parse_share_list(&out.stdout))
}

/// Parse `smbclient -g` output: `Disk|Media|Movies and TV`.
pub fn parse_share_list(text: &str) -> Vec<ShareInfo> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let kind = parts.next()?.trim();
            let name = parts.next()?.trim();
            if !matches!(kind, "Disk" | "IPC" | "Printer") || name.is_empty() {
                return None;
            }
            Some(ShareInfo {
                name: name.to_string(),
                kind: kind.to_string(),
                comment: parts.next().unwrap_or_default().trim().to_string(),
            })
        })
        .collect()
}

/// A live host found by `scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanHit {
    pub address: Ipv4Addr,
    pub smb_open: bool,
}

/// Parse `a.b.c.d/prefix` into the network address and prefix length.
pub fn parse_cidr(text: &str) -> Result<(Ipv4Addr, u8), String> {
    let (addr, prefix) = text
        .split_once('/')
        .ok_or_else(|| format!("expected CIDR notation like {DEFAULT_SCAN_RANGE}, got {text:?}"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| format!("invalid IPv4 address {addr:?}: {e}"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("invalid prefix length {prefix:?}"))?;
    if !(MIN_SCAN_PREFIX..=32).contains(&prefix) {
        return Err(format!(
            "prefix /{prefix} is out of range; use /{MIN_SCAN_PREFIX} to /32"
        ));
    }
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

/// Host addresses in a network, excluding network and broadcast addresses
/// for prefixes shorter than /31.
pub fn hosts(network: Ipv4Addr, prefix: u8) -> Vec<Ipv4Addr> {
    let base = u32::from(network);
    let size = 1u64 << (32 - u32::from(prefix));
    let range = if prefix >= 31 {
        0..size
    } else {
        1..size - 1
    };
    range.map(|offset| Ipv4Addr::from(base + offset as u32)).collect()
}

/// Sweep `cidr` for live hosts and report whether the SMB port answers.
///
/// Stops early (returning what was found) when `cancel` fires.
pub fn scan(cidr: &str, cancel: &CancelToken) -> Result<Vec<ScanHit>, String> {
    let (network, prefix) = parse_cidr(cidr)?;
    let targets = hosts(network, prefix);
    tracing::info!(%network, prefix, hosts = targets.len(), "scanning");

    let queue = Mutex::new(targets.into_iter());
    let hits = Mutex::new(Vec::new());
    std::thread::scope(|s| {
        for _ in 0..SCAN_WORKERS {
            s.spawn(|| {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().ok().and_then(|mut q| q.next());
                    let Some(addr) = next else { break };
                    if let Some(hit) = scan_host(addr)
                        && let Ok(mut found) = hits.lock()
                    {
                        found.push(hit);
                    }
                }
            });
        }
    });

    let mut hits = hits.into_inner().map_err(|_| "scan worker panicked".to_string())?;
    hits.sort_by_key(|h| h.address);
    Ok(hits)
}

fn scan_host(addr: Ipv4Addr) -> Option<ScanHit> {
    let host = addr.to_string();
    let port_state = tcp_connect(&host, DEFAULT_PORT, SCAN_CONNECT_TIMEOUT);
    let alive = match port_state {
        PortState::Open | PortState::Refused => true,
        PortState::Silent(_) => ping(&host, SCAN_PING_WAIT_SECS),
    };
    alive.then(|| ScanHit {
        address: addr,
        smb_open: port_state == PortState::Open,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    // --- summarize ---

    #[test]
    fn open_port_is_reachable_and_open() {
        let r = summarize("nas", 445, false, &PortState::Open);
        assert!(r.reachable && r.port_open);
        assert!(r.failure().is_none());
    }

    #[test]
    fn refused_port_proves_host_is_up() {
        let r = summarize("nas", 445, false, &PortState::Refused);
        assert!(r.reachable);
        assert!(!r.port_open);
        assert!(matches!(r.failure(), Some(MountError::PortClosed { port: 445, .. })));
    }

    #[test]
    fn silent_port_with_ping_is_port_closed() {
        let r = summarize("nas", 445, true, &PortState::Silent("timed out".into()));
        assert!(r.reachable);
        assert!(matches!(r.failure(), Some(MountError::PortClosed { .. })));
    }

    #[test]
    fn silent_port_without_ping_is_unreachable() {
        let r = summarize("nas", 445, false, &PortState::Silent("timed out".into()));
        assert!(!r.reachable);
        assert!(matches!(r.failure(), Some(MountError::Unreachable { .. })));
        assert!(r.detail.contains("timed out"));
        let message = r.failure().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("timed out"), "got: {message}");
    }

    // --- tcp_connect ---

    #[test]
    fn tcp_connect_to_listener_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(
            tcp_connect("127.0.0.1", port, Duration::from_secs(2)),
            PortState::Open
        );
    }

    #[test]
    fn tcp_connect_to_closed_local_port_is_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert_eq!(
            tcp_connect("127.0.0.1", port, Duration::from_secs(2)),
            PortState::Refused
        );
    }

    #[test]
    fn tcp_connect_unresolvable_host_is_silent() {
        let state = tcp_connect("nonexistent.invalid", 445, Duration::from_secs(2));
        assert!(matches!(state, PortState::Silent(_)));
    }

    // --- share listing ---

    #[test]
    fn parse_share_list_grepable_output() {
        let text = "Disk|Media|Movies and TV\n\
                    Disk|Backup|\n\
                    IPC|IPC$|IPC Service (Samba 4.17)\n\
                    Server|NAS|\n\
                    Workgroup|WORKGROUP|NAS\n";
        let shares = parse_share_list(text);
        assert_eq!(shares.len(), 3);
        assert_eq!(shares[0].name, "Media");
        assert_eq!(shares[0].comment, "Movies and TV");
        assert_eq!(shares[1].comment, "");
        assert_eq!(shares[2].kind, "IPC");
    }

    #[test]
    fn parse_share_list_ignores_noise() {
        assert!(parse_share_list("session setup failed\n\nSMB1 disabled").is_empty());
    }

    // --- CIDR ---

    #[test]
    fn parse_cidr_masks_host_bits() {
        assert_eq!(
            parse_cidr("192.168.1.77/24").unwrap(),
            (Ipv4Addr::new(192, 168, 1, 0), 24)
        );
    }

    #[test]
    fn parse_cidr_rejects_large_ranges_and_garbage() {
        assert!(parse_cidr("10.0.0.0/8").is_err());
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("nas/24").is_err());
    }

    #[test]
    fn hosts_excludes_network_and_broadcast() {
        let h = hosts(Ipv4Addr::new(192, 168, 1, 0), 24);
        assert_eq!(h.len(), 254);
        assert_eq!(h[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(h[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn hosts_of_single_address() {
        assert_eq!(
            hosts(Ipv4Addr::new(10, 0, 0, 5), 32),
            vec![Ipv4Addr::new(10, 0, 0, 5)]
        );
    }

    #[test]
    fn cancelled_scan_returns_no_hits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(scan("192.168.1.0/24", &cancel).unwrap().is_empty());
    }
}
