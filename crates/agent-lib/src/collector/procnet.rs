//! Socket table parsing from `/proc/net/tcp` and `/proc/net/tcp6`
//!
//! Rows look like:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue ...
//!    0: 0100007F:0035 00000000:0000 0A 00000000:00000000 ...
//! ```
//!
//! Addresses are hex in host (little-endian) byte order per 32-bit word;
//! ports are big-endian hex.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use crate::models::{ConnectionSnapshot, Listener, PortSnapshot};

const STATE_ESTABLISHED: u8 = 0x01;
const STATE_LISTEN: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    Listen,
    Other(u8),
}

impl From<u8> for TcpState {
    fn from(code: u8) -> Self {
        match code {
            STATE_ESTABLISHED => TcpState::Established,
            STATE_LISTEN => TcpState::Listen,
            other => TcpState::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
}

/// Parse a socket table, skipping the header and malformed rows
pub fn parse_tcp_table(content: &str) -> Vec<SocketEntry> {
    content.lines().skip(1).filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<SocketEntry> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next()?;
    let local = parse_endpoint(fields.next()?)?;
    let remote = parse_endpoint(fields.next()?)?;
    let state = u8::from_str_radix(fields.next()?, 16).ok()?;

    Some(SocketEntry {
        local,
        remote,
        state: TcpState::from(state),
    })
}

fn parse_endpoint(field: &str) -> Option<SocketAddr> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let ip = match addr_hex.len() {
        8 => IpAddr::V4(parse_ipv4(addr_hex)?),
        32 => IpAddr::V6(parse_ipv6(addr_hex)?),
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

fn parse_ipv4(hex: &str) -> Option<Ipv4Addr> {
    let word = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(word.to_le_bytes()))
}

fn parse_ipv6(hex: &str) -> Option<Ipv6Addr> {
    let mut octets = [0u8; 16];
    for (i, chunk) in octets.chunks_mut(4).enumerate() {
        let word = u32::from_str_radix(hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Some(Ipv6Addr::from(octets))
}

/// Fold socket rows into port and connection snapshots
pub(crate) fn summarize<'a>(
    tables: impl IntoIterator<Item = (&'a str, &'a [SocketEntry])>,
) -> (PortSnapshot, ConnectionSnapshot) {
    let mut listeners = BTreeSet::new();
    let mut remote_ips = BTreeSet::new();
    let mut established = 0;

    for (protocol, entries) in tables {
        for entry in entries {
            match entry.state {
                TcpState::Listen => {
                    listeners.insert((
                        entry.local.port(),
                        entry.local.ip().to_canonical().to_string(),
                        protocol.to_string(),
                    ));
                }
                TcpState::Established => {
                    established += 1;
                    remote_ips.insert(entry.remote.ip().to_canonical().to_string());
                }
                TcpState::Other(_) => {}
            }
        }
    }

    let listeners: Vec<Listener> = listeners
        .into_iter()
        .map(|(port, address, protocol)| Listener {
            protocol,
            address,
            port,
        })
        .collect();

    (
        PortSnapshot {
            open_count: listeners.len(),
            listeners,
        },
        ConnectionSnapshot {
            established_count: established,
            unique_remote_ips: remote_ips.into_iter().collect(),
        },
    )
}

/// Read `net/tcp` and `net/tcp6` under `proc_root`
///
/// A missing table is tolerated as long as one of the two exists.
pub fn read_socket_tables(proc_root: &Path) -> io::Result<(PortSnapshot, ConnectionSnapshot)> {
    let mut tables = Vec::new();
    let mut last_err = None;

    for (protocol, file) in [("tcp", "tcp"), ("tcp6", "tcp6")] {
        match fs::read_to_string(proc_root.join("net").join(file)) {
            Ok(content) => tables.push((protocol, parse_tcp_table(&content))),
            Err(e) => last_err = Some(e),
        }
    }

    if tables.is_empty() {
        return Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no socket tables")));
    }

    Ok(summarize(
        tables.iter().map(|(protocol, entries)| (*protocol, entries.as_slice())),
    ))
}
