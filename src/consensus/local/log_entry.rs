use crate::commitlog;
use crate::consensus::types::{ClusterConfiguration, ServerInfo, Term};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Byte representation:
///
/// ```text
/// |                                             1                       |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |Vrs|Knd|       Term (8 bytes)          |   Data (variable size)  ... |
/// +---+---+-------------------------------+-------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Knd` - 1 for an application command, 2 for a configuration change
/// * `Term` - leadership term when this entry was created, big endian
/// * `Data` - the opaque command bytes, or the encoded configuration:
///   `count (u32)` then per server `id len (u32) | id | address len (u32) | address`
///
/// Size/length of a command's `Data` is not needed; the underlying commitlog gives us the correctly
/// allocated array.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct LogEntry {
    pub(super) term: Term,
    pub(super) payload: EntryPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum EntryPayload {
    Command(Bytes),
    Configuration(ClusterConfiguration),
}

const LOG_ENTRY_FORMAT_VERSION: u8 = 1;
const KIND_COMMAND: u8 = 1;
const KIND_CONFIGURATION: u8 = 2;
const HEADER_LEN: usize = 1 + 1 + 8;

impl LogEntry {
    pub(super) fn command(term: Term, data: Bytes) -> Self {
        LogEntry {
            term,
            payload: EntryPayload::Command(data),
        }
    }

    pub(super) fn configuration(term: Term, configuration: ClusterConfiguration) -> Self {
        LogEntry {
            term,
            payload: EntryPayload::Configuration(configuration),
        }
    }
}

impl commitlog::Entry for LogEntry {}

impl From<LogEntry> for Vec<u8> {
    fn from(entry: LogEntry) -> Self {
        let mut bytes = BytesMut::with_capacity(HEADER_LEN + 64);
        bytes.put_u8(LOG_ENTRY_FORMAT_VERSION);

        match entry.payload {
            EntryPayload::Command(data) => {
                bytes.put_u8(KIND_COMMAND);
                bytes.put_u64(entry.term.as_u64());
                bytes.put_slice(&data);
            }
            EntryPayload::Configuration(configuration) => {
                bytes.put_u8(KIND_CONFIGURATION);
                bytes.put_u64(entry.term.as_u64());
                bytes.put_u32(configuration.servers().len() as u32);
                for server in configuration.servers() {
                    put_string(&mut bytes, &server.id);
                    put_string(&mut bytes, &server.address);
                }
            }
        }

        bytes.to_vec()
    }
}

impl TryFrom<Vec<u8>> for LogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid_data("log entry shorter than its header"));
        }

        let mut buf = Bytes::from(bytes);
        let version = buf.get_u8();
        if version != LOG_ENTRY_FORMAT_VERSION {
            return Err(invalid_data("unknown log entry format version"));
        }
        let kind = buf.get_u8();
        let term = Term::new(buf.get_u64());

        match kind {
            KIND_COMMAND => Ok(LogEntry::command(term, buf)),
            KIND_CONFIGURATION => {
                let count = get_u32(&mut buf)?;
                let mut servers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = get_string(&mut buf)?;
                    let address = get_string(&mut buf)?;
                    servers.push(ServerInfo { id, address });
                }
                Ok(LogEntry::configuration(term, ClusterConfiguration::new(servers)))
            }
            _ => Err(invalid_data("unknown log entry kind")),
        }
    }
}

fn put_string(bytes: &mut BytesMut, s: &str) {
    bytes.put_u32(s.len() as u32);
    bytes.put_slice(s.as_bytes());
}

fn get_u32(buf: &mut Bytes) -> io::Result<u32> {
    if buf.remaining() < 4 {
        return Err(invalid_data("truncated configuration entry"));
    }
    Ok(buf.get_u32())
}

fn get_string(buf: &mut Bytes) -> io::Result<String> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(invalid_data("truncated configuration entry"));
    }

    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| invalid_data("configuration entry is not utf-8"))
}

fn invalid_data(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
