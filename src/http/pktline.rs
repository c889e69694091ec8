//! Git packet-line framing for the smart-HTTP service advertisement.
//!
//! Each packet line is prefixed with a 4-character hex length that includes
//! itself; `0000` is the flush packet.

/// Flush packet (end of a section).
pub const FLUSH: &[u8] = b"0000";

/// Largest payload a single packet line can carry.
pub const MAX_PKT_DATA: usize = 0xFFFF - 4;

/// Frame `data` as one packet line, or `None` when it does not fit.
pub fn encode_pkt_line(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() > MAX_PKT_DATA {
        return None;
    }
    let total_len = data.len() + 4;
    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(format!("{total_len:04x}").as_bytes());
    buf.extend_from_slice(data);
    Some(buf)
}

/// `# service=<service>\n` followed by a flush, as protocol v0/v1 clients
/// expect at the start of an `info/refs` response.
pub fn service_header(service: &str) -> Vec<u8> {
    let line = format!("# service={service}\n");
    let mut buf = encode_pkt_line(line.as_bytes()).unwrap_or_default();
    buf.extend_from_slice(FLUSH);
    buf
}

/// Whether a `Git-Protocol` header value asks for protocol v2.  The value
/// is a colon-separated list of `key[=value]` parameters.
pub fn requests_v2(git_protocol: Option<&str>) -> bool {
    git_protocol.is_some_and(|v| v.split(':').any(|p| p.trim() == "version=2"))
}

/// Split a buffer into packet payloads, `None` standing for a flush.
/// Stops at the first malformed length.
#[cfg(test)]
pub fn decode_pkt_lines(mut data: &[u8]) -> Vec<Option<Vec<u8>>> {
    let mut packets = Vec::new();
    while data.len() >= 4 {
        let Some(len) = std::str::from_utf8(&data[..4])
            .ok()
            .and_then(|h| usize::from_str_radix(h, 16).ok())
        else {
            break;
        };
        match len {
            0 => {
                packets.push(None);
                data = &data[4..];
            }
            1..=3 => break,
            n if n <= data.len() => {
                packets.push(Some(data[4..n].to_vec()));
                data = &data[n..];
            }
            _ => break,
        }
    }
    packets
}
