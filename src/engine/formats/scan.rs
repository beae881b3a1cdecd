//! Packet scanning for containers without a known embedding rule.
//!
//! Finds the first complete `<?xpacket begin= ... <?xpacket end= ...?>`
//! block anywhere in the file. Read-only. The file is streamed in blocks;
//! only the packet itself is buffered.

use std::io::{self, Read};

const BEGIN: &[u8] = b"<?xpacket begin=";
const END: &[u8] = b"<?xpacket end=";
const PI_CLOSE: &[u8] = b"?>";

const BLOCK: usize = 64 * 1024;
// A wrapper that runs on longer than this is not a packet.
const MAX_PACKET: usize = 16 * 1024 * 1024;

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Return the raw bytes of the first wrapped packet, wrapper included.
pub(crate) fn read<R: Read + ?Sized>(src: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut block = vec![0u8; BLOCK];
    // Unmatched tail while looking for BEGIN; the packet so far once found.
    let mut buf: Vec<u8> = Vec::new();
    let mut in_packet = false;

    loop {
        let n = match src.read(&mut block) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        buf.extend_from_slice(&block[..n]);

        if !in_packet {
            match find(&buf, BEGIN, 0) {
                Some(start) => {
                    buf.drain(..start);
                    in_packet = true;
                }
                None => {
                    let keep_from = buf.len().saturating_sub(BEGIN.len() - 1);
                    buf.drain(..keep_from);
                    continue;
                }
            }
        }

        if let Some(end) = find(&buf, END, BEGIN.len()) {
            if let Some(close) = find(&buf, PI_CLOSE, end + END.len()) {
                buf.truncate(close + PI_CLOSE.len());
                return Ok(Some(buf));
            }
        }
        if buf.len() > MAX_PACKET {
            log::debug!("Unterminated xpacket wrapper, giving up after {} bytes", buf.len());
            return Ok(None);
        }
    }
}
