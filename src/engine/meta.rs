use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::MetaSubsystem;
use crate::error::{Error, Result};

const PACKET_BEGIN: &str = "<?xpacket begin=";
const PACKET_END: &str = "<?xpacket end=";
const PACKET_HEADER: &str = "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n";
const PACKET_TRAILER: &str = "<?xpacket end=\"w\"?>";

// Padding is emitted as lines of at most this many bytes (newline included).
const PADDING_LINE: usize = 100;

/// The metadata subsystem.
///
/// Treats a packet as opaque text that only has to be well-formed XML.
/// Serialized packets carry the standard `<?xpacket?>` wrapper and a
/// whitespace trailer so containers can be updated in place later.
#[derive(Debug)]
pub struct XmpMeta {
    ready: bool,
}

impl XmpMeta {
    pub fn acquire() -> Result<Self> {
        log::debug!("XmpMeta initialized");
        Ok(Self { ready: true })
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}

impl MetaSubsystem for XmpMeta {
    fn name(&self) -> &str {
        "XmpMeta"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode_packet(&self, raw: &[u8]) -> Result<Option<String>> {
        self.ensure_ready()?;
        let text = decode_text(raw)?;
        let body = strip_wrapper(&text);
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(body.to_string()))
        }
    }

    fn encode_packet(&self, text: &str, padding: usize) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        let body = strip_wrapper(text);
        if body.is_empty() {
            return Err(Error::invalid_packet("packet is empty"));
        }
        check_well_formed(body)?;

        let mut packet =
            String::with_capacity(PACKET_HEADER.len() + body.len() + padding + PACKET_TRAILER.len() + 1);
        packet.push_str(PACKET_HEADER);
        packet.push_str(body);
        packet.push('\n');
        push_padding(&mut packet, padding);
        packet.push_str(PACKET_TRAILER);
        Ok(packet.into_bytes())
    }

    fn release(&mut self) -> Result<()> {
        self.ready = false;
        log::debug!("XmpMeta terminated");
        Ok(())
    }
}

/// Decode packet bytes. XMP allows UTF-8 and UTF-16 in either byte order.
fn decode_text(raw: &[u8]) -> Result<String> {
    match raw {
        [0xEF, 0xBB, 0xBF, rest @ ..] => utf8(rest),
        [0x00, 0x00, 0xFE, 0xFF, ..] | [0xFF, 0xFE, 0x00, 0x00, ..] => {
            Err(Error::invalid_packet("UTF-32 packets are not supported"))
        }
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0x00, b, ..] if *b != 0 => utf16(raw, u16::from_be_bytes),
        [b, 0x00, ..] if *b != 0 => utf16(raw, u16::from_le_bytes),
        _ => utf8(raw),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::invalid_packet(format!("not valid UTF-8: {e}")))
}

fn utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::invalid_packet("odd byte count in UTF-16 packet"));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|e| Error::invalid_packet(format!("not valid UTF-16: {e}")))
}

/// Remove the `<?xpacket?>` header/trailer and surrounding padding.
fn strip_wrapper(text: &str) -> &str {
    let mut body = text.trim_start_matches('\u{feff}').trim();

    if body.starts_with(PACKET_BEGIN) {
        if let Some(end) = body.find("?>") {
            body = &body[end + 2..];
        }
    }
    if let Some(trailer) = body.rfind(PACKET_END) {
        body = &body[..trailer];
    }

    body.trim()
}

fn check_well_formed(body: &str) -> Result<()> {
    let mut reader = Reader::from_str(body);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::invalid_packet(format!(
                    "not well-formed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if depth != 0 {
        return Err(Error::invalid_packet("unclosed element at end of packet"));
    }
    if roots == 0 {
        return Err(Error::invalid_packet("packet has no root element"));
    }
    Ok(())
}

fn push_padding(out: &mut String, mut remaining: usize) {
    while remaining > 0 {
        let line = remaining.min(PADDING_LINE);
        out.push_str(&" ".repeat(line - 1));
        out.push('\n');
        remaining -= line;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE: &str = "<xmp>title=Foo</xmp>";

    fn meta() -> XmpMeta {
        XmpMeta::acquire().unwrap()
    }

    // ── encode ───────────────────────────────────────────────────────

    #[test]
    fn encode_wraps_and_pads() {
        let packet = meta().encode_packet(TITLE, 250).unwrap();
        let text = String::from_utf8(packet).unwrap();

        assert!(text.starts_with(PACKET_HEADER));
        assert!(text.ends_with(PACKET_TRAILER));
        assert!(text.contains(TITLE));
        assert_eq!(text.len(), PACKET_HEADER.len() + TITLE.len() + 1 + 250 + PACKET_TRAILER.len());
    }

    #[test]
    fn encode_without_padding() {
        let packet = meta().encode_packet(TITLE, 0).unwrap();
        let expected = format!("{PACKET_HEADER}{TITLE}\n{PACKET_TRAILER}");
        assert_eq!(packet, expected.into_bytes());
    }

    #[test]
    fn encode_rewraps_existing_packet() {
        let m = meta();
        let once = m.encode_packet(TITLE, 10).unwrap();
        let twice = m.encode_packet(std::str::from_utf8(&once).unwrap(), 10).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn encode_rejects_empty() {
        let err = meta().encode_packet("   \n", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
    }

    #[test]
    fn encode_rejects_mismatched_tags() {
        let err = meta().encode_packet("<a><b></a>", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
    }

    #[test]
    fn encode_rejects_unclosed_root() {
        let err = meta().encode_packet("<a><b/>", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
    }

    #[test]
    fn encode_rejects_plain_text() {
        let err = meta().encode_packet("title=Foo", 0).unwrap_err();
        assert!(err.to_string().contains("no root element"));
    }

    #[test]
    fn encode_accepts_full_xmpmeta() {
        let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <dc:title><rdf:Alt><rdf:li xml:lang="x-default">HELLO</rdf:li></rdf:Alt></dc:title>
</rdf:Description>
</rdf:RDF>
</x:xmpmeta>"#;
        assert!(meta().encode_packet(xmp, 0).is_ok());
    }

    // ── decode ───────────────────────────────────────────────────────

    #[test]
    fn decode_strips_wrapper_and_padding() {
        let m = meta();
        let packet = m.encode_packet(TITLE, 512).unwrap();
        assert_eq!(m.decode_packet(&packet).unwrap().as_deref(), Some(TITLE));
    }

    #[test]
    fn decode_unwrapped_text() {
        assert_eq!(
            meta().decode_packet(b"  <a/>\n").unwrap().as_deref(),
            Some("<a/>")
        );
    }

    #[test]
    fn decode_empty_packet_is_none() {
        let m = meta();
        assert_eq!(m.decode_packet(b"").unwrap(), None);
        let empty = format!("{PACKET_HEADER}      \n{PACKET_TRAILER}");
        assert_eq!(m.decode_packet(empty.as_bytes()).unwrap(), None);
    }

    #[test]
    fn decode_utf8_bom() {
        let mut raw = vec![0xEF, 0xBB, 0xBF];
        raw.extend_from_slice(TITLE.as_bytes());
        assert_eq!(meta().decode_packet(&raw).unwrap().as_deref(), Some(TITLE));
    }

    #[test]
    fn decode_utf16_le_and_be() {
        let le: Vec<u8> = TITLE.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        let be: Vec<u8> = TITLE.encode_utf16().flat_map(|c| c.to_be_bytes()).collect();
        let m = meta();
        assert_eq!(m.decode_packet(&le).unwrap().as_deref(), Some(TITLE));
        assert_eq!(m.decode_packet(&be).unwrap().as_deref(), Some(TITLE));

        let mut bom_be = vec![0xFE, 0xFF];
        bom_be.extend_from_slice(&be);
        assert_eq!(m.decode_packet(&bom_be).unwrap().as_deref(), Some(TITLE));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let err = meta().decode_packet(&[b'<', 0xC3, 0x28, b'>']).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket(_)));
    }

    #[test]
    fn decode_rejects_utf32() {
        let err = meta().decode_packet(&[0x00, 0x00, 0xFE, 0xFF, 0, 0, 0, b'<']).unwrap_err();
        assert!(err.to_string().contains("UTF-32"));
    }

    // ── lifecycle ────────────────────────────────────────────────────

    #[test]
    fn released_meta_refuses_work() {
        let mut m = meta();
        m.release().unwrap();
        assert!(!m.is_ready());
        assert!(matches!(m.encode_packet(TITLE, 0), Err(Error::NotInitialized)));
        assert!(matches!(m.decode_packet(b"<a/>"), Err(Error::NotInitialized)));
    }

    #[test]
    fn padding_lines() {
        let mut out = String::new();
        push_padding(&mut out, 205);
        assert_eq!(out.len(), 205);
        assert_eq!(out.matches('\n').count(), 3);
        assert!(out.ends_with("    \n"));
    }
}
