use img_parts::Bytes;
use img_parts::jpeg::{Jpeg, JpegSegment};

use crate::error::{Error, Result};

const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

// Segment length is a u16 that includes its own two bytes.
const MAX_SEGMENT_CONTENTS: usize = u16::MAX as usize - 2;

/// Extract the XMP packet from the APP1 XMP segment, if any.
pub(crate) fn read(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let jpeg = parse(bytes)?;
    Ok(find_xmp_segment_pos(&jpeg)
        .map(|pos| jpeg.segments()[pos].contents()[XMP_HEADER.len()..].to_vec()))
}

/// Replace or insert the APP1 XMP segment, preserving every other segment.
///
/// A new segment goes right after the EXIF APP1 (or APP0/JFIF) so EXIF keeps
/// coming first.
pub(crate) fn write(bytes: &[u8], packet: &[u8]) -> Result<Vec<u8>> {
    let size = XMP_HEADER.len() + packet.len();
    if size > MAX_SEGMENT_CONTENTS {
        return Err(Error::PacketTooLarge {
            format: "JPEG",
            size,
            limit: MAX_SEGMENT_CONTENTS,
        });
    }

    let mut jpeg = parse(bytes)?;

    let mut contents = Vec::with_capacity(size);
    contents.extend_from_slice(XMP_HEADER);
    contents.extend_from_slice(packet);
    let new_segment = JpegSegment::new_with_contents(APP1, Bytes::from(contents));

    let xmp_pos = find_xmp_segment_pos(&jpeg);
    let exif_pos = find_exif_segment_pos(&jpeg);
    let segments = jpeg.segments_mut();
    match xmp_pos {
        Some(pos) => segments[pos] = new_segment,
        None => {
            let insert_pos = exif_pos
                .map(|p| p + 1)
                .or_else(|| segments.first().filter(|s| s.marker() == APP0).map(|_| 1))
                .unwrap_or(0);
            segments.insert(insert_pos.min(segments.len()), new_segment);
        }
    }

    Ok(jpeg.encoder().bytes().to_vec())
}

fn parse(bytes: &[u8]) -> Result<Jpeg> {
    Jpeg::from_bytes(Bytes::copy_from_slice(bytes)).map_err(|e| Error::malformed("JPEG", e.to_string()))
}

/// Find the XMP APP1 segment position in a JPEG.
fn find_xmp_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(XMP_HEADER))
}

/// Find the position of the EXIF APP1 segment in a JPEG.
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(EXIF_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::formats::tests::sample_jpeg;

    #[test]
    fn plain_jpeg_has_no_packet() {
        assert_eq!(read(&sample_jpeg()).unwrap(), None);
    }

    #[test]
    fn write_then_read() {
        let out = write(&sample_jpeg(), b"<a>one</a>").unwrap();
        assert_eq!(read(&out).unwrap().as_deref(), Some(&b"<a>one</a>"[..]));
    }

    #[test]
    fn rewrite_replaces_single_segment() {
        let once = write(&sample_jpeg(), b"<a>one</a>").unwrap();
        let twice = write(&once, b"<a>two</a>").unwrap();

        assert_eq!(read(&twice).unwrap().as_deref(), Some(&b"<a>two</a>"[..]));
        let jpeg = parse(&twice).unwrap();
        let xmp_segments = jpeg
            .segments()
            .iter()
            .filter(|s| s.marker() == APP1 && s.contents().starts_with(XMP_HEADER))
            .count();
        assert_eq!(xmp_segments, 1);
    }

    #[test]
    fn inserted_after_app0() {
        let original = parse(&sample_jpeg()).unwrap();
        let expected = if original.segments()[0].marker() == APP0 { 1 } else { 0 };

        let out = write(&sample_jpeg(), b"<a/>").unwrap();
        let jpeg = parse(&out).unwrap();
        assert_eq!(find_xmp_segment_pos(&jpeg), Some(expected));
        assert_eq!(jpeg.segments().len(), original.segments().len() + 1);
    }

    #[test]
    fn oversized_packet_rejected() {
        let packet = vec![b' '; MAX_SEGMENT_CONTENTS];
        let err = write(&sample_jpeg(), &packet).unwrap_err();
        assert!(matches!(err, Error::PacketTooLarge { format: "JPEG", .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(read(b"not a jpeg"), Err(Error::Malformed { .. })));
    }
}
