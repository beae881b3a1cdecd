//! ISO base media (MP4) and QuickTime containers.
//!
//! The packet lives in a top-level `uuid` box tagged with the XMP UUID.
//! QuickTime writers also use `moov/udta/XMP_`, which is honoured on read.
//!
//! Writes never move `mdat`: a box in front of the media data may only be
//! overwritten at the same size, shrunk with a trailing `free` box, or turned
//! into `free` while the new packet is appended at the end of the file.

use std::io::{Read, Seek};

use super::{Source, Splice};
use crate::error::{Error, Result};

const FORMAT: &str = "MP4/QuickTime";

const XMP_UUID: [u8; 16] = [
    0xBE, 0x7A, 0xCF, 0xCB, 0x97, 0xA9, 0x42, 0xE8, 0x9C, 0x71, 0x99, 0x94, 0x91, 0xE3, 0xAF, 0xAC,
];

const BOX_UUID: [u8; 4] = *b"uuid";
const BOX_FREE: [u8; 4] = *b"free";
const BOX_MOOV: [u8; 4] = *b"moov";
const BOX_UDTA: [u8; 4] = *b"udta";
const BOX_XMP: [u8; 4] = *b"XMP_";

const HEADER_LEN: u64 = 8;
const LARGE_HEADER_LEN: u64 = 16;

#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    offset: u64,
    size: u64,
    header_len: u64,
    kind: [u8; 4],
    // size field was 0: the box runs to the end of its parent
    open_ended: bool,
    // uuid box carrying the XMP UUID
    xmp: bool,
}

impl BoxHeader {
    fn payload_start(&self) -> u64 {
        self.offset + self.header_len
    }

    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Walk the box headers in `[start, end)` of `src`.
fn boxes<R: Read + Seek>(src: &mut Source<R>, start: u64, end: u64) -> Result<Vec<BoxHeader>> {
    let mut out = Vec::new();
    let mut pos = start;

    while pos < end {
        if end - pos < HEADER_LEN {
            return Err(Error::malformed(FORMAT, format!("truncated box header at offset {pos}")));
        }
        let mut header = [0u8; 8];
        src.read_at(pos, &mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let (size, header_len, open_ended) = match size32 {
            0 => (end - pos, HEADER_LEN, true),
            1 => {
                if end - pos < LARGE_HEADER_LEN {
                    return Err(Error::malformed(FORMAT, format!("truncated large box at offset {pos}")));
                }
                let mut large = [0u8; 8];
                src.read_at(pos + HEADER_LEN, &mut large)?;
                (u64::from_be_bytes(large), LARGE_HEADER_LEN, false)
            }
            n => (u64::from(n), HEADER_LEN, false),
        };

        if size < header_len || size > end - pos {
            return Err(Error::malformed(
                FORMAT,
                format!(
                    "box '{}' at offset {pos} has invalid size {size}",
                    String::from_utf8_lossy(&kind)
                ),
            ));
        }

        let mut xmp = false;
        if kind == BOX_UUID && size - header_len >= XMP_UUID.len() as u64 {
            let mut id = [0u8; 16];
            src.read_at(pos + header_len, &mut id)?;
            xmp = id == XMP_UUID;
        }

        out.push(BoxHeader {
            offset: pos,
            size,
            header_len,
            kind,
            open_ended,
            xmp,
        });
        pos += size;
    }

    Ok(out)
}

fn top_level<R: Read + Seek>(src: &mut Source<R>) -> Result<Vec<BoxHeader>> {
    let len = src.len();
    let top = boxes(src, 0, len)?;
    if top.is_empty() {
        return Err(Error::malformed(FORMAT, "file is empty"));
    }
    Ok(top)
}

/// Extract the packet: XMP uuid box first, then `moov/udta/XMP_`.
pub(crate) fn read<R: Read + Seek>(src: &mut Source<R>) -> Result<Option<Vec<u8>>> {
    let top = top_level(src)?;

    if let Some(uuid) = top.iter().find(|b| b.xmp) {
        let start = uuid.payload_start() + XMP_UUID.len() as u64;
        return src.read_vec(start, uuid.end() - start).map(Some);
    }

    for moov in top.iter().filter(|b| b.kind == BOX_MOOV) {
        for udta in boxes(src, moov.payload_start(), moov.end())?.iter().filter(|b| b.kind == BOX_UDTA) {
            if let Some(xmp) = boxes(src, udta.payload_start(), udta.end())?.iter().find(|b| b.kind == BOX_XMP) {
                return src.read_vec(xmp.payload_start(), xmp.end() - xmp.payload_start()).map(Some);
            }
        }
    }

    Ok(None)
}

/// Plan storing the packet in a top-level XMP uuid box without moving media data.
pub(crate) fn write<R: Read + Seek>(src: &mut Source<R>, packet: &[u8]) -> Result<Splice> {
    let len = src.len();
    let top = top_level(src)?;
    let new_box = uuid_box(packet)?;
    let new_len = new_box.len() as u64;

    let Some(index) = top.iter().position(|b| b.xmp) else {
        log::debug!("Appending XMP uuid box");
        return append(len, &top, Vec::new(), new_box);
    };

    let old = top[index];
    let is_last = index == top.len() - 1;

    if old.size == new_len {
        log::debug!("Overwriting XMP uuid box in place");
        Ok(Splice::patched(len, vec![(old.offset, new_box)]))
    } else if old.size >= new_len + HEADER_LEN {
        log::debug!("Shrinking XMP uuid box, padding with free box");
        let mut bytes = new_box;
        bytes.extend_from_slice(&free_box(old.size - new_len)?);
        Ok(Splice::patched(len, vec![(old.offset, bytes)]))
    } else if is_last {
        log::debug!("Resizing trailing XMP uuid box");
        let mut splice = Splice::default();
        splice.copy(0, old.offset).data(new_box);
        Ok(splice)
    } else {
        log::debug!("Freeing XMP uuid box at offset {} and appending a new one", old.offset);
        append(len, &top, vec![(old.offset + 4, BOX_FREE.to_vec())], new_box)
    }
}

fn append(len: u64, top: &[BoxHeader], mut patches: Vec<(u64, Vec<u8>)>, new_box: Vec<u8>) -> Result<Splice> {
    // An open-ended last box would swallow whatever follows it.
    if let Some(last) = top.last().filter(|b| b.open_ended) {
        let size = u32::try_from(last.size)
            .map_err(|_| Error::unsupported("open-ended box too large to close before appending"))?;
        patches.push((last.offset, size.to_be_bytes().to_vec()));
        patches.sort_by_key(|(offset, _)| *offset);
    }
    let mut splice = Splice::patched(len, patches);
    splice.data(new_box);
    Ok(splice)
}

fn uuid_box(packet: &[u8]) -> Result<Vec<u8>> {
    let overhead = HEADER_LEN as usize + XMP_UUID.len();
    let size = u32::try_from(overhead + packet.len()).map_err(|_| Error::PacketTooLarge {
        format: FORMAT,
        size: packet.len(),
        limit: u32::MAX as usize - overhead,
    })?;

    let mut out = Vec::with_capacity(overhead + packet.len());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&BOX_UUID);
    out.extend_from_slice(&XMP_UUID);
    out.extend_from_slice(packet);
    Ok(out)
}

fn free_box(size: u64) -> Result<Vec<u8>> {
    let size32 = u32::try_from(size).map_err(|_| Error::malformed(FORMAT, "free box too large"))?;
    let mut out = vec![0u8; size32 as usize];
    out[..4].copy_from_slice(&size32.to_be_bytes());
    out[4..8].copy_from_slice(&BOX_FREE);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::formats::Piece;
    use crate::engine::formats::tests::{apply, mp4_box, sample_mov, source};

    fn kinds(bytes: &[u8]) -> Vec<[u8; 4]> {
        top_level(&mut source(bytes)).unwrap().iter().map(|b| b.kind).collect()
    }

    fn read_bytes(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        read(&mut source(bytes))
    }

    fn write_bytes(bytes: &[u8], packet: &[u8]) -> Vec<u8> {
        apply(&write(&mut source(bytes), packet).unwrap(), bytes)
    }

    // ── read ─────────────────────────────────────────────────────────

    #[test]
    fn plain_movie_has_no_packet() {
        assert_eq!(read_bytes(&sample_mov()).unwrap(), None);
    }

    #[test]
    fn reads_quicktime_udta_xmp() {
        let xmp = mp4_box(b"XMP_", b"<a>udta</a>");
        let udta = mp4_box(b"udta", &xmp);
        let moov = mp4_box(b"moov", &udta);
        let mut file = sample_mov();
        file.extend_from_slice(&moov);

        assert_eq!(read_bytes(&file).unwrap().as_deref(), Some(&b"<a>udta</a>"[..]));
    }

    #[test]
    fn uuid_box_wins_over_udta() {
        let xmp = mp4_box(b"XMP_", b"<a>udta</a>");
        let moov = mp4_box(b"moov", &mp4_box(b"udta", &xmp));
        let mut file = sample_mov();
        file.extend_from_slice(&moov);

        let out = write_bytes(&file, b"<a>uuid</a>");
        assert_eq!(read_bytes(&out).unwrap().as_deref(), Some(&b"<a>uuid</a>"[..]));
    }

    #[test]
    fn large_size_box_is_walked() {
        let mut file = mp4_box(b"ftyp", b"isom\0\0\0\0");
        let payload = b"media";
        file.extend_from_slice(&1u32.to_be_bytes());
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&((16 + payload.len()) as u64).to_be_bytes());
        file.extend_from_slice(payload);

        assert_eq!(kinds(&file), vec![*b"ftyp", *b"mdat"]);
    }

    #[test]
    fn invalid_size_is_malformed() {
        let mut file = sample_mov();
        file.extend_from_slice(&100u32.to_be_bytes());
        file.extend_from_slice(b"junk");
        assert!(matches!(read_bytes(&file), Err(Error::Malformed { .. })));
    }

    #[test]
    fn empty_file_is_malformed() {
        assert!(matches!(read_bytes(b""), Err(Error::Malformed { .. })));
    }

    // ── write ────────────────────────────────────────────────────────

    #[test]
    fn append_to_plain_movie() {
        let original = sample_mov();
        let out = write_bytes(&original, b"<a>one</a>");

        assert_eq!(&out[..original.len()], &original[..]);
        assert_eq!(kinds(&out), vec![*b"ftyp", *b"mdat", *b"uuid"]);
        assert_eq!(read_bytes(&out).unwrap().as_deref(), Some(&b"<a>one</a>"[..]));
    }

    #[test]
    fn media_data_is_copied_not_buffered() {
        let original = sample_mov();
        let splice = write(&mut source(&original), b"<a/>").unwrap();
        assert_eq!(splice.pieces[0], Piece::Copy { offset: 0, len: original.len() as u64 });
        assert_eq!(splice.pieces.len(), 2);
    }

    #[test]
    fn same_size_overwrites_in_place() {
        let once = write_bytes(&sample_mov(), b"<a>one</a>");
        let twice = write_bytes(&once, b"<a>two</a>");

        assert_eq!(once.len(), twice.len());
        assert_eq!(read_bytes(&twice).unwrap().as_deref(), Some(&b"<a>two</a>"[..]));
    }

    #[test]
    fn trailing_box_is_resized() {
        let once = write_bytes(&sample_mov(), b"<a>one</a>");
        let twice = write_bytes(&once, b"<a>a much longer packet</a>");

        assert_eq!(kinds(&twice), vec![*b"ftyp", *b"mdat", *b"uuid"]);
        assert_eq!(read_bytes(&twice).unwrap().as_deref(), Some(&b"<a>a much longer packet</a>"[..]));
    }

    fn movie_with_leading_packet(packet: &[u8]) -> Vec<u8> {
        let mut uuid_payload = XMP_UUID.to_vec();
        uuid_payload.extend_from_slice(packet);
        let mut file = mp4_box(b"ftyp", b"qt  \0\0\0\0");
        file.extend_from_slice(&mp4_box(b"uuid", &uuid_payload));
        file.extend_from_slice(&mp4_box(b"mdat", b"frames"));
        file
    }

    #[test]
    fn shrinking_leading_box_pads_with_free() {
        let original = movie_with_leading_packet(b"<a>a long packet with room</a>");
        let out = write_bytes(&original, b"<a/>");

        assert_eq!(out.len(), original.len());
        assert_eq!(kinds(&out), vec![*b"ftyp", *b"uuid", *b"free", *b"mdat"]);
        assert_eq!(read_bytes(&out).unwrap().as_deref(), Some(&b"<a/>"[..]));
        assert!(out.ends_with(&mp4_box(b"mdat", b"frames")));
    }

    #[test]
    fn growing_leading_box_frees_and_appends() {
        let original = movie_with_leading_packet(b"<a/>");
        let out = write_bytes(&original, b"<a>now bigger than before</a>");

        assert_eq!(kinds(&out), vec![*b"ftyp", *b"free", *b"mdat", *b"uuid"]);
        assert_eq!(read_bytes(&out).unwrap().as_deref(), Some(&b"<a>now bigger than before</a>"[..]));
        // mdat did not move
        let mdat_at = original.len() - mp4_box(b"mdat", b"frames").len();
        assert_eq!(&out[mdat_at + 4..mdat_at + 8], b"mdat");
    }

    #[test]
    fn open_ended_last_box_is_closed() {
        let mut file = mp4_box(b"ftyp", b"isom\0\0\0\0");
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(b"to the end");

        let out = write_bytes(&file, b"<a/>");
        assert_eq!(kinds(&out), vec![*b"ftyp", *b"mdat", *b"uuid"]);
        assert_eq!(read_bytes(&out).unwrap().as_deref(), Some(&b"<a/>"[..]));
    }
}
