//! RIFF containers: WAV, AVI and extended WebP.

use std::io::{Read, Seek};

use super::{Source, Splice};
use crate::error::{Error, Result};

const RIFF: [u8; 4] = *b"RIFF";
const VP8X: [u8; 4] = *b"VP8X";
const VP8X_XMP_FLAG: u8 = 0x04;

const HEADER_LEN: u64 = 12;
const CHUNK_HEADER_LEN: u64 = 8;

/// The RIFF form type, which decides the chunk id used for the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    Wave,
    Avi,
    WebP,
}

impl Form {
    fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Wave => *b"WAVE",
            Self::Avi => *b"AVI ",
            Self::WebP => *b"WEBP",
        }
    }

    fn xmp_chunk(self) -> [u8; 4] {
        match self {
            Self::Wave | Self::Avi => *b"_PMX",
            Self::WebP => *b"XMP ",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Wave => "WAV",
            Self::Avi => "AVI",
            Self::WebP => "WebP",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chunk {
    id: [u8; 4],
    // offset of the chunk header
    offset: u64,
    size: u64,
    // header + data + pad byte, as present in the file
    span: u64,
}

impl Chunk {
    fn data_start(&self) -> u64 {
        self.offset + CHUNK_HEADER_LEN
    }

    fn missing_pad(&self) -> bool {
        self.size & 1 == 1 && self.span == CHUNK_HEADER_LEN + self.size
    }
}

struct Riff {
    // end of the RIFF payload; anything after is preserved as-is
    end: u64,
    chunks: Vec<Chunk>,
}

fn parse<R: Read + Seek>(src: &mut Source<R>, form: Form) -> Result<Riff> {
    let fmt = form.name();
    if src.len() < HEADER_LEN {
        return Err(Error::malformed(fmt, "missing RIFF header"));
    }
    let mut header = [0u8; HEADER_LEN as usize];
    src.read_at(0, &mut header)?;
    if header[0..4] != RIFF {
        return Err(Error::malformed(fmt, "missing RIFF header"));
    }
    if header[8..12] != form.fourcc() {
        return Err(Error::malformed(
            fmt,
            format!("unexpected RIFF form '{}'", String::from_utf8_lossy(&header[8..12])),
        ));
    }

    let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let end = (8 + u64::from(declared)).min(src.len());
    if end < HEADER_LEN {
        return Err(Error::malformed(fmt, "RIFF size smaller than its header"));
    }

    let mut chunks = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < end {
        if end - pos < CHUNK_HEADER_LEN {
            return Err(Error::malformed(fmt, format!("truncated chunk header at offset {pos}")));
        }
        let mut chunk_header = [0u8; CHUNK_HEADER_LEN as usize];
        src.read_at(pos, &mut chunk_header)?;
        let id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
        let size = u64::from(u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]));
        if size > end - pos - CHUNK_HEADER_LEN {
            return Err(Error::malformed(
                fmt,
                format!("chunk '{}' at offset {pos} overruns the file", String::from_utf8_lossy(&id)),
            ));
        }
        // The pad byte after an odd-sized final chunk is sometimes missing.
        let span = (CHUNK_HEADER_LEN + size + (size & 1)).min(end - pos);
        chunks.push(Chunk { id, offset: pos, size, span });
        pos += span;
    }

    Ok(Riff { end, chunks })
}

/// Extract the packet from the form's XMP chunk, if any.
pub(crate) fn read<R: Read + Seek>(src: &mut Source<R>, form: Form) -> Result<Option<Vec<u8>>> {
    let riff = parse(src, form)?;
    match riff.chunks.iter().find(|c| c.id == form.xmp_chunk()) {
        Some(chunk) => src.read_vec(chunk.data_start(), chunk.size).map(Some),
        None => Ok(None),
    }
}

/// Plan dropping any existing XMP chunk and appending the new one at the end
/// of the RIFF.
pub(crate) fn write<R: Read + Seek>(src: &mut Source<R>, packet: &[u8], form: Form) -> Result<Splice> {
    let riff = parse(src, form)?;
    let xmp_id = form.xmp_chunk();

    let chunk_size = u32::try_from(packet.len()).map_err(|_| too_large(form, packet.len()))?;

    let mut vp8x_flags = None;
    if form == Form::WebP {
        let first = riff
            .chunks
            .first()
            .ok_or_else(|| Error::malformed(form.name(), "no image chunks"))?;
        if first.id != VP8X || first.size < 1 {
            return Err(Error::unsupported(
                "simple WebP files carry no metadata; convert to extended (VP8X) WebP first",
            ));
        }
        let mut flags = [0u8; 1];
        src.read_at(first.data_start(), &mut flags)?;
        vp8x_flags = Some(flags[0] | VP8X_XMP_FLAG);
    }

    let kept: Vec<&Chunk> = riff.chunks.iter().filter(|c| c.id != xmp_id).collect();
    let pad = (packet.len() & 1) as u64;
    let body: u64 = kept.iter().map(|c| c.span + u64::from(c.missing_pad())).sum::<u64>()
        + CHUNK_HEADER_LEN
        + packet.len() as u64
        + pad;
    let riff_size = u32::try_from(4 + body).map_err(|_| too_large(form, packet.len()))?;

    let mut splice = Splice::default();
    splice.data(RIFF.to_vec()).data(riff_size.to_le_bytes().to_vec()).copy(8, 4);

    for chunk in kept {
        match vp8x_flags.take().filter(|_| chunk.id == VP8X) {
            Some(flags) => {
                splice
                    .copy(chunk.offset, CHUNK_HEADER_LEN)
                    .data(vec![flags])
                    .copy(chunk.data_start() + 1, chunk.span - CHUNK_HEADER_LEN - 1);
            }
            None => {
                splice.copy(chunk.offset, chunk.span);
            }
        }
        if chunk.missing_pad() {
            splice.data(vec![0]);
        }
    }

    splice.data(xmp_id.to_vec()).data(chunk_size.to_le_bytes().to_vec()).data(packet.to_vec());
    if pad == 1 {
        splice.data(vec![0]);
    }

    splice.copy(riff.end, src.len() - riff.end);
    Ok(splice)
}

fn too_large(form: Form, size: usize) -> Error {
    Error::PacketTooLarge {
        format: form.name(),
        size,
        limit: u32::MAX as usize,
    }
}
