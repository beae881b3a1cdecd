use img_parts::Bytes;
use img_parts::png::{Png, PngChunk};

use crate::error::{Error, Result};

const CHUNK_IHDR: [u8; 4] = *b"IHDR";
const CHUNK_ITXT: [u8; 4] = *b"iTXt";
const XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp\0";

/// Extract the packet from the `XML:com.adobe.xmp` iTXt chunk, if any.
pub(crate) fn read(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let png = parse(bytes)?;
    png.chunks()
        .iter()
        .find(|c| is_xmp_chunk(c))
        .map(|c| itxt_text(&c.contents()[XMP_KEYWORD.len()..]).map(<[u8]>::to_vec))
        .transpose()
}

/// Replace the XMP iTXt chunk, or insert one right after IHDR.
pub(crate) fn write(bytes: &[u8], packet: &[u8]) -> Result<Vec<u8>> {
    let mut png = parse(bytes)?;

    // keyword, compression flag + method, empty language tag, empty translated keyword
    let mut contents = Vec::with_capacity(XMP_KEYWORD.len() + 4 + packet.len());
    contents.extend_from_slice(XMP_KEYWORD);
    contents.extend_from_slice(&[0, 0, 0, 0]);
    contents.extend_from_slice(packet);
    let new_chunk = PngChunk::new(CHUNK_ITXT, Bytes::from(contents));

    let chunks = png.chunks_mut();
    match chunks.iter().position(is_xmp_chunk) {
        Some(pos) => {
            chunks[pos] = new_chunk;
            // Drop any duplicates so readers can't pick a stale one.
            let mut seen = 0;
            chunks.retain(|c| {
                if is_xmp_chunk(c) {
                    seen += 1;
                    seen == 1
                } else {
                    true
                }
            });
        }
        None => {
            let insert_pos = chunks
                .iter()
                .position(|c| c.kind() == CHUNK_IHDR)
                .map(|p| p + 1)
                .unwrap_or(0);
            chunks.insert(insert_pos, new_chunk);
        }
    }

    Ok(png.encoder().bytes().to_vec())
}

fn parse(bytes: &[u8]) -> Result<Png> {
    Png::from_bytes(Bytes::copy_from_slice(bytes)).map_err(|e| Error::malformed("PNG", e.to_string()))
}

fn is_xmp_chunk(chunk: &PngChunk) -> bool {
    chunk.kind() == CHUNK_ITXT && chunk.contents().starts_with(XMP_KEYWORD)
}

/// Skip the iTXt fields after the keyword and return the text.
fn itxt_text(rest: &[u8]) -> Result<&[u8]> {
    let [compressed, _method, fields @ ..] = rest else {
        return Err(Error::malformed("PNG", "truncated XMP iTXt chunk"));
    };
    if *compressed != 0 {
        return Err(Error::malformed("PNG", "compressed XMP iTXt chunk"));
    }

    let mut text = fields;
    // language tag, then translated keyword
    for _ in 0..2 {
        let nul = text
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed("PNG", "unterminated iTXt field"))?;
        text = &text[nul + 1..];
    }
    Ok(text)
}
