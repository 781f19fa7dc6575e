//! Virtual SD card blocks returned during a data access.
//!
//! Text is stored as 16 bits per character, big endian, so every character
//! byte is preceded by a zero byte.

use super::navigation::EntryKind;
use nmp_hw::mmio::nmp::{list_block, tag_block};

/// Write up to `max` bytes of `text` at `offset`, two bytes per character
fn encode_text(block: &mut [u8], offset: usize, text: &str, max: usize) {
    for (i, chr) in text.bytes().take(max).enumerate() {
        let pos = offset + i * 2;
        block[pos] = 0x00;
        block[pos + 1] = chr;
    }
}

/// Read two-byte characters from `offset` until a zero character or `max`
pub fn decode_text(block: &[u8], offset: usize, max: usize) -> String {
    let bytes: Vec<u8> = block
        .get(offset..)
        .unwrap_or_default()
        .chunks_exact(2)
        .take(max)
        .map(|pair| pair[1])
        .take_while(|&chr| chr != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Listing block for one entry. An exhausted cursor yields an all-zero block.
pub fn build_list_block(entry: Option<(&str, EntryKind)>) -> Vec<u8> {
    let mut block = vec![0u8; list_block::SIZE];

    if let Some((name, kind)) = entry {
        let kind = match kind {
            EntryKind::Folder => list_block::FOLDER,
            EntryKind::File => list_block::FILE,
        };

        // Folders sort first: the name is prefixed with a low unprintable character
        block[0] = 0x00;
        block[1] = kind;
        encode_text(&mut block, list_block::NAME_OFFSET, name, list_block::NAME_MAX);
        block[list_block::KIND_OFFSET] = kind;
    }

    block
}

/// Parse a listing block back into its entry
pub fn parse_list_block(block: &[u8]) -> Option<(String, EntryKind)> {
    let kind = match block.get(list_block::KIND_OFFSET)? {
        &list_block::FOLDER => EntryKind::Folder,
        &list_block::FILE => EntryKind::File,
        _ => return None,
    };
    let name = decode_text(block, list_block::NAME_OFFSET, list_block::NAME_MAX);
    Some((name, kind))
}

/// ID3 block with title and artist
pub fn build_tag_block(title: &str, artist: &str) -> Vec<u8> {
    let mut block = vec![0u8; tag_block::SIZE];
    encode_text(&mut block, tag_block::TITLE_OFFSET, title, tag_block::TITLE_MAX);
    encode_text(&mut block, tag_block::ARTIST_OFFSET, artist, tag_block::ARTIST_MAX);
    block
}

/// Parse an ID3 block into (title, artist)
pub fn parse_tag_block(block: &[u8]) -> (String, String) {
    (
        decode_text(block, tag_block::TITLE_OFFSET, tag_block::TITLE_MAX),
        decode_text(block, tag_block::ARTIST_OFFSET, tag_block::ARTIST_MAX),
    )
}
