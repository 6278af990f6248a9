//! GD3 (Game Description 3) tag handling

use crate::module::Module;

/// GD3 tag magic
const GD3_MAGIC: &[u8; 4] = b"Gd3 ";

/// GD3 version (1.0)
const GD3_VERSION: u32 = 0x00000100;

const SYSTEM_NAME: &str = "NEC PC-8801/PC-9801 (YM2608)";

/// Text fields of a GD3 tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gd3Metadata {
    pub title_en: String,
    pub title_jp: String,
    pub game_en: String,
    pub game_jp: String,
    pub system_en: String,
    pub system_jp: String,
    pub composer_en: String,
    pub composer_jp: String,
    pub date: String,
    pub converter: String,
    pub notes: String,
}

impl Gd3Metadata {
    /// Tag for song `song` of `module`; the song title wins over the module title
    pub fn from_module(module: &Module, song: usize) -> Self {
        let song_title = module
            .songs
            .get(song)
            .map(|s| s.title.as_str())
            .filter(|t| !t.is_empty());
        Self {
            title_en: song_title.unwrap_or(&module.title).to_string(),
            game_en: module.title.clone(),
            system_en: SYSTEM_NAME.to_string(),
            composer_en: module.author.clone(),
            converter: concat!("opnatrack ", env!("CARGO_PKG_VERSION")).to_string(),
            notes: module.copyright.clone(),
            ..Self::default()
        }
    }
}

/// Generate GD3 tag data
pub fn generate_gd3(metadata: &Gd3Metadata) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(GD3_MAGIC);
    data.extend_from_slice(&GD3_VERSION.to_le_bytes());

    // Size is patched once the strings are written
    let size_offset = data.len();
    data.extend_from_slice(&0u32.to_le_bytes());
    let strings_start = data.len();

    for s in [
        &metadata.title_en,
        &metadata.title_jp,
        &metadata.game_en,
        &metadata.game_jp,
        &metadata.system_en,
        &metadata.system_jp,
        &metadata.composer_en,
        &metadata.composer_jp,
        &metadata.date,
        &metadata.converter,
        &metadata.notes,
    ] {
        write_utf16_string(&mut data, s);
    }

    let strings_size = (data.len() - strings_start) as u32;
    data[size_offset..size_offset + 4].copy_from_slice(&strings_size.to_le_bytes());
    data
}

/// Write a UTF-16LE null-terminated string
fn write_utf16_string(data: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        data.extend_from_slice(&unit.to_le_bytes());
    }
    data.extend_from_slice(&[0, 0]);
}
