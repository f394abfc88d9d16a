//! Object image wire format: each 16-bit word stored big-endian, no magic
//! number, no trailer. Word 0 is the address at which word 1 loads.

use miette::{bail, Result, Severity};

/// Flatten an assembled image (origin header first) into bytes.
pub fn serialize(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Split an image into its origin and program words.
pub fn read(bytes: &[u8]) -> Result<(u16, Vec<u16>)> {
    if bytes.len() % 2 != 0 {
        bail!(
            severity = Severity::Error,
            code = "obj::truncated",
            help = "object images hold whole 16-bit words; the file may be corrupt",
            "Object image ends with half a word",
        );
    }
    let mut words = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    let Some(orig) = words.next() else {
        bail!(
            severity = Severity::Error,
            code = "obj::empty",
            help = "an image needs at least an origin header word",
            "Object image is empty",
        );
    };
    Ok((orig, words.collect()))
}
