//! Byte shuffle: groups the k-th byte of every element together so that
//! slowly varying numeric data compresses better.
//!
//! Trailing bytes that do not fill a whole element are copied unchanged.

pub fn shuffle(typesize: usize, src: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(src.len(), dest.len());
    if typesize <= 1 {
        dest.copy_from_slice(src);
        return;
    }
    let n = src.len() / typesize;
    for (i, element) in src.chunks_exact(typesize).enumerate() {
        for (j, &byte) in element.iter().enumerate() {
            dest[j * n + i] = byte;
        }
    }
    let tail = n * typesize;
    dest[tail..].copy_from_slice(&src[tail..]);
}

pub fn unshuffle(typesize: usize, src: &[u8], dest: &mut [u8]) {
    debug_assert_eq!(src.len(), dest.len());
    if typesize <= 1 {
        dest.copy_from_slice(src);
        return;
    }
    let n = src.len() / typesize;
    for (i, element) in dest.chunks_exact_mut(typesize).enumerate() {
        for (j, byte) in element.iter_mut().enumerate() {
            *byte = src[j * n + i];
        }
    }
    let tail = n * typesize;
    dest[tail..].copy_from_slice(&src[tail..]);
}
