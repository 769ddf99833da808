/// Super-chunk files: every chunk is an independent compressed block that can
/// be read without touching any other.
use std::sync::Arc;

use chunkbridge_codecs::FramedCodec;
use chunkbridge_core::{
    ArrayDescriptor, BlockCodec, CompressionProfile, Compressor, DenseSource, FormatError,
    SChunkReader, SChunkWriter, SourceArray,
};

fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

fn codec() -> Arc<dyn BlockCodec> {
    Arc::new(FramedCodec::default())
}

#[test]
fn chunks_read_back_in_any_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.cbs");
    let descriptor = ArrayDescriptor::new(vec![50, 30], vec![16, 16], vec![16, 20], 2).unwrap();
    let data = compressible_bytes(50 * 30 * 2);
    let mut source = DenseSource::new(descriptor.clone(), data).unwrap();

    let profile = CompressionProfile::default().compressor(Compressor::Zstd).level(5);
    let written = SChunkWriter::from_source(&path, &mut source, codec(), profile.clone()).unwrap();
    assert_eq!(written, 8);

    let mut reader = SChunkReader::open(&path, codec()).unwrap();
    assert_eq!(reader.header().descriptor, descriptor);
    assert_eq!(reader.profile().compressor, Compressor::Zstd);
    assert_eq!(reader.nchunks(), 8);
    assert!(reader.ratio() > 1.0, "ratio {}", reader.ratio());

    for linear in [7u64, 0, 3, 5] {
        assert_eq!(
            reader.decompress_chunk(linear).unwrap(),
            source.decompress_chunk(linear).unwrap(),
            "chunk {linear}"
        );
    }
}

#[test]
fn damaged_block_fails_its_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("damaged.cbs");
    let descriptor = ArrayDescriptor::unpadded(vec![4096], vec![1024], 4).unwrap();
    let mut source = DenseSource::new(descriptor, compressible_bytes(4096 * 4)).unwrap();
    SChunkWriter::from_source(&path, &mut source, codec(), CompressionProfile::default()).unwrap();

    let offset = SChunkReader::open(&path, codec()).unwrap().entries()[1].offset;
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[offset as usize + 17] ^= 0x01;
    std::fs::write(&path, bytes).unwrap();

    let mut reader = SChunkReader::open(&path, codec()).unwrap();
    assert!(reader.read_block(0).is_ok());
    assert!(matches!(
        reader.read_block(1),
        Err(FormatError::ChecksumMismatch { index: 1, .. })
    ));
    assert!(reader.decompress_chunk(1).is_err());
    assert!(matches!(
        reader.read_block(4),
        Err(FormatError::ChunkOutOfRange { index: 4, total: 4 })
    ));
}

#[test]
fn writer_requires_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.cbs");
    let descriptor = ArrayDescriptor::unpadded(vec![8], vec![4], 1).unwrap();

    let mut w = SChunkWriter::create(&path, descriptor, codec(), CompressionProfile::default()).unwrap();
    assert!(w.append_chunk(&[1, 2, 3]).is_err());
    assert_eq!(w.append_chunk(&[1, 2, 3, 4]).unwrap(), 0);
    assert!(w.finish().is_err());
}

#[test]
fn foreign_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.cbs");
    std::fs::write(&path, vec![0xabu8; 256]).unwrap();
    assert!(matches!(
        SChunkReader::open(&path, codec()),
        Err(FormatError::BadMagic(_))
    ));
}

#[test]
fn index_past_the_end_of_the_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short_index.cbs");
    let descriptor = ArrayDescriptor::unpadded(vec![4096], vec![1024], 4).unwrap();
    let mut source = DenseSource::new(descriptor, compressible_bytes(4096 * 4)).unwrap();
    SChunkWriter::from_source(&path, &mut source, codec(), CompressionProfile::default()).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let footer = bytes.len() - 8;
    // Room for one index entry, four are listed.
    let offset = (footer - 32) as u64;
    bytes[footer..].copy_from_slice(&offset.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        SChunkReader::open(&path, codec()),
        Err(FormatError::Corrupt(_))
    ));
}
