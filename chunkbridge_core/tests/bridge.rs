/// End-to-end checks of the chunk store protocol: a source array is bridged
/// into a container as pre-compressed blocks, then read back through the raw
/// path (verbatim block + codec) and the filtered path (typed read through the
/// container's filter pipeline). Both must agree on every logical element.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkbridge_codecs::{filters_with, BloscFilter, FramedCodec};
use chunkbridge_core::element::{decode_elements, encode_elements};
use chunkbridge_core::profile::FILTER_BLOSC2;
use chunkbridge_core::{
    ArrayDescriptor, BlockCodec, BridgeError, ChunkStoreReader, ChunkStoreWriter, CodecError,
    CompressionProfile, Compressor, ConsistencyVerifier, ContainerReader, ContainerWriter,
    DenseSource, Filter, FilterRegistry, FormatError, Hyperslab, SChunkReader, SChunkWriter,
    SourceArray, VerificationReport, VerifyOptions,
};

const DATASET: &str = "DSCAT";

// ── helpers ───────────────────────────────────────────────────────────────

fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Slowly varying little-endian values, truncated to `itemsize` bytes.
fn smooth_bytes(nelems: u64, itemsize: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(nelems as usize * itemsize);
    for i in 0..nelems {
        let bytes = (i / 3).to_le_bytes();
        let n = itemsize.min(8);
        out.extend_from_slice(&bytes[..n]);
        out.resize(out.len() + itemsize - n, 0);
    }
    out
}

fn codec(nthreads: usize) -> Arc<FramedCodec> {
    Arc::new(FramedCodec::new(nthreads).unwrap())
}

fn bridge_dense(
    dir: &Path,
    name: &str,
    descriptor: &ArrayDescriptor,
    data: Vec<u8>,
    profile: CompressionProfile,
    codec: Arc<FramedCodec>,
) -> PathBuf {
    let mut source = DenseSource::new(descriptor.clone(), data).unwrap();
    let path = dir.join(format!("{name}.cbc"));
    let mut container = ContainerWriter::create(&path)
        .unwrap()
        .with_filters(Arc::new(filters_with(codec.clone())));
    let summary = ChunkStoreWriter::new(codec, profile)
        .write_all(&mut source, &mut container, DATASET)
        .unwrap();
    assert_eq!(summary.chunks, descriptor.grid().unwrap().total_chunks());
    container.finish().unwrap();
    path
}

fn open(path: &Path, codec: Arc<FramedCodec>) -> ContainerReader {
    ContainerReader::open(path, Arc::new(filters_with(codec))).unwrap()
}

fn verify(
    path: &Path,
    descriptor: &ArrayDescriptor,
    options: VerifyOptions,
) -> VerificationReport {
    let codec = codec(2);
    let mut container = open(path, codec.clone());
    ConsistencyVerifier::new(options)
        .verify(&mut container, codec.as_ref(), DATASET, descriptor)
        .unwrap()
}

// ── scenarios ─────────────────────────────────────────────────────────────

#[test]
fn edge_chunk_geometry() {
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let grid = descriptor.grid().unwrap();
    assert_eq!(grid.grid_dims(), &[3]);
    assert_eq!(grid.total_chunks(), 3);
    assert_eq!(grid.extended_shape(), &[12]);
    assert_eq!(grid.offset(&[2]), vec![8]);
    assert_eq!(grid.logical_extent(&[2]), vec![2]);
}

#[test]
fn both_paths_return_the_logical_values() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let profile = CompressionProfile::default().level(1).shuffle(true);
    let codec = codec(1);

    let source_path = dir.path().join("ints.cbs");
    let mut w = SChunkWriter::create(&source_path, descriptor.clone(), codec.clone(), profile.clone())
        .unwrap();
    for c in 0..3i32 {
        let values: Vec<i32> = (c * 4..c * 4 + 4).collect();
        w.append_chunk(&encode_elements(&values)).unwrap();
    }
    assert_eq!(w.finish().unwrap(), 3);

    let container_path = dir.path().join("ints.cbc");
    let mut source = SChunkReader::open(&source_path, codec.clone()).unwrap();
    let mut out = ContainerWriter::create(&container_path)
        .unwrap()
        .with_filters(Arc::new(filters_with(codec.clone())));
    ChunkStoreWriter::new(codec.clone(), profile)
        .write_all(&mut source, &mut out, DATASET)
        .unwrap();
    out.finish().unwrap();

    let mut container = open(&container_path, codec.clone());
    let mut reader = ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &descriptor).unwrap();
    let mut raw = Vec::new();
    let mut filtered = Vec::new();
    for linear in 0..3 {
        raw.extend(reader.read_raw(linear).unwrap());
        filtered.extend(reader.read_filtered(linear).unwrap());
    }
    let expected: Vec<i32> = (0..10).collect();
    assert_eq!(&decode_elements::<i32>(&raw)[..10], &expected[..]);
    assert_eq!(&decode_elements::<i32>(&filtered)[..10], &expected[..]);

    let report = verify(&container_path, &descriptor, VerifyOptions::default());
    assert!(report.is_consistent());
    assert_eq!(report.chunks_checked, 3);
    assert_eq!(report.elements_compared, 10);
    assert_eq!(report.bytes_raw, 48);
    assert_eq!(report.bytes_filtered, 48);
}

#[test]
fn oversized_length_field_is_a_framing_error() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let profile = CompressionProfile::default();
    let codec = codec(1);
    let path = dir.path().join("corrupt.cbc");

    let mut source = DenseSource::new(descriptor.clone(), smooth_bytes(10, 4)).unwrap();
    let writer = ChunkStoreWriter::new(codec.clone(), profile.clone());
    let mut out = ContainerWriter::create(&path)
        .unwrap()
        .with_filters(Arc::new(filters_with(codec.clone())));
    out.create_dataset(DATASET, writer.dataset_spec(&source).unwrap())
        .unwrap();
    for linear in 0..3u64 {
        let raw = source.decompress_chunk(linear).unwrap();
        let mut block = codec.compress(&raw, 4, &profile).unwrap();
        if linear == 1 {
            block[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        }
        out.write_raw_chunk(DATASET, &[linear * 4], 0, &block).unwrap();
    }
    out.finish().unwrap();

    let mut container = open(&path, codec.clone());
    let mut reader = ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &descriptor).unwrap();
    assert!(reader.read_raw(0).is_ok());
    let err = reader.read_raw(1).unwrap_err();
    assert!(matches!(err, BridgeError::Framing { .. }), "got {err:?}");
    assert_eq!(err.chunk().map(|c| c.linear), Some(1));
}

#[test]
fn length_field_damaged_on_disk_is_a_framing_error() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let path = bridge_dense(
        dir.path(),
        "on_disk",
        &descriptor,
        smooth_bytes(10, 4),
        CompressionProfile::default(),
        codec(1),
    );

    let address = open(&path, codec(1))
        .dataset(DATASET)
        .unwrap()
        .chunk(&[4])
        .unwrap()
        .address as usize;
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[address + 12..address + 16].copy_from_slice(&100_000i32.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let codec = codec(1);
    let mut container = open(&path, codec.clone());
    let mut reader = ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &descriptor).unwrap();
    assert!(reader.read_raw(0).is_ok());
    match reader.read_raw(1) {
        Err(BridgeError::Framing { chunk, .. }) => assert_eq!(chunk.linear, 1),
        other => panic!("expected a framing failure, got {other:?}"),
    }
}

#[test]
fn linear_index_past_the_grid_is_rejected() {
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let grid = descriptor.grid().unwrap();
    assert!(matches!(
        grid.multi_index(3),
        Err(BridgeError::IndexOutOfRange { index: 3, total: 3 })
    ));
}

// ── dual-path equivalence ─────────────────────────────────────────────────

#[test]
fn padded_arrays_of_every_rank_and_width() {
    let dir = tempfile::tempdir().unwrap();
    let layouts: [(Vec<u64>, Vec<u64>, Vec<u64>); 3] = [
        (vec![1000], vec![96], vec![100]),
        (vec![37, 50], vec![10, 16], vec![12, 16]),
        (vec![9, 20, 17], vec![4, 8, 5], vec![5, 8, 8]),
    ];
    for (i, (shape, chunks, ext)) in layouts.into_iter().enumerate() {
        for itemsize in [1usize, 4, 8, 12] {
            let descriptor = ArrayDescriptor::new(shape.clone(), chunks.clone(), ext.clone(), itemsize).unwrap();
            let data = smooth_bytes(descriptor.logical_len(), itemsize);
            let path = bridge_dense(
                dir.path(),
                &format!("rank{i}_{itemsize}"),
                &descriptor,
                data,
                CompressionProfile::default(),
                codec(1),
            );
            let report = verify(&path, &descriptor, VerifyOptions::default());
            assert!(report.is_consistent(), "layout {i} itemsize {itemsize}");
            assert_eq!(report.elements_compared, descriptor.logical_len());

            let padded = verify(
                &path,
                &descriptor,
                VerifyOptions {
                    include_padding: true,
                    ..Default::default()
                },
            );
            assert!(padded.is_consistent());
            let grid = descriptor.grid().unwrap();
            assert_eq!(
                padded.elements_compared,
                grid.total_chunks() * grid.chunk_elem_count()
            );
        }
    }
}

#[test]
fn every_compressor_and_shuffle_setting() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::new(vec![70, 33], vec![16, 16], vec![16, 20], 4).unwrap();
    for compressor in Compressor::ALL {
        for shuffle in [false, true] {
            for level in [0u8, 1, 9] {
                let profile = CompressionProfile::default()
                    .compressor(compressor)
                    .shuffle(shuffle)
                    .level(level)
                    .blocksize(1024);
                let data = pseudo_random_bytes(descriptor.logical_len() as usize * 4, level as u64);
                let path = bridge_dense(
                    dir.path(),
                    &format!("{compressor}_{shuffle}_{level}"),
                    &descriptor,
                    data,
                    profile,
                    codec(3),
                );
                assert!(verify(&path, &descriptor, VerifyOptions::default()).is_consistent());
            }
        }
    }
}

#[test]
fn unpadded_dataset_reads_back_as_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![30, 21], vec![8, 8], 2).unwrap();
    let data = smooth_bytes(descriptor.logical_len(), 2);
    let path = bridge_dense(
        dir.path(),
        "unpadded",
        &descriptor,
        data.clone(),
        CompressionProfile::default().compressor(Compressor::Lz4),
        codec(1),
    );

    let mut container = open(&path, codec(1));
    let logical = Hyperslab::new(vec![0, 0], vec![1, 1], vec![30, 21], vec![1, 1]);
    assert_eq!(container.read_typed(DATASET, &logical).unwrap(), data);
    let values: Vec<i16> = container.read_typed_as(DATASET, &logical).unwrap();
    assert_eq!(values.len(), 630);
    assert_eq!(values[5], 1);
}

#[test]
fn blocks_do_not_depend_on_thread_count() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![256, 64], vec![128, 64], 8).unwrap();
    let data = smooth_bytes(descriptor.logical_len(), 8);
    let profile = CompressionProfile::default().blocksize(4096);
    let one = bridge_dense(dir.path(), "one", &descriptor, data.clone(), profile.clone(), codec(1));
    let many = bridge_dense(dir.path(), "many", &descriptor, data, profile, codec(4));

    let mut a = open(&one, codec(1));
    let mut b = open(&many, codec(1));
    for offset in [[0u64, 0], [128, 0]] {
        let ca = a.read_raw_chunk(DATASET, &offset).unwrap();
        let cb = b.read_raw_chunk(DATASET, &offset).unwrap();
        assert_eq!(ca.bytes, cb.bytes);
        assert_eq!(ca.bytes.len() % 64, 0);
        assert!(ca.bytes.len() as u64 >= ca.size);
    }
}

// ── failures ──────────────────────────────────────────────────────────────

#[test]
fn damaged_payload_fails_the_raw_read() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![64], vec![16], 4).unwrap();
    let path = bridge_dense(
        dir.path(),
        "damaged",
        &descriptor,
        smooth_bytes(64, 4),
        CompressionProfile::default(),
        codec(1),
    );

    let address = open(&path, codec(1))
        .dataset(DATASET)
        .unwrap()
        .chunk(&[32])
        .unwrap()
        .address;
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[address as usize + 20] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let codec = codec(1);
    let mut container = open(&path, codec.clone());
    let mut reader = ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &descriptor).unwrap();
    assert!(reader.read_raw(1).is_ok());
    match reader.read_raw(2) {
        Err(BridgeError::RawRead { chunk, source }) => {
            assert_eq!(chunk.linear, 2);
            assert!(matches!(source, FormatError::ChecksumMismatch { .. }));
        }
        other => panic!("expected a raw read failure, got {other:?}"),
    }
}

#[test]
fn absent_chunk_fails_the_raw_read() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![8], vec![4], 1).unwrap();
    let codec = codec(1);
    let profile = CompressionProfile::default();
    let path = dir.path().join("sparse.cbc");

    let source = DenseSource::new(descriptor.clone(), (1..=8).collect()).unwrap();
    let mut out = ContainerWriter::create(&path).unwrap();
    out.create_dataset(
        DATASET,
        ChunkStoreWriter::new(codec.clone(), profile.clone())
            .dataset_spec(&source)
            .unwrap(),
    )
    .unwrap();
    let block = codec.compress(&[1, 2, 3, 4], 1, &profile).unwrap();
    out.write_raw_chunk(DATASET, &[0], 0, &block).unwrap();
    out.finish().unwrap();

    let mut container = open(&path, codec.clone());
    assert_eq!(
        container.read_typed(DATASET, &Hyperslab::all(&[8])).unwrap(),
        vec![1, 2, 3, 4, 0, 0, 0, 0]
    );
    let mut reader = ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &descriptor).unwrap();
    assert!(matches!(
        reader.read_raw(1),
        Err(BridgeError::RawRead {
            source: FormatError::MissingChunk(_),
            ..
        })
    ));
}

#[test]
fn mismatched_layout_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::unpadded(vec![10], vec![4], 4).unwrap();
    let path = bridge_dense(
        dir.path(),
        "layout",
        &descriptor,
        smooth_bytes(10, 4),
        CompressionProfile::default(),
        codec(1),
    );
    let other = ArrayDescriptor::unpadded(vec![10], vec![5], 4).unwrap();
    let codec = codec(1);
    let mut container = open(&path, codec.clone());
    assert!(ChunkStoreReader::new(&mut container, codec.as_ref(), DATASET, &other).is_err());
}

// ── verifier reporting ────────────────────────────────────────────────────

/// Decodes like the real framed-block filter, then flips one byte.
struct Tampering {
    inner: BloscFilter,
    byte: usize,
}

impl Filter for Tampering {
    fn id(&self) -> u16 {
        FILTER_BLOSC2
    }

    fn name(&self) -> &'static str {
        "tampering"
    }

    fn encode(&self, data: &[u8], cd_values: &[u32], element_size: usize) -> Result<Vec<u8>, CodecError> {
        self.inner.encode(data, cd_values, element_size)
    }

    fn decode(
        &self,
        data: &[u8],
        cd_values: &[u32],
        element_size: usize,
        size_hint: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = self.inner.decode(data, cd_values, element_size, size_hint)?;
        out[self.byte] ^= 0x5a;
        Ok(out)
    }
}

fn tampered_report(
    path: &Path,
    descriptor: &ArrayDescriptor,
    byte: usize,
    options: VerifyOptions,
) -> VerificationReport {
    let codec = codec(1);
    let registry = FilterRegistry::new().with(Box::new(Tampering {
        inner: BloscFilter::new(codec.clone()),
        byte,
    }));
    let mut container = ContainerReader::open(path, Arc::new(registry)).unwrap();
    ConsistencyVerifier::new(options)
        .verify(&mut container, codec.as_ref(), DATASET, descriptor)
        .unwrap()
}

#[test]
fn verifier_collects_every_violation() {
    let dir = tempfile::tempdir().unwrap();
    // Six stored elements per chunk; the last two are always padding.
    let descriptor = ArrayDescriptor::new(vec![12], vec![4], vec![6], 4).unwrap();
    let path = bridge_dense(
        dir.path(),
        "tamper",
        &descriptor,
        smooth_bytes(12, 4),
        CompressionProfile::default(),
        codec(1),
    );

    let report = tampered_report(&path, &descriptor, 0, VerifyOptions::default());
    assert_eq!(report.violations.len(), 3);
    assert_eq!(report.chunks_checked, 3);
    for (i, v) in report.violations.iter().enumerate() {
        assert_eq!(v.chunk.linear, i as u64);
        assert_eq!(v.element, 0);
        assert_eq!(v.raw[0] ^ 0x5a, v.filtered[0]);
    }
    let first = report.violations[0].clone();
    match report.into_result() {
        Err(BridgeError::ConsistencyViolation { chunk, element }) => {
            assert_eq!(chunk, first.chunk);
            assert_eq!(element, 0);
        }
        other => panic!("expected a violation, got {other:?}"),
    }

    let fast = tampered_report(
        &path,
        &descriptor,
        0,
        VerifyOptions {
            fail_fast: true,
            ..Default::default()
        },
    );
    assert_eq!(fast.violations.len(), 1);
    assert_eq!(fast.chunks_checked, 1);
}

#[test]
fn padding_is_only_compared_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = ArrayDescriptor::new(vec![12], vec![4], vec![6], 4).unwrap();
    let path = bridge_dense(
        dir.path(),
        "padding",
        &descriptor,
        smooth_bytes(12, 4),
        CompressionProfile::default(),
        codec(1),
    );

    // Byte 23 belongs to element 5, a padding slot.
    let report = tampered_report(&path, &descriptor, 23, VerifyOptions::default());
    assert!(report.is_consistent());
    assert_eq!(report.elements_compared, 12);

    let padded = tampered_report(
        &path,
        &descriptor,
        23,
        VerifyOptions {
            include_padding: true,
            ..Default::default()
        },
    );
    assert_eq!(padded.violations.len(), 3);
    assert!(padded.violations.iter().all(|v| v.element == 5));
    assert_eq!(padded.elements_compared, 18);
}
