//! Benchmarks for the live path.
//!
//! Measures fragment ingest, playlist building and fragment lookup under
//! the default buffer configuration.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use liverelay_media::{BoxSplitter, FragmentBuffer, LivePlaylist, PlaylistOptions};

fn filled_buffer(fragments: u64, size: usize) -> FragmentBuffer {
    let buffer = FragmentBuffer::default();
    buffer.set_enabled(true);
    buffer.on_init_segment(Bytes::from_static(b"init"));
    let payload = Bytes::from(vec![0u8; size]);
    for seq in 1..=fragments {
        buffer.on_fragment_complete(seq, payload.clone());
    }
    buffer
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_ingest");

    for size in [64 * 1024, 512 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("on_fragment_complete_{}", size), |b| {
            let buffer = filled_buffer(0, size);
            let payload = Bytes::from(vec![0u8; size]);
            let mut seq = 0u64;
            b.iter(|| {
                seq += 1;
                black_box(buffer.on_fragment_complete(seq, payload.clone()))
            });
        });
    }

    group.finish();
}

fn bench_playlist(c: &mut Criterion) {
    let buffer = filled_buffer(100, 1024);
    let options = PlaylistOptions::default();

    c.bench_function("playlist_build_render", |b| {
        b.iter(|| {
            let snapshot = buffer.snapshot();
            let playlist = LivePlaylist::build(&snapshot, &options).unwrap();
            black_box(playlist.render())
        });
    });
}

fn bench_lookup(c: &mut Criterion) {
    let buffer = filled_buffer(100, 1024);

    c.bench_function("fragment_lookup_hit", |b| {
        b.iter(|| black_box(buffer.get_fragment(black_box(95))));
    });
    c.bench_function("fragment_lookup_stale", |b| {
        b.iter(|| black_box(buffer.get_fragment(black_box(10))));
    });
}

fn make_box(box_type: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(box_type);
    out.extend_from_slice(body);
    out
}

fn bench_splitter(c: &mut Criterion) {
    let mut stream = make_box(b"ftyp", b"isom\0\0\0\0");
    stream.extend(make_box(b"moov", &[0u8; 512]));
    for seq in 1..=30u32 {
        let mut mfhd = vec![0u8; 4];
        mfhd.extend_from_slice(&seq.to_be_bytes());
        stream.extend(make_box(b"moof", &make_box(b"mfhd", &mfhd)));
        stream.extend(make_box(b"mdat", &[0u8; 64 * 1024]));
    }

    let mut group = c.benchmark_group("box_splitter");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("split_64k_chunks", |b| {
        b.iter(|| {
            let mut splitter = BoxSplitter::default();
            let mut events = 0;
            for chunk in stream.chunks(64 * 1024) {
                events += splitter.push(chunk).unwrap().len();
            }
            black_box(events)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_ingest, bench_playlist, bench_lookup, bench_splitter);
criterion_main!(benches);
