//! Benchmarks for fMP4 parsing
//!
//! Measures init segment parsing, media segment demuxing, and manifest
//! parsing on generated CMAF content.

use bytes::Bytes;
use cmafplay_media::fmp4::{FragmentBuilder, InitSegmentBuilder, TrackFragment};
use cmafplay_media::hls::MediaPlaylist;
use cmafplay_media::{hls, mp4, Demuxer};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use url::Url;

fn init_segment() -> Bytes {
    InitSegmentBuilder::new()
        .audio(2, 44_100, 2, vec![0x12, 0x10])
        .build()
}

/// One segment with `frames` video samples and matching AAC frames.
fn media_segment(frames: u32) -> Bytes {
    let mut video = TrackFragment::new(1, 0);
    for i in 0..frames {
        video = video.sample(vec![0u8; 2048], 3000, i == 0);
    }
    let audio_frames = frames * 3000 * 44_100 / 90_000 / 1024;
    let mut audio = TrackFragment::new(2, 0);
    for _ in 0..audio_frames {
        audio = audio.sample(vec![0u8; 256], 1024, true);
    }
    FragmentBuilder::new(1).track(video).track(audio).build()
}

fn bench_init_parsing(c: &mut Criterion) {
    let init = init_segment();
    c.bench_function("parse_init_segment", |b| {
        b.iter(|| mp4::parse_init_segment(black_box(&init)))
    });
}

fn bench_media_parsing(c: &mut Criterion) {
    let init = init_segment();
    let mut group = c.benchmark_group("parse_media_segment");

    for frames in [30u32, 120, 600] {
        let segment = media_segment(frames);
        group.throughput(Throughput::Bytes(segment.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &segment, |b, segment| {
            let mut demuxer = Demuxer::new();
            demuxer.parse_init(&init).unwrap();
            b.iter(|| demuxer.parse_media(black_box(segment), None))
        });
    }

    group.finish();
}

fn bench_hls_parsing(c: &mut Criterion) {
    let base = Url::parse("http://localhost:8081/media.m3u8").unwrap();
    let mut group = c.benchmark_group("parse_hls");

    for segments in [10usize, 1000] {
        let mut playlist = MediaPlaylist::vod();
        playlist.init_uri = Some("init.mp4".to_string());
        for i in 0..segments {
            playlist.push_segment(format!("seg{}.m4s", i + 1), 2.0);
        }
        let text = playlist.render();

        group.bench_with_input(BenchmarkId::from_parameter(segments), &text, |b, text| {
            b.iter(|| hls::parse(black_box(text), &base))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_init_parsing,
    bench_media_parsing,
    bench_hls_parsing
);
criterion_main!(benches);
