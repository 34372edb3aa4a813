//! Lychee 播放引擎性能基准测试.
//!
//! 覆盖数据包队列, 帧队列, 带同步补偿的音频重采样等热点路径.

use std::sync::Arc;
use std::thread;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lychee::codec::{AudioFrame, Frame, Packet};
use lychee::core::{ChannelLayout, SampleFormat};
use lychee::player::DecodedFrame;
use lychee::player::frame_queue::FrameQueue;
use lychee::player::packet_queue::PacketQueue;
use lychee::resample::{AudioParams, ResampleContext};

fn make_packet(pts: i64) -> Packet {
    let mut pkt = Packet::from_data(vec![0u8; 512]);
    pkt.pts = pts;
    pkt.dts = pts;
    pkt.duration = 1;
    pkt
}

fn bench_packet_queue(c: &mut Criterion) {
    c.bench_function("packet_queue_put_get_256", |b| {
        let queue = PacketQueue::new();
        queue.start();
        let packets: Vec<Packet> = (0..256).map(make_packet).collect();
        b.iter(|| {
            for pkt in &packets {
                queue.put(pkt.clone()).unwrap();
            }
            while let Some(entry) = queue.get(false) {
                black_box(entry);
            }
        });
    });
}

fn bench_packet_queue_threaded(c: &mut Criterion) {
    c.bench_function("packet_queue_producer_consumer_1024", |b| {
        b.iter(|| {
            let queue = Arc::new(PacketQueue::new());
            queue.start();
            let producer = {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for pts in 0..1024 {
                        queue.put(make_packet(pts)).unwrap();
                    }
                })
            };
            // 启动时放入的刷新标记也算一项
            let mut received = 0;
            while received < 1025 {
                if queue.get(true).is_some() {
                    received += 1;
                }
            }
            producer.join().unwrap();
        });
    });
}

fn bench_frame_queue(c: &mut Criterion) {
    c.bench_function("frame_queue_push_next_16", |b| {
        let packets = Arc::new(PacketQueue::new());
        packets.start();
        let queue = FrameQueue::new(Arc::clone(&packets), 16, false);
        b.iter(|| {
            for i in 0..16 {
                let frame = Frame::Audio(AudioFrame::new(
                    1024,
                    48000,
                    SampleFormat::S16,
                    ChannelLayout::STEREO,
                ));
                let pts = f64::from(i) * 1024.0 / 48000.0;
                queue
                    .push(DecodedFrame::new(frame, pts, 1024.0 / 48000.0, -1, 1))
                    .unwrap();
            }
            while queue.nb_remaining() > 0 {
                black_box(queue.peek());
                queue.next();
            }
        });
    });
}

fn bench_resample_compensation(c: &mut Criterion) {
    c.bench_function("resample_compensation_1024_f32p_44100_to_s16_48000", |b| {
        let nb_samples = 1024u32;
        let input: Vec<u8> = (0..nb_samples * 2)
            .flat_map(|i| ((i % 256) as f32 / 256.0 - 0.5).to_le_bytes())
            .collect();
        let ctx = ResampleContext::new(
            AudioParams {
                sample_rate: 44100,
                sample_format: SampleFormat::F32,
                channel_layout: ChannelLayout::STEREO,
            },
            AudioParams {
                sample_rate: 48000,
                sample_format: SampleFormat::S16,
                channel_layout: ChannelLayout::STEREO,
            },
        )
        .unwrap();

        b.iter(|| {
            let (out, nb) = ctx
                .convert_with_compensation(black_box(&input), nb_samples, nb_samples + 10)
                .unwrap();
            black_box((out, nb));
        });
    });
}

criterion_group!(
    benches,
    bench_packet_queue,
    bench_packet_queue_threaded,
    bench_frame_queue,
    bench_resample_compensation,
);
criterion_main!(benches);
