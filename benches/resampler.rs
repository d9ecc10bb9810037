use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use g1_telemetry_bridge::audio::{LinearResampler, SampleRing};
use g1_telemetry_bridge::constants::RING_CAPACITY;

fn callback_buffer(frames: usize, channels: usize) -> Vec<f32> {
    (0..frames * channels)
        .map(|i| ((i / channels) as f32 * 0.05).sin() * 0.5)
        .collect()
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_process");

    for &(rate, channels) in [(48_000u32, 1u16), (48_000, 2), (44_100, 2)].iter() {
        let input = callback_buffer(512, channels as usize);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}hz_{}ch", rate, channels)),
            &input,
            |b, input| {
                let mut resampler = LinearResampler::new(rate, 16_000, channels, 1.0).unwrap();
                let (mut producer, mut consumer) = SampleRing::<RING_CAPACITY>::split();
                let mut sink = vec![0i16; RING_CAPACITY];

                b.iter(|| {
                    let written = resampler.process(black_box(input), &mut producer);
                    // Keep the ring from filling so every iteration does full work.
                    consumer.read(&mut sink[..written]);
                    written
                });
            },
        );
    }
    group.finish();
}

fn bench_packetize(c: &mut Criterion) {
    use g1_telemetry_bridge::audio::FramePacketizer;
    use g1_telemetry_bridge::constants::FRAME_SAMPLES;

    c.bench_function("packetize_frame", |b| {
        let (mut producer, consumer) = SampleRing::<RING_CAPACITY>::split();
        let mut packetizer = FramePacketizer::new(consumer, FRAME_SAMPLES).unwrap();

        b.iter(|| {
            for s in 0..FRAME_SAMPLES {
                producer.try_write(s as i16);
            }
            let mut bytes = 0;
            packetizer.drain(|packet| bytes += packet.len());
            black_box(bytes)
        });
    });
}

criterion_group!(benches, bench_process, bench_packetize);
criterion_main!(benches);
