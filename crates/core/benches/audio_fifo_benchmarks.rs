use criterion::{black_box, criterion_group, criterion_main, Criterion};

use avflow::audio_fifo::AudioFifo;

fn bench_write_read(c: &mut Criterion) {
    c.bench_function("audio_fifo_write_read_1024_samples", |bencher| {
        bencher.iter(|| {
            let mut fifo = AudioFifo::new(
                ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
                2,
                4096,
            )
            .unwrap();
            let input = vec![0u8; 1024 * 2 * 2];
            fifo.write(&[black_box(&input)], 1024).unwrap();
            let mut output = vec![0u8; 1024 * 2 * 2];
            fifo.read(&mut [black_box(&mut output)], 1024).unwrap();
        })
    });
}

criterion_group!(benches, bench_write_read);
criterion_main!(benches);
