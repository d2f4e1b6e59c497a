use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dasp_graph::Buffer;

use kilobeat::nodes::GeneratorUnit;
use kilobeat::program::Bindings;
use kilobeat::{ParticipantId, Pose, Router};

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("GeneratorUnit.render() sine", |b| {
        let mut unit = GeneratorUnit::compile("sin(2*pi*440*t)", &Bindings::new(), 0.0).unwrap();
        let bus = vec![Buffer::SILENT; 8];
        let mut out = Buffer::SILENT;

        b.iter(|| unit.render(48_000, black_box(&bus), &mut out))
    });

    c.bench_function("GeneratorUnit.render() feedback", |b| {
        let mut bindings = Bindings::new();
        bindings.bind("me", kilobeat::Channel::new(0).unwrap());
        let mut unit = GeneratorUnit::compile(
            "x = x + 1, tanh(me * 0.9 + sin[0](2*pi*220*dt) * 0.1 + sin[1](x % 3))",
            &bindings,
            0.0,
        )
        .unwrap();
        let bus = vec![Buffer::SILENT; 8];
        let mut out = Buffer::SILENT;

        b.iter(|| unit.render(48_000, black_box(&bus), &mut out))
    });

    c.bench_function("Router.process() 8 voices", |b| {
        let mut router = Router::new(48_000);
        for n in 0..8 {
            let id = ParticipantId(n);
            router.add_voice(id, Pose { x: n as f64 / 8.0, y: 0.0, angle: 0.0 });
            let code = format!("sin(2*pi*{}*t) * 0.1 + p0 * 0.01", 110 * (n + 1));
            let unit = GeneratorUnit::compile(&code, &router.bindings_for(id), 0.0).unwrap();
            router.attach(id, unit);
        }

        b.iter(|| router.process())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
