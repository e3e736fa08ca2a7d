use captcha_mill::{Captcha, Settings, DEFAULT_FONTS};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_generate(c: &mut Criterion) {
    let settings = Settings::builder()
        .width(240)
        .height(80)
        .fonts(vec![DEFAULT_FONTS[0]])
        .max_noise(10)
        .pool_size(1)
        .build()
        .unwrap();
    let mut captcha = Captcha::new(settings).unwrap();

    c.bench_function("generate 240x80", |b| {
        b.iter(|| captcha.generate().unwrap())
    });

    let noisy = Settings::builder()
        .width(240)
        .height(80)
        .fonts(vec![DEFAULT_FONTS[0]])
        .max_noise(50)
        .pool_size(1)
        .build()
        .unwrap();
    let mut noisy_captcha = Captcha::new(noisy).unwrap();

    c.bench_function("generate 240x80 max_noise=50", |b| {
        b.iter(|| noisy_captcha.generate().unwrap())
    });
}

criterion_group!(benches, bench_generate);
criterion_main!(benches);
