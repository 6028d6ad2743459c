use super::{Config, Dispatch, Output, Path, RmsNorm};
use crate::{test_utils::ErrorCollector, LaunchErrorKind, Tensor};
use digit_layout::{
    types::{BF16, F16, F32, F64},
    DigitLayout,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random(rng: &mut StdRng, len: usize, lo: f32, hi: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(lo..hi)).collect()
}

fn layer(dt: DigitLayout, hidden_size: usize, seed: u64) -> RmsNorm {
    let mut layer = RmsNorm::new(Config::new(dt, hidden_size)).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    layer
        .load_weights(&random(&mut rng, hidden_size, 0.5, 1.5))
        .unwrap();
    layer
}

fn assert_close(a: &Tensor, b: &Tensor, rel: f64) {
    assert_eq!(a.shape(), b.shape());
    let mut ec = ErrorCollector::new(1e-6, rel);
    ec.compare(&a.to_f32(), &b.to_f32());
    println!("{ec}");
    assert_eq!(ec.summary().0, 0);
}

#[test]
fn test_new() {
    let layer = RmsNorm::new(Config::new(F16, 8)).unwrap();
    assert_eq!(layer.hidden_size(), 8);
    assert_eq!(layer.epsilon(), 1e-6);
    assert_eq!(layer.dt(), F16);
    assert_eq!(layer.weight().to_f32(), vec![1.; 8]);
    assert!(matches!(layer.dispatch(), Dispatch::SeqLen { threshold: 1 }));

    let e = RmsNorm::new(Config::new(F16, 0)).err().unwrap();
    assert_eq!(e.kind, LaunchErrorKind::ShapeNotSupport);
    let e = RmsNorm::new(Config::new(F64, 8)).err().unwrap();
    assert_eq!(e.kind, LaunchErrorKind::TypeNotSupport);
}

#[test]
fn test_decode_scenario() {
    let layer = RmsNorm::new(Config::new(F32, 4)).unwrap();
    let x = Tensor::from_f32(F32, &[1, 1, 4], &[1., 2., 3., 4.]).unwrap();
    assert_eq!(layer.dispatch().select(x.shape()), Path::Reference);

    let Output::Value(y) = layer.forward(x, None).unwrap() else {
        panic!("no residual was given")
    };
    assert_eq!(y.shape(), &[1, 1, 4]);
    let expected = [0.3651, 0.7303, 1.0954, 1.4606];
    for (y, e) in y.to_f32().into_iter().zip(expected) {
        assert!((y - e).abs() < 1e-4, "{y} vs {e}")
    }
}

#[test]
fn test_prefill_scenario() {
    let layer = RmsNorm::new(Config::new(F32, 4)).unwrap();
    let x = Tensor::from_f32(F32, &[1, 2, 4], &[1., 2., 3., 4., -2., 0., 2., 4.]).unwrap();
    assert_eq!(layer.dispatch().select(x.shape()), Path::Fused);

    let (y, residual) = layer.forward(x, None).unwrap().into_parts();
    assert!(residual.is_none());
    let y = y.to_f32();
    for (row, y) in [[1.0f32, 2., 3., 4.], [-2., 0., 2., 4.]]
        .iter()
        .zip(y.chunks(4))
    {
        let k = (row.iter().map(|x| x * x).sum::<f32>() / 4. + 1e-6)
            .sqrt()
            .recip();
        for (x, y) in row.iter().zip(y) {
            assert!((x * k - y).abs() < 1e-5, "{} vs {y}", x * k)
        }
    }
}

#[test]
fn test_paths_agree() {
    let mut rng = StdRng::seed_from_u64(7);
    for (i, dt) in [F16, BF16, F32].into_iter().enumerate() {
        for shape in [[2, 3, 64], [1, 1, 4096], [4, 5, 17]] {
            let d = shape[2];
            let len = shape.iter().product();
            let layer = layer(dt, d, i as _);
            let x = Tensor::from_f32(dt, &shape, &random(&mut rng, len, -4., 4.)).unwrap();
            let r = Tensor::from_f32(dt, &shape, &random(&mut rng, len, -4., 4.)).unwrap();

            let reference = layer.forward_reference(&x, None).unwrap();
            let fused = layer.forward_fused(x.clone(), None).unwrap();
            assert_close(reference.y(), fused.y(), 1e-2);

            let reference = layer.forward_reference(&x, Some(&r)).unwrap();
            let fused = layer.forward_fused(x, Some(r)).unwrap();
            assert_close(reference.y(), fused.y(), 1e-2);
            assert_close(
                reference.residual().unwrap(),
                fused.residual().unwrap(),
                1e-2,
            );
        }
    }
}

#[test]
fn test_reference_keeps_inputs() {
    let layer = layer(F16, 8, 1);
    let data = (0..16).map(|i| i as f32 - 8.).collect::<Vec<_>>();
    let x = Tensor::from_f32(F16, &[2, 8], &data).unwrap();
    let r = Tensor::from_f32(F16, &[2, 8], &[0.5; 16]).unwrap();

    let out = layer.forward_reference(&x, Some(&r)).unwrap();
    assert_eq!(x.to_f32(), data);
    assert_eq!(r.to_f32(), vec![0.5; 16]);
    let sum = data.iter().map(|x| x + 0.5).collect::<Vec<_>>();
    assert_eq!(out.residual().unwrap().to_f32(), sum);
}

#[test]
fn test_fused_in_place() {
    let layer = layer(BF16, 16, 2);
    let mut rng = StdRng::seed_from_u64(3);
    let x = Tensor::from_f32(BF16, &[1, 3, 16], &random(&mut rng, 48, -1., 1.)).unwrap();
    let r = Tensor::from_f32(BF16, &[1, 3, 16], &random(&mut rng, 48, -1., 1.)).unwrap();
    let (x_ptr, r_ptr) = (x.base(), r.base());

    let Output::WithResidual { y, residual } = layer.forward(x, Some(r)).unwrap() else {
        panic!("residual was given")
    };
    assert_eq!(y.base(), x_ptr);
    assert_eq!(residual.base(), r_ptr);

    // 无残差时输出是新张量
    let x = Tensor::from_f32(BF16, &[1, 3, 16], &random(&mut rng, 48, -1., 1.)).unwrap();
    let x_ptr = x.base();
    let out = layer.forward_fused(x, None).unwrap();
    assert_ne!(out.y().base(), x_ptr);
}

#[test]
fn test_scale_invariance() {
    let layer = layer(F32, 32, 4);
    let mut rng = StdRng::seed_from_u64(5);
    let data = random(&mut rng, 3 * 32, -1., 1.);
    let x = Tensor::from_f32(F32, &[3, 32], &data).unwrap();
    let base = layer.forward_reference(&x, None).unwrap();

    for c in [0.5f32, 3., 100.] {
        let scaled = data.iter().map(|x| x * c).collect::<Vec<_>>();
        let x = Tensor::from_f32(F32, &[3, 32], &scaled).unwrap();
        for path in [Path::Reference, Path::Fused] {
            let out = match path {
                Path::Reference => layer.forward_reference(&x, None),
                Path::Fused => layer.forward_fused(x.clone(), None),
            }
            .unwrap();
            assert_close(base.y(), out.y(), 1e-4);
        }
    }
}

#[test]
fn test_unit_rms() {
    let layer = RmsNorm::new(Config::new(F32, 64).with_epsilon(0.)).unwrap();
    let mut rng = StdRng::seed_from_u64(6);
    let x = Tensor::from_f32(F32, &[2, 4, 64], &random(&mut rng, 512, -3., 3.)).unwrap();
    for out in [
        layer.forward_reference(&x, None).unwrap(),
        layer.forward_fused(x.clone(), None).unwrap(),
    ] {
        for row in out.y().to_f32().chunks(64) {
            let rms = (row.iter().map(|x| x * x).sum::<f32>() / 64.).sqrt();
            assert!((rms - 1.).abs() < 1e-5, "rms = {rms}")
        }
    }
}

#[test]
fn test_residual_chaining() {
    let mut rng = StdRng::seed_from_u64(8);
    let x0 = random(&mut rng, 2 * 8, -1., 1.);
    let r0 = random(&mut rng, 2 * 8, -1., 1.);
    let x1 = random(&mut rng, 2 * 8, -1., 1.);
    let expected = (0..16).map(|i| x1[i] + (x0[i] + r0[i])).collect::<Vec<_>>();

    for path in [Path::Reference, Path::Fused] {
        let config = Config::new(F32, 8).with_dispatch(Dispatch::Always(path));
        let layer = RmsNorm::new(config).unwrap();
        let tensor = |data: &[f32]| Tensor::from_f32(F32, &[1, 2, 8], data).unwrap();

        let (_, acc) = layer
            .forward(tensor(&x0), Some(tensor(&r0)))
            .unwrap()
            .into_parts();
        let (_, acc) = layer.forward(tensor(&x1), acc).unwrap().into_parts();
        let acc = acc.unwrap().to_f32();
        for (a, e) in acc.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-6, "{path:?}: {a} vs {e}")
        }
    }
}

#[test]
fn test_shape_mismatch() {
    let layer = RmsNorm::new(Config::new(F16, 4)).unwrap();
    let wide = Tensor::new(F16, &[1, 2, 5]).unwrap();
    let x = Tensor::new(F16, &[1, 2, 4]).unwrap();

    let e = layer.forward_reference(&wide, None).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);
    let e = layer.forward_fused(wide.clone(), None).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);

    // 残差形状或类型与 x 不同
    let r = Tensor::new(F16, &[2, 1, 4]).unwrap();
    let e = layer.forward_reference(&x, Some(&r)).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);
    let e = layer.forward_fused(x.clone(), Some(r)).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);

    let r = Tensor::new(F32, &[1, 2, 4]).unwrap();
    let e = layer.forward_reference(&x, Some(&r)).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);
    let e = layer.forward(x, Some(r)).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);

    let x = Tensor::new(F32, &[1, 2, 4]).unwrap();
    let e = layer.forward(x, None).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::TypeMismatch);

    let x = Tensor::new(F16, &[4]).unwrap();
    let e = layer.forward(x, None).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::RankNotSupport);
}

#[test]
fn test_nan_propagation() {
    let layer = RmsNorm::new(Config::new(F16, 4)).unwrap();
    let data = [1., f32::NAN, 3., 4., 1., 2., 3., 4.];
    let x = Tensor::from_f32(F16, &[2, 4], &data).unwrap();
    for out in [
        layer.forward_reference(&x, None).unwrap(),
        layer.forward_fused(x.clone(), None).unwrap(),
    ] {
        let y = out.y().to_f32();
        assert!(y[..4].iter().all(|y| y.is_nan()));
        assert!(y[4..].iter().all(|y| y.is_finite()));
    }
}

#[test]
fn test_load_weights() {
    let mut layer = RmsNorm::new(Config::new(F32, 4)).unwrap();
    let e = layer.load_weights(&[2.0f32; 3]).unwrap_err();
    assert_eq!(e.kind, LaunchErrorKind::ShapeMismatch);

    layer.load_weights(&[2.0f64; 4]).unwrap();
    assert_eq!(layer.weight().to_f32(), vec![2.; 4]);

    let x = Tensor::from_f32(F32, &[1, 1, 4], &[1., 2., 3., 4.]).unwrap();
    let y = layer.forward(x, None).unwrap().into_parts().0.to_f32();
    let expected = [0.7303, 1.4606, 2.1909, 2.9212];
    for (y, e) in y.into_iter().zip(expected) {
        assert!((y - e).abs() < 1e-3, "{y} vs {e}")
    }
}

#[test]
fn test_concurrent_calls() {
    fn assert_sync<T: Send + Sync>(_: &T) {}

    let layer = layer(F16, 128, 9);
    assert_sync(&layer);

    let mut rng = StdRng::seed_from_u64(10);
    let inputs = (0..4)
        .map(|_| random(&mut rng, 2 * 128, -2., 2.))
        .collect::<Vec<_>>();
    let expected = inputs
        .iter()
        .map(|data| {
            let x = Tensor::from_f32(F16, &[1, 2, 128], data).unwrap();
            layer.forward_reference(&x, None).unwrap().into_parts().0
        })
        .collect::<Vec<_>>();

    std::thread::scope(|s| {
        let handles = inputs
            .iter()
            .map(|data| {
                let layer = &layer;
                s.spawn(move || {
                    let x = Tensor::from_f32(F16, &[1, 2, 128], data).unwrap();
                    layer.forward(x, None).unwrap().into_parts().0
                })
            })
            .collect::<Vec<_>>();
        for (handle, expected) in handles.into_iter().zip(&expected) {
            assert_close(expected, &handle.join().unwrap(), 1e-2);
        }
    });
}
