use half::{bf16, f16};

/// 可以和 f32 双向转换的类型；
pub trait BetweenF32: Copy {
    /// 将 f32 转换为 Self；
    fn cast(f: f32) -> Self;
    /// 将 Self 转换为 f32；
    fn f32(&self) -> f32;
}

impl BetweenF32 for f32 {
    #[inline]
    fn cast(f: f32) -> Self {
        f
    }
    #[inline]
    fn f32(&self) -> f32 {
        *self
    }
}

impl BetweenF32 for f64 {
    #[inline]
    fn cast(f: f32) -> Self {
        f as _
    }
    #[inline]
    fn f32(&self) -> f32 {
        *self as _
    }
}

impl BetweenF32 for f16 {
    #[inline]
    fn cast(f: f32) -> Self {
        Self::from_f32(f)
    }
    #[inline]
    fn f32(&self) -> f32 {
        Self::to_f32(*self)
    }
}

impl BetweenF32 for bf16 {
    #[inline]
    fn cast(f: f32) -> Self {
        Self::from_f32(f)
    }
    #[inline]
    fn f32(&self) -> f32 {
        Self::to_f32(*self)
    }
}

#[test]
fn test_round_trip() {
    assert_eq!(f16::cast(1.5).f32(), 1.5);
    assert_eq!(bf16::cast(-2.).f32(), -2.);
    // f16 的尾数只有 10 位
    assert_eq!(f16::cast(1. + 1. / 4096.).f32(), 1.);
    assert!(bf16::cast(f32::NAN).f32().is_nan());
}
