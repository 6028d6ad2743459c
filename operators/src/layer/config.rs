use super::Dispatch;
use digit_layout::DigitLayout;

/// 默认的 ε。
pub const DEFAULT_EPSILON: f32 = 1e-6;

/// 构造 [`RmsNorm`](super::RmsNorm) 所需的参数。
#[derive(Clone, Debug)]
pub struct Config {
    /// 权重和激活的存储精度。
    pub dt: DigitLayout,
    /// 归一化维度，即权重长度。
    pub hidden_size: usize,
    pub epsilon: f32,
    pub dispatch: Dispatch,
}

impl Config {
    pub fn new(dt: DigitLayout, hidden_size: usize) -> Self {
        Self {
            dt,
            hidden_size,
            epsilon: DEFAULT_EPSILON,
            dispatch: Dispatch::default(),
        }
    }

    #[inline]
    pub fn with_epsilon(self, epsilon: f32) -> Self {
        Self { epsilon, ..self }
    }

    #[inline]
    pub fn with_dispatch(self, dispatch: Dispatch) -> Self {
        Self { dispatch, ..self }
    }
}
