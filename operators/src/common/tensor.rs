use digit_layout::DigitLayout;
use ndarray_layout::{ArrayLayout, Endian::BigEndian};

/// 张量的数据类型和存储布局，步长以字节为单位。
#[derive(Clone)]
pub struct TensorLayout {
    pub dt: DigitLayout,
    pub layout: ArrayLayout<4>,
}

impl TensorLayout {
    pub fn new(dt: DigitLayout, shape: &[usize], strides: &[isize]) -> Self {
        Self {
            dt,
            layout: ArrayLayout::new(shape, strides, 0),
        }
    }

    pub fn new_contiguous(dt: DigitLayout, shape: &[usize]) -> Self {
        Self {
            dt,
            layout: ArrayLayout::new_contiguous(shape, BigEndian, dt.nbytes()),
        }
    }

    #[inline]
    pub const fn dt(&self) -> DigitLayout {
        self.dt
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// 元素总数。
    #[inline]
    pub fn count(&self) -> usize {
        self.shape().iter().product()
    }
}

impl std::fmt::Debug for TensorLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{:?}/{:?}", self.dt, self.shape(), self.strides())
    }
}
