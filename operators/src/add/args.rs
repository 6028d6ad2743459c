use crate::{
    rank_not_support, shape_mismatch, utils::type_distinct, ConstPtr, Hardware, MutPtr,
    SchemeError, TensorLayout,
};
use digit_layout::DigitLayout;
use std::ptr::{null, null_mut};

#[derive(Clone)]
pub struct Args<H: Hardware> {
    pub c_layout: TensorLayout,
    pub c_base: MutPtr<H>,
    pub a_layout: TensorLayout,
    pub a_base: ConstPtr<H>,
    pub b_layout: TensorLayout,
    pub b_base: ConstPtr<H>,
}

impl<H: Hardware> Args<H> {
    pub fn new_null(
        c_layout: TensorLayout,
        a_layout: TensorLayout,
        b_layout: TensorLayout,
    ) -> Self {
        Self {
            c_layout,
            c_base: null_mut(),
            a_layout,
            a_base: null(),
            b_layout,
            b_base: null(),
        }
    }
}

/// 逐元素执行方案。
///
/// 布局为 `[count, idx_strides.., c_strides.., a_strides.., b_strides..]`，
/// 长度为 1 的维度已被剔除。
#[derive(Clone, Debug)]
pub(super) struct Scheme(DigitLayout, Box<[isize]>);

impl Scheme {
    pub fn new<H: Hardware>(args: &Args<H>) -> Result<Self, SchemeError> {
        let Args {
            c_layout: c,
            a_layout: a,
            b_layout: b,
            ..
        } = args;

        let dt = type_distinct(&[c.dt(), a.dt(), b.dt()])?;
        if a.ndim() != c.ndim() || b.ndim() != c.ndim() {
            return Err(rank_not_support(format!(
                "c.ndim = {}, a.ndim = {}, b.ndim = {}",
                c.ndim(),
                a.ndim(),
                b.ndim(),
            )));
        }
        if a.shape() != c.shape() || b.shape() != c.shape() {
            return Err(shape_mismatch(format!(
                "c: {:?}, a: {:?}, b: {:?}",
                c.shape(),
                a.shape(),
                b.shape(),
            )));
        }

        let dims = (0..c.ndim())
            .filter(|&i| c.shape()[i] != 1)
            .collect::<Vec<_>>();
        let ndim = dims.len();

        let mut layout = vec![0isize; 1 + ndim * 4].into_boxed_slice();
        {
            let (idx, tail) = layout.split_at_mut(1 + ndim);
            let (c_, tail) = tail.split_at_mut(ndim);
            let (a_, b_) = tail.split_at_mut(ndim);
            for (k, &i) in dims.iter().enumerate() {
                idx[k] = c.shape()[i] as _;
                c_[k] = c.strides()[i];
                a_[k] = a.strides()[i];
                b_[k] = b.strides()[i];
            }
            // 后缀积：idx[k] 是第 k 维之后所有维度的元素数
            idx[ndim] = 1;
            for k in (1..=ndim).rev() {
                idx[k - 1] *= idx[k];
            }
        }
        Ok(Self(dt, layout))
    }

    #[inline]
    pub const fn dt(&self) -> DigitLayout {
        self.0
    }

    /// 执行方案维数。
    #[inline]
    pub fn ndim(&self) -> usize {
        (self.1.len() - 1) / 4
    }

    /// 读写单元数量。
    #[inline]
    pub fn count(&self) -> usize {
        self.1[0] as _
    }

    /// 索引步长。
    #[inline]
    pub fn idx_strides(&self) -> &[isize] {
        let ndim = self.ndim();
        &self.1[1..][..ndim]
    }

    #[inline]
    pub fn c_strides(&self) -> &[isize] {
        let ndim = self.ndim();
        &self.1[1 + ndim..][..ndim]
    }

    #[inline]
    pub fn a_strides(&self) -> &[isize] {
        let ndim = self.ndim();
        &self.1[1 + ndim * 2..][..ndim]
    }

    #[inline]
    pub fn b_strides(&self) -> &[isize] {
        let ndim = self.ndim();
        &self.1[1 + ndim * 3..][..ndim]
    }
}
