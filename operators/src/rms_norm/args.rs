use crate::{
    utils::{dim_distinct, norm_type, rank_error, type_distinct},
    ConstPtr, Hardware, MutPtr, SchemeError, TensorLayout,
};
use digit_layout::DigitLayout;
use std::ptr::{null, null_mut};

pub struct Args<H: Hardware> {
    pub y_layout: TensorLayout,
    pub y_base: MutPtr<H>,
    pub x_layout: TensorLayout,
    pub x_base: ConstPtr<H>,
    pub w_layout: TensorLayout,
    pub w_base: ConstPtr<H>,
    pub epsilon: f32,
}

pub(super) struct Meta {
    pub dt: DigitLayout,
    pub n: usize,
    pub d: usize,
}

impl<H: Hardware> Args<H> {
    pub fn new_null(
        y_layout: TensorLayout,
        x_layout: TensorLayout,
        w_layout: TensorLayout,
        epsilon: f32,
    ) -> Self {
        Self {
            y_layout,
            y_base: null_mut(),
            x_layout,
            x_base: null(),
            w_layout,
            w_base: null(),
            epsilon,
        }
    }

    pub(super) fn meta(&self) -> Result<Meta, SchemeError> {
        let Self {
            y_layout: y,
            x_layout: x,
            w_layout: w,
            ..
        } = self;

        let &[ny, dy] = y.shape() else {
            return Err(rank_error("y", 2, y.ndim()));
        };
        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[dw] = w.shape() else {
            return Err(rank_error("w", 1, w.ndim()));
        };

        Ok(Meta {
            dt: norm_type(type_distinct(&[y.dt(), x.dt(), w.dt()])?)?,
            n: dim_distinct(&[ny, nx])?,
            d: dim_distinct(&[dy, dx, dw])?,
        })
    }
}
