use crate::{
    utils::{dim_distinct, norm_type, rank_error, type_distinct},
    ConstPtr, Hardware, MutPtr, SchemeError, TensorLayout,
};
use digit_layout::DigitLayout;
use std::ptr::{null, null_mut};

pub struct Args<H: Hardware> {
    pub x_layout: TensorLayout,
    pub x_base: MutPtr<H>,
    pub residual_layout: TensorLayout,
    pub residual_base: MutPtr<H>,
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
        x_layout: TensorLayout,
        residual_layout: TensorLayout,
        w_layout: TensorLayout,
        epsilon: f32,
    ) -> Self {
        Self {
            x_layout,
            x_base: null_mut(),
            residual_layout,
            residual_base: null_mut(),
            w_layout,
            w_base: null(),
            epsilon,
        }
    }

    pub(super) fn meta(&self) -> Result<Meta, SchemeError> {
        let Self {
            x_layout: x,
            residual_layout: r,
            w_layout: w,
            ..
        } = self;

        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[nr, dr] = r.shape() else {
            return Err(rank_error("residual", 2, r.ndim()));
        };
        let &[dw] = w.shape() else {
            return Err(rank_error("w", 1, w.ndim()));
        };

        Ok(Meta {
            dt: norm_type(type_distinct(&[x.dt(), r.dt(), w.dt()])?)?,
            n: dim_distinct(&[nx, nr])?,
            d: dim_distinct(&[dx, dr, dw])?,
        })
    }
}
