//! 均方根归一化层。
//!
//! ```text
//! residual' = x + residual            (有残差时)
//! y         = w · x / √(mean(x²) + ε)
//! ```
//!
//! 方差总以 f32 计算，归一化结果先舍入回存储精度再乘权重。

mod config;
mod dispatch;

pub use config::{Config, DEFAULT_EPSILON};
pub use dispatch::{seq_len, Dispatch, Path, PATH_ENV};

use crate::{
    add,
    common_cpu::{Cpu, ThisThread},
    fused_add_rms_norm, rank_not_support, rms_norm, shape_mismatch, shape_not_support,
    type_mismatch,
    utils::norm_type,
    BetweenF32, LaunchError, Operator, Tensor, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};
use log::{info, trace};
use std::{iter::zip, ops::Mul};

/// 层的输出。
#[derive(Debug)]
pub enum Output {
    /// 没有残差时只有归一化结果。
    Value(Tensor),
    /// 有残差时同时返回归一化结果和累加后的残差，后者作为下一层的残差输入。
    WithResidual { y: Tensor, residual: Tensor },
}

impl Output {
    #[inline]
    pub fn y(&self) -> &Tensor {
        match self {
            Self::Value(y) | Self::WithResidual { y, .. } => y,
        }
    }

    #[inline]
    pub fn residual(&self) -> Option<&Tensor> {
        match self {
            Self::Value(_) => None,
            Self::WithResidual { residual, .. } => Some(residual),
        }
    }

    #[inline]
    pub fn into_parts(self) -> (Tensor, Option<Tensor>) {
        match self {
            Self::Value(y) => (y, None),
            Self::WithResidual { y, residual } => (y, Some(residual)),
        }
    }
}

pub struct RmsNorm {
    weight: Tensor,
    epsilon: f32,
    dispatch: Dispatch,
    add: add::common_cpu::Operator,
    norm: rms_norm::common_cpu::Operator,
    fused: fused_add_rms_norm::common_cpu::Operator,
}

impl RmsNorm {
    /// 创建权重全为 1 的层。
    pub fn new(config: Config) -> Result<Self, LaunchError> {
        let Config {
            dt,
            hidden_size,
            epsilon,
            dispatch,
        } = config;
        if hidden_size == 0 {
            return Err(shape_not_support("hidden size must be positive"));
        }
        let dt = norm_type(dt)?;
        let weight = Tensor::from_f32(dt, &[hidden_size], &vec![1.; hidden_size])?;

        let mut norm = rms_norm::common_cpu::Operator::new(&Cpu);
        let mut fused = fused_add_rms_norm::common_cpu::Operator::new(&Cpu);
        let row = TensorLayout::new_contiguous(dt, &[1, hidden_size]);
        let w = weight.layout().clone();
        norm.scheme(
            &rms_norm::Args::new_null(row.clone(), row.clone(), w.clone(), epsilon),
            0,
        )?;
        fused.scheme(
            &fused_add_rms_norm::Args::new_null(row.clone(), row, w, epsilon),
            0,
        )?;

        Ok(Self {
            weight,
            epsilon,
            dispatch,
            add: add::common_cpu::Operator::new(&Cpu),
            norm,
            fused,
        })
    }

    #[inline]
    pub fn hidden_size(&self) -> usize {
        self.weight.shape()[0]
    }

    #[inline]
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.weight.dt()
    }

    #[inline]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[inline]
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// 覆盖权重，数值按存储精度舍入。
    ///
    /// 只能在加载阶段调用，不得与 [`forward`](Self::forward) 并发。
    pub fn load_weights<T: BetweenF32>(&mut self, values: &[T]) -> Result<(), LaunchError> {
        let values = values.iter().map(T::f32).collect::<Vec<_>>();
        self.weight.store_f32(&values)?;
        info!("load rms norm weight: {} x {}", self.dt(), values.len());
        Ok(())
    }

    /// 按 [`Dispatch`] 选择路径计算。
    pub fn forward(&self, x: Tensor, residual: Option<Tensor>) -> Result<Output, LaunchError> {
        let path = self.dispatch.select(x.shape());
        trace!(
            "rms norm {:?} residual: {} -> {path:?}",
            x.shape(),
            residual.is_some()
        );
        match path {
            Path::Reference => self.forward_reference(&x, residual.as_ref()),
            Path::Fused => self.forward_fused(x, residual),
        }
    }

    /// 参考路径，不改写输入，结果写入新分配的张量。
    pub fn forward_reference(
        &self,
        x: &Tensor,
        residual: Option<&Tensor>,
    ) -> Result<Output, LaunchError> {
        self.check(x, residual)?;

        let sum = residual.map(|r| self.add(x, r)).transpose()?;
        let src = sum.as_ref().unwrap_or(x);

        let mut y = src.empty_like();
        macro_rules! normalize {
            ($ty:ty) => {
                normalize::<$ty>(
                    y.as_slice_mut(),
                    src.as_slice(),
                    self.weight.as_slice(),
                    self.epsilon,
                )
            };
        }
        match self.dt() {
            ty::F16 => normalize!(f16),
            ty::BF16 => normalize!(bf16),
            ty::F32 => normalize!(f32),
            _ => unreachable!(),
        }

        Ok(match sum {
            Some(residual) => Output::WithResidual { y, residual },
            None => Output::Value(y),
        })
    }

    /// 融合路径。
    ///
    /// 有残差时 `x` 和 `residual` 被原地改写并原样返回；没有残差时分配新张量保存结果。
    pub fn forward_fused(
        &self,
        x: Tensor,
        residual: Option<Tensor>,
    ) -> Result<Output, LaunchError> {
        self.check(&x, residual.as_ref())?;

        let rows = x.rows();
        let w = self.weight.layout().clone();
        match residual {
            Some(mut residual) => {
                let mut x = x;
                let args = fused_add_rms_norm::Args {
                    x_layout: rows.clone(),
                    x_base: x.base_mut(),
                    residual_layout: rows,
                    residual_base: residual.base_mut(),
                    w_layout: w,
                    w_base: self.weight.base(),
                    epsilon: self.epsilon,
                };
                self.fused.launch(&args, &mut [], &ThisThread)?;
                Ok(Output::WithResidual { y: x, residual })
            }
            None => {
                let mut y = x.empty_like();
                let args = rms_norm::Args {
                    y_layout: rows.clone(),
                    y_base: y.base_mut(),
                    x_layout: rows,
                    x_base: x.base(),
                    w_layout: w,
                    w_base: self.weight.base(),
                    epsilon: self.epsilon,
                };
                self.norm.launch(&args, &mut [], &ThisThread)?;
                Ok(Output::Value(y))
            }
        }
    }

    fn check(&self, x: &Tensor, residual: Option<&Tensor>) -> Result<(), LaunchError> {
        let &[.., d] = x.shape() else { unreachable!() };
        if !matches!(x.shape().len(), 2 | 3) {
            return Err(rank_not_support(format!(
                "x.ndim = {}, 2 or 3 expected",
                x.shape().len()
            )));
        }
        if d != self.hidden_size() {
            return Err(shape_mismatch(format!(
                "x: {:?}, hidden size: {}",
                x.shape(),
                self.hidden_size()
            )));
        }
        if x.dt() != self.dt() {
            return Err(type_mismatch(format!("x: {}, w: {}", x.dt(), self.dt())));
        }
        if let Some(r) = residual {
            if r.shape() != x.shape() || r.dt() != x.dt() {
                return Err(shape_mismatch(format!(
                    "x: {:?}, residual: {:?}",
                    x.layout(),
                    r.layout()
                )));
            }
        }
        Ok(())
    }

    fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, LaunchError> {
        let mut c = a.empty_like();
        let args = add::Args {
            c_layout: c.layout().clone(),
            c_base: c.base_mut(),
            a_layout: a.layout().clone(),
            a_base: a.base(),
            b_layout: b.layout().clone(),
            b_base: b.base(),
        };
        self.add.launch(&args, &mut [], &ThisThread)?;
        Ok(c)
    }
}

/// 逐行归一化：升到 f32 求方差，舍入回存储精度后乘权重。
fn normalize<T>(y: &mut [T], x: &[T], w: &[T], epsilon: f32)
where
    T: BetweenF32 + Mul<Output = T>,
{
    let d = w.len();
    let mut row = Vec::with_capacity(d);
    for (y, x) in zip(y.chunks_exact_mut(d), x.chunks_exact(d)) {
        row.clear();
        row.extend(x.iter().map(T::f32));
        let variance = row.iter().map(|x| x * x).sum::<f32>() / d as f32;
        let k = (variance + epsilon).sqrt().recip();
        for ((y, x), &w) in zip(zip(y, &row), w) {
            *y = T::cast(x * k) * w
        }
    }
}

#[cfg(test)]
mod test;
