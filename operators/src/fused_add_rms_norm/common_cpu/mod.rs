use super::{args::Meta, Args, FusedAddRmsNorm};
use crate::{
    args_not_support,
    common_cpu::Cpu,
    rms_norm::common_cpu::{get, plan, rms_scale, PlanKey, RowPlan},
    BetweenF32, ByteOf, LaunchError, QueueAlloc, SchemeCacheSize, SchemeError,
};
use digit_layout::types as ty;
use half::{bf16, f16};
use lru::LruCache;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use std::{
    marker::PhantomData,
    ops::{Add, Mul},
    ptr::addr_eq,
    sync::Mutex,
};

pub struct Operator {
    plans: Mutex<LruCache<PlanKey, RowPlan>>,
}

impl FusedAddRmsNorm<Cpu> for Operator {}

impl crate::Operator for Operator {
    type Hardware = Cpu;
    type Args = Args<Cpu>;

    fn new(_node: &Self::Hardware) -> Self {
        Self {
            plans: SchemeCacheSize::default().new_cache(),
        }
    }

    fn scheme(
        &mut self,
        args: &Self::Args,
        _max_workspace_size: usize,
    ) -> Result<usize, SchemeError> {
        let Meta { dt, d, .. } = args.meta()?;
        plan(&self.plans, PlanKey { dt, d });
        Ok(0)
    }

    fn launch<QA>(
        &self,
        args: &Self::Args,
        _workspace: &mut [ByteOf<Self::Hardware>],
        _queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>,
    {
        let Meta { dt, n, d } = args.meta()?;
        let Args {
            x_layout,
            x_base,
            residual_layout,
            residual_base,
            w_layout,
            w_base,
            epsilon,
        } = args;
        if n * d > 0 && addr_eq(*x_base, *residual_base) {
            return Err(args_not_support("x and residual must not alias"));
        }
        let &[nsx, dsx] = x_layout.strides() else {
            unreachable!()
        };
        let &[nsr, dsr] = residual_layout.strides() else {
            unreachable!()
        };
        let &[dsw] = w_layout.strides() else {
            unreachable!()
        };
        let RowPlan { min_rows } = plan(&self.plans, PlanKey { dt, d });

        macro_rules! calculate {
            ($ty:ty) => {
                Scheme::<$ty> {
                    n,
                    d,
                    nsx,
                    dsx,
                    nsr,
                    dsr,
                    dsw,
                    epsilon: *epsilon,
                    x: *x_base as _,
                    r: *residual_base as _,
                    w: *w_base as _,
                    _ty: PhantomData,
                }
                .calculate(min_rows)
            };
        }

        match dt {
            ty::F16 => calculate!(f16),
            ty::BF16 => calculate!(bf16),
            ty::F32 => calculate!(f32),
            _ => unreachable!(),
        }
        Ok(())
    }
}

struct Scheme<T> {
    n: usize,
    d: usize,
    nsx: isize,
    dsx: isize,
    nsr: isize,
    dsr: isize,
    dsw: isize,
    epsilon: f32,
    x: isize,
    r: isize,
    w: isize,
    _ty: PhantomData<T>,
}

impl<T> Scheme<T>
where
    T: BetweenF32 + Add<Output = T> + Mul<Output = T> + Send + Sync,
{
    fn calculate(&self, min_rows: usize) {
        let &Self {
            d,
            nsx,
            dsx,
            nsr,
            dsr,
            dsw,
            epsilon,
            ..
        } = self;
        (0..self.n as isize)
            .into_par_iter()
            .with_min_len(min_rows)
            .for_each(|i| {
                let x = |j: isize| (self.x + i * nsx + j * dsx) as *mut T;
                let r = |j: isize| (self.r + i * nsr + j * dsr) as *mut T;
                // 第一遍：累加残差并求平方和，和以存储精度写回
                let mut sum = 0.0f32;
                for j in 0..d as isize {
                    let acc = unsafe { x(j).read() + r(j).read() };
                    unsafe { r(j).write(acc) };
                    let acc = acc.f32();
                    sum += acc * acc
                }
                let k = rms_scale(sum, d, epsilon);
                // 第二遍：归一化结果写入 x
                for j in 0..d as isize {
                    let w = get::<T>(self.w + j * dsw);
                    let normalized = T::cast(unsafe { r(j).read() }.f32() * k);
                    unsafe { x(j).write(normalized * w) }
                }
            })
    }
}
