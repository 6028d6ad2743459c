use super::{args::Meta, Args, RmsNorm};
use crate::{
    common_cpu::Cpu, BetweenF32, ByteOf, LaunchError, QueueAlloc, SchemeCacheSize, SchemeError,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};
use log::debug;
use lru::LruCache;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use std::{marker::PhantomData, ops::Mul, sync::Mutex};

pub struct Operator {
    plans: Mutex<LruCache<PlanKey, RowPlan>>,
}

impl RmsNorm<Cpu> for Operator {}

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
            y_layout,
            y_base,
            x_layout,
            x_base,
            w_layout,
            w_base,
            epsilon,
        } = args;
        let &[nsy, dsy] = y_layout.strides() else {
            unreachable!()
        };
        let &[nsx, dsx] = x_layout.strides() else {
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
                    nsy,
                    dsy,
                    nsx,
                    dsx,
                    dsw,
                    epsilon: *epsilon,
                    y: *y_base as _,
                    x: *x_base as _,
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

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct PlanKey {
    pub dt: DigitLayout,
    pub d: usize,
}

/// 按行并行时每个任务至少处理的行数。
#[derive(Clone, Copy, Debug)]
pub(crate) struct RowPlan {
    pub min_rows: usize,
}

impl RowPlan {
    /// 每个任务至少处理的元素数。
    const GRAIN: usize = 1 << 14;

    fn new(PlanKey { dt, d }: PlanKey) -> Self {
        let min_rows = (Self::GRAIN / d.max(1)).max(1);
        debug!("plan rms norm rows: {dt} x {d}, {min_rows} rows per task");
        Self { min_rows }
    }
}

pub(crate) fn plan(cache: &Mutex<LruCache<PlanKey, RowPlan>>, key: PlanKey) -> RowPlan {
    *cache
        .lock()
        .unwrap()
        .get_or_insert(key, || RowPlan::new(key))
}

/// (Σx² / d + ε)^(-1/2)
#[inline]
pub(crate) fn rms_scale(sum_sq: f32, d: usize, epsilon: f32) -> f32 {
    (sum_sq / d as f32 + epsilon).sqrt().recip()
}

/// 地址都以整数保存，以便在线程间传递。
struct Scheme<T> {
    n: usize,
    d: usize,
    nsy: isize,
    dsy: isize,
    nsx: isize,
    dsx: isize,
    dsw: isize,
    epsilon: f32,
    y: isize,
    x: isize,
    w: isize,
    _ty: PhantomData<T>,
}

impl<T> Scheme<T>
where
    T: BetweenF32 + Mul<Output = T> + Send + Sync,
{
    fn calculate(&self, min_rows: usize) {
        let &Self {
            d,
            nsy,
            dsy,
            nsx,
            dsx,
            dsw,
            epsilon,
            ..
        } = self;
        (0..self.n as isize)
            .into_par_iter()
            .with_min_len(min_rows)
            .for_each(|i| {
                let x = |j: isize| get::<T>(self.x + i * nsx + j * dsx);
                let sum = (0..d as isize)
                    .map(|j| x(j).f32())
                    .map(|x| x * x)
                    .sum::<f32>();
                let k = rms_scale(sum, d, epsilon);
                for j in 0..d as isize {
                    let y = (self.y + i * nsy + j * dsy) as *mut T;
                    let w = get::<T>(self.w + j * dsw);
                    unsafe { y.write(T::cast(x(j).f32() * k) * w) }
                }
            })
    }
}

#[inline]
pub(crate) fn get<T: Copy>(addr: isize) -> T {
    unsafe { (addr as *const T).read() }
}
