use crate::{
    common_cpu::ThisThread, rank_not_support, shape_mismatch, type_not_support, Alloc,
    BetweenF32, Blob, LaunchError, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// 主存上连续存储的张量，拥有自己的数据。
#[derive(Clone)]
pub struct Tensor {
    layout: TensorLayout,
    blob: Blob,
}

macro_rules! dispatch {
    ($dt:expr; $f:ident $(, $arg:expr)*) => {
        match $dt {
            ty::F16 => $f::<f16>($($arg),*),
            ty::BF16 => $f::<bf16>($($arg),*),
            ty::F32 => $f::<f32>($($arg),*),
            ty::F64 => $f::<f64>($($arg),*),
            dt => unreachable!("{dt} is checked on construction"),
        }
    };
}

impl Tensor {
    /// 创建全 0 张量。
    pub fn new(dt: DigitLayout, shape: &[usize]) -> Result<Self, LaunchError> {
        let layout = layout(dt, shape)?;
        let blob = ThisThread.alloc(layout.count() * dt.nbytes());
        Ok(Self { layout, blob })
    }

    /// 从 f32 数据创建张量，数据按 `dt` 舍入。
    pub fn from_f32(
        dt: DigitLayout,
        shape: &[usize],
        data: &[f32],
    ) -> Result<Self, LaunchError> {
        let mut ans = Self::new(dt, shape)?;
        ans.store_f32(data)?;
        Ok(ans)
    }

    /// 分配一个与 `self` 类型和形状都相同的张量。
    pub fn empty_like(&self) -> Self {
        let blob = ThisThread.alloc(self.blob.len());
        Self {
            layout: self.layout.clone(),
            blob,
        }
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.layout.dt()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.blob
    }

    /// 以 `T` 类型访问数据，`T` 的宽度必须与数据类型一致。
    pub fn as_slice<T: BetweenF32>(&self) -> &[T] {
        assert_eq!(size_of::<T>(), self.dt().nbytes());
        unsafe { from_raw_parts(self.blob.as_ptr().cast(), self.layout.count()) }
    }

    /// 以 `T` 类型访问可变数据，`T` 的宽度必须与数据类型一致。
    pub fn as_slice_mut<T: BetweenF32>(&mut self) -> &mut [T] {
        assert_eq!(size_of::<T>(), self.dt().nbytes());
        let len = self.layout.count();
        unsafe { from_raw_parts_mut(self.blob.as_mut_ptr().cast(), len) }
    }

    /// 读出全部元素并转换为 f32。
    pub fn to_f32(&self) -> Vec<f32> {
        fn load<T: BetweenF32>(t: &Tensor) -> Vec<f32> {
            t.as_slice::<T>().iter().map(T::f32).collect()
        }
        dispatch!(self.dt(); load, self)
    }

    /// 用 f32 数据覆盖全部元素。
    pub fn store_f32(&mut self, data: &[f32]) -> Result<(), LaunchError> {
        if data.len() != self.layout.count() {
            return Err(shape_mismatch(format!(
                "{} values for tensor of shape {:?}",
                data.len(),
                self.shape(),
            )));
        }
        fn store<T: BetweenF32>(t: &mut Tensor, data: &[f32]) {
            for (dst, &src) in t.as_slice_mut::<T>().iter_mut().zip(data) {
                *dst = T::cast(src)
            }
        }
        dispatch!(self.dt(); store, self, data);
        Ok(())
    }

    /// 将张量视作 `[n, d]` 矩阵，`d` 为最后一维。
    pub(crate) fn rows(&self) -> TensorLayout {
        let [batch @ .., d] = self.shape() else {
            unreachable!()
        };
        let n = batch.iter().product::<usize>();
        TensorLayout::new_contiguous(self.dt(), &[n, *d])
    }

    #[inline]
    pub(crate) fn base(&self) -> *const u8 {
        self.blob.as_ptr()
    }

    #[inline]
    pub(crate) fn base_mut(&mut self) -> *mut u8 {
        self.blob.as_mut_ptr()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Tensor({:?})", self.layout)
    }
}

fn layout(dt: DigitLayout, shape: &[usize]) -> Result<TensorLayout, LaunchError> {
    match dt {
        ty::F16 | ty::BF16 | ty::F32 | ty::F64 => {}
        _ => return Err(type_not_support(format!("{dt} tensors are not supported"))),
    }
    if shape.is_empty() || shape.len() > 4 {
        return Err(rank_not_support(format!(
            "tensor ndim = {}, 1..=4 expected",
            shape.len()
        )));
    }
    Ok(TensorLayout::new_contiguous(dt, shape))
}
