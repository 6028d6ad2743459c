mod blob;
mod diversity;
mod error;
mod tensor;

pub use blob::Blob;
pub use diversity::SchemeCacheSize;
pub use error::{functions::*, LaunchError, LaunchErrorKind, SchemeError};
pub use tensor::TensorLayout;

pub mod utils {
    use super::{rank_not_support, shape_mismatch, type_mismatch, type_not_support, LaunchError};
    use digit_layout::{types as ty, DigitLayout};

    #[inline]
    pub(crate) fn type_distinct(pairs: &[DigitLayout]) -> Result<DigitLayout, LaunchError> {
        let [dt, tail @ ..] = pairs else {
            unreachable!("pairs empty");
        };
        if tail.iter().all(|it| it == dt) {
            Ok(*dt)
        } else {
            Err(type_mismatch(format!("{pairs:?} are not distinct")))
        }
    }

    #[inline]
    pub(crate) fn rank_error(arg: &str, expected: usize, actual: usize) -> LaunchError {
        rank_not_support(format!("{arg}.ndim = {actual}, {expected} expected"))
    }

    #[inline]
    pub(crate) fn dim_distinct(args: &[usize]) -> Result<usize, LaunchError> {
        let [d, tail @ ..] = args else {
            unreachable!("args empty");
        };
        if tail.iter().all(|it| it == d) {
            Ok(*d)
        } else {
            Err(shape_mismatch(format!("{args:?} are not distinct")))
        }
    }

    /// 归一化算子支持的存储精度。
    #[inline]
    pub(crate) fn norm_type(dt: DigitLayout) -> Result<DigitLayout, LaunchError> {
        match dt {
            ty::F16 | ty::BF16 | ty::F32 => Ok(dt),
            _ => Err(type_not_support(format!("{dt} is not a normalization type"))),
        }
    }
}
