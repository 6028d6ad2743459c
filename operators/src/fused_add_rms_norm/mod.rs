//! residual = x + residual; x = w · residual / √(Σresidual² / d + ε)
//!
//! 两个激活张量都被原地改写。

pub mod common_cpu;

mod args;
pub use args::Args;

crate::op_trait!(FusedAddRmsNorm);
