use crate::{args_not_support, LaunchError};
use log::warn;
use std::{env::var, fmt, str::FromStr};

/// 环境变量，用于强制指定执行路径：`reference`、`fused` 或 `auto`。
pub const PATH_ENV: &str = "RMS_NORM_PATH";

/// 执行路径。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Path {
    /// 逐步计算，不改写输入。
    Reference,
    /// 调用融合算子，有残差时原地改写输入。
    Fused,
}

/// 根据输入形状选择执行路径的策略。
///
/// 两条路径数值上可以互换，策略只影响性能。
#[derive(Clone, Copy)]
pub enum Dispatch {
    /// 序列长度大于 `threshold` 时走融合路径。
    SeqLen { threshold: usize },
    /// 总是走指定路径。
    Always(Path),
    /// 自定义选择函数。
    Custom(fn(&[usize]) -> Path),
}

impl Default for Dispatch {
    /// 多 token 的 prefill 走融合路径，单 token 的 decode 走参考路径。
    fn default() -> Self {
        Self::SeqLen { threshold: 1 }
    }
}

impl Dispatch {
    pub fn select(&self, shape: &[usize]) -> Path {
        match *self {
            Self::SeqLen { threshold } => {
                if seq_len(shape) > threshold {
                    Path::Fused
                } else {
                    Path::Reference
                }
            }
            Self::Always(path) => path,
            Self::Custom(f) => f(shape),
        }
    }

    /// 读取 [`PATH_ENV`]，未设置或无法识别时使用默认策略。
    pub fn from_env() -> Self {
        match var(PATH_ENV) {
            Ok(val) => val.parse().unwrap_or_else(|e| {
                warn!("ignore {PATH_ENV}={val}: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// 激活的序列长度。
///
/// `[batch, seq, hidden]` 取第 1 维，`[seq, hidden]` 取第 0 维。
pub fn seq_len(shape: &[usize]) -> usize {
    match *shape {
        [_, seq, _] | [seq, _] => seq,
        _ => 1,
    }
}

impl FromStr for Dispatch {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::default()),
            "reference" | "ref" => Ok(Self::Always(Path::Reference)),
            "fused" => Ok(Self::Always(Path::Fused)),
            _ => Err(args_not_support(format!("unknown rms norm path \"{s}\""))),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SeqLen { threshold } => write!(f, "SeqLen({threshold})"),
            Self::Always(path) => write!(f, "Always({path:?})"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}
