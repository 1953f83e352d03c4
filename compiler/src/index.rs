// index.rs — Spatial index vectors and element-wise arithmetic
//
// Shared by the extent analysis and the shape inference driver. Every binary
// helper is checked: operands of different rank are an error rather than being
// truncated or padded, and overflow is an error rather than wrapping.

use std::fmt;

/// One signed offset (or bound, or size) per spatial dimension. An empty
/// index is rank 0 and stands for "not yet determined".
pub type Index = Vec<i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    RankMismatch { lhs: usize, rhs: usize },
    Overflow,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::RankMismatch { lhs, rhs } => {
                write!(f, "indices of rank {} and {} do not match", lhs, rhs)
            }
            IndexError::Overflow => write!(f, "index arithmetic overflows i64"),
        }
    }
}

/// Apply `f` to each pair of components; `f` returns `None` on overflow.
pub fn elementwise(
    a: &[i64],
    b: &[i64],
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Index, IndexError> {
    if a.len() != b.len() {
        return Err(IndexError::RankMismatch {
            lhs: a.len(),
            rhs: b.len(),
        });
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f(x, y).ok_or(IndexError::Overflow))
        .collect()
}

pub fn add(a: &[i64], b: &[i64]) -> Result<Index, IndexError> {
    elementwise(a, b, i64::checked_add)
}

pub fn sub(a: &[i64], b: &[i64]) -> Result<Index, IndexError> {
    elementwise(a, b, i64::checked_sub)
}

pub fn min(a: &[i64], b: &[i64]) -> Result<Index, IndexError> {
    elementwise(a, b, |x, y| Some(x.min(y)))
}

pub fn max(a: &[i64], b: &[i64]) -> Result<Index, IndexError> {
    elementwise(a, b, |x, y| Some(x.max(y)))
}

/// Shrink a positive extent by the width an unrolled body already covers:
/// `positive[d] - unroll[d] + 1`.
pub fn unroll_adjust(positive: &[i64], unroll: &[i64]) -> Result<Index, IndexError> {
    elementwise(positive, unroll, |p, u| p.checked_sub(u)?.checked_add(1))
}

/// Product of all components (1 for rank 0). `None` on overflow.
pub fn volume(index: &[i64]) -> Option<i64> {
    index.iter().try_fold(1i64, |acc, &v| acc.checked_mul(v))
}

/// `[a, b, c]` form used in diagnostics and the IR dump.
pub fn format_index(index: &[i64]) -> String {
    let parts: Vec<String> = index.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
