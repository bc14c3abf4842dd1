//! Types for vectorized (lane-parallel) arithmetic
//!
//! Several mesh cells are batched into one macro-cell. All quantities
//! evaluated on such a batch are stored as [`Vectorized`], one entry per
//! cell ("lane"). [`LaneMask`] selects lanes, e.g. the lanes whose cell
//! carries the wall enrichment.
use num_traits::{One, Zero};
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

/// Spatial dimension
pub const DIM: usize = 2;

/// Number of cells per macro-cell
pub const LANES: usize = 4;

/// Value of a vector valued quantity at one quadrature point
pub type Tensor1<const NC: usize> = [Vectorized; NC];

/// Gradient of a field with *NC* components at one quadrature point
pub type Tensor2<const NC: usize> = [[Vectorized; DIM]; NC];

/// Lane parallel floating point number
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vectorized(pub [f64; LANES]);

impl Vectorized {
    /// All lanes hold *value*
    #[inline]
    pub const fn splat(value: f64) -> Self {
        Self([value; LANES])
    }

    /// Construct from closure evaluated for each lane
    #[inline]
    pub fn from_fn<F: FnMut(usize) -> f64>(mut f: F) -> Self {
        let mut v = [0.; LANES];
        for (l, x) in v.iter_mut().enumerate() {
            *x = f(l);
        }
        Self(v)
    }

    /// Apply scalar function lane by lane
    #[inline]
    pub fn map<F: Fn(f64) -> f64>(self, f: F) -> Self {
        Self::from_fn(|l| f(self.0[l]))
    }

    /// Lane wise combination of two numbers
    #[inline]
    pub fn zip_map<F: Fn(f64, f64) -> f64>(self, other: Self, f: F) -> Self {
        Self::from_fn(|l| f(self.0[l], other.0[l]))
    }

    /// Square root
    #[inline]
    pub fn sqrt(self) -> Self {
        self.map(f64::sqrt)
    }

    /// Absolute value
    #[inline]
    pub fn abs(self) -> Self {
        self.map(f64::abs)
    }

    /// Exponential function
    #[inline]
    pub fn exp(self) -> Self {
        self.map(f64::exp)
    }

    /// Lane wise maximum
    #[inline]
    pub fn max(self, other: Self) -> Self {
        self.zip_map(other, f64::max)
    }

    /// Lane wise minimum
    #[inline]
    pub fn min(self, other: Self) -> Self {
        self.zip_map(other, f64::min)
    }

    /// Largest entry among the first *n* lanes
    pub fn max_lane(self, n: usize) -> f64 {
        self.0[..n].iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Sum over the first *n* lanes
    pub fn sum_lanes(self, n: usize) -> f64 {
        self.0[..n].iter().sum()
    }

    /// Take lanes of *a* where *mask* is set and lanes of *b* elsewhere
    #[inline]
    pub fn select(mask: LaneMask, a: Self, b: Self) -> Self {
        Self::from_fn(|l| if mask.0[l] { a.0[l] } else { b.0[l] })
    }
}

impl Index<usize> for Vectorized {
    type Output = f64;
    #[inline]
    fn index(&self, lane: usize) -> &f64 {
        &self.0[lane]
    }
}

impl IndexMut<usize> for Vectorized {
    #[inline]
    fn index_mut(&mut self, lane: usize) -> &mut f64 {
        &mut self.0[lane]
    }
}

macro_rules! impl_binary_op {
    ($trait: ident, $fn: ident, $trait_assign: ident, $fn_assign: ident, $op: tt) => {
        impl $trait for Vectorized {
            type Output = Vectorized;
            #[inline]
            fn $fn(self, rhs: Vectorized) -> Vectorized {
                Vectorized::from_fn(|l| self.0[l] $op rhs.0[l])
            }
        }

        impl $trait<f64> for Vectorized {
            type Output = Vectorized;
            #[inline]
            fn $fn(self, rhs: f64) -> Vectorized {
                Vectorized::from_fn(|l| self.0[l] $op rhs)
            }
        }

        impl $trait<Vectorized> for f64 {
            type Output = Vectorized;
            #[inline]
            fn $fn(self, rhs: Vectorized) -> Vectorized {
                Vectorized::from_fn(|l| self $op rhs.0[l])
            }
        }

        impl $trait_assign for Vectorized {
            #[inline]
            fn $fn_assign(&mut self, rhs: Vectorized) {
                for l in 0..LANES {
                    self.0[l] = self.0[l] $op rhs.0[l];
                }
            }
        }

        impl $trait_assign<f64> for Vectorized {
            #[inline]
            fn $fn_assign(&mut self, rhs: f64) {
                for l in 0..LANES {
                    self.0[l] = self.0[l] $op rhs;
                }
            }
        }
    };
}

impl_binary_op!(Add, add, AddAssign, add_assign, +);
impl_binary_op!(Sub, sub, SubAssign, sub_assign, -);
impl_binary_op!(Mul, mul, MulAssign, mul_assign, *);
impl_binary_op!(Div, div, DivAssign, div_assign, /);

impl Neg for Vectorized {
    type Output = Vectorized;
    #[inline]
    fn neg(self) -> Vectorized {
        self.map(|x| -x)
    }
}

impl Zero for Vectorized {
    fn zero() -> Self {
        Self::splat(0.)
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|x| *x == 0.)
    }
}

impl One for Vectorized {
    fn one() -> Self {
        Self::splat(1.)
    }
}

/// Boolean flag per lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneMask(pub [bool; LANES]);

impl LaneMask {
    /// No lane set
    pub const NONE: LaneMask = LaneMask([false; LANES]);

    /// All lanes set
    pub const ALL: LaneMask = LaneMask([true; LANES]);

    /// Construct from closure evaluated for each lane
    #[inline]
    pub fn from_fn<F: FnMut(usize) -> bool>(mut f: F) -> Self {
        let mut m = [false; LANES];
        for (l, x) in m.iter_mut().enumerate() {
            *x = f(l);
        }
        Self(m)
    }

    /// At least one lane is set
    #[inline]
    pub fn any(self) -> bool {
        self.0.iter().any(|x| *x)
    }

    /// Lane *l* is set
    #[inline]
    pub fn is_set(self, lane: usize) -> bool {
        self.0[lane]
    }

    /// Lanes set in both masks
    #[inline]
    pub fn and(self, other: Self) -> Self {
        Self::from_fn(|l| self.0[l] && other.0[l])
    }

    /// Lanes not set
    #[inline]
    pub fn not(self) -> Self {
        Self::from_fn(|l| !self.0[l])
    }
}

/// Scalar product of two vectors
#[inline]
pub fn dot<const N: usize>(a: &[Vectorized; N], b: &[Vectorized; N]) -> Vectorized {
    let mut s = Vectorized::zero();
    for i in 0..N {
        s += a[i] * b[i];
    }
    s
}

/// Apply gradient to vector: (grad u) * n
#[inline]
pub fn grad_times<const NC: usize>(g: &Tensor2<NC>, n: &[Vectorized; DIM]) -> Tensor1<NC> {
    let mut out = [Vectorized::zero(); NC];
    for c in 0..NC {
        out[c] = dot(&g[c], n);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectorized_arithmetic() {
        let a = Vectorized([1., 2., 3., 4.]);
        let b = Vectorized::splat(2.);
        assert_eq!(a + b, Vectorized([3., 4., 5., 6.]));
        assert_eq!(a * b - 1., Vectorized([1., 3., 5., 7.]));
        assert_eq!(2. / b, Vectorized::one());
        assert_eq!((-a).abs(), a);
        assert_eq!(a.max_lane(2), 2.);
        assert_eq!(a.sum_lanes(LANES), 10.);
    }

    #[test]
    fn test_select() {
        let mask = LaneMask([true, false, false, true]);
        let a = Vectorized::splat(1.);
        let b = Vectorized::splat(-1.);
        assert_eq!(Vectorized::select(mask, a, b), Vectorized([1., -1., -1., 1.]));
        assert_eq!(mask.not().and(mask), LaneMask::NONE);
        assert!(mask.any());
    }
}
