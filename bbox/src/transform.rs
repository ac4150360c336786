use crate::{common::*, TLBR};

/// Axis-aligned map `(y, x) -> (y * sy + ty, x * sx + tx)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Scaling without offset. Both factors must be positive.
    pub fn try_from_scale(sy: T, sx: T) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            sy > zero && sx > zero,
            "scale factors must be positive"
        );
        Ok(Self {
            sy,
            sx,
            ty: zero,
            tx: zero,
        })
    }
}

impl<T> Transform<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    pub fn inverse(&self) -> Self {
        Self {
            sy: T::one() / self.sy,
            sx: T::one() / self.sx,
            ty: -self.ty / self.sy,
            tx: -self.tx / self.sx,
        }
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = TLBR<T>;

    fn mul(self, rect: &TLBR<T>) -> Self::Output {
        let map_y = |y: T| y * self.sy + self.ty;
        let map_x = |x: T| x * self.sx + self.tx;
        TLBR {
            t: map_y(rect.t),
            l: map_x(rect.l),
            b: map_y(rect.b),
            r: map_x(rect.r),
        }
    }
}
