use crate::{common::*, Rect};

/// A box stored by its top, left, bottom and right sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T>
where
    T: Copy + Num,
{
    /// Translate the box by `dy` rows and `dx` columns.
    pub fn shift(&self, dy: T, dx: T) -> Self {
        TLBR {
            t: self.t + dy,
            l: self.l + dx,
            b: self.b + dy,
            r: self.r + dx,
        }
    }
}

impl<T> TLBR<T>
where
    T: Float,
{
    /// Clip the box into `[0, h] x [0, w]`.
    pub fn clip(&self, h: T, w: T) -> Self {
        let clamp = |value: T, max: T| value.max(T::zero()).min(max);
        TLBR {
            t: clamp(self.t, h),
            l: clamp(self.l, w),
            b: clamp(self.b, h),
            r: clamp(self.r, w),
        }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        self.t
    }

    fn l(&self) -> T {
        self.l
    }

    fn b(&self) -> T {
        self.b
    }

    fn r(&self) -> T {
        self.r
    }

    fn cy(&self) -> T {
        (self.t + self.b) / (T::one() + T::one())
    }

    fn cx(&self) -> T {
        (self.l + self.r) / (T::one() + T::one())
    }

    fn h(&self) -> T {
        self.b - self.t
    }

    fn w(&self) -> T {
        self.r - self.l
    }

    fn try_from_tlbr([t, l, b, r]: [T; 4]) -> Result<Self> {
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");
        Ok(Self { t, l, b, r })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn xyxy_order() {
        let rect = TLBR::from_xyxy([1.0, 2.0, 3.0, 5.0]);
        assert_eq!(rect.tlbr(), [2.0, 1.0, 5.0, 3.0]);
        assert_eq!(rect.xyxy(), [1.0, 2.0, 3.0, 5.0]);
        assert_eq!(rect.h(), 3.0);
        assert_eq!(rect.cx(), 2.0);
        assert!(TLBR::try_from_xyxy([3.0, 2.0, 1.0, 5.0]).is_err());
    }

    #[test]
    fn clip_and_shift() {
        let rect = TLBR::from_xyxy([-4.0, -4.0, 4.0, 4.0]).shift(2.0, 10.0);
        assert_eq!(rect.xyxy(), [6.0, -2.0, 14.0, 6.0]);
        assert_eq!(rect.clip(5.0, 12.0).xyxy(), [6.0, 0.0, 12.0, 5.0]);
    }
}
