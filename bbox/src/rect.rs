use crate::{common::*, TLBR};

/// Accessors of an axis-aligned box in `(y, x)` image coordinates.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    /// Build from `[t, l, b, r]`, failing on inverted sides.
    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_tlbr(tlbr: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_tlbr(tlbr).unwrap()
    }

    /// Build a box from `[x1, y1, x2, y2]` corner coordinates.
    fn try_from_xyxy([x1, y1, x2, y2]: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized,
    {
        Self::try_from_tlbr([y1, x1, y2, x2])
    }

    fn from_xyxy(xyxy: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xyxy(xyxy).unwrap()
    }

    fn tlbr(&self) -> [Self::Type; 4] {
        [self.t(), self.l(), self.b(), self.r()]
    }

    /// Corner coordinates in `[x1, y1, x2, y2]` order.
    fn xyxy(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }

    fn area(&self) -> Self::Type {
        self.h() * self.w()
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    /// Compute the smallest box enclosing both boxes.
    fn closure_with<R>(&self, other: &R) -> TLBR<Self::Type>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().min(other.t());
        let l = self.l().min(other.l());
        let b = self.b().max(other.b());
        let r = self.r().max(other.r());
        TLBR::from_tlbr([t, l, b, r])
    }

    fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().max(other.t());
        let l = self.l().max(other.l());
        let b = self.b().min(other.b());
        let r = self.r().min(other.r());
        (b > t && r > l).then(|| TLBR::from_tlbr([t, l, b, r]))
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union. The union is clamped from below by `epsilon`.
    fn iou_with<R>(&self, other: &R, epsilon: Self::Type) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let inter_area = self.intersection_area_with(other);
        let union_area = (self.area() + other.area() - inter_area).max(epsilon);
        inter_area / union_area
    }

    /// Generalized IoU, ranging in `(-1, 1]`.
    fn giou_with<R>(&self, other: &R, epsilon: Self::Type) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let inter_area = self.intersection_area_with(other);
        let union_area = (self.area() + other.area() - inter_area).max(epsilon);
        let closure_area = self.closure_with(other).area().max(epsilon);
        inter_area / union_area - (closure_area - union_area) / closure_area
    }

    /// Euclidean distance between box centers.
    fn center_distance_to<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let dy = self.cy() - other.cy();
        let dx = self.cx() - other.cx();
        (dy * dy + dx * dx).sqrt()
    }

    /// The smallest distance from a point to the four box sides.
    ///
    /// The value is positive iff the point lies strictly inside the box.
    fn inner_margin_of(&self, y: Self::Type, x: Self::Type) -> Self::Type {
        (x - self.l())
            .min(y - self.t())
            .min(self.r() - x)
            .min(self.b() - y)
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}
