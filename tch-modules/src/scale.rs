use crate::common::*;

/// A learnable scalar multiplier.
#[derive(Debug)]
pub struct Scale {
    scale: Tensor,
}

impl Scale {
    pub fn new<'p>(path: impl Borrow<nn::Path<'p>>, init: f64) -> Self {
        let scale = path.borrow().var("scale", &[1], nn::Init::Const(init));
        Self { scale }
    }
}

impl nn::Module for Scale {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs * &self.scale
    }
}
