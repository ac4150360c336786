use crate::{
    common::*,
    group_norm::{GroupNorm, GroupNormInit},
};

/// A 2D convolution followed by an optional group norm and ReLU.
#[derive(Debug, Clone)]
pub struct ConvNorm2DInit {
    pub in_c: usize,
    pub out_c: usize,
    pub k: usize,
    pub s: usize,
    pub p: usize,
    /// Defaults to `true` without normalization and `false` with it.
    pub bias: Option<bool>,
    pub relu: bool,
    pub group_norm: Option<GroupNormInit>,
    pub ws_init: nn::Init,
}

impl ConvNorm2DInit {
    pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s: 1,
            p: k / 2,
            bias: None,
            relu: true,
            group_norm: None,
            ws_init: nn::Init::Randn {
                mean: 0.0,
                stdev: 0.01,
            },
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<ConvNorm2D>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_c,
            out_c,
            k,
            s,
            p,
            bias,
            relu,
            group_norm,
            ws_init,
        } = self;

        ensure!(in_c > 0 && out_c > 0, "channel counts must be positive");
        ensure!(k > 0 && s > 0, "kernel size and stride must be positive");

        let bias = bias.unwrap_or_else(|| group_norm.is_none());
        let conv = nn::conv2d(
            path / "conv",
            in_c as i64,
            out_c as i64,
            k as i64,
            nn::ConvConfig {
                stride: s as i64,
                padding: p as i64,
                bias,
                ws_init,
                bs_init: nn::Init::Const(0.0),
                ..Default::default()
            },
        );
        let norm = group_norm
            .map(|init| init.build(path / "gn", out_c))
            .transpose()?;

        Ok(ConvNorm2D {
            conv,
            norm,
            relu,
        })
    }
}

#[derive(Debug)]
pub struct ConvNorm2D {
    conv: nn::Conv2D,
    norm: Option<GroupNorm>,
    relu: bool,
}

impl nn::Module for ConvNorm2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let Self {
            ref conv,
            ref norm,
            relu,
            ..
        } = *self;

        let xs = xs.apply(conv);
        let xs = match norm {
            Some(norm) => xs.apply(norm),
            None => xs,
        };

        if relu {
            xs.relu()
        } else {
            xs
        }
    }
}
