use crate::common::*;

#[derive(Debug, Clone)]
pub struct GroupNormInit {
    pub num_groups: usize,
    pub eps: R64,
    pub cudnn_enabled: bool,
    pub ws_init: Option<nn::Init>,
    pub bs_init: Option<nn::Init>,
}

impl GroupNormInit {
    pub fn new(num_groups: usize) -> Self {
        Self {
            num_groups,
            eps: r64(1e-5),
            cudnn_enabled: true,
            ws_init: Some(nn::Init::Const(1.0)),
            bs_init: Some(nn::Init::Const(0.0)),
        }
    }

    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, num_channels: usize) -> Result<GroupNorm> {
        let path = path.borrow();
        let Self {
            num_groups,
            eps,
            cudnn_enabled,
            ws_init,
            bs_init,
        } = self;

        ensure!(
            num_groups > 0 && num_channels % num_groups == 0,
            "the number of channels {} must be a multiple of the number of groups {}",
            num_channels,
            num_groups
        );

        let ws = ws_init.map(|init| path.var("weight", &[num_channels as i64], init));
        let bs = bs_init.map(|init| path.var("bias", &[num_channels as i64], init));

        Ok(GroupNorm {
            ws,
            bs,
            num_groups: num_groups as i64,
            cudnn_enabled,
            eps: eps.raw(),
        })
    }
}

/// Group normalization over `[batch, channels, ...]` inputs.
#[derive(Debug)]
pub struct GroupNorm {
    ws: Option<Tensor>,
    bs: Option<Tensor>,
    cudnn_enabled: bool,
    eps: f64,
    num_groups: i64,
}

impl nn::Module for GroupNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        let Self {
            ref ws,
            ref bs,
            eps,
            cudnn_enabled,
            num_groups,
        } = *self;

        Tensor::group_norm(
            input,
            num_groups,
            ws.as_ref(),
            bs.as_ref(),
            eps,
            cudnn_enabled,
        )
    }
}
