pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use bbox::{prelude::*, nms, ScoredBox, Transform, TLBR};
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{iproduct, izip, Itertools};
pub use log::{debug, info, log, warn, Level};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    iter,
    path::{Path, PathBuf},
};
pub use tch::{
    nn::{self, Module as _},
    Device, Kind, Reduction, Tensor,
};

unzip_n::unzip_n!(pub 3);
