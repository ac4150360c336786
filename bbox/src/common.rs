pub use anyhow::{ensure, Result};
pub use num_traits::{Float, Num, Zero};
pub use std::{
    cmp::Ordering,
    ops::{Mul, Neg},
};
