// src/init.rs
//! Weight initializers for layers, typically called from
//! `Layer::on_layer_connect`. All of them operate in place on CPU tensors.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::NetGraphError;
use crate::tensor::{Datum, Tensor};

/// Fills the tensor with 0.
pub fn zeros_(tensor: &mut Tensor) -> Result<(), NetGraphError> {
    fill_(tensor, 0.0)
}

/// Fills the tensor with `value`.
pub fn fill_(tensor: &mut Tensor, value: Datum) -> Result<(), NetGraphError> {
    tensor.values_mut()?.fill(value);
    Ok(())
}

/// Samples every element from `U(low, high)`.
///
/// # Errors
/// `InvalidConfiguration` if `low >= high`.
pub fn uniform_<R: Rng + ?Sized>(
    tensor: &mut Tensor,
    low: Datum,
    high: Datum,
    rng: &mut R,
) -> Result<(), NetGraphError> {
    if !(low < high) {
        return Err(NetGraphError::InvalidConfiguration {
            field: "uniform range".to_string(),
            expected: format!("low < high, got [{}, {})", low, high),
        });
    }
    let dist = Uniform::new(low, high);
    for value in tensor.values_mut()?.iter_mut() {
        *value = dist.sample(rng);
    }
    Ok(())
}

/// Samples every element from `N(mean, std^2)`.
pub fn normal_<R: Rng + ?Sized>(
    tensor: &mut Tensor,
    mean: Datum,
    std: Datum,
    rng: &mut R,
) -> Result<(), NetGraphError> {
    let dist = Normal::new(mean, std).map_err(|e| NetGraphError::InvalidConfiguration {
        field: "normal std".to_string(),
        expected: format!("finite non-negative value ({})", e),
    })?;
    for value in tensor.values_mut()?.iter_mut() {
        *value = dist.sample(rng);
    }
    Ok(())
}

/// Xavier/Glorot uniform initialization: `U(-a, a)` with
/// `a = sqrt(6 / (fan_in + fan_out))`.
///
/// `fan_out` is usually the sum of the gains reported by downstream layers.
pub fn xavier_uniform_<R: Rng + ?Sized>(
    tensor: &mut Tensor,
    fan_in: usize,
    fan_out: usize,
    rng: &mut R,
) -> Result<(), NetGraphError> {
    let fan = (fan_in + fan_out).max(1) as Datum;
    let bound = (6.0 / fan).sqrt();
    uniform_(tensor, -bound, bound, rng)
}
