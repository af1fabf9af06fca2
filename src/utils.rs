use candle_core::{DType, Result, Tensor, D};

/// Positions of the non-zero entries of a `u8` mask.
pub fn mask_to_index(mask: &Tensor) -> Result<Tensor> {
    Tensor::from_iter(
        mask.to_vec1()?
            .into_iter()
            .enumerate()
            .filter_map(|(idx, m): (_, u8)| if m == 0 { None } else { Some(idx as u32) }),
        mask.device(),
    )
}

/// Fraction of rows whose argmax matches `labels`.
pub fn accuracy(logits: &Tensor, labels: &Tensor) -> Result<f32> {
    logits
        .argmax(D::Minus1)?
        .eq(labels)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()
}
