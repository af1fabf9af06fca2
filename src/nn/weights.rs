use candle_core::{IndexOp, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use super::utils::{xavier_uniform, RELU_GAIN};
use crate::error::GnnError;

/// `0` or anything above `num_relations` falls back to one basis per relation.
pub fn effective_num_bases(num_bases: usize, num_relations: usize) -> usize {
    if num_bases == 0 || num_bases > num_relations {
        num_relations
    } else {
        num_bases
    }
}

// W_r = sum_b coefficients[r, b] * bases[b]
pub struct RelationWeights {
    weight: Tensor,
    coefficients: Option<Tensor>,
    num_relations: usize,
    in_dim: usize,
    out_dim: usize,
}

impl RelationWeights {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        num_relations: usize,
        num_bases: usize,
        vs: VarBuilder,
    ) -> Result<Self> {
        let num_bases = effective_num_bases(num_bases, num_relations);
        let dims = [num_bases, in_dim, out_dim];
        let weight = vs.get_with_hints(&dims[..], "weight", xavier_uniform(&dims, RELU_GAIN))?;
        let coefficients = if num_bases < num_relations {
            let dims = [num_relations, num_bases];
            Some(vs.get_with_hints(&dims[..], "w_comp", xavier_uniform(&dims, RELU_GAIN))?)
        } else {
            None
        };
        debug!(in_dim, out_dim, num_relations, num_bases, "relation weights");
        Ok(Self {
            weight,
            coefficients,
            num_relations,
            in_dim,
            out_dim,
        })
    }

    pub fn direct(weight: Tensor) -> Result<Self> {
        let (num_relations, in_dim, out_dim) = weight.dims3()?;
        Ok(Self {
            weight,
            coefficients: None,
            num_relations,
            in_dim,
            out_dim,
        })
    }

    pub fn decomposed(bases: Tensor, coefficients: Tensor) -> Result<Self> {
        let (num_bases, in_dim, out_dim) = bases.dims3()?;
        let (num_relations, coefficient_bases) = coefficients.dims2()?;
        if coefficient_bases != num_bases {
            Err(GnnError::WeightShape(format!(
                "{num_bases} bases but coefficients for {coefficient_bases}"
            )))?
        }
        if num_bases > num_relations {
            Err(GnnError::WeightShape(format!(
                "{num_bases} bases for only {num_relations} relations"
            )))?
        }
        Ok(Self {
            weight: bases,
            coefficients: Some(coefficients),
            num_relations,
            in_dim,
            out_dim,
        })
    }

    pub fn is_decomposed(&self) -> bool {
        self.coefficients.is_some()
    }

    /// `[num_relations, in_dim, out_dim]`
    pub fn weights(&self) -> Result<Tensor> {
        match &self.coefficients {
            Some(coefficients) => {
                let num_bases = coefficients.dim(1)?;
                let bases = self
                    .weight
                    .reshape((num_bases, self.in_dim * self.out_dim))?;
                coefficients
                    .matmul(&bases)?
                    .reshape((self.num_relations, self.in_dim, self.out_dim))
            }
            None => Ok(self.weight.clone()),
        }
    }

    pub fn relation_matrix(&self, relation: usize) -> Result<Tensor> {
        match &self.coefficients {
            Some(coefficients) => {
                let num_bases = coefficients.dim(1)?;
                let bases = self
                    .weight
                    .reshape((num_bases, self.in_dim * self.out_dim))?;
                coefficients
                    .i(relation..relation + 1)?
                    .matmul(&bases)?
                    .reshape((self.in_dim, self.out_dim))
            }
            None => self.weight.i(relation),
        }
    }
}

/// Every relation owns `num_bases` blocks of shape `[in_dim / num_bases,
/// out_dim / num_bases]`, stored flat as `[num_relations, num_bases *
/// submat_in * submat_out]`.
pub struct BlockDiagonalWeights {
    weight: Tensor,
    num_bases: usize,
    submat_in: usize,
    submat_out: usize,
}

impl BlockDiagonalWeights {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        num_relations: usize,
        num_bases: usize,
        vs: VarBuilder,
    ) -> Result<Self> {
        let (submat_in, submat_out) = block_shape(in_dim, out_dim, num_bases)?;
        let dims = [num_relations, num_bases * submat_in * submat_out];
        let weight = vs.get_with_hints(&dims[..], "weight", xavier_uniform(&dims, RELU_GAIN))?;
        debug!(in_dim, out_dim, num_relations, num_bases, "block-diagonal weights");
        Ok(Self {
            weight,
            num_bases,
            submat_in,
            submat_out,
        })
    }

    pub fn from_tensor(weight: Tensor, in_dim: usize, out_dim: usize, num_bases: usize) -> Result<Self> {
        let (submat_in, submat_out) = block_shape(in_dim, out_dim, num_bases)?;
        let (_, flat) = weight.dims2()?;
        if flat != num_bases * submat_in * submat_out {
            Err(GnnError::WeightShape(format!(
                "{flat} values per relation, expected {num_bases} blocks of {submat_in}x{submat_out}"
            )))?
        }
        Ok(Self {
            weight,
            num_bases,
            submat_in,
            submat_out,
        })
    }

    fn out_dim(&self) -> usize {
        self.num_bases * self.submat_out
    }

    /// `[E * num_bases, submat_in, submat_out]`
    pub fn blocks(&self, relations: &Tensor) -> Result<Tensor> {
        let num_edges = relations.dim(0)?;
        self.weight.index_select(relations, 0)?.reshape((
            num_edges * self.num_bases,
            self.submat_in,
            self.submat_out,
        ))
    }

    pub fn transform(&self, xs: &Tensor, relations: &Tensor) -> Result<Tensor> {
        let num_edges = xs.dim(0)?;
        if num_edges == 0 {
            return Tensor::zeros((0, self.out_dim()), xs.dtype(), xs.device());
        }
        xs.reshape((num_edges * self.num_bases, 1, self.submat_in))?
            .matmul(&self.blocks(relations)?)?
            .reshape((num_edges, self.out_dim()))
    }

    pub fn dense_matrix(&self, relation: usize) -> Result<Tensor> {
        let blocks = self.weight.i(relation)?.reshape((
            self.num_bases,
            self.submat_in,
            self.submat_out,
        ))?;
        let zeros = |width: usize| {
            Tensor::zeros((self.submat_in, width), blocks.dtype(), blocks.device())
        };
        let rows = (0..self.num_bases)
            .map(|b| {
                let mut parts = Vec::with_capacity(3);
                if b > 0 {
                    parts.push(zeros(b * self.submat_out)?);
                }
                parts.push(blocks.i(b)?);
                if b + 1 < self.num_bases {
                    parts.push(zeros((self.num_bases - b - 1) * self.submat_out)?);
                }
                Tensor::cat(&parts, 1)
            })
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&rows, 0)
    }
}

fn block_shape(in_dim: usize, out_dim: usize, num_bases: usize) -> Result<(usize, usize)> {
    if num_bases == 0 || in_dim % num_bases != 0 || out_dim % num_bases != 0 {
        Err(GnnError::IndivisibleBlocks {
            in_dim,
            out_dim,
            num_bases,
        })?
    }
    Ok((in_dim / num_bases, out_dim / num_bases))
}
