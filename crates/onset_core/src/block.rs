//! Labeled block containers for model state and parameter vectors.
//!
//! A model's state gathers named physical fields (displacement, velocity,
//! flow, ...) and its properties gather named material constants (stiffness,
//! damping, ...). Both use the same container: a [`BlockLayout`] describing
//! the named sub-blocks and a [`BlockVec`] pairing a layout with one
//! contiguous vector of values. The layout is fixed per model instance and
//! identical across all vectors exchanged with that model.

use anyhow::{bail, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Ordered list of named blocks with fixed sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    blocks: Vec<(String, usize)>,
}

impl BlockLayout {
    pub fn new<S: Into<String>>(blocks: Vec<(S, usize)>) -> Self {
        Self {
            blocks: blocks
                .into_iter()
                .map(|(name, size)| (name.into(), size))
                .collect(),
        }
    }

    /// Total number of scalar entries across all blocks.
    pub fn total_size(&self) -> usize {
        self.blocks.iter().map(|(_, size)| size).sum()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|(name, _)| name.as_str())
    }

    pub fn size_of(&self, name: &str) -> Option<usize> {
        self.blocks
            .iter()
            .find(|(block, _)| block == name)
            .map(|(_, size)| *size)
    }

    /// Index range of a named block within the flat vector.
    pub fn range_of(&self, name: &str) -> Option<Range<usize>> {
        let mut offset = 0;
        for (block, size) in &self.blocks {
            if block == name {
                return Some(offset..offset + size);
            }
            offset += size;
        }
        None
    }
}

/// A flat vector with a named-block view defined by a [`BlockLayout`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVec {
    layout: BlockLayout,
    data: DVector<f64>,
}

impl BlockVec {
    pub fn zeros(layout: BlockLayout) -> Self {
        let size = layout.total_size();
        Self {
            layout,
            data: DVector::zeros(size),
        }
    }

    pub fn from_vector(layout: BlockLayout, data: DVector<f64>) -> Result<Self> {
        if data.len() != layout.total_size() {
            bail!(
                "Vector length {} does not match layout size {}.",
                data.len(),
                layout.total_size()
            );
        }
        Ok(Self { layout, data })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    pub fn block(&self, name: &str) -> Result<&[f64]> {
        let range = self
            .layout
            .range_of(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown block \"{name}\"."))?;
        Ok(&self.data.as_slice()[range])
    }

    pub fn set_block(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let range = self
            .layout
            .range_of(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown block \"{name}\"."))?;
        if values.len() != range.len() {
            bail!(
                "Block \"{name}\" has size {}, got {} values.",
                range.len(),
                values.len()
            );
        }
        self.data.as_mut_slice()[range].copy_from_slice(values);
        Ok(())
    }

    /// Sets every entry of a named block to the same value.
    pub fn fill_block(&mut self, name: &str, value: f64) -> Result<()> {
        let range = self
            .layout
            .range_of(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown block \"{name}\"."))?;
        self.data.as_mut_slice()[range].fill(value);
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.data
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.data
    }

    pub fn norm(&self) -> f64 {
        self.data.norm()
    }
}
