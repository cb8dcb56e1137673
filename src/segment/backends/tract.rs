#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::segment::backend::SegmentationBackend;
use crate::segment::result::{Mask, SeedPoint, SegmentationResult};

/// Tract-based backend for a point-prompted ONNX segmentation model.
///
/// Expected graph:
/// - input 0: image `[1, 3, S, S]` f32 in `0..1`
/// - input 1: point coords `[1, 1, 2]` f32 in model pixel space
/// - input 2: point labels `[1, 1]` f32 (1 = foreground)
/// - output 0: mask logits `[1, 1, S, S]`
/// - output 1: scores `[1, 1]`
///
/// Source images are resized to `S x S`; the mask is resized back with
/// nearest-neighbour sampling.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    mask_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1usize, 3, side, side)),
            )
            .context("failed to set image input fact")?
            .with_input_fact(1, InferenceFact::dt_shape(f32::datum_type(), tvec!(1usize, 1, 2)))
            .context("failed to set point input fact")?
            .with_input_fact(2, InferenceFact::dt_shape(f32::datum_type(), tvec!(1usize, 1)))
            .context("failed to set label input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            mask_threshold: 0.0,
        })
    }

    /// Override the mask logit threshold (pixel covered iff logit > threshold).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold;
        self
    }

    fn build_image_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(image, side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn build_prompt_inputs(&self, image: &RgbImage, seed: SeedPoint) -> Result<(Tensor, Tensor)> {
        let (width, height) = image.dimensions();
        prompt_tensors(seed, width, height, self.input_size)
    }

    fn extract_mask(&self, logits: &Tensor, width: u32, height: u32) -> Result<Mask> {
        mask_from_logits(logits, self.input_size, self.mask_threshold, width, height)
    }

    fn extract_score(&self, scores: &Tensor) -> Result<f32> {
        let view = scores
            .to_array_view::<f32>()
            .context("score output tensor was not f32")?;
        let best = view.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if best.is_finite() {
            Ok(best)
        } else {
            Ok(0.0)
        }
    }
}

/// Point coords scaled from source pixels into the `side x side` model frame.
fn prompt_tensors(seed: SeedPoint, width: u32, height: u32, side: u32) -> Result<(Tensor, Tensor)> {
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot segment a zero-sized image"));
    }
    let scale_x = side as f32 / width as f32;
    let scale_y = side as f32 / height as f32;
    let coords = tract_ndarray::Array3::from_shape_vec(
        (1, 1, 2),
        vec![seed.x as f32 * scale_x, seed.y as f32 * scale_y],
    )?;
    let labels = tract_ndarray::Array2::from_shape_vec((1, 1), vec![1.0f32])?;
    Ok((coords.into_tensor(), labels.into_tensor()))
}

/// Nearest-neighbour resample of `side x side` logits onto the source frame;
/// a pixel is covered iff its logit is strictly above `threshold`.
fn mask_from_logits(
    logits: &Tensor,
    side: u32,
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Mask> {
    let view = logits
        .to_array_view::<f32>()
        .context("mask output tensor was not f32")?;
    let side = side as usize;
    if view.len() != side * side {
        return Err(anyhow!(
            "mask output has {} values, expected {}",
            view.len(),
            side * side
        ));
    }
    let flat: Vec<f32> = view.iter().cloned().collect();
    let mut mask = Mask::empty(width, height);
    for y in 0..height {
        let my = ((y as u64 * side as u64) / height as u64) as usize;
        for x in 0..width {
            let mx = ((x as u64 * side as u64) / width as u64) as usize;
            if flat[my * side + mx] > threshold {
                mask.set(x, y, true);
            }
        }
    }
    Ok(mask)
}

impl SegmentationBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn segment(&mut self, image: &RgbImage, seed: SeedPoint) -> Result<SegmentationResult> {
        let (width, height) = image.dimensions();
        let (coords, labels) = self.build_prompt_inputs(image, seed)?;
        let pixels = self.build_image_input(image);
        let outputs = self
            .model
            .run(tvec!(pixels.into(), coords.into(), labels.into()))
            .context("ONNX inference failed")?;
        let logits = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no mask output"))?;
        let scores = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no score output"))?;
        let mask = self.extract_mask(logits, width, height)?;
        let confidence = self.extract_score(scores)?;
        Ok(SegmentationResult::new(mask, confidence))
    }

    fn warm_up(&mut self) -> Result<()> {
        let probe = RgbImage::new(self.input_size, self.input_size);
        self.segment(&probe, SeedPoint::center_of(self.input_size, self.input_size))?;
        Ok(())
    }
}
