//! CLIP image preprocessing.
//!
//! Resize so the shorter side matches the model resolution, center-crop to a
//! square, then normalize each channel with the CLIP training statistics.

use eyre::WrapErr as _;

/// Per-channel mean of the CLIP training set (RGB).
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// Per-channel standard deviation of the CLIP training set (RGB).
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Convert an image into a `[3, size, size]` f32 tensor on `device`.
pub fn image_to_tensor(
    image: &image::DynamicImage,
    size: usize,
    device: &candle_core::Device,
) -> eyre::Result<candle_core::Tensor> {
    let side = u32::try_from(size).wrap_err("image size out of range")?;
    let rgb = image
        .resize_to_fill(side, side, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    // HWC u8 -> CHW f32 in [0, 1]
    let pixels =
        candle_core::Tensor::from_vec(rgb.into_raw(), (size, size, 3), &candle_core::Device::Cpu)
            .wrap_err("failed to create pixel tensor")?
            .permute((2, 0, 1))
            .wrap_err("failed to permute to channel-first")?
            .to_dtype(candle_core::DType::F32)
            .wrap_err("failed to convert pixels to f32")?
            .affine(1.0 / 255.0, 0.0)
            .wrap_err("failed to rescale pixels")?;

    let mean = candle_core::Tensor::new(&CLIP_MEAN, &candle_core::Device::Cpu)
        .and_then(|t| t.reshape((3, 1, 1)))
        .wrap_err("failed to create mean tensor")?;
    let std = candle_core::Tensor::new(&CLIP_STD, &candle_core::Device::Cpu)
        .and_then(|t| t.reshape((3, 1, 1)))
        .wrap_err("failed to create std tensor")?;

    pixels
        .broadcast_sub(&mean)
        .and_then(|t| t.broadcast_div(&std))
        .and_then(|t| t.to_device(device))
        .wrap_err("failed to normalize pixels")
}

/// Stack several preprocessed images into a `[batch, 3, size, size]` tensor.
pub fn images_to_batch(
    images: &[image::DynamicImage],
    size: usize,
    device: &candle_core::Device,
) -> eyre::Result<candle_core::Tensor> {
    let tensors = images
        .iter()
        .map(|image| image_to_tensor(image, size, device))
        .collect::<eyre::Result<Vec<_>>>()?;

    candle_core::Tensor::stack(&tensors, 0).wrap_err("failed to stack image batch")
}
