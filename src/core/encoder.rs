//! Image encoder: decoder output to PNG data URI.

use crate::core::decoder::ReconstructedImage;
use crate::core::error::RelayError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Encodes a reconstructed image as `data:image/png;base64,...`.
pub fn encode(image: &ReconstructedImage) -> Result<String, RelayError> {
    let png = to_png(&image.0).map_err(|e| RelayError::Encoding(e.to_string()))?;
    Ok(format!("{PNG_DATA_URI_PREFIX}{}", STANDARD.encode(png)))
}

fn to_png(tensor: &Tensor) -> anyhow::Result<Vec<u8>> {
    let tensor = squeeze_all(&tensor.to_device(&Device::Cpu)?)?;

    let image = match *tensor.dims() {
        [height, width] => {
            let pixels = to_bytes(&tensor)?;
            GrayImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageLuma8)
        }
        [3, height, width] => {
            let pixels = to_bytes(&tensor.permute((1, 2, 0))?)?;
            RgbImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageRgb8)
        }
        [4, height, width] => {
            let pixels = to_bytes(&tensor.permute((1, 2, 0))?)?;
            RgbaImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageRgba8)
        }
        ref dims => anyhow::bail!("tensor of shape {dims:?} is not an image"),
    }
    .ok_or_else(|| anyhow::anyhow!("pixel buffer does not match image dimensions"))?;

    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Drops every dimension of size one.
fn squeeze_all(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let dims: Vec<usize> = tensor.dims().iter().copied().filter(|d| *d != 1).collect();
    tensor.reshape(dims)
}

/// Row-major `[0, 1]` floats to bytes, truncating like a `x * 255` byte cast.
fn to_bytes(tensor: &Tensor) -> candle_core::Result<Vec<u8>> {
    let values = tensor
        .to_dtype(DType::F32)?
        .clamp(0f32, 1f32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(values.into_iter().map(|v| (v * 255.0) as u8).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_png(uri: &str) -> DynamicImage {
        let data = uri.strip_prefix(PNG_DATA_URI_PREFIX).unwrap();
        image::load_from_memory(&STANDARD.decode(data).unwrap()).unwrap()
    }

    #[test]
    fn test_rgb_batch_image() {
        let tensor = Tensor::full(0.5f32, (1, 3, 4, 6), &Device::Cpu).unwrap();

        let uri = encode(&ReconstructedImage(tensor)).unwrap();

        assert!(uri.starts_with(PNG_DATA_URI_PREFIX));
        let png = decode_png(&uri).to_rgb8();
        assert_eq!(png.dimensions(), (6, 4));
        assert_eq!(png.get_pixel(0, 0).0, [127, 127, 127]);
    }

    #[test]
    fn test_channel_layout() {
        // red channel 1.0, others 0.0
        let red = Tensor::ones((1, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let rest = Tensor::zeros((2, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let tensor = Tensor::cat(&[&red, &rest], 0).unwrap();

        let png = decode_png(&encode(&ReconstructedImage(tensor)).unwrap()).to_rgb8();
        assert_eq!(png.get_pixel(1, 1).0, [255, 0, 0]);
    }

    #[test]
    fn test_grayscale_image() {
        let tensor = Tensor::zeros((1, 1, 3, 3), DType::F32, &Device::Cpu).unwrap();

        let png = decode_png(&encode(&ReconstructedImage(tensor)).unwrap());
        assert!(matches!(png, DynamicImage::ImageLuma8(_)));
        assert_eq!((png.width(), png.height()), (3, 3));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let tensor = Tensor::new(&[[-3f32, 0.0], [1.0, 7.5]], &Device::Cpu).unwrap();

        let png = decode_png(&encode(&ReconstructedImage(tensor)).unwrap()).to_luma8();
        assert_eq!(png.into_raw(), vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let tensor = Tensor::arange(0f32, 48f32, &Device::Cpu)
            .unwrap()
            .affine(1.0 / 48.0, 0.0)
            .unwrap()
            .reshape((1, 3, 4, 4))
            .unwrap();
        let image = ReconstructedImage(tensor);

        assert_eq!(encode(&image).unwrap(), encode(&image).unwrap());
    }

    #[test]
    fn test_rejects_non_image_shapes() {
        for shape in [vec![16], vec![5, 4, 4], vec![2, 3, 4, 4]] {
            let tensor = Tensor::zeros(shape.clone(), DType::F32, &Device::Cpu).unwrap();
            let err = encode(&ReconstructedImage(tensor)).unwrap_err();
            assert!(matches!(err, RelayError::Encoding(_)), "shape {shape:?}");
        }
    }
}
