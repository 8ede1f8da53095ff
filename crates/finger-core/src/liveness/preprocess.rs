use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;

pub const RESIZE_SIDE: u32 = 280;
pub const CROP_SIDE: u32 = 224;
pub const CROP_COUNT: usize = 10;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Top-left origins of the five crops: four corners, then the center.
pub fn crop_origins() -> [(u32, u32); 5] {
    let far = RESIZE_SIDE - CROP_SIDE;
    let mid = far / 2;
    [(0, 0), (far, 0), (0, far), (far, far), (mid, mid)]
}

/// Resizes to 280x280 and returns the five crops of the image followed by
/// the five crops of its horizontal mirror.
pub fn ten_crop(image: &RgbImage) -> Vec<RgbImage> {
    let resized = imageops::resize(image, RESIZE_SIDE, RESIZE_SIDE, FilterType::Triangle);
    let mirrored = imageops::flip_horizontal(&resized);
    let mut crops = Vec::with_capacity(CROP_COUNT);
    for source in [&resized, &mirrored] {
        for (x, y) in crop_origins() {
            crops.push(imageops::crop_imm(source, x, y, CROP_SIDE, CROP_SIDE).to_image());
        }
    }
    crops
}

/// Stacks crops into an `(N, 3, 224, 224)` tensor normalised with the
/// ImageNet channel statistics.
pub fn crops_to_tensor(crops: &[RgbImage], device: &Device) -> candle_core::Result<Tensor> {
    let plane = (CROP_SIDE * CROP_SIDE) as usize;
    let mut data = vec![0f32; crops.len() * 3 * plane];
    for (index, crop) in crops.iter().enumerate() {
        let base = index * 3 * plane;
        for (offset, pixel) in crop.pixels().enumerate() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                data[base + channel * plane + offset] =
                    (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            }
        }
    }
    Tensor::from_vec(
        data,
        (crops.len(), 3, CROP_SIDE as usize, CROP_SIDE as usize),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn produces_ten_crops_of_model_size() {
        let image = RgbImage::from_pixel(320, 240, Rgb([10, 20, 30]));
        let crops = ten_crop(&image);
        assert_eq!(crops.len(), CROP_COUNT);
        assert!(crops.iter().all(|c| c.dimensions() == (CROP_SIDE, CROP_SIDE)));
    }

    #[test]
    fn corner_crops_come_from_the_corners() {
        let image = RgbImage::from_fn(RESIZE_SIDE, RESIZE_SIDE, |x, y| {
            Rgb([(x / 4) as u8, (y / 4) as u8, 0])
        });
        let crops = ten_crop(&image);
        assert_eq!(crops[0].get_pixel(0, 0), image.get_pixel(0, 0));
        assert_eq!(crops[3].get_pixel(0, 0), image.get_pixel(56, 56));
        assert_eq!(crops[4].get_pixel(0, 0), image.get_pixel(28, 28));
        // mirrored top-left crop starts at the source image's right edge
        assert_eq!(crops[5].get_pixel(0, 0), image.get_pixel(RESIZE_SIDE - 1, 0));
    }

    #[test]
    fn tensor_is_channel_first_and_normalised() {
        let crops = vec![RgbImage::from_pixel(CROP_SIDE, CROP_SIDE, Rgb([255, 0, 128]))];
        let tensor = crops_to_tensor(&crops, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);

        let red = tensor.get(0).unwrap().get(0).unwrap().get(0).unwrap().get(0).unwrap();
        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((red.to_scalar::<f32>().unwrap() - expected).abs() < 1e-5);

        let green = tensor.get(0).unwrap().get(1).unwrap().get(5).unwrap().get(7).unwrap();
        let expected = -IMAGENET_MEAN[1] / IMAGENET_STD[1];
        assert!((green.to_scalar::<f32>().unwrap() - expected).abs() < 1e-5);
    }
}
