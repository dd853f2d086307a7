//! Side-by-side collage composition.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{
    codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, DynamicImage, ImageReader, RgbImage,
};

use crate::{
    error::{Error, Result},
    utility::partial_path,
};

const JPEG_QUALITY: u8 = 95;

/// Tiles to use for `stock_count` images: 0 below two, else as many as fit at
/// `min_tile_width` (at least two), capped by what is in stock.
pub fn choose_collage_count(stock_count: usize, canvas_width: u32, min_tile_width: u32) -> usize {
    if stock_count < 2 {
        return 0;
    }
    let max_columns = (canvas_width / min_tile_width.max(1)).max(2) as usize;
    stock_count.min(max_columns)
}

/// Splits `width` into `cols` columns; leftover pixels go to the leftmost ones.
pub fn column_widths(width: u32, cols: usize) -> Vec<u32> {
    if cols == 0 {
        return Vec::new();
    }
    let cols_u32 = cols as u32;
    let base = width / cols_u32;
    let remainder = (width % cols_u32) as usize;
    (0..cols)
        .map(|i| base + u32::from(i < remainder))
        .collect()
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    // board images routinely exceed the default decoder limits
    reader.no_limits();
    Ok(reader.decode()?)
}

/// Aspect-fills each image into its column and writes a JPEG to `target`.
pub fn compose_collage(images: &[PathBuf], width: u32, height: u32, target: &Path) -> Result<PathBuf> {
    if images.len() < 2 {
        return Err(Error::Collage(format!(
            "need at least 2 images, got {}",
            images.len()
        )));
    }

    let widths = column_widths(width, images.len());
    let mut canvas = RgbImage::new(width, height);
    let mut x = 0i64;
    for (path, tile_w) in images.iter().zip(&widths) {
        let tile = open_image(path)?
            .resize_to_fill(*tile_w, height, FilterType::Lanczos3)
            .to_rgb8();
        imageops::replace(&mut canvas, &tile, x, 0);
        x += i64::from(*tile_w);
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(target);
    let written = (|| -> Result<()> {
        let mut out = BufWriter::new(File::create(&tmp)?);
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&canvas)?;
        out.flush()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, target)?;
    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn collage_count_bounds() {
        assert_eq!(choose_collage_count(0, 1920, 500), 0);
        assert_eq!(choose_collage_count(1, 1920, 500), 0);
        assert_eq!(choose_collage_count(2, 1920, 500), 2);
        assert_eq!(choose_collage_count(10, 1920, 500), 3);
        assert_eq!(choose_collage_count(10, 1920, 1500), 2);
        assert_eq!(choose_collage_count(10, 1920, 480), 4);
    }

    #[test]
    fn widths_split_evenly_with_left_remainder() {
        assert_eq!(column_widths(1920, 4), vec![480, 480, 480, 480]);
        assert_eq!(column_widths(1920, 3), vec![640, 640, 640]);
        assert_eq!(column_widths(1921, 4), vec![481, 480, 480, 480]);
        assert_eq!(column_widths(1923, 4), vec![481, 481, 481, 480]);
    }

    #[test]
    fn single_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = compose_collage(&[dir.path().join("a.png")], 100, 50, &dir.path().join("c.jpg"))
            .unwrap_err();
        assert!(matches!(err, Error::Collage(_)));
    }

    #[test]
    fn composes_columns_left_to_right() {
        let dir = tempfile::tempdir().unwrap();
        let red = dir.path().join("red.png");
        let blue = dir.path().join("blue.png");
        RgbImage::from_pixel(30, 60, Rgb([255, 0, 0])).save(&red).unwrap();
        RgbImage::from_pixel(60, 30, Rgb([0, 0, 255])).save(&blue).unwrap();

        let target = dir.path().join("out").join("collage.jpg");
        let out = compose_collage(&[red, blue], 101, 40, &target).unwrap();
        assert_eq!(out, target);
        assert!(!partial_path(&target).exists());

        let img = image::open(&target).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (101, 40));
        let left = img.get_pixel(10, 20);
        let right = img.get_pixel(90, 20);
        assert!(left[0] > 200 && left[2] < 60);
        assert!(right[2] > 200 && right[0] < 60);
    }
}
