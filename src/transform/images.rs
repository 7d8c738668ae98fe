use std::fs;

use anyhow::bail;
use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::imageops::FilterType as Resample;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::engine::{Context, Task, TaskResult};
use crate::error::ImageProcessError;
use crate::transform::svg;
use crate::{Layout, io};

const JPEG_QUALITY: u8 = 85;

/// Optimises raster and vector images into the output root.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeImages;

impl Task for OptimizeImages {
    fn run(&self, ctx: &Context) -> TaskResult {
        let (written, errors) = optimize_all(ctx.layout())?;
        tracing::info!("optimised {} images", written);

        if let Some(first) = errors.into_iter().next() {
            bail!("{written} images optimised, first failure: {first}");
        }

        Ok(())
    }
}

/// Optimises every image, collecting the failures instead of stopping.
pub fn optimize_all(layout: &Layout) -> anyhow::Result<(usize, Vec<ImageProcessError>)> {
    let root = layout.images();
    let icons = layout.icons();

    let files: Vec<Utf8PathBuf> = io::find(&root, "**/*")?
        .into_iter()
        .filter(|path| {
            let ext = extension(path);
            let icon = ext == "svg" && path.starts_with(&icons);
            matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "svg") && !icon
        })
        .collect();

    let results: Vec<_> = files
        .into_par_iter()
        .map(|path| {
            let output = io::rebase(&path, &root, &layout.dist_images());
            optimize_file(&path, &output)
        })
        .collect();

    let mut written = 0;
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                tracing::error!("{e}");
                errors.push(e);
            }
        }
    }

    Ok((written, errors))
}

/// Writes the smaller of the original and the optimised version of `path`.
pub fn optimize_file(path: &Utf8Path, output: &Utf8Path) -> Result<(), ImageProcessError> {
    let io_err = |source| ImageProcessError::Io {
        path: path.to_owned(),
        source,
    };
    let image_err = |source| ImageProcessError::Image {
        path: path.to_owned(),
        source,
    };

    let original = fs::read(path).map_err(io_err)?;
    let optimized = match extension(path).as_str() {
        "png" => encode_png(&image::load_from_memory(&original).map_err(image_err)?)
            .map_err(image_err)?,
        "jpg" | "jpeg" => encode_jpeg(&image::load_from_memory(&original).map_err(image_err)?)
            .map_err(image_err)?,
        "svg" => svg::minify(&String::from_utf8_lossy(&original)).into_bytes(),
        _ => original.clone(),
    };

    let data = if optimized.len() < original.len() {
        optimized
    } else {
        original
    };

    io::write(output, data).map_err(io_err)
}

fn encode_png(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        ExtendedColorType::from(img.color()),
    )?;
    Ok(out)
}

fn encode_jpeg(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let rgb = img.to_rgb8();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.write_image(&rgb, rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
    Ok(out)
}

fn extension(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_ascii_lowercase()
}

/// Resizes the images waiting in the crop folder.
///
/// With both dimensions the image is scaled to cover the box and then
/// centre-cropped to it; with one, it is scaled keeping the aspect ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crop {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Crop {
    /// Name suffix of the cropped files.
    fn suffix(&self) -> Option<u32> {
        self.width.or(self.height)
    }

    /// `None` when neither dimension is set.
    pub fn resize(&self, img: &DynamicImage) -> Option<DynamicImage> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(img.resize_to_fill(w, h, Resample::Lanczos3)),
            (Some(w), None) => Some(img.resize(w, u32::MAX, Resample::Lanczos3)),
            (None, Some(h)) => Some(img.resize(u32::MAX, h, Resample::Lanczos3)),
            (None, None) => None,
        }
    }

    /// Crops every file, returning the paths written.
    pub fn crop_all(&self, layout: &Layout) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let Some(suffix) = self.suffix() else {
            bail!("crop needs --width, --height or both");
        };

        let mut written = Vec::new();
        let mut errors = Vec::new();
        for path in io::find(&layout.crop(), "*.*")? {
            let output = layout.cropped().join(format!(
                "{}_{suffix}.{}",
                path.file_stem().unwrap_or_default(),
                path.extension().unwrap_or_default()
            ));

            match self.crop_file(&path, &output) {
                Ok(()) => written.push(output),
                Err(e) => {
                    tracing::error!("{e}");
                    errors.push(e);
                }
            }
        }

        match errors.into_iter().next() {
            None => Ok(written),
            Some(first) => Err(first.into()),
        }
    }

    fn crop_file(&self, path: &Utf8Path, output: &Utf8Path) -> Result<(), ImageProcessError> {
        let image_err = |source| ImageProcessError::Image {
            path: path.to_owned(),
            source,
        };

        let img = image::open(path).map_err(image_err)?;
        let resized = self.resize(&img).unwrap_or(img);

        let resized = match extension(path).as_str() {
            "jpg" | "jpeg" => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => resized,
        };

        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir).map_err(|source| ImageProcessError::Io {
                path: output.to_owned(),
                source,
            })?;
        }

        resized.save(output).map_err(image_err)
    }
}

impl Task for Crop {
    fn run(&self, ctx: &Context) -> TaskResult {
        let written = self.crop_all(ctx.layout())?;
        tracing::info!("cropped {} images", written.len());
        Ok(())
    }
}
