//! PDF page rasterization for the OCR path.

use crate::error::{ExtractResult, PageError};
use image::DynamicImage;

/// Pixel format an OCR engine expects its page images in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Grayscale,
    Color,
}

impl ColorMode {
    pub fn convert(self, image: DynamicImage) -> DynamicImage {
        match self {
            ColorMode::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
            ColorMode::Color => DynamicImage::ImageRgb8(image.to_rgb8()),
        }
    }
}

/// Renders single PDF pages to images. Called concurrently from page workers.
pub trait PageRasterizer: Send + Sync {
    /// Check the backing library can be loaded. Called once per job before
    /// any page work starts.
    fn ensure_available(&self) -> ExtractResult<()> {
        Ok(())
    }

    /// Render 1-based `page` of `pdf_bytes` in the given color mode.
    fn rasterize(
        &self,
        pdf_bytes: &[u8],
        page: u32,
        mode: ColorMode,
    ) -> Result<DynamicImage, PageError>;

    fn name(&self) -> &str;
}

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium {
    use super::{ColorMode, PageRasterizer};
    use crate::error::{ExtractError, ExtractResult, PageError};
    use image::DynamicImage;
    use pdfium_render::prelude::*;
    use std::path::PathBuf;
    use tracing::debug;

    /// Rasterizer backed by a pdfium shared library, bound per call.
    #[derive(Debug, Clone)]
    pub struct PdfiumRasterizer {
        library_dir: Option<PathBuf>,
        dpi: u32,
    }

    impl PdfiumRasterizer {
        pub fn new(library_dir: Option<PathBuf>, dpi: u32) -> Self {
            Self {
                library_dir,
                dpi: dpi.max(72),
            }
        }

        fn bind(&self) -> Result<Pdfium, PdfiumError> {
            let bindings = match &self.library_dir {
                Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))?,
                None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())?,
            };
            Ok(Pdfium::new(bindings))
        }
    }

    impl PageRasterizer for PdfiumRasterizer {
        fn ensure_available(&self) -> ExtractResult<()> {
            self.bind()
                .map(|_| ())
                .map_err(|e| ExtractError::missing("pdfium", e.to_string()))
        }

        fn rasterize(
            &self,
            pdf_bytes: &[u8],
            page: u32,
            mode: ColorMode,
        ) -> Result<DynamicImage, PageError> {
            let fail = |reason: String| PageError::Rasterize { page, reason };

            let pdfium = self.bind().map_err(|e| fail(e.to_string()))?;
            let document = pdfium
                .load_pdf_from_byte_vec(pdf_bytes.to_vec(), None)
                .map_err(|e| fail(e.to_string()))?;

            let index = page
                .checked_sub(1)
                .and_then(|i| u16::try_from(i).ok())
                .ok_or_else(|| fail("page index out of range".to_string()))?;
            let pdf_page = document.pages().get(index).map_err(|e| fail(e.to_string()))?;

            let width_pt = pdf_page.width().value.max(1.0);
            let target_width = ((width_pt / 72.0) * self.dpi as f32).round().max(256.0) as i32;
            let render_config = PdfRenderConfig::new()
                .set_target_width(target_width)
                .rotate_if_landscape(PdfPageRenderRotation::None, true);

            let image = pdf_page
                .render_with_config(&render_config)
                .map_err(|e| fail(e.to_string()))?
                .as_image();
            debug!(page, width = image.width(), height = image.height(), "rasterized page");

            Ok(mode.convert(image))
        }

        fn name(&self) -> &str {
            "pdfium"
        }
    }
}

/// Stand-in used when the crate is built without a rasterization backend.
/// Fails the availability check so OCR jobs are rejected up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRasterizer;

impl PageRasterizer for UnavailableRasterizer {
    fn ensure_available(&self) -> ExtractResult<()> {
        Err(crate::error::ExtractError::missing(
            "rasterizer",
            "built without the `pdfium` feature",
        ))
    }

    fn rasterize(
        &self,
        _pdf_bytes: &[u8],
        page: u32,
        _mode: ColorMode,
    ) -> Result<DynamicImage, PageError> {
        Err(PageError::Rasterize {
            page,
            reason: "no rasterization backend".to_string(),
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// The rasterizer this build supports, configured from `OcrSettings`.
pub fn default_rasterizer(settings: &crate::config::OcrSettings) -> Box<dyn PageRasterizer> {
    #[cfg(feature = "pdfium")]
    {
        Box::new(PdfiumRasterizer::new(
            settings.pdfium_library_path.clone(),
            settings.dpi,
        ))
    }
    #[cfg(not(feature = "pdfium"))]
    {
        let _ = settings;
        Box::new(UnavailableRasterizer)
    }
}
