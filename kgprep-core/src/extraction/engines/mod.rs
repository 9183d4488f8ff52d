//! OCR engine adapters.
//!
//! Every backend exposes the same `recognize(image) -> text` capability
//! through [`OcrEngine`]. Backends that cannot be called concurrently are
//! wrapped in [`SerializedEngine`], which owns the lock for that one
//! instance: callers keep rasterizing pages in parallel while inference
//! runs one page at a time.

use crate::config::OcrSettings;
use crate::error::{ExtractError, ExtractResult, PageError};
use crate::extraction::raster::ColorMode;
use crate::types::EngineKind;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[cfg(feature = "paddle")]
pub mod paddle;
#[cfg(feature = "tesseract")]
pub mod tesseract;

#[cfg(feature = "paddle")]
pub use paddle::PaddleRecognizer;
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractEngine;

/// A text recognizer shared by all page tasks of an extraction call.
pub trait OcrEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Pixel format the engine wants its input in
    fn color_mode(&self) -> ColorMode;

    fn recognize(&self, image: &DynamicImage) -> Result<String, PageError>;

    /// Same as `recognize`, calling `on_start` once the engine actually
    /// begins work on `image`. Engines that make callers wait their turn
    /// override this so the wait is not counted against the page.
    fn recognize_queued(
        &self,
        image: &DynamicImage,
        on_start: &mut dyn FnMut(),
    ) -> Result<String, PageError> {
        on_start();
        self.recognize(image)
    }
}

/// A backend that needs exclusive access while it runs inference.
pub trait Recognizer: Send {
    fn recognize(&mut self, image: &DynamicImage) -> Result<String, PageError>;
}

/// Adapts a non-reentrant [`Recognizer`] to [`OcrEngine`] with a mutex owned
/// by this instance.
pub struct SerializedEngine<R> {
    kind: EngineKind,
    color_mode: ColorMode,
    inner: Mutex<R>,
}

impl<R: Recognizer> SerializedEngine<R> {
    pub fn new(kind: EngineKind, color_mode: ColorMode, recognizer: R) -> Self {
        Self {
            kind,
            color_mode,
            inner: Mutex::new(recognizer),
        }
    }
}

impl<R: Recognizer> OcrEngine for SerializedEngine<R> {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, PageError> {
        self.recognize_queued(image, &mut || {})
    }

    fn recognize_queued(
        &self,
        image: &DynamicImage,
        on_start: &mut dyn FnMut(),
    ) -> Result<String, PageError> {
        // Poisoning is ignored; a recognizer keeps no state between calls
        let mut recognizer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        on_start();
        recognizer.recognize(image)
    }
}

/// Resolves an engine kind to a ready engine instance.
///
/// Resolution happens before any page work, so a missing backend surfaces
/// as `DependencyMissing` without side effects.
pub trait EngineProvider: Send + Sync {
    fn engine(&self, kind: EngineKind) -> ExtractResult<Arc<dyn OcrEngine>>;
}

/// One engine instance per kind. Engines are built outside the lock, so a
/// slow model load does not hold up lookups of other kinds.
#[derive(Default)]
struct EngineCache {
    engines: Mutex<HashMap<EngineKind, Arc<dyn OcrEngine>>>,
}

impl EngineCache {
    fn get(&self, kind: EngineKind) -> Option<Arc<dyn OcrEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Arc::clone)
    }

    fn get_or_build(
        &self,
        kind: EngineKind,
        build: impl FnOnce() -> ExtractResult<Arc<dyn OcrEngine>>,
    ) -> ExtractResult<Arc<dyn OcrEngine>> {
        if let Some(engine) = self.get(kind) {
            return Ok(engine);
        }

        let engine = build()?;
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        // Two callers may race to build the same kind; the first one cached wins
        if let Some(existing) = engines.get(&kind) {
            return Ok(Arc::clone(existing));
        }
        info!(engine = %kind, "initialized OCR engine");
        engines.insert(kind, Arc::clone(&engine));
        Ok(engine)
    }
}

/// Builds engines from [`OcrSettings`] and caches one instance per kind.
pub struct DefaultEngineProvider {
    settings: OcrSettings,
    cache: EngineCache,
}

impl DefaultEngineProvider {
    pub fn new(settings: OcrSettings) -> Self {
        Self {
            settings,
            cache: EngineCache::default(),
        }
    }

    fn build(&self, kind: EngineKind) -> ExtractResult<Arc<dyn OcrEngine>> {
        match kind {
            EngineKind::Native => Err(ExtractError::config(
                "native extraction has no OCR engine",
            )),
            EngineKind::FastOcr => self.build_tesseract(),
            EngineKind::BalancedOcr | EngineKind::AccurateOcr => self.build_paddle(kind),
        }
    }

    #[cfg(feature = "tesseract")]
    fn build_tesseract(&self) -> ExtractResult<Arc<dyn OcrEngine>> {
        let engine = TesseractEngine::new(&self.settings.tesseract)?;
        Ok(Arc::new(engine))
    }

    #[cfg(not(feature = "tesseract"))]
    fn build_tesseract(&self) -> ExtractResult<Arc<dyn OcrEngine>> {
        Err(ExtractError::missing(
            "tesseract",
            "built without the `tesseract` feature",
        ))
    }

    fn build_paddle(&self, kind: EngineKind) -> ExtractResult<Arc<dyn OcrEngine>> {
        let models = match kind {
            EngineKind::AccurateOcr => self.settings.accurate.as_ref(),
            _ => self.settings.balanced.as_ref(),
        }
        .ok_or_else(|| {
            ExtractError::missing("paddle", format!("no model bundle configured for {kind}"))
        })?;

        if let Some(absent) = models.required_files().into_iter().find(|p| !p.exists()) {
            return Err(ExtractError::missing(
                "paddle",
                format!("model file {} not found", absent.display()),
            ));
        }

        #[cfg(feature = "paddle")]
        {
            let recognizer = PaddleRecognizer::load(models)?;
            Ok(Arc::new(SerializedEngine::new(kind, ColorMode::Color, recognizer)))
        }
        #[cfg(not(feature = "paddle"))]
        {
            Err(ExtractError::missing(
                "paddle",
                "built without the `paddle` feature",
            ))
        }
    }
}

impl EngineProvider for DefaultEngineProvider {
    fn engine(&self, kind: EngineKind) -> ExtractResult<Arc<dyn OcrEngine>> {
        self.cache.get_or_build(kind, || self.build(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaddleModels;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Tracking {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Recognizer for Tracking {
        fn recognize(&mut self, _image: &DynamicImage) -> Result<String, PageError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("text".to_string())
        }
    }

    #[test]
    fn serialized_engine_runs_one_call_at_a_time() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(SerializedEngine::new(
            EngineKind::BalancedOcr,
            ColorMode::Color,
            Tracking {
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::clone(&peak),
            },
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let image = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
                    engine.recognize(&image).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "text");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    struct Fixed(EngineKind);

    impl OcrEngine for Fixed {
        fn kind(&self) -> EngineKind {
            self.0
        }

        fn color_mode(&self) -> ColorMode {
            ColorMode::Grayscale
        }

        fn recognize(&self, _image: &DynamicImage) -> Result<String, PageError> {
            Ok(String::new())
        }
    }

    #[test]
    fn serialized_engine_reports_start_after_taking_the_lock() {
        let engine = SerializedEngine::new(
            EngineKind::AccurateOcr,
            ColorMode::Color,
            Tracking {
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            },
        );
        let image = DynamicImage::ImageLuma8(GrayImage::new(2, 2));

        let guard = engine.inner.lock().unwrap();
        let started = AtomicUsize::new(0);
        thread::scope(|scope| {
            let call = scope.spawn(|| {
                engine.recognize_queued(&image, &mut || {
                    started.fetch_add(1, Ordering::SeqCst);
                })
            });
            thread::sleep(Duration::from_millis(100));
            // Still waiting for the lock
            assert_eq!(started.load(Ordering::SeqCst), 0);
            drop(guard);
            assert_eq!(call.join().unwrap().unwrap(), "text");
        });
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_build_does_not_block_other_kinds() {
        let cache = Arc::new(EngineCache::default());

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get_or_build(EngineKind::AccurateOcr, || {
                    thread::sleep(Duration::from_millis(500));
                    Ok(Arc::new(Fixed(EngineKind::AccurateOcr)) as Arc<dyn OcrEngine>)
                })
            })
        };
        thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let fast = cache
            .get_or_build(EngineKind::FastOcr, || {
                Ok(Arc::new(Fixed(EngineKind::FastOcr)) as Arc<dyn OcrEngine>)
            })
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(fast.kind(), EngineKind::FastOcr);

        assert_eq!(slow.join().unwrap().unwrap().kind(), EngineKind::AccurateOcr);
        let cached = cache
            .get_or_build(EngineKind::AccurateOcr, || panic!("engine built twice"))
            .unwrap();
        assert_eq!(cached.kind(), EngineKind::AccurateOcr);
    }

    #[test]
    fn failed_build_is_not_cached() {
        let cache = EngineCache::default();
        let err = cache
            .get_or_build(EngineKind::FastOcr, || {
                Err(ExtractError::missing("tesseract", "not installed"))
            })
            .err()
            .unwrap();
        assert!(err.is_fail_fast());
        assert!(cache.get(EngineKind::FastOcr).is_none());
    }

    #[test]
    fn native_is_not_an_ocr_engine() {
        let provider = DefaultEngineProvider::new(OcrSettings::default());
        let err = provider.engine(EngineKind::Native).err().unwrap();
        assert!(matches!(err, ExtractError::Configuration(_)));
    }

    #[test]
    fn unconfigured_paddle_models_are_missing() {
        let provider = DefaultEngineProvider::new(OcrSettings::default());
        let err = provider.engine(EngineKind::BalancedOcr).err().unwrap();
        assert!(matches!(err, ExtractError::DependencyMissing { backend: "paddle", .. }));
    }

    #[test]
    fn absent_model_files_are_missing() {
        let settings = OcrSettings {
            accurate: Some(PaddleModels {
                det_model_path: "/nonexistent/det.onnx".into(),
                rec_model_path: "/nonexistent/rec.onnx".into(),
                char_dict_path: "/nonexistent/keys.txt".into(),
                cls_model_path: None,
            }),
            ..OcrSettings::default()
        };
        let provider = DefaultEngineProvider::new(settings);
        let err = provider.engine(EngineKind::AccurateOcr).err().unwrap();
        assert!(err.is_fail_fast());
    }
}
