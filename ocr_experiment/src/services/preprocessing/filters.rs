// フィルターレジストリ - テクニック名 → 純粋な画像変換関数
// 画素レベルの処理はすべて image / imageproc のライブラリ関数に委譲する

use crate::services::config::FilterSettings;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba};
use imageproc::contrast::{equalize_histogram, otsu_level, threshold, ThresholdType};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 画像変換関数
pub type Filter = Arc<dyn Fn(&DynamicImage) -> DynamicImage + Send + Sync>;

/// 組み込みテクニック名
pub const BUILTIN_TECHNIQUES: &[&str] = &[
    "original",
    "grayscale",
    "binarization",
    "canny",
    "histogram",
    "invert",
    "mirror",
    "rotate",
    "resize",
];

const CANNY_LOW_THRESHOLD: f32 = 50.0;
const CANNY_HIGH_THRESHOLD: f32 = 100.0;

/// 名前で引けるフィルターの登録簿
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: BTreeMap<String, Filter>,
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 組み込みフィルターを登録したレジストリ
    pub fn with_builtin_filters(settings: &FilterSettings) -> Self {
        let mut registry = Self::new();
        registry.register("original", |image: &DynamicImage| image.clone());
        registry.register("grayscale", |image: &DynamicImage| image.grayscale());
        registry.register("binarization", binarize);
        registry.register("canny", |image: &DynamicImage| {
            DynamicImage::ImageLuma8(imageproc::edges::canny(
                &image.to_luma8(),
                CANNY_LOW_THRESHOLD,
                CANNY_HIGH_THRESHOLD,
            ))
        });
        registry.register("histogram", |image: &DynamicImage| {
            DynamicImage::ImageLuma8(equalize_histogram(&image.to_luma8()))
        });
        registry.register("invert", |image: &DynamicImage| {
            let mut inverted = image.clone();
            inverted.invert();
            inverted
        });
        registry.register("mirror", |image: &DynamicImage| image.fliph());

        let degrees = settings.rotation_degrees;
        registry.register("rotate", move |image: &DynamicImage| rotate(image, degrees));

        let settings = settings.clone();
        registry.register("resize", move |image: &DynamicImage| resize_to_dpi(image, &settings));
        registry
    }

    /// フィルターを登録（同名は置き換え）
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&DynamicImage) -> DynamicImage + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<Filter> {
        self.filters.get(name).cloned()
    }

}

/// 大津の閾値で二値化
fn binarize(image: &DynamicImage) -> DynamicImage {
    let luma = image.to_luma8();
    let level = otsu_level(&luma);
    DynamicImage::ImageLuma8(threshold(&luma, level, ThresholdType::Binary))
}

/// 任意角度の回転（直角はロスなし、それ以外は中心回転で余白を白に）
fn rotate(image: &DynamicImage, degrees: f32) -> DynamicImage {
    let normalized = degrees.rem_euclid(360.0);
    match normalized {
        d if d == 0.0 => image.clone(),
        d if d == 90.0 => image.rotate90(),
        d if d == 180.0 => image.rotate180(),
        d if d == 270.0 => image.rotate270(),
        d => DynamicImage::ImageRgba8(rotate_about_center(
            &image.to_rgba8(),
            d.to_radians(),
            Interpolation::Bilinear,
            Rgba([255, 255, 255, 255]),
        )),
    }
}

/// 想定DPIから目標DPIへ拡大縮小（長辺は上限で抑える）
fn resize_to_dpi(image: &DynamicImage, settings: &FilterSettings) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || settings.source_dpi == 0 {
        return image.clone();
    }

    let mut scale = settings.target_dpi as f64 / settings.source_dpi as f64;
    let longest = width.max(height) as f64;
    if longest * scale > settings.max_dimension as f64 {
        scale = settings.max_dimension as f64 / longest;
    }

    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    if (new_width, new_height) == (width, height) {
        return image.clone();
    }
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}
