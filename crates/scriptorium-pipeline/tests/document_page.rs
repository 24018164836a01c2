//! Integration test: binarize and rescale a synthetic scanned page through the full pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use scriptorium_pipeline::otsu2d::{INK, PAPER};
use scriptorium_pipeline::{
    Lanczos4Scaler, ParamValue, Pipeline, PipelineError, Raster, ScalerParams, Transform,
    Transformation, TransformationKind, TransformationSpec, TwoDOtsuBinarizer,
};

const PAGE_WIDTH: u32 = 1000;
const PAGE_HEIGHT: u32 = 1200;

/// Deterministic noise in `[-10, 10]`.
fn noise(x: u32, y: u32) -> i16 {
    let h = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ x.wrapping_mul(y);
    i16::try_from(h % 21).unwrap() - 10
}

fn shade(base: [u8; 3], delta: i16) -> Rgb<u8> {
    Rgb(base.map(|c| u8::try_from((i16::from(c) + delta).clamp(0, 255)).unwrap()))
}

/// Aged paper with vertical ink strokes covering exactly 30% of the page.
fn synthetic_page() -> RgbImage {
    RgbImage::from_fn(PAGE_WIDTH, PAGE_HEIGHT, |x, y| {
        let n = noise(x, y);
        if x % 20 < 6 {
            shade([30, 25, 20], n)
        } else {
            shade([240, 232, 220], n)
        }
    })
}

fn ink_fraction(raster: &Raster) -> f64 {
    let gray = raster.as_gray().expect("binarizer output is single-channel");
    let ink = gray.pixels().filter(|p| p.0[0] == INK).count();
    ink as f64 / (gray.width() * gray.height()) as f64
}

#[test]
fn binarized_page_matches_ground_truth_ink_coverage() {
    let pipeline = Pipeline::default();
    pipeline
        .set_original(&Raster::Rgb(synthetic_page()))
        .unwrap();
    pipeline
        .add_transformation(Arc::new(Transformation::from(TwoDOtsuBinarizer::new())))
        .unwrap();

    let processed = pipeline.processed().unwrap();
    assert_eq!((processed.width(), processed.height()), (PAGE_WIDTH, PAGE_HEIGHT));
    assert!(
        processed
            .as_gray()
            .unwrap()
            .pixels()
            .all(|p| p.0[0] == INK || p.0[0] == PAPER)
    );

    let fraction = ink_fraction(&processed);
    eprintln!("ink fraction: {fraction:.4}");
    assert!(
        (fraction - 0.30).abs() <= 0.05,
        "ink fraction {fraction} not within 5 points of 0.30"
    );

    let preview = pipeline.preview().unwrap();
    assert_eq!((preview.width(), preview.height()), (PAGE_WIDTH, PAGE_HEIGHT));
    let preview_fraction = ink_fraction(&preview);
    assert!(
        (preview_fraction - 0.30).abs() <= 0.05,
        "preview ink fraction {preview_fraction}"
    );
}

#[test]
fn regional_binarization_also_tracks_coverage() {
    let binarizer = TwoDOtsuBinarizer::new();
    assert!(binarizer.set_param("region_count", ParamValue::Int(3)));
    let out = binarizer.apply(&Raster::Rgb(synthetic_page())).unwrap();
    let fraction = ink_fraction(&out);
    assert!((fraction - 0.30).abs() <= 0.05, "ink fraction {fraction}");
    assert_eq!(binarizer.last_thresholds().len(), 9);
}

#[test]
fn scaled_then_binarized_chain() {
    let pipeline = Pipeline::default();
    pipeline
        .set_original(&Raster::Rgb(synthetic_page()))
        .unwrap();
    pipeline
        .add_transformation(Arc::new(Transformation::from(Lanczos4Scaler::for_dpi(
            600.0, 300.0,
        ))))
        .unwrap();
    pipeline
        .add_transformation(Arc::new(Transformation::from(TwoDOtsuBinarizer::new())))
        .unwrap();

    let processed = pipeline.processed().unwrap();
    assert_eq!((processed.width(), processed.height()), (500, 600));
    let fraction = ink_fraction(&processed);
    assert!((fraction - 0.30).abs() <= 0.05, "ink fraction {fraction}");

    let report = pipeline.quality().unwrap();
    // Dimensions differ from the original, so both metrics are undefined.
    assert!(report.psnr.abs() < f64::EPSILON);
    assert!(report.ssim.abs() < f64::EPSILON);
}

#[test]
fn reprocess_is_bit_identical() {
    let pipeline = Pipeline::default();
    let page = image::imageops::crop_imm(&synthetic_page(), 0, 0, 300, 240).to_image();
    pipeline.set_original(&Raster::Rgb(page)).unwrap();
    pipeline
        .add_transformation(Arc::new(Transformation::from(TwoDOtsuBinarizer::new())))
        .unwrap();

    pipeline.reprocess().unwrap();
    let first = pipeline.processed().unwrap();
    pipeline.reprocess().unwrap();
    let second = pipeline.processed().unwrap();
    assert_eq!(first, second);
}

#[test]
fn rollback_keeps_previous_result() {
    let pipeline = Pipeline::default();
    let page = image::imageops::crop_imm(&synthetic_page(), 0, 0, 40, 40).to_image();
    pipeline.set_original(&Raster::Rgb(page)).unwrap();
    pipeline
        .add_transformation(Arc::new(Transformation::from(TwoDOtsuBinarizer::new())))
        .unwrap();
    let before = pipeline.processed().unwrap();

    // 40 px * 0.1 = 4 px, then 4 px * 0.1 rounds to nothing.
    let shrink = || {
        Arc::new(Transformation::from(Lanczos4Scaler::with_params(
            ScalerParams {
                scale_factor: 0.1,
                ..ScalerParams::default()
            },
        )))
    };
    pipeline.add_transformation(shrink()).unwrap();
    let err = pipeline.add_transformation(shrink()).unwrap_err();
    assert!(matches!(err, PipelineError::TransformationFailed { .. }));
    assert_eq!(pipeline.transformation_count(), 2);

    pipeline.remove_transformation(1).unwrap();
    assert_eq!(pipeline.processed().unwrap(), before);
}

#[test]
fn process_decodes_and_runs_chain() {
    let page = image::imageops::crop_imm(&synthetic_page(), 0, 0, 200, 160).to_image();
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(page)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let chain: Vec<TransformationSpec> = serde_json::from_str(
        r#"[
            { "kind": "two_d_otsu", "params": { "morph_kernel_size": 0 } },
            { "kind": "lanczos4", "params": { "scale_factor": 0.5 } }
        ]"#,
    )
    .unwrap();
    assert_eq!(chain[0].kind, TransformationKind::TwoDOtsu);

    let (processed, report) =
        scriptorium_pipeline::process(&png, scriptorium_pipeline::PipelineConfig::default(), &chain)
            .unwrap();
    assert_eq!((processed.width(), processed.height()), (100, 80));
    assert!(report.psnr.abs() < f64::EPSILON);
}

#[test]
fn process_rejects_empty_bytes() {
    let result = scriptorium_pipeline::process(
        &[],
        scriptorium_pipeline::PipelineConfig::default(),
        &[],
    );
    assert!(matches!(result, Err(PipelineError::EmptyInput)));
}
