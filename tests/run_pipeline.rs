mod common;

use candle_core::{DType, Device, Tensor};
use common::scratch;
use image::{GenericImageView, Rgb, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use synoid_sr::error::{SrError, Stage};
use synoid_sr::{run_pipeline, MediaAsset, MediaKind, RunOutcome, SrConfig};

/// Small ESPCN-shaped weight file: every weight `value`, zero biases.
fn write_weights(path: &Path, scale: usize, value: f32) {
    let dev = Device::Cpu;
    let mut map = HashMap::new();
    let shapes = [(8, 3, 5), (4, 8, 3), (3 * scale * scale, 4, 3)];
    for (name, (o, i, k)) in ["conv1", "conv2", "conv3"].iter().zip(shapes) {
        map.insert(
            format!("{}.weight", name),
            Tensor::ones((o, i, k, k), DType::F32, &dev)
                .and_then(|t| t.affine(value as f64, 0.0))
                .unwrap(),
        );
        map.insert(format!("{}.bias", name), Tensor::zeros(o, DType::F32, &dev).unwrap());
    }
    candle_core::safetensors::save(&map, path).unwrap();
}

fn config_for(model: &Path, scale: u32) -> SrConfig {
    let mut config = SrConfig::default();
    config.model.path = model.to_path_buf();
    config.model.scale = scale;
    config
}

#[tokio::test]
async fn test_image_run_through_a_loaded_model() {
    let dir = scratch("run_image");
    let model = dir.join("x2.safetensors");
    write_weights(&model, 2, 0.01);
    let input = dir.join("in.png");
    let output = dir.join("out.png");
    RgbImage::from_pixel(10, 8, Rgb([90, 120, 150])).save(&input).unwrap();

    let asset = MediaAsset::new(&input, MediaKind::Image);
    let outcome = run_pipeline(&asset, &output, &config_for(&model, 2))
        .await
        .unwrap();

    match outcome {
        RunOutcome::Image(report) => {
            assert_eq!((report.width, report.height), (20, 16));
            assert_eq!(report.output, output);
        }
        other => panic!("expected an image outcome, got {:?}", other),
    }
    assert_eq!(image::open(&output).unwrap().dimensions(), (20, 16));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_model_fails_setup() {
    let dir = scratch("run_no_model");
    let input = dir.join("in.png");
    RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])).save(&input).unwrap();

    let asset = MediaAsset::new(&input, MediaKind::Image);
    let failure = run_pipeline(&asset, &dir.join("out.png"), &config_for(&dir.join("absent.safetensors"), 2))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Setup);
    assert!(matches!(failure.cause, SrError::ModelLoad { .. }));
    assert!(!dir.join("out.png").exists());

    let _ = std::fs::remove_dir_all(&dir);
}
