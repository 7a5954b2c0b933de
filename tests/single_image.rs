mod common;

use common::*;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::sync::atomic::Ordering;
use synoid_sr::engine::codec::{ChannelOrder, InputShape, TensorCodec};
use synoid_sr::error::SrError;
use synoid_sr::pipeline::image::{upscale_bitmap, upscale_image};

#[test]
fn test_100px_at_x4_is_400px() {
    let (mut session, _) = repeat_session(4, None);
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([12, 200, 99])));

    let (out, _) = upscale_bitmap(&mut session, &TensorCodec::default(), &bitmap).unwrap();
    assert_eq!(out.dimensions(), (400, 400));
    session.close();
}

#[test]
fn test_solid_red_survives_the_round_trip() {
    let (mut session, _) = repeat_session(2, None);
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 7, Rgb([255, 0, 0])));

    let (out, _) = upscale_bitmap(&mut session, &TensorCodec::default(), &bitmap).unwrap();
    assert_eq!(out.dimensions(), (20, 14));
    for px in out.pixels() {
        let [r, g, b, a] = px.0;
        assert!(r >= 253 && g <= 2 && b <= 2, "{:?}", px);
        assert_eq!(a, 255);
    }
    session.close();
}

#[test]
fn test_wrong_channel_order_shows_up_in_pixels() {
    let (mut session, _) = repeat_session(1, None);
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 0])));

    // Decoding as RGB but encoding as if the model spoke BGR turns red blue.
    let rgb = TensorCodec::new(InputShape::Native, ChannelOrder::Rgb);
    let bgr = TensorCodec::new(InputShape::Native, ChannelOrder::Bgr);
    let tensor = rgb.decode_for_inference(&bitmap).unwrap();
    let out = session.infer(&tensor).unwrap();
    let shifted = bgr.encode_from_inference(&out.tensor).unwrap();
    assert_eq!(shifted.get_pixel(0, 0).0, [0, 0, 255, 255]);
    session.close();
}

#[test]
fn test_image_file_round_trip() {
    let dir = scratch("image_file");
    let input = dir.join("in.png");
    let output = dir.join("out.jpg");
    RgbImage::from_pixel(16, 9, Rgb([30, 60, 90])).save(&input).unwrap();

    let (mut session, released) = repeat_session(4, None);
    let report = upscale_image(&mut session, &TensorCodec::default(), &input, &output).unwrap();
    session.close();

    assert_eq!((report.width, report.height), (64, 36));
    let written = image::open(&output).unwrap();
    assert_eq!(written.dimensions(), (64, 36));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_input_is_a_storage_fault() {
    let dir = scratch("image_missing");
    let (mut session, _) = repeat_session(2, None);
    let err = upscale_image(
        &mut session,
        &TensorCodec::default(),
        &dir.join("nope.png"),
        &dir.join("out.png"),
    )
    .unwrap_err();
    assert!(matches!(err, SrError::StorageFault { .. }));
    session.close();

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_closed_session_refuses_images() {
    let (mut session, _) = repeat_session(2, None);
    session.close();
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([1, 2, 3])));
    let err = upscale_bitmap(&mut session, &TensorCodec::default(), &bitmap).unwrap_err();
    assert!(matches!(err, SrError::SessionClosed));
}
