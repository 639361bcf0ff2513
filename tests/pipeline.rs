use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cutout::config::{Background, OutputFormat, Quality};
use cutout::error::ErrorCategory;
use cutout::pipeline::{Orchestrator, PipelineState};
use cutout::segmentation::{ConfidenceMap, OracleRequest, SegmentResponse, SegmentationWorker};
use cutout::selection::{Point, SelectionPolygon};
use cutout::source::{working_dimensions, ImageId};
use image::{Rgba, RgbaImage};
use rstest::rstest;

fn worker<F>(oracle: F) -> SegmentationWorker
where
    F: FnMut(&OracleRequest<'_>) -> anyhow::Result<ConfidenceMap> + Send + 'static,
{
    SegmentationWorker::with_oracle(Box::new(oracle)).unwrap()
}

fn full_confidence() -> SegmentationWorker {
    worker(|req: &OracleRequest<'_>| Ok(ConfidenceMap::filled(req.width, req.height, 1.0)))
}

fn orchestrator_at(worker: SegmentationWorker, quality: Quality) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(worker);
    orchestrator.set_quality(quality).unwrap();
    orchestrator
}

fn alphas(image: &RgbaImage) -> Vec<u8> {
    image.pixels().map(|p| p[3]).collect()
}

/// Distance in pixels to the nearest image edge
fn edge_distance(x: u32, y: u32, width: u32, height: u32) -> u32 {
    x.min(y).min(width - 1 - x).min(height - 1 - y)
}

#[test]
fn uniform_opaque_image_stays_fully_opaque() {
    let mut orchestrator = orchestrator_at(full_confidence(), Quality::High);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(100, 100, Rgba([255, 0, 0, 255])))
        .unwrap();
    assert_eq!(orchestrator.wait().unwrap(), PipelineState::Ready);

    let matte = orchestrator.matte().unwrap();
    assert_eq!(matte.dimensions(), (100, 100));
    assert!(matte.pixels().all(|p| p.0 == [255, 0, 0, 255]));
}

#[test]
fn low_confidence_border_is_removed_with_feathered_band() {
    let (width, height) = (100, 100);
    let image = RgbaImage::from_fn(width, height, |x, y| {
        if edge_distance(x, y, width, height) < 10 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([20, 40, 200, 255])
        }
    });
    let oracle = move |req: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> {
        let values = (0..req.height)
            .flat_map(|y| (0..req.width).map(move |x| (x, y)))
            .map(|(x, y)| match edge_distance(x, y, req.width, req.height) {
                0..=9 => 0.05,
                10..=13 => 0.6,
                _ => 1.0,
            })
            .collect();
        ConfidenceMap::from_vec(req.width, req.height, values)
    };

    let mut orchestrator = orchestrator_at(worker(oracle), Quality::Medium);
    orchestrator.load_rgba(image).unwrap();
    orchestrator.wait().unwrap();

    let matte = orchestrator.matte().unwrap();
    for (x, y, pixel) in matte.enumerate_pixels() {
        let alpha = pixel[3];
        match edge_distance(x, y, width, height) {
            0..=9 => assert_eq!(alpha, 0, "border pixel ({x}, {y})"),
            10..=13 => assert!(alpha > 0 && alpha < 255, "band pixel ({x}, {y}) = {alpha}"),
            _ => assert_eq!(alpha, 255, "interior pixel ({x}, {y})"),
        }
    }
}

#[test]
fn left_half_selection_clears_right_half() {
    let mut orchestrator = orchestrator_at(full_confidence(), Quality::Medium);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(100, 100, Rgba([90, 90, 90, 255])))
        .unwrap();
    orchestrator
        .set_selection(SelectionPolygon::closed_from([
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(50.0, 100.0),
            Point::new(0.0, 100.0),
        ]))
        .unwrap();
    orchestrator.wait().unwrap();

    let matte = orchestrator.matte().unwrap();
    for (x, _, pixel) in matte.enumerate_pixels() {
        if x < 50 {
            assert_eq!(pixel.0, [90, 90, 90, 255]);
        } else {
            assert_eq!(pixel.0, [0, 0, 0, 0]);
        }
    }
}

#[test]
fn selection_is_scaled_to_the_working_buffer() {
    // 2048 wide at low quality works at 1024
    let mut orchestrator = orchestrator_at(full_confidence(), Quality::Low);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(2048, 64, Rgba([1, 2, 3, 255])))
        .unwrap();
    orchestrator
        .set_selection("0,0;1024,0;1024,64;0,64".parse().unwrap())
        .unwrap();
    orchestrator.wait().unwrap();

    let matte = orchestrator.matte().unwrap();
    assert_eq!(matte.dimensions(), (1024, 32));
    assert_eq!(matte.get_pixel(511, 10)[3], 255);
    assert_eq!(matte.get_pixel(512, 10)[3], 0);
}

#[test]
fn solid_background_only_recolours_transparent_pixels() {
    let mut orchestrator = orchestrator_at(full_confidence(), Quality::Medium);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(40, 40, Rgba([10, 120, 30, 255])))
        .unwrap();
    orchestrator
        .set_selection(SelectionPolygon::closed_from([
            Point::new(0.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(20.0, 40.0),
            Point::new(0.0, 40.0),
        ]))
        .unwrap();
    orchestrator.wait().unwrap();

    let matte_before = orchestrator.matte().unwrap().clone();
    let transparent = orchestrator.result().unwrap().image.clone();

    orchestrator
        .set_background(Background::Solid([255, 255, 255]))
        .unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Ready);

    let matte_after = orchestrator.matte().unwrap();
    assert_eq!(alphas(&matte_before), alphas(matte_after));

    let composited = &orchestrator.result().unwrap().image;
    for ((before, after), matte) in transparent
        .pixels()
        .zip(composited.pixels())
        .zip(matte_before.pixels())
    {
        if matte[3] == 0 {
            assert_eq!(&after.0[..3], &[255, 255, 255]);
        } else {
            assert_eq!(before, after);
        }
    }
}

#[test]
fn stale_responses_are_ignored() {
    let mut orchestrator = Orchestrator::new(full_confidence());
    let id = orchestrator
        .load_rgba(RgbaImage::from_pixel(8, 8, Rgba([5, 5, 5, 255])))
        .unwrap();
    let current = orchestrator.generation().unwrap();

    let old = SegmentResponse::Confidence {
        image_id: id,
        generation: current - 1,
        map: ConfidenceMap::filled(8, 8, 0.0),
    };
    assert!(!orchestrator.handle_response(old).unwrap());

    let other_image = SegmentResponse::Failed {
        image_id: ImageId::new(),
        generation: current,
        error: "boom".into(),
    };
    assert!(!orchestrator.handle_response(other_image).unwrap());
    assert_eq!(orchestrator.state(), PipelineState::Segmenting);

    assert_eq!(orchestrator.wait().unwrap(), PipelineState::Ready);
    assert!(orchestrator.matte().unwrap().pixels().all(|p| p[3] == 255));
}

#[test]
fn resegmenting_discards_the_superseded_run() {
    let mut orchestrator = Orchestrator::new(full_confidence());
    orchestrator
        .load_rgba(RgbaImage::from_pixel(16, 16, Rgba([5, 5, 5, 255])))
        .unwrap();
    orchestrator.set_quality(Quality::Low).unwrap();
    orchestrator.set_quality(Quality::High).unwrap();

    assert_eq!(orchestrator.wait().unwrap(), PipelineState::Ready);
    assert_eq!(orchestrator.config().quality, Quality::High);
}

#[test]
fn oracle_failure_keeps_previous_result_and_recovers() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failing);
    let oracle = move |req: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> {
        anyhow::ensure!(!flag.load(Ordering::SeqCst), "model crashed");
        Ok(ConfidenceMap::filled(req.width, req.height, 1.0))
    };

    let mut orchestrator = Orchestrator::new(worker(oracle));
    orchestrator
        .load_rgba(RgbaImage::from_pixel(12, 12, Rgba([7, 8, 9, 255])))
        .unwrap();
    orchestrator.wait().unwrap();
    let previous = orchestrator.result().unwrap().encoded.clone();

    failing.store(true, Ordering::SeqCst);
    orchestrator.set_quality(Quality::Low).unwrap();
    let err = orchestrator.wait().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Oracle);
    assert_eq!(orchestrator.state(), PipelineState::Error);
    assert_eq!(orchestrator.result().unwrap().encoded, previous);
    assert!(orchestrator
        .last_error()
        .unwrap()
        .message
        .contains("model crashed"));

    failing.store(false, Ordering::SeqCst);
    orchestrator.set_quality(Quality::High).unwrap();
    assert_eq!(orchestrator.wait().unwrap(), PipelineState::Ready);
}

#[test]
fn out_of_date_matte_is_resegmented_instead_of_recomposited() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failing);
    let oracle = move |req: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> {
        anyhow::ensure!(!flag.load(Ordering::SeqCst), "model crashed");
        Ok(ConfidenceMap::filled(req.width, req.height, 1.0))
    };

    let mut orchestrator = Orchestrator::new(worker(oracle));
    orchestrator
        .load_rgba(RgbaImage::from_pixel(12, 12, Rgba([7, 8, 9, 255])))
        .unwrap();
    orchestrator.wait().unwrap();

    failing.store(true, Ordering::SeqCst);
    orchestrator.set_quality(Quality::High).unwrap();
    assert!(orchestrator.wait().is_err());

    // The cached matte was built at medium quality
    failing.store(false, Ordering::SeqCst);
    orchestrator
        .set_background(Background::Solid([255, 255, 255]))
        .unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Segmenting);
    assert_eq!(orchestrator.wait().unwrap(), PipelineState::Ready);
    assert_eq!(orchestrator.config().quality, Quality::High);
}

#[test]
fn wrong_sized_map_is_an_oracle_error() {
    let oracle =
        |_: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> { Ok(ConfidenceMap::filled(3, 3, 1.0)) };
    let mut orchestrator = Orchestrator::new(worker(oracle));
    orchestrator
        .load_rgba(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])))
        .unwrap();

    let err = orchestrator.wait().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Oracle);
    assert!(orchestrator.matte().is_none());
}

#[test]
fn undecodable_upload_is_an_input_error() {
    let mut orchestrator = Orchestrator::new(full_confidence());
    let err = orchestrator.load_image(b"definitely not a png").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(orchestrator.state(), PipelineState::Error);
}

#[test]
fn failed_load_keeps_previous_image_and_result() {
    let mut orchestrator = Orchestrator::new(full_confidence());
    let id = orchestrator
        .load_rgba(RgbaImage::from_pixel(6, 6, Rgba([9, 9, 9, 255])))
        .unwrap();
    orchestrator.wait().unwrap();
    let previous = orchestrator.result().unwrap().encoded.clone();

    let err = orchestrator.load_image(b"garbage").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(orchestrator.state(), PipelineState::Error);
    assert_eq!(orchestrator.image_id(), Some(id));
    assert!(orchestrator.matte().is_some());
    assert_eq!(orchestrator.result().unwrap().encoded, previous);

    // The kept matte can still be recomposited
    orchestrator
        .set_background(Background::Solid([0, 0, 0]))
        .unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Ready);
}

#[test]
fn png_output_round_trips_alpha() {
    let mut orchestrator = orchestrator_at(full_confidence(), Quality::Medium);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(30, 30, Rgba([200, 100, 50, 255])))
        .unwrap();
    orchestrator
        .set_selection("0,0;15,0;15,30;0,30".parse().unwrap())
        .unwrap();
    orchestrator.wait().unwrap();

    let result = orchestrator.result().unwrap();
    assert_eq!(result.format, OutputFormat::Png);
    let decoded = image::load_from_memory(&result.encoded).unwrap().to_rgba8();
    assert_eq!(decoded, result.image);
    assert_eq!(decoded.get_pixel(20, 10)[3], 0);
}

#[test]
fn format_change_reencodes_without_resegmenting() {
    let mut orchestrator = Orchestrator::new(full_confidence());
    orchestrator
        .load_rgba(RgbaImage::from_pixel(10, 10, Rgba([1, 1, 1, 255])))
        .unwrap();
    orchestrator.wait().unwrap();

    orchestrator
        .set_output_format(OutputFormat::Jpeg { quality: 80 })
        .unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Ready);
    assert!(orchestrator.generation().is_none());

    let result = orchestrator.result().unwrap();
    assert_eq!(result.format, OutputFormat::Jpeg { quality: 80 });
    assert_eq!(&result.encoded[..2], &[0xFF, 0xD8]);
}

#[rstest]
#[case(Quality::Low)]
#[case(Quality::Medium)]
#[case(Quality::High)]
fn buffers_match_working_resolution(#[case] quality: Quality) {
    let (width, height) = (2500, 300);
    let oracle = |req: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> {
        assert_eq!(req.pixels.len(), (req.width * req.height * 4) as usize);
        Ok(ConfidenceMap::filled(req.width, req.height, 0.8))
    };

    let mut orchestrator = orchestrator_at(worker(oracle), quality);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(width, height, Rgba([40, 50, 60, 255])))
        .unwrap();
    orchestrator.wait().unwrap();

    let expected = working_dimensions(width, height, quality.params().max_dimension);
    let matte = orchestrator.matte().unwrap();
    assert_eq!(matte.dimensions(), expected);
    assert_eq!(
        alphas(matte).len(),
        (expected.0 * expected.1) as usize
    );
    assert_eq!(orchestrator.result().unwrap().dimensions(), expected);
}

#[rstest]
fn only_confidence_above_cutoff_becomes_opaque(
    #[values(Quality::Low, Quality::Medium, Quality::High)] quality: Quality,
    #[values(0.3, 0.6, 0.7)] confidence: f32,
) {
    let oracle = move |req: &OracleRequest<'_>| -> anyhow::Result<ConfidenceMap> {
        Ok(ConfidenceMap::filled(req.width, req.height, confidence))
    };
    let mut orchestrator = orchestrator_at(worker(oracle), quality);
    orchestrator
        .load_rgba(RgbaImage::from_pixel(20, 20, Rgba([120, 80, 40, 255])))
        .unwrap();
    orchestrator.wait().unwrap();

    let alpha = alphas(orchestrator.matte().unwrap());
    assert_eq!(alpha.len(), 400);
    if confidence < 0.5 {
        assert!(alpha.iter().all(|&a| a == 0), "{quality:?} at {confidence}");
    } else if confidence < 0.65 {
        assert!(
            alpha.iter().all(|&a| a > 0 && a < 255),
            "{quality:?} at {confidence}"
        );
    } else {
        assert!(alpha.iter().all(|&a| a == 255), "{quality:?} at {confidence}");
    }
}
