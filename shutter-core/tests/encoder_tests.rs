//! Integration tests for encoding subsystem
//!
//! Tests that require an FFmpeg H.264 encoder are marked with #[ignore].

mod mocks;

use std::time::Duration;

use image::ImageFormat;
use mocks::solid_image;
use shutter_core::config::{TimelapseConfig, VideoQualityPreset};
use shutter_core::encode::{
    self, decode_still, yuv, EncoderSettings, FfmpegEncoder, HardwareEncoder, OutputEvent,
    H264_ENCODERS,
};
use shutter_core::types::{RawFrame, SampleFlags, MIME_AVC};
use shutter_core::ShutterError;

#[test]
fn test_bt601_primaries() {
    assert_eq!(yuv::rgb_to_yuv(255, 0, 0), (82, 90, 240));
    assert_eq!(yuv::rgb_to_yuv(255, 255, 255), (235, 128, 128));
    assert_eq!(yuv::rgb_to_yuv(0, 0, 0), (16, 128, 128));
}

#[test]
fn test_decode_solid_png_is_exact() {
    let png = solid_image(8, 4, [255, 0, 0], ImageFormat::Png);
    let yuv = decode_still(&RawFrame::new(0, png), 8, 4).unwrap();

    let planes = yuv::split_planes(&yuv, 8, 4).unwrap();
    assert!(planes.y.iter().all(|&y| y == 82));
    assert!(planes.u.iter().all(|&u| u == 90));
    assert!(planes.v.iter().all(|&v| v == 240));
}

#[test]
fn test_decode_resizes_to_output() {
    let png = solid_image(40, 30, [10, 200, 30], ImageFormat::Png);
    let yuv = decode_still(&RawFrame::new(0, png), 16, 8).unwrap();
    assert_eq!(yuv.len(), 16 * 8 + 2 * 8 * 4);
}

#[test]
fn test_decode_empty_buffer_fails() {
    let err = decode_still(&RawFrame::new(5, Vec::new()), 16, 8).unwrap_err();
    assert!(matches!(err, ShutterError::FrameDecode(_)));
}

#[test]
fn test_encoder_settings_from_preset() {
    let settings = EncoderSettings::from_preset(VideoQualityPreset::Fhd60, None);
    assert_eq!((settings.width, settings.height), (1920, 1080));
    assert_eq!(settings.fps, 60);
    assert_eq!(settings.bitrate_bps, 20_000_000);
    assert_eq!(settings.gop_size(), 60);
    assert_eq!(settings.input_frame_size(), 1920 * 1080 * 3 / 2);
}

#[test]
fn test_encoder_settings_from_timelapse() {
    let config = TimelapseConfig::default()
        .with_output_fps(24)
        .with_encoder("libx264");
    let settings = EncoderSettings::from_timelapse(&config);

    assert_eq!(settings.fps, 24);
    assert_eq!(settings.bitrate_bps, 10_000_000);
    assert_eq!(settings.gop_size(), 24);
    assert_eq!(settings.encoder.as_deref(), Some("libx264"));
}

#[test]
fn test_unknown_encoder_override_unavailable() {
    let settings = EncoderSettings::from_preset(VideoQualityPreset::Sd30, Some("h264_qsv".into()));
    let err = FfmpegEncoder::new(&settings).unwrap_err();
    assert!(matches!(err, ShutterError::ResourceUnavailable(_)));
    assert!(err.to_string().contains("h264_qsv"));
}

#[test]
fn test_available_encoders_are_known() {
    let encoders = encode::available_encoders();
    for name in &encoders {
        assert!(H264_ENCODERS.contains(&name.as_str()), "unexpected encoder {}", name);
    }
    assert_eq!(encode::h264_available(), !encoders.is_empty());
}

#[test]
#[ignore = "Requires an FFmpeg build with an H.264 encoder"]
fn test_ffmpeg_encoder_round_trip() {
    let settings = EncoderSettings::from_preset(VideoQualityPreset::Sd30, None);
    let mut encoder = FfmpegEncoder::new(&settings).expect("open encoder");
    encoder.start().unwrap();

    let frame = vec![128u8; settings.input_frame_size()];
    let timeout = Duration::from_millis(10);
    let mut events = Vec::new();

    for i in 0..10i64 {
        let slot = loop {
            if let Some(slot) = encoder.dequeue_input_buffer(timeout).unwrap() {
                break slot;
            }
            events.push(encoder.dequeue_output_buffer(timeout).unwrap());
        };
        encoder
            .queue_input_buffer(slot, &frame, i * 33_333, SampleFlags::NONE)
            .unwrap();
    }

    let slot = loop {
        if let Some(slot) = encoder.dequeue_input_buffer(timeout).unwrap() {
            break slot;
        }
        events.push(encoder.dequeue_output_buffer(timeout).unwrap());
    };
    encoder
        .queue_input_buffer(slot, &[], 10 * 33_333, SampleFlags::END_OF_STREAM)
        .unwrap();

    loop {
        let event = encoder.dequeue_output_buffer(timeout).unwrap();
        if let OutputEvent::Sample { index, sample } = &event {
            encoder.release_output_buffer(*index).unwrap();
            if sample.flags.end_of_stream {
                events.push(event);
                break;
            }
        }
        events.push(event);
    }

    match &events[0] {
        OutputEvent::FormatChanged(format) => {
            assert_eq!(format.mime, MIME_AVC);
            assert_eq!((format.width, format.height), (640, 480));
            assert!(!format.extradata.is_empty());
        }
        other => panic!("expected FormatChanged first, got {:?}", other),
    }

    let media: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Sample { sample, .. } if sample.is_media() => Some(sample),
            _ => None,
        })
        .collect();
    assert_eq!(media.len(), 10);
    assert!(media[0].flags.key_frame);

    encoder.stop().unwrap();
    encoder.release();
}
