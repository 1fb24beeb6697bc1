use std::io::Write;
use std::time::Duration;

use framed::config::{AspectRatio, Configuration, SplitType};
use framed::schedule::FrameClock;

#[test]
fn parse_full_config() {
    let yaml = r##"
aspect-ratio: 9x16
background-color: "#1e90ff"
border: 32
max-border: 200
split: vertical
first-pass-max-dimension: 1500
layout-allow-upscale: false
diptych-gap-fraction: 0.25
jpeg-quality: 90
frame-interval: 33ms
share-reset-delay: 2s
"##;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.aspect_ratio, AspectRatio::NineBySixteen);
    assert_eq!(cfg.background_color.to_hex(), "#1e90ff");
    assert_eq!(cfg.border, 32);
    assert_eq!(cfg.max_border, 200);
    assert_eq!(cfg.split, SplitType::Vertical);
    assert_eq!(cfg.first_pass_max_dimension, 1500);
    assert!(!cfg.layout_allow_upscale);
    assert!((cfg.diptych_gap_fraction - 0.25).abs() < f32::EPSILON);
    assert_eq!(cfg.jpeg_quality, 90);
    assert_eq!(cfg.frame_clock(), FrameClock::Interval(Duration::from_millis(33)));
    assert_eq!(cfg.share_reset_delay, Duration::from_secs(2));
}

#[test]
fn hsb_background_is_accepted() {
    let cfg: Configuration = serde_yaml::from_str("background-color: hsb(0, 0%, 0%)\n").unwrap();
    assert_eq!(cfg.background_color.to_hex(), "#000000");
}

#[test]
fn unknown_aspect_ratio_is_rejected() {
    let err = serde_yaml::from_str::<Configuration>("aspect-ratio: 3x2\n").unwrap_err();
    assert!(err.to_string().contains("3x2"), "{err}");
}

#[test]
fn bad_colour_is_rejected() {
    assert!(serde_yaml::from_str::<Configuration>("background-color: chartreuse\n").is_err());
}

#[test]
fn border_beyond_max_fails_validation() {
    let cfg: Configuration = serde_yaml::from_str("border: 600\nmax-border: 500\n").unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(err.to_string().contains("max-border"), "{err}");
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "aspect-ratio: 1x1\nborder: 0").unwrap();
    let cfg = Configuration::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.aspect_ratio, AspectRatio::Square);
    assert_eq!(cfg.border, 0);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.yaml");
    let err = Configuration::from_yaml_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("nope.yaml"));
}
