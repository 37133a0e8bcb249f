use super::*;
use indicator::{DualSmaLegacyIndicator, Indicator, SmaIndicator};

fn sample_frame(n: usize) -> CanonicalFrame {
    let mut frame = CanonicalFrame::default();
    for i in 0..n {
        let c = 100.0 + (i as f64).sin() * 3.0 + i as f64 * 0.1;
        frame.ts.push(i as i64 * 60_000);
        frame.open.push(c);
        frame.high.push(c + 1.0);
        frame.low.push(c - 1.0);
        frame.close.push(c);
        frame.volume.push(10.0 + i as f64);
        frame.zero_volume.push(false);
    }
    frame
}

#[test]
fn feature_columns_are_appended_in_group_then_name_order() {
    let frame = sample_frame(50);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(SmaIndicator { window: 20 }),
        Box::new(DualSmaLegacyIndicator {
            short_window: 5,
            long_window: 20,
        }),
    ];
    let built = build_features(&frame, &indicators).expect("build");
    // groups: "legacy" < "sma" lexicographically
    assert_eq!(
        built.feature_order,
        vec![
            "legacy_sma_fast_5".to_string(),
            "legacy_sma_slow_20".to_string(),
            "sma_20".to_string(),
        ]
    );
}

#[test]
fn duplicate_feature_column_is_rejected() {
    let frame = sample_frame(50);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(SmaIndicator { window: 20 }),
        Box::new(SmaIndicator { window: 20 }),
    ];
    let err = build_features(&frame, &indicators).unwrap_err();
    assert_eq!(err.error_code, "feature_duplicate_column");
}

#[test]
fn base_column_collision_is_rejected() {
    struct FakeVolumeIndicator;
    impl Indicator for FakeVolumeIndicator {
        fn name(&self) -> &str {
            "fake"
        }
        fn feature_columns(&self) -> Vec<String> {
            vec!["volume".to_string()]
        }
        fn required_window(&self) -> usize {
            1
        }
        fn compute(&self, frame: &CanonicalFrame) -> BTreeMap<String, Vec<f64>> {
            let mut m = BTreeMap::new();
            m.insert("volume".to_string(), frame.volume.clone());
            m
        }
    }
    let frame = sample_frame(10);
    let indicators: Vec<Box<dyn Indicator>> = vec![Box::new(FakeVolumeIndicator)];
    let err = build_features(&frame, &indicators).unwrap_err();
    assert_eq!(err.error_code, "feature_base_collision");
}

#[test]
fn chunked_output_is_bit_identical_to_monolithic_for_sufficient_overlap() {
    let frame = sample_frame(300);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(SmaIndicator { window: 20 }),
        Box::new(DualSmaLegacyIndicator {
            short_window: 10,
            long_window: 20,
        }),
    ];
    let monolithic = build_features(&frame, &indicators).expect("monolithic");
    let overlap = chunking::required_overlap(&indicators) as i64;
    let chunked =
        build_features_chunked(&frame, &indicators, 50, overlap).expect("chunked");

    assert_eq!(monolithic.feature_order, chunked.feature_order);
    for col in &monolithic.feature_order {
        let mono_col = &monolithic.features[col];
        let chunk_col = &chunked.features[col];
        for i in 0..mono_col.len() {
            let (a, b) = (mono_col[i], chunk_col[i]);
            if a.is_nan() {
                assert!(b.is_nan(), "col {col} row {i}: expected NaN, got {b}");
            } else {
                assert_eq!(a, b, "col {col} row {i} differs");
            }
        }
    }
}

#[test]
fn insufficient_overlap_can_diverge_from_monolithic() {
    let frame = sample_frame(300);
    let indicators: Vec<Box<dyn Indicator>> = vec![Box::new(SmaIndicator { window: 50 })];
    let monolithic = build_features(&frame, &indicators).expect("monolithic");
    let chunked = build_features_chunked(&frame, &indicators, 60, 0).expect("chunked");
    let mono_col = &monolithic.features["sma_50"];
    let chunk_col = &chunked.features["sma_50"];
    let mut any_diff = false;
    for i in 0..mono_col.len() {
        if mono_col[i].is_nan() != chunk_col[i].is_nan() {
            any_diff = true;
            break;
        }
    }
    assert!(any_diff, "expected zero-overlap chunking to diverge for a window-50 SMA");
}
