// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Simulation Property Tests
//!
//! Whole-run behaviour: reproducibility across thread counts, isolation of
//! failing instances, and the run options that change the output stream.

use std::sync::Arc;

use bnm_engine::*;
use bnm_neural::{BaseParameters, InstanceId, ModelConstants, ModelError};
use ndarray::{array, Array2};

// =============================================================================
// Helpers
// =============================================================================

fn constants() -> Arc<ModelConstants<f64>> {
    Arc::new(ModelConstants::derive(&BaseParameters::default()).unwrap())
}

fn ring(n: usize) -> Array2<f64> {
    let mut sc = Array2::zeros((n, n));
    for i in 0..n {
        sc[[i, (i + 1) % n]] = 0.4;
        sc[[(i + 1) % n, i]] = 0.4;
    }
    sc
}

/// 3 s run, 1 s transient, TR 0.5 s, analytic FIC
fn settings() -> RunSettings {
    RunSettings {
        duration_s: 3.0,
        tr_s: 0.5,
        bold_remove_s: 1.0,
        fic: FicSettings {
            mode: FicMode::Analytic,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn simulator(settings: RunSettings, sc: Array2<f64>) -> Arc<Simulator<f64>> {
    Arc::new(Simulator::new(constants(), Arc::new(settings), sc).unwrap())
}

fn batch(n_instances: u32, n_regions: usize) -> Vec<SimulationParameters> {
    (0..n_instances)
        .map(|i| SimulationParameters::homogeneous(InstanceId(i), n_regions, 0.2 + 0.1 * i as f64))
        .collect()
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_bold_identical_across_thread_counts() {
    let sim = simulator(settings(), ring(6));
    let params = batch(4, 6);

    let single = SimGroup::new(sim.clone(), 1).unwrap().run(&params);
    let multi = SimGroup::new(sim, 4).unwrap().run(&params);

    for (a, b) in single.results.iter().zip(&multi.results) {
        let (a, b) = (a.as_ref().unwrap(), b.as_ref().unwrap());
        assert_eq!(a.bold, b.bold);
        assert_eq!(a.w_ie, b.w_ie);
    }
}

#[test]
fn test_seed_changes_bold() {
    let mut other_seed = settings();
    other_seed.noise.seed = 411;
    let params = SimulationParameters::homogeneous(InstanceId(0), 4, 0.5);

    let a = simulator(settings(), ring(4)).simulate(&params).unwrap();
    let b = simulator(other_seed, ring(4)).simulate(&params).unwrap();
    assert_ne!(a.bold, b.bold);
    // FIC weights do not depend on noise in analytic mode
    assert_eq!(a.w_ie, b.w_ie);
}

#[test]
fn test_segmented_noise_is_reproducible() {
    let mut segmented = settings();
    segmented.noise.mode = NoiseMode::Segmented { segment_ms: 250.0 };
    let sim = simulator(segmented, ring(4));
    let params = SimulationParameters::homogeneous(InstanceId(0), 4, 0.5);

    let a = sim.simulate(&params).unwrap();
    let b = sim.simulate(&params).unwrap();
    assert_eq!(a.bold, b.bold);

    let streamed = simulator(settings(), ring(4)).simulate(&params).unwrap();
    assert_ne!(a.bold, streamed.bold);
}

// =============================================================================
// Isolation
// =============================================================================

#[test]
fn test_diverging_instance_leaves_siblings_untouched() {
    let sim = simulator(settings(), ring(4));
    let mut params = batch(3, 4);
    // Non-finite coupling is rejected before the run
    params[1].g = f64::NAN;

    let reference = sim.simulate(&params[2]).unwrap();
    let run = SimGroup::new(sim, 3).unwrap().run(&params);

    assert!(run.results[0].is_ok());
    let err = run.results[1].as_ref().unwrap_err();
    assert_eq!(err.instance(), InstanceId(1));
    assert!(matches!(
        err.model_error(),
        Some(ModelError::InvalidParameter { .. })
    ));
    assert_eq!(run.results[2].as_ref().unwrap().bold, reference.bold);
    assert_eq!(run.stats.failed, 1);
    assert_eq!(run.stats.succeeded, 2);
}

// =============================================================================
// Run options
// =============================================================================

#[test]
fn test_sync_msec_changes_trajectory_but_not_shape() {
    let mut synced = settings();
    synced.sync_msec = true;
    let params = SimulationParameters::homogeneous(InstanceId(0), 6, 0.5);

    let every_step = simulator(settings(), ring(6)).simulate(&params).unwrap();
    let per_msec = simulator(synced, ring(6)).simulate(&params).unwrap();
    assert_eq!(every_step.bold.data.dim(), per_msec.bold.data.dim());
    assert_ne!(every_step.bold, per_msec.bold);
}

#[test]
fn test_average_sampling_and_rate_drive() {
    let mut custom = settings();
    custom.sampling_mode = SamplingMode::Average;
    custom.hemodynamic_drive = HemodynamicDrive::ExcitatoryRate;
    let out = simulator(custom, ring(3))
        .simulate(&SimulationParameters::homogeneous(InstanceId(0), 3, 0.5))
        .unwrap();
    assert_eq!(out.bold.n_samples(), 4);
    assert!(out.bold.data.iter().all(|b| b.is_finite()));
}

#[test]
fn test_extended_means_near_steady_state() {
    let k = constants();
    let out = simulator(settings(), ring(4))
        .simulate(&SimulationParameters::homogeneous(InstanceId(0), 4, 0.5))
        .unwrap();
    let means = out.extended.unwrap().means;
    for i in 0..4 {
        assert!((means.s_e[i] - k.steady.s_e).abs() < 0.1, "S_E mean {}", means.s_e[i]);
        assert!(means.r_e[i] > 0.0 && means.r_e[i] < 20.0);
    }
}

#[test]
fn test_interhemispheric_exclusion_changes_fic() {
    let sc = array![
        [0.0, 0.2, 0.6, 0.0],
        [0.2, 0.0, 0.0, 0.6],
        [0.6, 0.0, 0.0, 0.2],
        [0.0, 0.6, 0.2, 0.0],
    ];
    let mut intra_only = settings();
    intra_only.connectivity.include_interhemispheric = false;
    let params = SimulationParameters::homogeneous(InstanceId(0), 4, 0.5);

    let full = simulator(settings(), sc.clone()).simulate(&params).unwrap();
    let intra = simulator(intra_only, sc).simulate(&params).unwrap();
    // Less incoming strength → less inhibition needed
    for i in 0..4 {
        assert!(intra.w_ie[i] < full.w_ie[i]);
    }
}
