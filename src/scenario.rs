use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::frame::Frame;

/// Slider bounds. The browser widgets carry the same limits; the server
/// clamps again so out-of-range values are structurally impossible.
pub const MULTIPLIER_RANGE: (f64, f64) = (0.1, 3.0);
pub const DELTA_RANGE: (f64, f64) = (-0.25, 0.25);

/// Derived columns, in the order they are offered as chartable KPIs.
/// The first entry is the default selection after an upload.
pub const KPI_COLUMNS: [&str; 6] = [
    "dau_calc",
    "wau_calc",
    "installs_calc",
    "nurr_calc",
    "curr_calc",
    "engagement_calc",
];

/// User-adjustable scenario drivers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drivers {
    /// Scale factor applied to weekly installs.
    pub install_multiplier: f64,
    /// Additive shift applied to both retention rates, clamped to [0, 1].
    pub retention_delta: f64,
    /// Additive shift applied to engagement, clamped to [0, 1].
    pub engagement_delta: f64,
}

impl Default for Drivers {
    fn default() -> Self {
        Drivers {
            install_multiplier: 1.0,
            retention_delta: 0.0,
            engagement_delta: 0.0,
        }
    }
}

impl Drivers {
    /// Force every driver into its slider range.
    pub fn clamped(self) -> Self {
        Drivers {
            install_multiplier: self
                .install_multiplier
                .clamp(MULTIPLIER_RANGE.0, MULTIPLIER_RANGE.1),
            retention_delta: self.retention_delta.clamp(DELTA_RANGE.0, DELTA_RANGE.1),
            engagement_delta: self.engagement_delta.clamp(DELTA_RANGE.0, DELTA_RANGE.1),
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn base_column<'a>(frame: &'a Frame, name: &'static str) -> Result<&'a [f64], ComputeError> {
    frame.column(name).ok_or(ComputeError::MissingInput(name))
}

fn check_finite(name: &'static str, values: &[f64]) -> Result<(), ComputeError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ComputeError::NonFinite {
            column: name,
            index,
        }),
        None => Ok(()),
    }
}

/// Recompute the scenario table from base data, the impact-model weights and
/// the current drivers.
///
/// Pure and deterministic: identical inputs yield identical output, nothing
/// is cached across calls. Per period `t`:
///
/// ```text
/// installs_calc[t]   = installs[t] * install_multiplier
/// nurr_calc[t]       = clamp(nurr[t] + retention_delta, 0, 1)
/// curr_calc[t]       = clamp(curr[t] + retention_delta, 0, 1)
/// engagement_calc[t] = clamp(engagement[t] + engagement_delta, 0, 1)
/// wau_calc[t]        = installs_calc[t] * nurr_calc[t] * new_user_weight[t]
///                    + wau_calc[t-1] * curr_calc[t] * retained_weight[t]
/// dau_calc[t]        = wau_calc[t] * engagement_calc[t] * engagement_weight[t]
/// ```
///
/// The cohort-decay relationship comes entirely from the weight columns of
/// the impact sheet; the recalculator hard-codes no model constants.
///
/// `selection` limits which derived columns are materialized into the output
/// (`dau_calc` is always included); `None` materializes all of them. The raw
/// base columns are always carried through. Every derived series feeds the
/// DAU chain, so the selection controls output width, not the arithmetic.
pub fn recalc(
    base: &Frame,
    impact: &Frame,
    drivers: &Drivers,
    selection: Option<&[String]>,
) -> Result<Frame, ComputeError> {
    let n = base.len();
    let drivers = drivers.clamped();

    let installs = base_column(base, "installs")?;
    let nurr = base_column(base, "nurr")?;
    let curr = base_column(base, "curr")?;
    let engagement = base_column(base, "engagement")?;

    let new_user_weight = base_column(impact, "new_user_weight")?;
    let retained_weight = base_column(impact, "retained_weight")?;
    let engagement_weight = base_column(impact, "engagement_weight")?;

    for (name, col) in [
        ("new_user_weight", new_user_weight),
        ("retained_weight", retained_weight),
        ("engagement_weight", engagement_weight),
    ] {
        if col.len() != n {
            return Err(ComputeError::LengthMismatch {
                column: name.to_string(),
                expected: n,
                actual: col.len(),
            });
        }
    }

    let installs_calc: Vec<f64> = installs
        .iter()
        .map(|v| v * drivers.install_multiplier)
        .collect();
    let nurr_calc: Vec<f64> = nurr
        .iter()
        .map(|v| clamp01(v + drivers.retention_delta))
        .collect();
    let curr_calc: Vec<f64> = curr
        .iter()
        .map(|v| clamp01(v + drivers.retention_delta))
        .collect();
    let engagement_calc: Vec<f64> = engagement
        .iter()
        .map(|v| clamp01(v + drivers.engagement_delta))
        .collect();

    let mut wau_calc = Vec::with_capacity(n);
    let mut dau_calc = Vec::with_capacity(n);
    let mut prev_wau = 0.0;
    for t in 0..n {
        let wau = installs_calc[t] * nurr_calc[t] * new_user_weight[t]
            + prev_wau * curr_calc[t] * retained_weight[t];
        wau_calc.push(wau);
        dau_calc.push(wau * engagement_calc[t] * engagement_weight[t]);
        prev_wau = wau;
    }

    check_finite("installs_calc", &installs_calc)?;
    check_finite("wau_calc", &wau_calc)?;
    check_finite("dau_calc", &dau_calc)?;

    let wanted = |name: &str| {
        name == "dau_calc"
            || match selection {
                Some(sel) => sel.iter().any(|s| s == name),
                None => true,
            }
    };

    let mut out = Frame::new(base.periods.clone());
    for col in base.columns() {
        out.push_column(col.name.clone(), col.values.clone());
    }
    for (name, values) in [
        ("installs_calc", installs_calc),
        ("nurr_calc", nurr_calc),
        ("curr_calc", curr_calc),
        ("engagement_calc", engagement_calc),
        ("wau_calc", wau_calc),
        ("dau_calc", dau_calc),
    ] {
        if wanted(name) {
            out.push_column(name, values);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn base_frame(rows: &[(f64, f64, f64, f64)]) -> Frame {
        let mut f = Frame::new((0..rows.len()).map(|i| date(1 + i as u32)).collect());
        f.push_column("installs", rows.iter().map(|r| r.0).collect());
        f.push_column("nurr", rows.iter().map(|r| r.1).collect());
        f.push_column("curr", rows.iter().map(|r| r.2).collect());
        f.push_column("engagement", rows.iter().map(|r| r.3).collect());
        f
    }

    fn unit_impact(n: usize) -> Frame {
        let mut f = Frame::new((0..n).map(|i| date(1 + i as u32)).collect());
        f.push_column("new_user_weight", vec![1.0; n]);
        f.push_column("retained_weight", vec![1.0; n]);
        f.push_column("engagement_weight", vec![1.0; n]);
        f
    }

    #[test]
    fn identity_scenario_matches_unadjusted_model() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.3), (800.0, 0.4, 0.7, 0.35)]);
        let impact = unit_impact(2);
        let out = recalc(&base, &impact, &Drivers::default(), None).unwrap();

        assert_eq!(out.column("installs_calc"), base.column("installs"));
        assert_eq!(out.column("nurr_calc"), base.column("nurr"));
        assert_eq!(out.column("curr_calc"), base.column("curr"));
        assert_eq!(out.column("engagement_calc"), base.column("engagement"));

        // wau[0] = 1000 * 0.5 = 500; wau[1] = 800 * 0.4 + 500 * 0.7 = 670
        let wau = out.column("wau_calc").unwrap();
        assert_eq!(wau, &[500.0, 670.0]);
        let dau = out.column("dau_calc").unwrap();
        assert_eq!(dau[0], 500.0 * 0.3);
        assert_eq!(dau[1], 670.0 * 0.35);
    }

    #[test]
    fn deltas_stay_clamped_to_unit_interval() {
        let base = base_frame(&[(100.0, 0.75, 0.02, 1.0)]);
        let impact = unit_impact(1);

        let up = Drivers {
            retention_delta: 0.25,
            engagement_delta: 0.25,
            ..Drivers::default()
        };
        let out = recalc(&base, &impact, &up, None).unwrap();
        assert_eq!(out.column("nurr_calc").unwrap(), &[1.0]);
        assert_eq!(out.column("engagement_calc").unwrap(), &[1.0]);

        let down = Drivers {
            retention_delta: -0.25,
            engagement_delta: -0.25,
            ..Drivers::default()
        };
        let out = recalc(&base, &impact, &down, None).unwrap();
        assert_eq!(out.column("curr_calc").unwrap(), &[0.0]);
        assert_eq!(out.column("nurr_calc").unwrap(), &[0.5]);
    }

    #[test]
    fn recalc_is_deterministic() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.3), (900.0, 0.45, 0.65, 0.32)]);
        let impact = unit_impact(2);
        let drivers = Drivers {
            install_multiplier: 1.7,
            retention_delta: 0.1,
            engagement_delta: -0.05,
        };
        let a = recalc(&base, &impact, &drivers, None).unwrap();
        let b = recalc(&base, &impact, &drivers, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dau_is_monotone_in_install_multiplier() {
        let base = base_frame(&[
            (1000.0, 0.5, 0.6, 0.3),
            (800.0, 0.4, 0.7, 0.35),
            (1200.0, 0.55, 0.5, 0.28),
        ]);
        let mut impact = unit_impact(3);
        impact.push_column("new_user_weight", vec![0.9, 1.1, 1.0]);
        impact.push_column("retained_weight", vec![0.8, 0.85, 0.9]);
        impact.push_column("engagement_weight", vec![1.0, 0.95, 1.05]);

        let mut prev: Option<Vec<f64>> = None;
        for mult in [0.1, 0.5, 1.0, 1.5, 2.0, 3.0] {
            let drivers = Drivers {
                install_multiplier: mult,
                ..Drivers::default()
            };
            let out = recalc(&base, &impact, &drivers, None).unwrap();
            let dau = out.column("dau_calc").unwrap().to_vec();
            if let Some(prev) = &prev {
                for (lo, hi) in prev.iter().zip(&dau) {
                    assert!(hi >= lo, "dau decreased when multiplier grew");
                }
            }
            prev = Some(dau);
        }
    }

    #[test]
    fn doubling_installs_doubles_dau_single_period() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.3)]);
        let impact = unit_impact(1);

        let baseline = recalc(&base, &impact, &Drivers::default(), None).unwrap();
        let doubled = recalc(
            &base,
            &impact,
            &Drivers {
                install_multiplier: 2.0,
                ..Drivers::default()
            },
            None,
        )
        .unwrap();

        assert_eq!(doubled.column("installs_calc").unwrap(), &[2000.0]);
        assert_eq!(
            doubled.column("dau_calc").unwrap()[0],
            2.0 * baseline.column("dau_calc").unwrap()[0]
        );
    }

    #[test]
    fn selection_limits_materialized_columns() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.3)]);
        let impact = unit_impact(1);
        let sel = vec!["wau_calc".to_string()];
        let out = recalc(&base, &impact, &Drivers::default(), Some(&sel)).unwrap();

        assert!(out.has_column("wau_calc"));
        assert!(out.has_column("dau_calc")); // always present
        assert!(out.has_column("installs")); // raw columns carried through
        assert!(!out.has_column("installs_calc"));
        assert!(!out.has_column("nurr_calc"));
    }

    #[test]
    fn non_finite_weights_are_a_compute_error() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.3)]);
        let mut impact = unit_impact(1);
        impact.push_column("engagement_weight", vec![f64::INFINITY]);
        let err = recalc(&base, &impact, &Drivers::default(), None).unwrap_err();
        assert!(matches!(err, ComputeError::NonFinite { .. }));
    }

    #[test]
    fn out_of_range_drivers_are_clamped_before_use() {
        let base = base_frame(&[(1000.0, 0.5, 0.6, 0.5)]);
        let impact = unit_impact(1);
        let wild = Drivers {
            install_multiplier: 100.0,
            retention_delta: 5.0,
            engagement_delta: -5.0,
        };
        let out = recalc(&base, &impact, &wild, None).unwrap();
        assert_eq!(out.column("installs_calc").unwrap(), &[3000.0]);
        assert_eq!(out.column("nurr_calc").unwrap(), &[0.75]);
        assert_eq!(out.column("engagement_calc").unwrap(), &[0.25]);
    }
}
