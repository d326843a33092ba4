//! Focus metrics derived from camera frames.
//!
//! [`MetricEngine`] computes every registered [`MetricKind`] over a frame in one
//! pass and keeps the results in a fixed-size table indexed by kind. In
//! simulation mode the values come from [`SyntheticFocus`], a pure function of
//! the Z coordinate with a focus peak every `focus_period` microns.
//!
//! `NaN` is a regular value meaning "no data available"; an empty frame sets
//! every kind to `NaN` and is not an error.

use crate::config::{MetricConfig, SimulationConfig};
use crate::core::{ConnectionState, PixelBuffer};
use crate::error::{AppResult, StageError};
use crate::events::{EventBus, StageEvent};
use crate::hardware::HardwareAdapter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Metric Kinds
// =============================================================================

/// Scalar image-quality measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Arithmetic mean intensity
    Mean,
    /// Sample standard deviation (n - 1)
    StdDev,
    /// Brightest pixel
    Max,
    /// Darkest pixel
    Min,
}

impl MetricKind {
    /// Number of kinds; size of the value table.
    pub const COUNT: usize = 4;

    /// Every kind in table order.
    pub const ALL: [MetricKind; Self::COUNT] = [
        MetricKind::Mean,
        MetricKind::StdDev,
        MetricKind::Max,
        MetricKind::Min,
    ];

    /// Position of this kind in the value table.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Display name, also used in max-tracking bookmark labels.
    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Mean => "Mean",
            MetricKind::StdDev => "StdDev",
            MetricKind::Max => "Max",
            MetricKind::Min => "Min",
        }
    }

    /// Evaluate this kind over a flattened frame.
    pub fn compute(self, data: &[f64]) -> f64 {
        match self {
            MetricKind::Mean => mean(data),
            MetricKind::StdDev => sample_std_dev(data),
            MetricKind::Max => data.iter().copied().fold(f64::NAN, f64::max),
            MetricKind::Min => data.iter().copied().fold(f64::NAN, f64::min),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MetricKind {
    type Err = StageError;

    /// Accepts display names case-insensitively, ignoring spaces and underscores
    /// ("Std Dev", "std_dev" and "STDDEV" all parse).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.label().to_ascii_lowercase() == key)
            .ok_or_else(|| StageError::UnknownMetric(s.to_string()))
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn sample_std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let m = mean(data);
    let ss: f64 = data.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (data.len() - 1) as f64).sqrt()
}

/// A single metric reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Metric the value belongs to.
    pub kind: MetricKind,
    /// Value; `NaN` when unavailable.
    pub value: f64,
}

impl MetricSnapshot {
    /// Reading with a value.
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self { kind, value }
    }

    /// Reading with no data (`NaN`).
    pub fn unavailable(kind: MetricKind) -> Self {
        Self::new(kind, f64::NAN)
    }

    /// False when the value is `NaN`.
    pub fn is_available(&self) -> bool {
        !self.value.is_nan()
    }
}

/// One value per [`MetricKind`], indexed by [`MetricKind::index`].
pub type MetricTable = [f64; MetricKind::COUNT];

// =============================================================================
// Synthetic Focus
// =============================================================================

/// Deterministic focus curve used in simulation mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticFocus {
    period: f64,
    width: f64,
}

impl SyntheticFocus {
    /// Peaks every `period` microns, each with Gaussian width `width`.
    pub fn new(period: f64, width: f64) -> Self {
        Self { period, width }
    }

    /// Build from simulation settings.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.focus_period, config.focus_width)
    }

    /// Sharpness in `[0, 1]`: 1 at multiples of the period, falling off as a
    /// Gaussian of the distance to the nearest peak.
    pub fn sharpness(&self, z: f64) -> f64 {
        let offset = z - self.period * (z / self.period).round();
        (-(offset * offset) / (2.0 * self.width * self.width)).exp()
    }

    /// Synthetic metric values at `z`.
    pub fn values(&self, z: f64) -> MetricTable {
        let s = self.sharpness(z);
        let mut table = [f64::NAN; MetricKind::COUNT];
        table[MetricKind::Mean.index()] = 120.0 + 30.0 * s;
        table[MetricKind::StdDev.index()] = 4.0 + 36.0 * s;
        table[MetricKind::Max.index()] = 160.0 + 95.0 * s;
        table[MetricKind::Min.index()] = 90.0 - 30.0 * s;
        table
    }
}

// =============================================================================
// Metric Engine
// =============================================================================

/// Computes and selects the active focus metric.
pub struct MetricEngine {
    adapter: Option<Arc<dyn HardwareAdapter>>,
    registered: Vec<MetricKind>,
    active: MetricKind,
    values: MetricTable,
    synthetic: SyntheticFocus,
    events: EventBus,
}

impl MetricEngine {
    /// Create an engine with the configured kinds registered.
    pub fn new(
        metric: &MetricConfig,
        simulation: &SimulationConfig,
        adapter: Option<Arc<dyn HardwareAdapter>>,
        events: EventBus,
    ) -> Self {
        let mut registered: Vec<MetricKind> = Vec::with_capacity(MetricKind::COUNT);
        for kind in &metric.kinds {
            if !registered.contains(kind) {
                registered.push(*kind);
            }
        }
        let active = if registered.contains(&metric.default_kind) {
            metric.default_kind
        } else {
            registered.first().copied().unwrap_or(MetricKind::Mean)
        };

        Self {
            adapter,
            registered,
            active,
            values: [f64::NAN; MetricKind::COUNT],
            synthetic: SyntheticFocus::from_config(simulation),
            events,
        }
    }

    /// Kinds this engine computes.
    pub fn registered(&self) -> &[MetricKind] {
        &self.registered
    }

    /// Whether `kind` is registered.
    pub fn is_registered(&self, kind: MetricKind) -> bool {
        self.registered.contains(&kind)
    }

    /// Currently selected kind.
    pub fn active_kind(&self) -> MetricKind {
        self.active
    }

    /// Value of the selected kind from the last update (`NaN` if unavailable).
    pub fn current_value(&self) -> f64 {
        self.values[self.active.index()]
    }

    /// Value of `kind` from the last update.
    pub fn value(&self, kind: MetricKind) -> f64 {
        self.values[kind.index()]
    }

    /// Snapshot of the selected kind.
    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot::new(self.active, self.current_value())
    }

    /// Select the active kind.
    ///
    /// # Errors
    ///
    /// `UnknownMetric` if `kind` is not registered; the active kind is unchanged.
    pub fn set_metric_kind(&mut self, kind: MetricKind) -> AppResult<()> {
        if !self.is_registered(kind) {
            return Err(StageError::UnknownMetric(kind.to_string()));
        }
        if kind != self.active {
            self.active = kind;
            debug!("Active metric set to {}", kind);
            self.events.emit(StageEvent::MetricChanged);
        }
        Ok(())
    }

    /// Select the active kind by display name.
    pub fn set_metric_kind_by_name(&mut self, name: &str) -> AppResult<MetricKind> {
        let kind: MetricKind = name.parse()?;
        self.set_metric_kind(kind)?;
        Ok(kind)
    }

    /// Refresh every registered kind and return the selected one.
    ///
    /// Connected: computed from the adapter's latest frame. Simulation:
    /// synthesized from `z`. Any other state yields `NaN`.
    pub async fn update(&mut self, connection: ConnectionState, z: f64) -> MetricSnapshot {
        match connection {
            ConnectionState::Connected => {
                let buffer = match &self.adapter {
                    Some(adapter) => match adapter.pixel_buffer().await {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            warn!("Frame fetch failed: {:#}", e);
                            PixelBuffer::empty()
                        }
                    },
                    None => PixelBuffer::empty(),
                };
                self.compute(&buffer);
            }
            ConnectionState::Simulation => {
                let synthetic = self.synthetic.values(z);
                self.values = [f64::NAN; MetricKind::COUNT];
                for kind in &self.registered {
                    self.values[kind.index()] = synthetic[kind.index()];
                }
            }
            _ => self.values = [f64::NAN; MetricKind::COUNT],
        }

        self.events.emit(StageEvent::MetricChanged);
        self.snapshot()
    }

    /// Compute every registered kind over `buffer`; an empty buffer yields `NaN`.
    pub fn compute(&mut self, buffer: &PixelBuffer) {
        self.values = [f64::NAN; MetricKind::COUNT];
        if buffer.is_empty() {
            debug!("Empty frame; metrics unavailable");
            return;
        }
        let data = buffer.as_f64();
        for kind in &self.registered {
            self.values[kind.index()] = kind.compute(&data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn engine(kinds: Vec<MetricKind>, default_kind: MetricKind) -> MetricEngine {
        let settings = Settings::default();
        let metric = MetricConfig {
            default_kind,
            kinds,
        };
        MetricEngine::new(&metric, &settings.simulation, None, EventBus::new(16))
    }

    #[test]
    fn test_standard_definitions() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(MetricKind::Mean.compute(&data), 5.0);
        // Sample std dev: sqrt(32 / 7)
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((MetricKind::StdDev.compute(&data) - expected).abs() < 1e-12);
        assert_eq!(MetricKind::Max.compute(&data), 9.0);
        assert_eq!(MetricKind::Min.compute(&data), 2.0);
    }

    #[test]
    fn test_single_sample_std_dev_is_nan() {
        assert!(MetricKind::StdDev.compute(&[3.0]).is_nan());
        assert!(MetricKind::Mean.compute(&[]).is_nan());
        assert!(MetricKind::Max.compute(&[]).is_nan());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Std Dev".parse::<MetricKind>().unwrap(), MetricKind::StdDev);
        assert_eq!("std_dev".parse::<MetricKind>().unwrap(), MetricKind::StdDev);
        assert_eq!("MEAN".parse::<MetricKind>().unwrap(), MetricKind::Mean);
        assert!("Sharpness".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_empty_buffer_sets_all_nan() {
        let mut engine = engine(MetricKind::ALL.to_vec(), MetricKind::Mean);
        engine.compute(&PixelBuffer::U8(vec![10, 20, 30]));
        assert_eq!(engine.current_value(), 20.0);

        engine.compute(&PixelBuffer::empty());
        for kind in MetricKind::ALL {
            assert!(engine.value(kind).is_nan());
        }
    }

    #[test]
    fn test_unregistered_kind_rejected_without_change() {
        let mut engine = engine(vec![MetricKind::Mean, MetricKind::Max], MetricKind::Mean);
        let err = engine.set_metric_kind(MetricKind::StdDev).unwrap_err();
        assert!(matches!(err, StageError::UnknownMetric(_)));
        assert_eq!(engine.active_kind(), MetricKind::Mean);

        assert!(engine.set_metric_kind_by_name("bogus").is_err());
        assert_eq!(engine.active_kind(), MetricKind::Mean);

        assert_eq!(engine.set_metric_kind_by_name("max").unwrap(), MetricKind::Max);
        assert_eq!(engine.active_kind(), MetricKind::Max);
    }

    #[test]
    fn test_unregistered_kinds_stay_nan() {
        let mut engine = engine(vec![MetricKind::Max], MetricKind::Max);
        engine.compute(&PixelBuffer::U16(vec![1, 2, 3]));
        assert_eq!(engine.value(MetricKind::Max), 3.0);
        assert!(engine.value(MetricKind::Mean).is_nan());
    }

    #[test]
    fn test_synthetic_focus_is_periodic_and_pure() {
        let focus = SyntheticFocus::new(100.0, 8.0);
        assert_eq!(focus.sharpness(0.0), 1.0);
        assert!((focus.sharpness(200.0) - 1.0).abs() < 1e-12);
        assert!(focus.sharpness(50.0) < 1e-6);
        assert_eq!(focus.values(13.0), focus.values(13.0));
        assert!(focus.sharpness(2.0) > focus.sharpness(4.0));
    }

    #[tokio::test]
    async fn test_simulation_update_uses_position() {
        let mut engine = engine(MetricKind::ALL.to_vec(), MetricKind::StdDev);
        let at_peak = engine.update(ConnectionState::Simulation, 0.0).await;
        let off_peak = engine.update(ConnectionState::Simulation, 40.0).await;
        assert_eq!(at_peak.kind, MetricKind::StdDev);
        assert!(at_peak.value > off_peak.value);

        let disconnected = engine.update(ConnectionState::Disconnected, 0.0).await;
        assert!(!disconnected.is_available());
    }
}
