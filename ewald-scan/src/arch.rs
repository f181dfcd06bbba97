//! A single exposure: raw image, geometry, mask, scan info and integration
//! results.
//!
//! All mutable state sits behind one mutex. The integration engine handle
//! is derived from the geometry and integrator configuration; changing
//! either marks it stale and it is rebuilt before its next use.

use crate::lock::FileLock;
use crate::scan_table::ScanInfo;
use crate::{Error, Result};
use ewald_core::units::check_wavelength;
use ewald_core::{div0_scalar, IntData1d, IntData2d, Poni};
use ewald_integrate::{AzimuthalIntegrator, Integrate1dArgs, Integrate1dResult, IntegratorConfig};
use ewald_io::persist::{
    read_array_opt, read_mask, read_scalars, replace_group, write_array_opt, write_mask,
    write_scalars,
};
use ewald_io::{Persist, Store};
use ndarray::{stack, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Arguments for [`Arch::integrate_1d`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationArgs {
    /// Scan-info channel to divide the raw map by.
    pub monitor: Option<String>,
    #[serde(flatten)]
    pub integrate: Integrate1dArgs,
}

impl IntegrationArgs {
    #[must_use]
    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = Some(monitor.into());
        self
    }

    #[must_use]
    pub fn with_integrate(mut self, integrate: Integrate1dArgs) -> Self {
        self.integrate = integrate;
        self
    }

    #[must_use]
    pub fn with_npt(mut self, npt: usize) -> Self {
        self.integrate.npt = npt;
        self
    }

    #[must_use]
    pub fn with_radial_range(mut self, range: Option<(f64, f64)>) -> Self {
        self.integrate.radial_range = range;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: ewald_core::RadialUnit) -> Self {
        self.integrate.unit = unit;
        self
    }
}

/// Lifecycle of an arch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArchStatus {
    /// No raw map yet.
    #[default]
    Uninitialized,
    /// Has data but no current integration.
    Configured,
    /// `int_1d` reflects the current data.
    Integrated,
}

/// Plain data of an arch, without locks or engine handle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArchData {
    pub idx: usize,
    pub map_raw: Option<Array2<f64>>,
    pub poni: Poni,
    /// `true` marks an excluded pixel.
    pub mask: Option<Array2<bool>>,
    pub scan_info: ScanInfo,
    pub ai_args: IntegratorConfig,
    pub map_norm: Option<Array2<f64>>,
    pub map_q: Option<Array2<f64>>,
    /// Lab coordinates, shape `(3, rows, cols)`.
    pub xyz: Option<Array3<f64>>,
    /// 2θ (rad), χ (rad) and sample distance, shape `(3, rows, cols)`.
    pub tcr: Option<Array3<f64>>,
    /// q (Å⁻¹) and χ (rad), shape `(2, rows, cols)`.
    pub qchi: Option<Array3<f64>>,
    pub int_1d: IntData1d,
    pub int_2d: IntData2d,
}

/// Pixels with a strictly negative value.
#[must_use]
pub fn default_mask(map: &Array2<f64>) -> Array2<bool> {
    map.mapv(|v| v < 0.0)
}

/// Construction arguments for [`Arch::new`].
#[derive(Clone, Debug, Default)]
pub struct ArchInit {
    pub idx: usize,
    pub map_raw: Option<Array2<f64>>,
    pub poni: Poni,
    pub mask: Option<Array2<bool>>,
    pub scan_info: ScanInfo,
    pub ai_args: IntegratorConfig,
}

impl ArchInit {
    #[must_use]
    pub fn new(idx: usize) -> Self {
        Self {
            idx,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_map_raw(mut self, map: Array2<f64>) -> Self {
        self.map_raw = Some(map);
        self
    }

    #[must_use]
    pub fn with_poni(mut self, poni: Poni) -> Self {
        self.poni = poni;
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: Array2<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_scan_info(mut self, scan_info: ScanInfo) -> Self {
        self.scan_info = scan_info;
        self
    }

    #[must_use]
    pub fn with_ai_args(mut self, ai_args: IntegratorConfig) -> Self {
        self.ai_args = ai_args;
        self
    }
}

#[derive(Debug)]
struct ArchState {
    data: ArchData,
    integrator: AzimuthalIntegrator,
    stale: bool,
    status: ArchStatus,
}

impl ArchState {
    fn from_data(data: ArchData, status: ArchStatus) -> Self {
        let integrator = AzimuthalIntegrator::new(data.poni.clone(), data.ai_args.clone());
        Self {
            data,
            integrator,
            stale: false,
            status,
        }
    }

    fn refresh(&mut self) {
        if self.stale {
            log::debug!("rebuilding integrator for arch {}", self.data.idx);
            self.integrator =
                AzimuthalIntegrator::new(self.data.poni.clone(), self.data.ai_args.clone());
            self.stale = false;
        }
    }

    fn integrator(&mut self) -> &AzimuthalIntegrator {
        self.refresh();
        &self.integrator
    }

    fn invalidate(&mut self) {
        self.status = if self.data.map_raw.is_none() {
            ArchStatus::Uninitialized
        } else {
            ArchStatus::Configured
        };
    }
}

/// The fields `integrate_1d` writes, kept to undo a failed batch.
#[derive(Debug)]
pub(crate) struct IntegrationCheckpoint {
    mask: Option<Array2<bool>>,
    map_norm: Option<Array2<f64>>,
    map_q: Option<Array2<f64>>,
    int_1d: IntData1d,
    status: ArchStatus,
}

fn no_raw_map(idx: usize) -> Error {
    ewald_core::Error::Config(format!("arch {idx} has no raw map")).into()
}

/// One exposure and its integration state.
///
/// Safe to share between threads; every operation holds the arch's own
/// lock for its whole read-modify-write.
#[derive(Debug)]
pub struct Arch {
    idx: usize,
    state: Mutex<ArchState>,
    file_lock: FileLock,
}

impl Arch {
    /// Builds an arch. Without an explicit mask the negative pixels of the
    /// raw map are masked.
    #[must_use]
    pub fn new(init: ArchInit) -> Self {
        let mask = init
            .mask
            .or_else(|| init.map_raw.as_ref().map(default_mask));
        let status = if init.map_raw.is_some() {
            ArchStatus::Configured
        } else {
            ArchStatus::Uninitialized
        };
        let data = ArchData {
            idx: init.idx,
            map_raw: init.map_raw,
            poni: init.poni,
            mask,
            scan_info: init.scan_info,
            ai_args: init.ai_args,
            ..ArchData::default()
        };
        Self::from_state(ArchState::from_data(data, status), FileLock::new())
    }

    fn from_state(state: ArchState, file_lock: FileLock) -> Self {
        Self {
            idx: state.data.idx,
            state: Mutex::new(state),
            file_lock,
        }
    }

    /// Replaces the file lock, e.g. to share the owning sphere's.
    #[must_use]
    pub fn with_file_lock(mut self, file_lock: FileLock) -> Self {
        self.file_lock = file_lock;
        self
    }

    fn state(&self) -> MutexGuard<'_, ArchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub fn file_lock(&self) -> &FileLock {
        &self.file_lock
    }

    #[must_use]
    pub fn status(&self) -> ArchStatus {
        self.state().status
    }

    /// Copy of every data field.
    #[must_use]
    pub fn snapshot(&self) -> ArchData {
        self.state().data.clone()
    }

    pub(crate) fn checkpoint(&self) -> IntegrationCheckpoint {
        let state = self.state();
        IntegrationCheckpoint {
            mask: state.data.mask.clone(),
            map_norm: state.data.map_norm.clone(),
            map_q: state.data.map_q.clone(),
            int_1d: state.data.int_1d.clone(),
            status: state.status,
        }
    }

    pub(crate) fn restore(&self, checkpoint: IntegrationCheckpoint) {
        let mut state = self.state();
        state.data.mask = checkpoint.mask;
        state.data.map_norm = checkpoint.map_norm;
        state.data.map_q = checkpoint.map_q;
        state.data.int_1d = checkpoint.int_1d;
        state.status = checkpoint.status;
    }

    /// Runs `f` on the data under the arch lock.
    ///
    /// The lock is not reentrant: `f` must not call back into this arch.
    pub fn with_data<R>(&self, f: impl FnOnce(&ArchData) -> R) -> R {
        f(&self.state().data)
    }

    #[must_use]
    pub fn poni(&self) -> Poni {
        self.state().data.poni.clone()
    }

    #[must_use]
    pub fn mask(&self) -> Option<Array2<bool>> {
        self.state().data.mask.clone()
    }

    #[must_use]
    pub fn scan_info(&self) -> ScanInfo {
        self.state().data.scan_info.clone()
    }

    #[must_use]
    pub fn int_1d(&self) -> IntData1d {
        self.state().data.int_1d.clone()
    }

    /// The engine handle for the current geometry and configuration.
    #[must_use]
    pub fn integrator(&self) -> AzimuthalIntegrator {
        self.state().integrator().clone()
    }

    /// Integrates the (optionally monitor-normalized) raw map into `int_1d`.
    ///
    /// Also fills `map_norm`, `map_q` (when the wavelength is usable) and the
    /// default mask if none is set.
    ///
    /// # Errors
    /// Returns [`ewald_core::Error::MissingChannel`] if the monitor is not in
    /// the scan info, [`ewald_core::Error::Config`] without a raw map, and
    /// any engine error.
    pub fn integrate_1d(&self, args: &IntegrationArgs) -> Result<Integrate1dResult> {
        let mut guard = self.state();
        let state = &mut *guard;
        let idx = state.data.idx;
        let raw = state.data.map_raw.as_ref().ok_or_else(|| no_raw_map(idx))?;

        let map_norm = match &args.monitor {
            Some(channel) => {
                let monitor = state
                    .data
                    .scan_info
                    .get(channel)
                    .copied()
                    .ok_or_else(|| ewald_core::Error::MissingChannel(channel.clone()))?;
                div0_scalar(raw, monitor)
            }
            None => raw.clone(),
        };
        if state.data.mask.is_none() {
            state.data.mask = Some(default_mask(raw));
        }
        let shape = map_norm.dim();

        let wavelength = check_wavelength(state.data.poni.wavelength).ok();
        state.refresh();
        let result = state.integrator.integrate1d(
            map_norm.view(),
            state.data.mask.as_ref().map(|m| m.view()),
            &args.integrate,
            None,
        )?;
        let map_q = match wavelength {
            Some(_) => Some(state.integrator.q_map(shape)?),
            None => None,
        };

        state.data.int_1d = IntData1d::from_result(
            result.radial.view(),
            result.unit,
            result.sum_signal.view(),
            result.count.view(),
            wavelength,
        )?;
        state.data.map_norm = Some(map_norm);
        state.data.map_q = map_q;
        state.status = ArchStatus::Integrated;
        Ok(result)
    }

    /// Reserved. Leaves `int_2d` untouched.
    pub fn integrate_2d(&self) {
        let _state = self.state();
    }

    /// Replaces the integrator configuration and rebuilds the engine handle.
    pub fn set_integrator(&self, ai_args: IntegratorConfig) {
        let mut state = self.state();
        state.data.ai_args = ai_args;
        state.stale = true;
        state.integrator();
        state.invalidate();
    }

    /// Replaces the raw map. A default mask is derived if none is set.
    pub fn set_map_raw(&self, map: Array2<f64>) {
        let mut state = self.state();
        if state.data.mask.is_none() {
            state.data.mask = Some(default_mask(&map));
        }
        state.data.map_raw = Some(map);
        state.invalidate();
    }

    /// Replaces the geometry. The engine handle is rebuilt on next use.
    pub fn set_poni(&self, poni: Poni) {
        let mut state = self.state();
        state.data.poni = poni;
        state.stale = true;
        state.invalidate();
    }

    pub fn set_mask(&self, mask: Option<Array2<bool>>) {
        let mut state = self.state();
        state.data.mask = mask;
        state.invalidate();
    }

    pub fn set_scan_info(&self, scan_info: ScanInfo) {
        let mut state = self.state();
        state.data.scan_info = scan_info;
        state.invalidate();
    }

    /// Fills the `xyz`, `tcr` and `qchi` pixel-coordinate caches.
    ///
    /// `qchi` is left empty when the wavelength cannot be used.
    ///
    /// # Errors
    /// Returns [`ewald_core::Error::Config`] without a raw map and engine
    /// errors for a shape the detector rejects.
    pub fn compute_coordinates(&self) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let idx = state.data.idx;
        let shape = state.data.map_raw.as_ref().ok_or_else(|| no_raw_map(idx))?.dim();
        let wavelength = state.data.poni.wavelength;
        let geometry = state.integrator().geometry(shape)?;

        let tth = geometry.tth();
        let chi = geometry.chi();
        let radius = geometry.radius();
        let tcr = stack(Axis(0), &[tth.view(), chi.view(), radius.view()])
            .map_err(|e| ewald_core::Error::Engine(e.to_string()))?;
        let qchi = if check_wavelength(wavelength).is_ok() {
            let q = geometry.radial(ewald_core::RadialUnit::QInvAngstrom, wavelength);
            Some(
                stack(Axis(0), &[q.view(), chi.view()])
                    .map_err(|e| ewald_core::Error::Engine(e.to_string()))?,
            )
        } else {
            None
        };

        state.data.xyz = Some(geometry.positions().clone());
        state.data.tcr = Some(tcr);
        state.data.qchi = qchi;
        Ok(())
    }

    /// An independent arch with the same data. The engine handle and its
    /// geometry cache are cloned, not rebuilt; the file lock is shared.
    #[must_use]
    pub fn copy(&self) -> Self {
        let state = self.state();
        let copy = ArchState {
            data: state.data.clone(),
            integrator: state.integrator.clone(),
            stale: state.stale,
            status: state.status,
        };
        Self::from_state(copy, self.file_lock.clone())
    }

    /// Saves the arch as `<parent>/<idx>`, replacing any previous group.
    ///
    /// # Errors
    /// Fails if the store rejects a write.
    pub fn save_to<S: Store>(&self, parent: &S) -> Result<()> {
        let _file = self.file_lock.lock();
        self.write_to(parent)
    }

    /// [`Arch::save_to`] for callers already holding the file lock.
    pub(crate) fn write_to<S: Store>(&self, parent: &S) -> Result<()> {
        let data = self.snapshot();
        let group = replace_group(parent, &self.idx.to_string())?;
        data.save(&group)?;
        Ok(())
    }

    /// Loads the arch saved as `<parent>/<idx>` and rebuilds its engine
    /// handle from the stored geometry and configuration.
    ///
    /// The read happens under `file_lock`, which the returned arch keeps.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such group.
    pub fn load_from<S: Store>(idx: usize, parent: &S, file_lock: &FileLock) -> Result<Self> {
        let _file = file_lock.lock();
        Ok(Self::read_from(idx, parent)?.with_file_lock(file_lock.clone()))
    }

    /// [`Arch::load_from`] for callers already holding the file lock.
    pub(crate) fn read_from<S: Store>(idx: usize, parent: &S) -> Result<Self> {
        let key = idx.to_string();
        if !parent.is_group(&key) {
            return Err(Error::NotFound(format!("arch {idx}")));
        }
        let mut data = ArchData::load(&parent.group(&key)?)?;
        data.idx = idx;
        let status = if data.map_raw.is_none() {
            ArchStatus::Uninitialized
        } else if data.int_1d.is_empty() {
            ArchStatus::Configured
        } else {
            ArchStatus::Integrated
        };
        Ok(Self::from_state(
            ArchState::from_data(data, status),
            FileLock::new(),
        ))
    }
}

impl Persist for ArchData {
    fn save<S: Store>(&self, group: &S) -> ewald_io::Result<()> {
        write_array_opt(group, "map_raw", self.map_raw.as_ref())?;
        match &self.mask {
            Some(mask) => write_mask(group, "mask", mask)?,
            None if group.contains("mask") => group.remove("mask")?,
            None => {}
        }
        write_array_opt(group, "map_norm", self.map_norm.as_ref())?;
        write_array_opt(group, "map_q", self.map_q.as_ref())?;
        write_array_opt(group, "xyz", self.xyz.as_ref())?;
        write_array_opt(group, "tcr", self.tcr.as_ref())?;
        write_array_opt(group, "qchi", self.qchi.as_ref())?;
        write_scalars(group, "scan_info", &self.scan_info)?;
        group.write_json("ai_args", &self.ai_args)?;
        self.int_1d.save(&replace_group(group, "int_1d")?)?;
        self.int_2d.save(&replace_group(group, "int_2d")?)?;
        self.poni.save(&replace_group(group, "poni")?)
    }

    fn load<S: Store>(group: &S) -> ewald_io::Result<Self> {
        let mask = if group.contains("mask") {
            Some(read_mask(group, "mask")?)
        } else {
            None
        };
        let scan_info = if group.contains("scan_info") {
            read_scalars(group, "scan_info")?
        } else {
            ScanInfo::new()
        };
        let ai_args = if group.contains("ai_args") {
            group.read_json("ai_args")?
        } else {
            IntegratorConfig::default()
        };
        Ok(Self {
            idx: 0,
            map_raw: read_array_opt(group, "map_raw")?,
            poni: Poni::load(&group.group("poni")?)?,
            mask,
            scan_info,
            ai_args,
            map_norm: read_array_opt(group, "map_norm")?,
            map_q: read_array_opt(group, "map_q")?,
            xyz: read_array_opt(group, "xyz")?,
            tcr: read_array_opt(group, "tcr")?,
            qchi: read_array_opt(group, "qchi")?,
            int_1d: IntData1d::load(&group.group("int_1d")?)?,
            int_2d: IntData2d::load(&group.group("int_2d")?)?,
        })
    }
}
