//! An ordered collection of arches with by-arch aggregation and composite
//! integration.
//!
//! Lock order is file lock, then sphere lock, then an arch lock. Member
//! arches are held behind `Arc` so other threads can keep reading them
//! while the sphere grows.

use crate::arch::{Arch, ArchInit, IntegrationArgs};
use crate::lock::FileLock;
use crate::scan_table::ScanTable;
use crate::{Error, Result};
use ewald_core::{radial_axes, IntData1d, IntData2d};
use ewald_integrate::{
    Integrate1dResult, Integrate2dArgs, MultiGeometry, MultiGeometryArgs, MultiIntegrateArgs,
};
use ewald_io::persist::{read_array_opt, replace_group, write_array_opt};
use ewald_io::{Persist, Store};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What [`Sphere::add_arch`] does besides inserting the arch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddArchOptions {
    /// Run `integrate_1d` with the sphere's by-arch arguments.
    pub calculate: bool,
    /// Fold the arch's `int_1d` into the by-arch aggregate.
    pub update: bool,
    /// Add the arch's scan info as a row of the scan table.
    pub get_scan_info: bool,
    /// Rebuild the composite integrator. Expensive; for bulk inserts turn
    /// it off and call [`Sphere::set_multi_geo`] once at the end.
    pub set_multi_geo: bool,
}

impl Default for AddArchOptions {
    fn default() -> Self {
        Self {
            calculate: true,
            update: true,
            get_scan_info: true,
            set_multi_geo: true,
        }
    }
}

impl AddArchOptions {
    /// Insert only.
    #[must_use]
    pub fn insert_only() -> Self {
        Self {
            calculate: false,
            update: false,
            get_scan_info: false,
            set_multi_geo: false,
        }
    }

    #[must_use]
    pub fn with_calculate(mut self, value: bool) -> Self {
        self.calculate = value;
        self
    }

    #[must_use]
    pub fn with_update(mut self, value: bool) -> Self {
        self.update = value;
        self
    }

    #[must_use]
    pub fn with_get_scan_info(mut self, value: bool) -> Self {
        self.get_scan_info = value;
        self
    }

    #[must_use]
    pub fn with_set_multi_geo(mut self, value: bool) -> Self {
        self.set_multi_geo = value;
        self
    }
}

/// Options for [`Sphere::save_to`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Only these arches are written; all when `None`.
    pub arches: Option<Vec<usize>>,
    /// Skip the argument bundles.
    pub data_only: bool,
    /// Delete an existing sphere group first.
    pub replace: bool,
}

impl SaveOptions {
    #[must_use]
    pub fn with_arches(mut self, arches: Vec<usize>) -> Self {
        self.arches = Some(arches);
        self
    }

    #[must_use]
    pub fn with_data_only(mut self, value: bool) -> Self {
        self.data_only = value;
        self
    }

    #[must_use]
    pub fn with_replace(mut self, value: bool) -> Self {
        self.replace = value;
        self
    }
}

/// Output of composite integration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MgiData {
    pub intensity: Option<Array1<f64>>,
    pub ttheta: Option<Array1<f64>>,
    pub q: Option<Array1<f64>>,
}

impl Persist for MgiData {
    fn save<S: Store>(&self, group: &S) -> ewald_io::Result<()> {
        write_array_opt(group, "intensity", self.intensity.as_ref())?;
        write_array_opt(group, "ttheta", self.ttheta.as_ref())?;
        write_array_opt(group, "q", self.q.as_ref())
    }

    fn load<S: Store>(group: &S) -> ewald_io::Result<Self> {
        Ok(Self {
            intensity: read_array_opt(group, "intensity")?,
            ttheta: read_array_opt(group, "ttheta")?,
            q: read_array_opt(group, "q")?,
        })
    }
}

/// Result of [`Sphere::multigeometry_integrate_1d`].
#[derive(Clone, Debug, PartialEq)]
pub struct MultiGeoOutcome {
    pub result: Integrate1dResult,
    /// Raw maps were integrated because the normalized maps were unusable.
    pub used_raw_fallback: bool,
}

#[derive(Debug, Default)]
struct SphereState {
    arches: BTreeMap<usize, Arc<Arch>>,
    scan_data: ScanTable,
    mg_args: MultiGeometryArgs,
    multi_geo: MultiGeometry,
    bai_1d_args: IntegrationArgs,
    bai_2d_args: Integrate2dArgs,
    bai_1d: IntData1d,
    bai_2d: IntData2d,
    mgi_1d: MgiData,
}

impl SphereState {
    fn rebuild_multi_geo(&mut self) {
        let integrators = self.arches.values().map(|a| a.integrator()).collect();
        self.multi_geo = MultiGeometry::new(integrators, self.mg_args.clone());
    }

    /// Sum of the members' 1D results in index order, with `replacement`
    /// standing in for the member of the same index.
    fn aggregate(&self, replacement: Option<&Arch>) -> Result<IntData1d> {
        let mut bai_1d = IntData1d::default();
        let skip = replacement.map(Arch::idx);
        let mut pending = replacement;
        for (&idx, arch) in &self.arches {
            if let Some(new) = pending.filter(|new| new.idx() < idx) {
                bai_1d.accumulate(&new.int_1d())?;
                pending = None;
            }
            if Some(idx) != skip {
                bai_1d.accumulate(&arch.int_1d())?;
            }
        }
        if let Some(new) = pending {
            bai_1d.accumulate(&new.int_1d())?;
        }
        Ok(bai_1d)
    }

    fn insert(&mut self, arch: Arch, options: AddArchOptions) -> Result<()> {
        let idx = arch.idx();
        let replacing = self.arches.contains_key(&idx);
        let scan_info = arch.scan_info();
        let add_row = options.get_scan_info && !scan_info.is_empty();
        if add_row {
            let mut scan_data = self.scan_data.clone();
            scan_data.remove(idx);
            scan_data.check(&scan_info)?;
        }
        if options.calculate {
            arch.integrate_1d(&self.bai_1d_args)?;
        }
        // a replacement re-sums every member
        let bai_1d = if replacing {
            Some(self.aggregate(Some(&arch))?)
        } else if options.update {
            let mut bai_1d = self.bai_1d.clone();
            bai_1d.accumulate(&arch.int_1d())?;
            Some(bai_1d)
        } else {
            None
        };

        if replacing {
            self.scan_data.remove(idx);
        }
        if add_row {
            self.scan_data.insert(idx, &scan_info)?;
        }
        if let Some(bai_1d) = bai_1d {
            self.bai_1d = bai_1d;
        }
        self.arches.insert(idx, Arc::new(arch));
        if options.set_multi_geo {
            self.rebuild_multi_geo();
        }
        Ok(())
    }
}

/// A scan: arches ordered by index plus their aggregate results.
#[derive(Debug)]
pub struct Sphere {
    name: String,
    file_lock: FileLock,
    state: Mutex<SphereState>,
}

impl Default for Sphere {
    fn default() -> Self {
        Self::new("scan0")
    }
}

impl Sphere {
    /// An empty sphere.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_lock: FileLock::new(),
            state: Mutex::new(SphereState::default()),
        }
    }

    /// A sphere holding `arches`, with the composite integrator built once.
    /// Arches with the same index replace earlier ones.
    #[must_use]
    pub fn from_arches(
        name: impl Into<String>,
        arches: Vec<Arch>,
        mg_args: MultiGeometryArgs,
    ) -> Self {
        let sphere = Self::new(name);
        {
            let mut state = sphere.state();
            for arch in arches {
                let arch = arch.with_file_lock(sphere.file_lock.clone());
                state.arches.insert(arch.idx(), Arc::new(arch));
            }
            state.mg_args = mg_args;
            state.rebuild_multi_geo();
        }
        sphere
    }

    /// Sets the arguments used by [`Sphere::add_arch`] when calculating.
    #[must_use]
    pub fn with_bai_1d_args(self, args: IntegrationArgs) -> Self {
        self.state().bai_1d_args = args;
        self
    }

    fn state(&self) -> MutexGuard<'_, SphereState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock shared by the sphere and all of its arches.
    #[must_use]
    pub fn file_lock(&self) -> &FileLock {
        &self.file_lock
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().arches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().arches.is_empty()
    }

    /// Member indices, ascending.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.state().arches.keys().copied().collect()
    }

    #[must_use]
    pub fn arch(&self, idx: usize) -> Option<Arc<Arch>> {
        self.state().arches.get(&idx).cloned()
    }

    /// Members in ascending index order.
    #[must_use]
    pub fn arches(&self) -> Vec<Arc<Arch>> {
        self.state().arches.values().cloned().collect()
    }

    #[must_use]
    pub fn scan_data(&self) -> ScanTable {
        self.state().scan_data.clone()
    }

    #[must_use]
    pub fn mg_args(&self) -> MultiGeometryArgs {
        self.state().mg_args.clone()
    }

    #[must_use]
    pub fn multi_geo(&self) -> MultiGeometry {
        self.state().multi_geo.clone()
    }

    #[must_use]
    pub fn bai_1d_args(&self) -> IntegrationArgs {
        self.state().bai_1d_args.clone()
    }

    pub fn set_bai_1d_args(&self, args: IntegrationArgs) {
        self.state().bai_1d_args = args;
    }

    #[must_use]
    pub fn bai_2d_args(&self) -> Integrate2dArgs {
        self.state().bai_2d_args.clone()
    }

    /// By-arch aggregate of the members' 1D results.
    #[must_use]
    pub fn bai_1d(&self) -> IntData1d {
        self.state().bai_1d.clone()
    }

    /// Reserved 2D aggregate; never filled.
    #[must_use]
    pub fn bai_2d(&self) -> IntData2d {
        self.state().bai_2d.clone()
    }

    #[must_use]
    pub fn mgi_1d(&self) -> MgiData {
        self.state().mgi_1d.clone()
    }

    /// Adds a copy of `arch`, so later changes to `arch` do not reach the
    /// sphere. An existing member with the same index is replaced, along
    /// with its scan table row, and the by-arch aggregate is re-summed over
    /// the new member set.
    ///
    /// # Errors
    /// Returns [`Error::MismatchedColumns`] if the arch's scan info does not
    /// fit the scan table and any error from integration. The sphere is
    /// unchanged on error.
    pub fn add_arch(&self, arch: &Arch, options: AddArchOptions) -> Result<()> {
        let mut state = self.state();
        let copy = arch.copy().with_file_lock(self.file_lock.clone());
        state.insert(copy, options)
    }

    /// Builds an arch from `init` and adds it.
    ///
    /// # Errors
    /// See [`Sphere::add_arch`].
    pub fn add_new_arch(&self, init: ArchInit, options: AddArchOptions) -> Result<()> {
        let arch = Arch::new(init).with_file_lock(self.file_lock.clone());
        self.state().insert(arch, options)
    }

    /// Re-integrates every member and rebuilds the by-arch aggregate from
    /// scratch. `args` replaces the stored arguments when given.
    ///
    /// # Errors
    /// Returns the first integration error. Members, arguments and the
    /// aggregate are then rolled back to their state before the call.
    pub fn by_arch_integrate_1d(&self, args: Option<IntegrationArgs>) -> Result<()> {
        let mut state = self.state();
        let args = args.unwrap_or_else(|| state.bai_1d_args.clone());
        let arches: Vec<Arc<Arch>> = state.arches.values().cloned().collect();
        let checkpoints: Vec<_> = arches.iter().map(|arch| arch.checkpoint()).collect();

        let integrated = arches
            .par_iter()
            .try_for_each(|arch| arch.integrate_1d(&args).map(|_| ()))
            .and_then(|()| {
                let mut bai_1d = IntData1d::default();
                for arch in &arches {
                    bai_1d.accumulate(&arch.int_1d())?;
                }
                Ok(bai_1d)
            });
        match integrated {
            Ok(bai_1d) => {
                state.bai_1d = bai_1d;
                state.bai_1d_args = args;
                Ok(())
            }
            Err(err) => {
                for (arch, checkpoint) in arches.iter().zip(checkpoints) {
                    arch.restore(checkpoint);
                }
                Err(err)
            }
        }
    }

    /// Rebuilds the composite integrator from the members' current engine
    /// handles and stores `args`.
    pub fn set_multi_geo(&self, args: MultiGeometryArgs) {
        let mut state = self.state();
        state.mg_args = args;
        state.rebuild_multi_geo();
    }

    /// Integrates all members together.
    ///
    /// With a monitor channel the raw maps are divided by that scan-table
    /// column. Without one the normalized maps are used, falling back to
    /// the raw maps (reported in the outcome and logged) when any member
    /// has no normalized map of the right shape.
    ///
    /// # Errors
    /// Returns [`ewald_core::Error::MissingChannel`] if the monitor column
    /// is absent for a member, [`ewald_core::Error::Config`] for a member
    /// without raw data and any engine error, e.g. when the composite
    /// integrator is out of date with the member list.
    pub fn multigeometry_integrate_1d(
        &self,
        monitor: Option<&str>,
        args: &MultiIntegrateArgs,
    ) -> Result<MultiGeoOutcome> {
        let mut state = self.state();

        let mut raws = Vec::with_capacity(state.arches.len());
        let mut norms = Vec::with_capacity(state.arches.len());
        let mut masks = Vec::with_capacity(state.arches.len());
        for (&idx, arch) in &state.arches {
            let (raw, norm, mask) =
                arch.with_data(|d| (d.map_raw.clone(), d.map_norm.clone(), d.mask.clone()));
            let raw = raw.ok_or_else(|| {
                ewald_core::Error::Config(format!("arch {idx} has no raw map"))
            })?;
            norms.push(norm.filter(|n| n.dim() == raw.dim()));
            raws.push(raw);
            masks.push(mask);
        }
        let mask_views: Vec<_> = masks.iter().map(|m| m.as_ref().map(Array2::view)).collect();
        let raw_views: Vec<_> = raws.iter().map(Array2::view).collect();

        let (result, used_raw_fallback) = match monitor {
            Some(channel) => {
                let factors = state
                    .arches
                    .keys()
                    .map(|&idx| {
                        state
                            .scan_data
                            .value(idx, channel)
                            .ok_or_else(|| ewald_core::Error::MissingChannel(channel.to_string()))
                    })
                    .collect::<std::result::Result<Vec<f64>, _>>()?;
                let result = state.multi_geo.integrate1d(
                    &raw_views,
                    &mask_views,
                    Some(factors.as_slice()),
                    args,
                )?;
                (result, false)
            }
            None => {
                let norm_views: Option<Vec<_>> =
                    norms.iter().map(|n| n.as_ref().map(Array2::view)).collect();
                match norm_views {
                    Some(views) => (
                        state.multi_geo.integrate1d(&views, &mask_views, None, args)?,
                        false,
                    ),
                    None => {
                        log::warn!(
                            "sphere {}: normalized maps unavailable, integrating raw maps",
                            self.name
                        );
                        (
                            state
                                .multi_geo
                                .integrate1d(&raw_views, &mask_views, None, args)?,
                            true,
                        )
                    }
                }
            }
        };

        let (ttheta, q) = radial_axes(
            result.radial.view(),
            result.unit,
            state.multi_geo.wavelength(),
        )?;
        state.mgi_1d = MgiData {
            intensity: Some(result.intensity.clone()),
            ttheta,
            q,
        };
        Ok(MultiGeoOutcome {
            result,
            used_raw_fallback,
        })
    }

    /// Saves the sphere as `<parent>/<name>`.
    ///
    /// # Errors
    /// Fails if the store rejects a write.
    pub fn save_to<S: Store>(&self, parent: &S, options: &SaveOptions) -> Result<()> {
        let _file = self.file_lock.lock();
        let state = self.state();

        let group = if options.replace {
            replace_group(parent, &self.name)?
        } else {
            parent.require_group(&self.name)?
        };
        let arches_group = group.require_group("arches")?;
        let mut written = 0;
        for (idx, arch) in &state.arches {
            if options.arches.as_ref().is_none_or(|keep| keep.contains(idx)) {
                arch.write_to(&arches_group)?;
                written += 1;
            }
        }

        state.scan_data.save(&replace_group(&group, "scan_data")?)?;
        if !options.data_only {
            group.write_json("mg_args", &state.mg_args)?;
            group.write_json("bai_1d_args", &state.bai_1d_args)?;
            group.write_json("bai_2d_args", &state.bai_2d_args)?;
        }
        state.mgi_1d.save(&group.require_group("mgi_1d")?)?;
        state.bai_1d.save(&group.require_group("bai_1d")?)?;
        state.bai_2d.save(&group.require_group("bai_2d")?)?;

        log::debug!("saved sphere {} ({written} arches)", self.name);
        Ok(())
    }

    /// Loads the sphere saved as `<parent>/<name>`.
    ///
    /// # Errors
    /// See [`Sphere::load_from`].
    pub fn load<S: Store>(name: &str, parent: &S) -> Result<Self> {
        let sphere = Self::new(name);
        sphere.load_from(parent)?;
        Ok(sphere)
    }

    /// Replaces this sphere's contents with `<parent>/<name>`.
    ///
    /// Arches are re-inserted without integration, aggregation or scan
    /// table updates; the stored aggregate and table are restored instead
    /// and the composite integrator is rebuilt once.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the group is missing and store errors
    /// for malformed content.
    pub fn load_from<S: Store>(&self, parent: &S) -> Result<()> {
        let _file = self.file_lock.lock();
        let mut state = self.state();

        if !parent.is_group(&self.name) {
            return Err(Error::NotFound(format!("sphere {:?}", self.name)));
        }
        let group = parent.group(&self.name)?;

        let mut loaded = SphereState::default();
        if group.is_group("arches") {
            let arches_group = group.group("arches")?;
            for key in arches_group.keys()? {
                let idx: usize = key.parse().map_err(|_| {
                    ewald_io::Error::InvalidFormat(format!("arch key {key:?} is not an index"))
                })?;
                let arch =
                    Arch::read_from(idx, &arches_group)?.with_file_lock(self.file_lock.clone());
                loaded.insert(arch, AddArchOptions::insert_only())?;
            }
        }
        if group.is_group("scan_data") {
            loaded.scan_data = ScanTable::load(&group.group("scan_data")?)?;
        }
        if group.contains("mg_args") {
            loaded.mg_args = group.read_json("mg_args")?;
        }
        if group.contains("bai_1d_args") {
            loaded.bai_1d_args = group.read_json("bai_1d_args")?;
        }
        if group.contains("bai_2d_args") {
            loaded.bai_2d_args = group.read_json("bai_2d_args")?;
        }
        if group.is_group("mgi_1d") {
            loaded.mgi_1d = MgiData::load(&group.group("mgi_1d")?)?;
        }
        if group.is_group("bai_1d") {
            loaded.bai_1d = IntData1d::load(&group.group("bai_1d")?)?;
        }
        if group.is_group("bai_2d") {
            loaded.bai_2d = IntData2d::load(&group.group("bai_2d")?)?;
        }
        loaded.rebuild_multi_geo();

        log::debug!(
            "loaded sphere {} ({} arches)",
            self.name,
            loaded.arches.len()
        );
        *state = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchStatus;
    use crate::scan_table::ScanInfo;
    use approx::assert_relative_eq;
    use ewald_core::{BinaryOp, Detector, Poni};
    use ewald_io::MemoryStore;

    fn poni(shift: f64) -> Poni {
        Poni::default()
            .with_dist(0.1)
            .with_poni(2e-4 + shift, 2e-4)
            .with_detector(Detector::generic(1e-4, 1e-4))
    }

    fn arch(idx: usize, value: f64) -> Arch {
        let mut info = ScanInfo::new();
        info.insert("i0".into(), 2.0);
        Arch::new(
            ArchInit::new(idx)
                .with_map_raw(Array2::from_elem((4, 4), value))
                .with_poni(poni(0.0))
                .with_scan_info(info),
        )
    }

    fn bai_args() -> IntegrationArgs {
        IntegrationArgs::default()
            .with_npt(10)
            .with_radial_range(Some((0.0, 0.5)))
    }

    fn sphere() -> Sphere {
        Sphere::new("scan").with_bai_1d_args(bai_args())
    }

    #[test]
    fn test_add_arch_keeps_order() {
        let sphere = sphere();
        for idx in [5, 1, 3] {
            sphere.add_arch(&arch(idx, 1.0), AddArchOptions::default()).unwrap();
        }
        assert_eq!(sphere.indices(), vec![1, 3, 5]);
        assert_eq!(sphere.scan_data().index(), vec![1, 3, 5]);
        assert_eq!(sphere.multi_geo().len(), 3);
        assert!(sphere
            .arches()
            .iter()
            .all(|a| a.file_lock().is_shared_with(sphere.file_lock())));
    }

    #[test]
    fn test_aggregate_is_sum_of_members() {
        let sphere = sphere();
        sphere.add_arch(&arch(0, 1.0), AddArchOptions::default()).unwrap();
        sphere.add_arch(&arch(1, 3.0), AddArchOptions::default()).unwrap();

        let bai = sphere.bai_1d();
        let mut expected = vec![0.0; 10];
        for member in sphere.arches() {
            let raw = member.int_1d().raw.unwrap().to_dense();
            for (e, r) in expected.iter_mut().zip(raw.iter()) {
                *e += r;
            }
        }
        let raw = bai.raw.as_ref().unwrap().to_dense();
        for (r, e) in raw.iter().zip(&expected) {
            assert_relative_eq!(*r, *e, max_relative = 1e-12);
        }
        let norm = bai
            .raw
            .as_ref()
            .unwrap()
            .binary_op(bai.pcount.as_ref().unwrap(), BinaryOp::Div)
            .unwrap();
        assert_eq!(bai.norm.as_ref().unwrap().to_dense(), norm.to_dense());
    }

    #[test]
    fn test_replacing_member_resums_aggregate() {
        let sphere = sphere();
        sphere.add_arch(&arch(0, 1.0), AddArchOptions::default()).unwrap();
        sphere.add_arch(&arch(0, 1.0), AddArchOptions::default()).unwrap();
        assert_eq!(sphere.len(), 1);
        let member = sphere.arch(0).unwrap().int_1d();
        assert_eq!(sphere.bai_1d().raw, member.raw);
        assert_eq!(sphere.bai_1d().pcount, member.pcount);

        sphere.add_arch(&arch(1, 2.0), AddArchOptions::default()).unwrap();
        sphere.add_arch(&arch(0, 5.0), AddArchOptions::default()).unwrap();
        let mut expected = IntData1d::default();
        for member in sphere.arches() {
            expected.accumulate(&member.int_1d()).unwrap();
        }
        assert_eq!(sphere.bai_1d(), expected);
        assert_eq!(sphere.scan_data().index(), vec![0, 1]);

        // a replacement without scan info drops the old row
        let bare = Arch::new(
            ArchInit::new(1)
                .with_map_raw(Array2::from_elem((4, 4), 2.0))
                .with_poni(poni(0.0)),
        );
        sphere.add_arch(&bare, AddArchOptions::default()).unwrap();
        assert_eq!(sphere.scan_data().index(), vec![0]);
    }

    #[test]
    fn test_add_arch_copies() {
        let sphere = sphere();
        let original = arch(0, 1.0);
        sphere.add_arch(&original, AddArchOptions::insert_only()).unwrap();
        original.set_map_raw(Array2::zeros((4, 4)));
        let member = sphere.arch(0).unwrap();
        assert_eq!(member.snapshot().map_raw.unwrap(), Array2::<f64>::ones((4, 4)));
    }

    #[test]
    fn test_mismatched_columns_abort_add() {
        let sphere = sphere();
        sphere.add_arch(&arch(0, 1.0), AddArchOptions::default()).unwrap();
        let before = sphere.bai_1d();

        let mut info = ScanInfo::new();
        info.insert("other".into(), 1.0);
        let odd = arch(1, 1.0);
        odd.set_scan_info(info);
        let err = sphere.add_arch(&odd, AddArchOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MismatchedColumns { .. }));
        assert_eq!(sphere.indices(), vec![0]);
        assert_eq!(sphere.bai_1d(), before);
    }

    #[test]
    fn test_by_arch_integrate_matches_incremental() {
        let sphere = sphere();
        for idx in 0..3 {
            sphere
                .add_new_arch(
                    ArchInit::new(idx)
                        .with_map_raw(Array2::from_elem((4, 4), 1.0 + idx as f64))
                        .with_poni(poni(0.0)),
                    AddArchOptions::default(),
                )
                .unwrap();
        }
        let incremental = sphere.bai_1d();
        sphere.by_arch_integrate_1d(None).unwrap();
        assert_eq!(sphere.bai_1d(), incremental);

        sphere
            .by_arch_integrate_1d(Some(bai_args().with_npt(5)))
            .unwrap();
        assert_eq!(sphere.bai_1d().raw.unwrap().shape(), &[5]);
        assert_eq!(sphere.bai_1d_args().integrate.npt, 5);
    }

    #[test]
    fn test_by_arch_failure_rolls_back() {
        let sphere = sphere();
        sphere.add_arch(&arch(0, 1.0), AddArchOptions::default()).unwrap();
        let bad = Arch::new(
            ArchInit::new(1)
                .with_map_raw(Array2::from_elem((4, 4), 1.0))
                .with_poni(
                    poni(0.0).with_detector(Detector::generic(1e-4, 1e-4).with_max_shape(5, 5)),
                ),
        );
        sphere
            .add_arch(&bad, AddArchOptions::insert_only())
            .unwrap();
        let before = sphere.bai_1d();
        let member_before = sphere.arch(0).unwrap().snapshot();

        let err = sphere
            .by_arch_integrate_1d(Some(bai_args().with_npt(4)))
            .unwrap_err();
        assert!(matches!(err, Error::Core(ewald_core::Error::Engine(_))));
        assert_eq!(sphere.bai_1d(), before);
        assert_eq!(sphere.bai_1d_args().integrate.npt, 10);
        assert_eq!(sphere.arch(0).unwrap().snapshot(), member_before);
        assert_eq!(sphere.arch(0).unwrap().status(), ArchStatus::Integrated);
    }

    #[test]
    fn test_multigeometry_fallback_is_reported() {
        let sphere = sphere();
        for idx in 0..2 {
            sphere
                .add_arch(
                    &arch(idx, 1.0),
                    AddArchOptions::default().with_calculate(false).with_update(false),
                )
                .unwrap();
        }
        sphere.set_multi_geo(MultiGeometryArgs::default().with_radial_range(0.0, 0.5));
        let args = MultiIntegrateArgs::default().with_npt(10);

        // nothing integrated yet, so no normalized maps
        let outcome = sphere.multigeometry_integrate_1d(None, &args).unwrap();
        assert!(outcome.used_raw_fallback);

        sphere.by_arch_integrate_1d(None).unwrap();
        let outcome = sphere.multigeometry_integrate_1d(None, &args).unwrap();
        assert!(!outcome.used_raw_fallback);
        let mgi = sphere.mgi_1d();
        assert_eq!(mgi.intensity.unwrap(), outcome.result.intensity);
        assert!(mgi.ttheta.is_some() && mgi.q.is_some());
    }

    #[test]
    fn test_multigeometry_monitor() {
        let sphere = sphere();
        for idx in 0..2 {
            sphere.add_arch(&arch(idx, 4.0), AddArchOptions::default()).unwrap();
        }
        sphere.set_multi_geo(MultiGeometryArgs::default().with_radial_range(0.0, 0.5));
        let args = MultiIntegrateArgs::default()
            .with_npt(10)
            .with_correct_solid_angle(false);

        let plain = sphere.multigeometry_integrate_1d(None, &args).unwrap();
        let scaled = sphere.multigeometry_integrate_1d(Some("i0"), &args).unwrap();
        for (p, s) in plain.result.sum_signal.iter().zip(&scaled.result.sum_signal) {
            assert_relative_eq!(*s, *p / 2.0, max_relative = 1e-12);
        }

        let err = sphere
            .multigeometry_integrate_1d(Some("missing"), &args)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Core(ewald_core::Error::MissingChannel(_))
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let sphere = sphere();
        for idx in [2, 0] {
            sphere.add_arch(&arch(idx, 1.5), AddArchOptions::default()).unwrap();
        }
        sphere.set_multi_geo(MultiGeometryArgs::default().with_radial_range(0.0, 0.5));
        sphere
            .multigeometry_integrate_1d(None, &MultiIntegrateArgs::default().with_npt(10))
            .unwrap();

        let root = MemoryStore::new();
        sphere.save_to(&root, &SaveOptions::default()).unwrap();

        let loaded = Sphere::load("scan", &root).unwrap();
        assert_eq!(loaded.indices(), vec![0, 2]);
        assert_eq!(loaded.bai_1d(), sphere.bai_1d());
        assert_eq!(loaded.mgi_1d(), sphere.mgi_1d());
        assert_eq!(loaded.scan_data(), sphere.scan_data());
        assert_eq!(loaded.mg_args(), sphere.mg_args());
        assert_eq!(loaded.bai_1d_args(), sphere.bai_1d_args());
        assert_eq!(loaded.multi_geo(), sphere.multi_geo());
        for (a, b) in loaded.arches().iter().zip(sphere.arches()) {
            assert_eq!(a.snapshot(), b.snapshot());
        }

        assert!(matches!(
            Sphere::load("other", &root),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_save_subset_and_data_only() {
        let sphere = sphere();
        for idx in 0..3 {
            sphere.add_arch(&arch(idx, 1.0), AddArchOptions::default()).unwrap();
        }
        let root = MemoryStore::new();
        sphere
            .save_to(
                &root,
                &SaveOptions::default().with_arches(vec![1]).with_data_only(true),
            )
            .unwrap();
        let group = root.group("scan").unwrap();
        assert_eq!(group.group("arches").unwrap().keys().unwrap(), vec!["1"]);
        assert!(!group.contains("mg_args"));

        sphere
            .save_to(&root, &SaveOptions::default().with_replace(true))
            .unwrap();
        let group = root.group("scan").unwrap();
        assert_eq!(
            group.group("arches").unwrap().keys().unwrap(),
            vec!["0", "1", "2"]
        );
        assert!(group.contains("mg_args"));
    }
}
