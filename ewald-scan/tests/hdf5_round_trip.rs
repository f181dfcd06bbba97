//! Sphere persistence through an HDF5 file.
#![cfg(feature = "hdf5")]

use ewald_core::{Detector, Poni};
use ewald_io::hdf5_store::open_file;
use ewald_scan::{AddArchOptions, Arch, ArchInit, IntegrationArgs, SaveOptions, ScanInfo, Sphere};
use ewald_integrate::{MultiGeometryArgs, MultiIntegrateArgs};
use ndarray::Array2;
use tempfile::NamedTempFile;

fn arch(idx: usize) -> Arch {
    let mut info = ScanInfo::new();
    info.insert("i0".into(), 10.0);
    info.insert("th".into(), 0.5 * idx as f64);
    let mut map = Array2::from_elem((5, 5), 3.0);
    map[[4, 4]] = -1.0;
    Arch::new(
        ArchInit::new(idx)
            .with_map_raw(map)
            .with_poni(
                Poni::default()
                    .with_dist(0.15)
                    .with_poni(2.5e-4, 2.5e-4)
                    .with_detector(Detector::generic(1e-4, 1e-4)),
            )
            .with_scan_info(info),
    )
}

#[test]
fn test_sphere_hdf5_round_trip() {
    let sphere = Sphere::new("scan7").with_bai_1d_args(
        IntegrationArgs::default()
            .with_npt(12)
            .with_radial_range(Some((0.0, 0.2)))
            .with_monitor("i0"),
    );
    for idx in [3, 1] {
        sphere.add_arch(&arch(idx), AddArchOptions::default()).unwrap();
    }
    sphere.set_multi_geo(MultiGeometryArgs::default().with_radial_range(0.0, 0.2));
    sphere
        .multigeometry_integrate_1d(Some("i0"), &MultiIntegrateArgs::default().with_npt(12))
        .unwrap();
    for member in sphere.arches() {
        member.compute_coordinates().unwrap();
    }

    let file = NamedTempFile::new().unwrap();
    {
        let h5 = open_file(file.path()).unwrap();
        sphere.save_to(&*h5, &SaveOptions::default()).unwrap();
    }

    let h5 = open_file(file.path()).unwrap();
    let loaded = Sphere::load("scan7", &*h5).unwrap();
    assert_eq!(loaded.indices(), vec![1, 3]);
    assert_eq!(loaded.bai_1d(), sphere.bai_1d());
    assert_eq!(loaded.mgi_1d(), sphere.mgi_1d());
    assert_eq!(loaded.scan_data(), sphere.scan_data());
    assert_eq!(loaded.bai_1d_args(), sphere.bai_1d_args());
    for (a, b) in loaded.arches().iter().zip(sphere.arches()) {
        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.integrator(), b.integrator());
    }
}
