use anyhow::Result;
use masc_core::{cloud::PointCloud, nalgebra::Vector3};
use masc_tools::ascii::{read_ascii_file, write_ascii_file};
use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};

fn random_cloud(count: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(7);
    let coordinate = Uniform::new(-100.0, 100.0);
    let positions = (0..count)
        .map(|_| {
            Vector3::new(
                rng.sample(coordinate),
                rng.sample(coordinate),
                rng.sample(coordinate),
            )
        })
        .collect();
    let mut cloud = PointCloud::from_positions("random", positions);
    cloud.set_colors(
        (0..count)
            .map(|_| Vector3::new(rng.gen(), rng.gen(), rng.gen()))
            .collect(),
    );
    cloud.set_normals(
        (0..count)
            .map(|_| {
                Vector3::new(
                    rng.sample(Uniform::new(-1.0_f64, 1.0)),
                    rng.sample(Uniform::new(-1.0_f64, 1.0)),
                    1.0,
                )
                .normalize()
            })
            .collect(),
    );
    let mut intensity = (0..count)
        .map(|_| rng.sample(Uniform::new(0.0_f64, 1000.0)).round())
        .collect::<Vec<_>>();
    intensity[0] = f64::NAN;
    cloud.add_field_with_values("Intensity", intensity).unwrap();
    cloud
        .add_field_with_values("PLANA_SC2_PC1", (0..count).map(|i| i as f64 / count as f64).collect())
        .unwrap();
    cloud
}

#[test]
fn ascii_round_trip() -> Result<()> {
    let cloud = random_cloud(250);
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("random.txt");
    write_ascii_file(&cloud, &path, 6)?;
    let restored = read_ascii_file(&path)?;

    assert_eq!(cloud.len(), restored.len());
    for (expected, actual) in cloud.positions().iter().zip(restored.positions()) {
        assert!((expected - actual).norm() < 1e-5);
    }
    assert_eq!(cloud.colors(), restored.colors());
    for (expected, actual) in cloud
        .normals()
        .unwrap()
        .iter()
        .zip(restored.normals().unwrap())
    {
        assert!((expected - actual).norm() < 1e-5);
    }

    assert_eq!(
        cloud.field_names().collect::<Vec<_>>(),
        restored.field_names().collect::<Vec<_>>()
    );
    for (expected, actual) in cloud.fields().iter().zip(restored.fields()) {
        for (a, b) in expected.values().iter().zip(actual.values()) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-5);
        }
    }
    Ok(())
}
