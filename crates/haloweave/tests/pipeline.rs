//! End-to-end pipeline runs on thread clusters, checked against the
//! brute-force serial reference.

use haloweave::prelude::*;
use haloweave::types::{ExtraProperties, PropertyKind, PropertySchema, SlabBoundaries};
use haloweave_test_utils::{clump, cluster, deal, init_tracing, naive_fof, same_grouping, scatter_pids, uniform};

fn serial(positions: &[[f64; 3]], volume: &SimulationVolume, ll: f64) -> Vec<GroupId> {
    naive_fof(positions, volume, ll).into_iter().map(GroupId).collect()
}

type Serial = fn(&[[f64; 3]], &SimulationVolume, f64) -> Vec<GroupId>;

fn pipeline(config: PipelineConfig) -> FofPipeline<Serial> {
    FofPipeline::new(config, serial as Serial).unwrap()
}

/// Run on `ranks` ranks with the particles dealt round-robin; returns every
/// rank's catalog and the labels collected on rank 0.
fn run(
    pipeline: &FofPipeline<Serial>,
    volume: SimulationVolume,
    all: &[Particle],
    ranks: usize,
) -> Vec<Result<(HaloCatalog, Option<Vec<(u64, GroupId)>>), FofError>> {
    let piles = deal(all.to_vec(), ranks);
    cluster(ranks)
        .run(|comm| -> Result<_, FofError> {
            let catalog = pipeline.run(&comm, volume, piles[comm.rank().index()].clone())?;
            let labels = catalog.collect(&comm, Rank::ROOT)?;
            Ok((catalog, labels))
        })
        .unwrap()
}

fn clumpy_box(volume: &SimulationVolume) -> Vec<Particle> {
    let mut all = uniform(300, volume, 0, 21);
    all.extend(clump([0.5, 0.5, 0.5], 50, 0.02, ParticleKind::DarkMatter, 1000, 22));
    all.extend(clump([0.01, 0.8, 0.3], 40, 0.015, ParticleKind::DarkMatter, 2000, 23));
    all.extend(clump([0.7, 0.25, 0.95], 30, 0.015, ParticleKind::DarkMatter, 3000, 24));
    for p in &mut all {
        p.position = volume.wrap(p.position);
    }
    scatter_pids(&mut all, 25);
    all
}

fn reference(volume: &SimulationVolume, all: &[Particle], ll: f64, min_size: usize) -> Vec<u64> {
    let mut sorted = all.to_vec();
    sorted.sort_by_key(|p| p.pid);
    let positions: Vec<[f64; 3]> = sorted.iter().map(|p| p.position).collect();
    let mut labels = naive_fof(&positions, volume, ll);
    let mut sizes = std::collections::HashMap::new();
    for &l in &labels {
        *sizes.entry(l).or_insert(0usize) += 1;
    }
    for l in &mut labels {
        if sizes[l] < min_size {
            *l = 0;
        }
    }
    labels
}

fn linking(ll: f64, min_size: usize) -> LinkingConfig {
    LinkingConfig {
        min_group_size: min_size,
        ..LinkingConfig::new(ll)
    }
}

// ── Agreement with the serial reference ──────────────────────────────

#[test]
fn slab_pipeline_matches_reference() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = clumpy_box(&volume);
    let config = PipelineConfig {
        decomposition: DecompositionConfig {
            slab_boundaries: SlabBoundaries::EqualCount,
            ..DecompositionConfig::new(DecompositionStrategy::Slab)
        },
        linking: linking(0.012, 3),
        ..PipelineConfig::new(0.012)
    };
    let p = pipeline(config);
    for ranks in [2, 4] {
        let mut out = run(&p, volume, &all, ranks);
        let (_, labels) = out.remove(0).unwrap();
        let got: Vec<u64> = labels.unwrap().iter().map(|&(_, g)| g.0).collect();
        assert!(same_grouping(&reference(&volume, &all, 0.012, 3), &got));
    }
}

#[test]
fn mesh_pipeline_matches_reference() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = clumpy_box(&volume);
    let config = PipelineConfig {
        decomposition: DecompositionConfig {
            cells_per_dim: Some(8),
            ..DecompositionConfig::new(DecompositionStrategy::Mesh)
        },
        linking: linking(0.012, 3),
        ..PipelineConfig::new(0.012)
    };
    let out = run(&pipeline(config), volume, &all, 4);
    let mut total_groups = None;
    let mut labels = None;
    for r in out {
        let (catalog, collected) = r.unwrap();
        assert!(catalog.groups.iter().all(|g| g.0 <= catalog.catalog.total_groups()));
        total_groups = Some(catalog.catalog.total_groups());
        labels = labels.or(collected);
    }
    let got: Vec<u64> = labels.unwrap().iter().map(|&(_, g)| g.0).collect();
    let expected = reference(&volume, &all, 0.012, 3);
    assert!(same_grouping(&expected, &got));
    let mut distinct: Vec<u64> = expected.into_iter().filter(|&g| g != 0).collect();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(total_groups, Some(distinct.len() as u64));
}

#[test]
fn units_are_applied_before_linking() {
    let unit = SimulationVolume::periodic_cube(1.0);
    let all = clumpy_box(&unit);
    let doubled: Vec<Particle> = all
        .iter()
        .cloned()
        .map(|mut p| {
            p.position = p.position.map(|x| 2.0 * x);
            p
        })
        .collect();
    let config = PipelineConfig {
        decomposition: DecompositionConfig::new(DecompositionStrategy::Slab),
        linking: linking(0.012, 2),
        units: Some(UnitConversion {
            length_conversion: 0.5,
            ..UnitConversion::default()
        }),
        ..PipelineConfig::new(0.012)
    };
    let mut out = run(&pipeline(config), SimulationVolume::periodic_cube(2.0), &doubled, 2);
    let (catalog, labels) = out.remove(0).unwrap();
    assert!(catalog.partition.units_adjusted());
    assert_eq!(catalog.partition.volume().bounds.max, [1.0; 3]);
    let got: Vec<u64> = labels.unwrap().iter().map(|&(_, g)| g.0).collect();
    assert!(same_grouping(&reference(&unit, &all, 0.012, 2), &got));
}

// ── Link criteria ────────────────────────────────────────────────────

#[test]
fn phase_space_criterion_splits_crossing_streams() {
    let volume = SimulationVolume::periodic_cube(1.0);
    let config = PipelineConfig {
        decomposition: DecompositionConfig {
            slab_boundaries: SlabBoundaries::EqualWidth,
            ..DecompositionConfig::new(DecompositionStrategy::Slab)
        },
        linking: linking(0.02, 2),
        ..PipelineConfig::new(0.02)
    };
    let p = pipeline(config).with_criterion(PhaseSpaceCriterion::new(0.02, 0.5));
    for (v, expected) in [(-1.0, 0), (1.1, 1)] {
        let all = vec![
            Particle::new(1, ParticleKind::DarkMatter, [0.495, 0.5, 0.5], [1.0, 0.0, 0.0]),
            Particle::new(2, ParticleKind::DarkMatter, [0.505, 0.5, 0.5], [v, 0.0, 0.0]),
            Particle::new(3, ParticleKind::DarkMatter, [0.25, 0.5, 0.5], [0.0; 3]),
            Particle::new(4, ParticleKind::DarkMatter, [0.75, 0.5, 0.5], [0.0; 3]),
        ];
        let piles = deal(all, 2);
        let out = cluster(2)
            .run(|comm| p.run(&comm, volume, piles[comm.rank().index()].clone()))
            .unwrap();
        for r in out {
            let catalog = r.unwrap();
            assert_eq!(catalog.catalog.total_groups(), expected);
            assert_eq!(catalog.links.links, 2 * expected);
        }
    }
}

// ── Baryons ──────────────────────────────────────────────────────────

#[test]
fn gas_follows_its_halo_across_ranks() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let mut all = uniform(200, &volume, 0, 31);
    all.extend(clump([0.5, 0.5, 0.5], 60, 0.01, ParticleKind::DarkMatter, 1000, 32));
    let gas: Vec<Particle> = clump([0.5, 0.5, 0.5], 20, 0.01, ParticleKind::Gas, 5000, 33)
        .into_iter()
        .map(|p| {
            let u = p.pid as f32;
            p.with_properties(ExtraProperties::new(PropertyKind::Hydro).with("u", u))
        })
        .collect();
    all.extend(gas);

    let config = PipelineConfig {
        decomposition: DecompositionConfig::new(DecompositionStrategy::Slab),
        linking: linking(0.01, 20),
        baryons: Some(BaryonConfig::new(0.02 * 0.02, 100.0)),
        ..PipelineConfig::new(0.01)
    };
    let p = pipeline(config).with_schema(PropertySchema::new().with_fields(PropertyKind::Hydro, ["u"]));
    let out = run(&p, volume, &all, 2);
    let mut labels = None;
    for r in out {
        let (catalog, collected) = r.unwrap();
        assert_eq!(catalog.associated, Some(20));
        for part in catalog.particles.iter().filter(|p| p.kind == ParticleKind::Gas) {
            let u = part.properties.as_ref().and_then(|props| props.get("u"));
            assert_eq!(u, Some(part.pid as f32));
        }
        labels = labels.or(collected);
    }
    let labels = labels.unwrap();
    let group_of = |pid: u64| labels.iter().find(|&&(p, _)| p == pid).map(|&(_, g)| g).unwrap();
    // The halo is the most common label among the clump's dark matter.
    let mut counts = std::collections::HashMap::new();
    for pid in 1000..1060 {
        *counts.entry(group_of(pid)).or_insert(0) += 1;
    }
    let halo = counts.into_iter().max_by_key(|&(_, n)| n).map(|(g, _)| g).unwrap();
    assert!(halo.is_grouped());
    for pid in 5000..5020 {
        assert_eq!(group_of(pid), halo);
    }
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn concentrated_input_leaves_ranks_empty() {
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = clump([0.1, 0.1, 0.1], 80, 0.02, ParticleKind::DarkMatter, 0, 41);
    let config = PipelineConfig {
        decomposition: DecompositionConfig {
            cells_per_dim: Some(4),
            ..DecompositionConfig::new(DecompositionStrategy::Mesh)
        },
        ..PipelineConfig::new(0.01)
    };
    for r in run(&pipeline(config), volume, &all, 8) {
        assert!(matches!(
            r,
            Err(FofError::Domain(DomainError::ZeroPopulationDomain { total: 80, .. }))
        ));
    }
}

#[test]
fn invalid_config_is_rejected() {
    let config = PipelineConfig::new(-1.0);
    assert!(matches!(
        FofPipeline::new(config, serial as Serial),
        Err(ConfigError::OutOfRange { name: "linking_length", .. })
    ));
}
