//! Integration tests: collective decomposition, counting and assignment on
//! multi-rank thread clusters.

use haloweave_comm::{Communicator, Transport};
use haloweave_core::{
    DecompositionConfig, DecompositionStrategy, DomainError, ExtraProperties, Particle,
    ParticleKind, PropertyKind, PropertySchema, Rank, SimulationVolume, SlabBoundaries,
};
use haloweave_domain::{assign_particles, Decomposer, MeshDecomposition, Partition};
use haloweave_test_utils::{cluster, deal, init_tracing, uniform};

fn mesh_config(cells: u32) -> DecompositionConfig {
    DecompositionConfig {
        cells_per_dim: Some(cells),
        ..DecompositionConfig::new(DecompositionStrategy::Mesh)
    }
}

/// 100 particles in every cell of the lower z half of a 4^3 mesh.
fn lower_half_lattice() -> Vec<[f64; 3]> {
    let mut out = Vec::with_capacity(3200);
    for i in 0..20 {
        for j in 0..20 {
            for k in 0..8 {
                out.push([
                    (f64::from(i) + 0.5) / 20.0,
                    (f64::from(j) + 0.5) / 20.0,
                    (f64::from(k) + 0.5) * 0.0625,
                ]);
            }
        }
    }
    out
}

// ── Mesh ─────────────────────────────────────────────────────────────

#[test]
fn mesh_gives_every_rank_a_contiguous_run() {
    let mesh = MeshDecomposition::new(SimulationVolume::periodic_cube(1.0), 4, 8).unwrap();
    let mut covered = 0;
    for rank in Rank::all(8) {
        let run = mesh.curve_positions_of(rank);
        assert!(!run.is_empty(), "rank {rank} has no cells");
        assert!(run.windows(2).all(|w| w[1] == w[0] + 1));
        covered += run.len();
    }
    assert_eq!(covered, 64);
}

#[test]
fn imbalanced_mesh_is_recut_once() {
    init_tracing();
    let positions = lower_half_lattice();
    let piles: Vec<Vec<[f64; 3]>> = (0..4)
        .map(|r| positions.iter().skip(r).step_by(4).copied().collect())
        .collect();
    let counts = cluster(4)
        .run(|comm| {
            let decomposer = Decomposer::new(mesh_config(4));
            let mut partition =
                decomposer.decompose(&comm, SimulationVolume::periodic_cube(1.0), &[])?;
            let mine = &piles[comm.rank().index()];
            decomposer.count_in_domain(&comm, &mut partition, mine, 0.1)
        })
        .unwrap();
    let counts: Vec<_> = counts.into_iter().map(Result::unwrap).collect();
    assert!(counts.iter().all(|c| c.rebalanced && c.total == 3200));
    let locals: Vec<u64> = counts.iter().map(|c| c.local).collect();
    assert_eq!(locals, vec![900, 900, 900, 500]);
    assert_eq!(counts[3].capacity, 550);
}

#[test]
fn concentrated_load_is_fatal_on_every_rank() {
    let out = cluster(4)
        .run(|comm| {
            let decomposer = Decomposer::new(mesh_config(4));
            let mut partition =
                decomposer.decompose(&comm, SimulationVolume::periodic_cube(1.0), &[])?;
            let mine = vec![[0.1, 0.1, 0.1]; 10];
            decomposer.count_in_domain(&comm, &mut partition, &mine, 0.1)
        })
        .unwrap();
    for result in out {
        match result {
            Err(DomainError::ZeroPopulationDomain { total, cells_per_dim, .. }) => {
                assert_eq!(total, 40);
                assert_eq!(cells_per_dim, Some(4));
            }
            other => panic!("expected zero population, got {other:?}"),
        }
    }
}

// ── Slabs and assignment ─────────────────────────────────────────────

fn with_properties(mut particles: Vec<Particle>) -> Vec<Particle> {
    for p in particles.iter_mut().filter(|p| p.pid % 3 == 0) {
        p.kind = ParticleKind::Gas;
        p.properties = Some(
            ExtraProperties::new(PropertyKind::Hydro)
                .with("u", p.pid as f32)
                .with("rho", 1.0),
        );
    }
    particles
}

#[test]
fn assignment_moves_every_particle_to_its_owner() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = with_properties(uniform(600, &volume, 0, 11));
    let piles = deal(all, 4);
    let schema = PropertySchema::new().with_fields(PropertyKind::Hydro, ["u", "rho"]);
    let config = DecompositionConfig {
        slab_boundaries: SlabBoundaries::EqualCount,
        ..DecompositionConfig::new(DecompositionStrategy::Slab)
    };

    let out = cluster(4)
        .run(|comm| {
            let mine = piles[comm.rank().index()].clone();
            let positions: Vec<[f64; 3]> = mine.iter().map(|p| p.position).collect();
            let partition: Partition =
                Decomposer::new(config.clone()).decompose(&comm, volume, &positions)?;
            let owned = assign_particles(&comm, &Transport::default(), &partition, &schema, mine)?;
            Ok::<_, DomainError>((partition, owned))
        })
        .unwrap();

    let mut pids = Vec::new();
    for (rank, result) in out.into_iter().enumerate() {
        let (partition, owned) = result.unwrap();
        // Equal-count slabs: 150 per rank, within histogram resolution.
        assert!((120..=180).contains(&owned.len()), "rank {rank} holds {}", owned.len());
        for p in &owned {
            assert_eq!(partition.locate(p.position).unwrap(), Rank::from_index(rank));
            if p.pid % 3 == 0 {
                let props = p.properties.as_ref().unwrap();
                assert_eq!(props.get("u"), Some(p.pid as f32));
            } else {
                assert!(p.properties.is_none());
            }
            pids.push(p.pid);
        }
    }
    pids.sort_unstable();
    assert_eq!(pids, (0..600).collect::<Vec<u64>>());
}

#[test]
fn slab_boxes_tile_the_volume() {
    let volume = SimulationVolume::periodic_cube(2.0);
    let piles = deal(uniform(300, &volume, 0, 5), 6);
    let out = cluster(6)
        .run(|comm| {
            let positions: Vec<[f64; 3]> =
                piles[comm.rank().index()].iter().map(|p| p.position).collect();
            Decomposer::new(DecompositionConfig::new(DecompositionStrategy::Slab))
                .decompose(&comm, volume, &positions)
        })
        .unwrap();
    let partitions: Vec<Partition> = out.into_iter().map(Result::unwrap).collect();
    assert!(partitions.windows(2).all(|w| w[0] == w[1]));
    let slabs = partitions[0].as_slab().unwrap();
    let covered: f64 = slabs
        .boxes()
        .iter()
        .map(|b| b.extent().iter().product::<f64>())
        .sum();
    assert!((covered - 8.0).abs() < 1e-9);
    for p in uniform(200, &volume, 0, 99) {
        assert!(partitions[0].locate(p.position).is_ok());
    }
}
