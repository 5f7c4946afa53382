//! Integration tests: linking, migration and compaction on multi-rank
//! thread clusters, checked against the brute-force serial reference.

use haloweave_comm::{tags, Communicator, Transport};
use haloweave_core::{
    DomainError, FofError, GroupId, LinkingConfig, Particle, ParticleKind, PropertySchema, Rank,
    SimulationVolume,
};
use haloweave_domain::{Partition, SlabDecomposition};
use haloweave_fof::{
    collect_labels, compile_groups, migrate_to_owners, seed_link_state, CellGrid, CrossDomainLinker,
    GroupCatalog, LinkSummary, SerialFof,
};
use haloweave_test_utils::{clump, cluster, init_tracing, naive_fof, same_grouping, scatter_pids, uniform};

fn serial(positions: &[[f64; 3]], volume: &SimulationVolume, ll: f64) -> Vec<GroupId> {
    naive_fof(positions, volume, ll).into_iter().map(GroupId).collect()
}

fn slabs(volume: SimulationVolume, ranks: usize) -> Partition {
    SlabDecomposition::uniform(volume, ranks, [0, 1, 2]).unwrap().into()
}

/// Hand each rank the particles its slab owns.
fn by_owner(partition: &Partition, particles: &[Particle]) -> Vec<Vec<Particle>> {
    let mut piles = vec![Vec::new(); partition.num_ranks()];
    for p in particles {
        piles[partition.locate(p.position).unwrap().index()].push(p.clone());
    }
    piles
}

struct RankResult {
    labels: Option<Vec<(u64, GroupId)>>,
    catalog: GroupCatalog,
    summary: LinkSummary,
}

/// Seed, link, migrate, compile and collect on every rank.
fn run_fof(
    volume: SimulationVolume,
    partition: &Partition,
    piles: &[Vec<Particle>],
    ll: f64,
    min_size: usize,
) -> Vec<Result<RankResult, FofError>> {
    let linker = CrossDomainLinker::new(LinkingConfig::new(ll), volume);
    let schema = PropertySchema::new();
    cluster(partition.num_ranks())
        .run(|comm| -> Result<RankResult, FofError> {
            let me = comm.rank();
            let mut partition = partition.clone();
            let particles = piles[me.index()].clone();
            let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.position).collect();
            let labels = serial.label(&positions, &volume, ll);
            let mut state = seed_link_state(&comm, labels)?;
            let grid = CellGrid::new(positions, volume, ll);
            let summary =
                linker.run_to_fixed_point(&comm, &Transport::default(), &partition, &particles, &grid, &mut state)?;
            let migration = migrate_to_owners(
                &comm,
                &Transport::default(),
                &schema,
                particles,
                &state.labels,
                usize::MAX,
                tags::GROUP_EXCHANGE,
            )?;
            partition.record_migration(&comm, &migration.departed, &migration.arrived)?;
            let mut particles = migration.particles;
            let mut groups = migration.groups;
            let catalog = compile_groups(&comm, &mut particles, &mut groups, min_size)?;
            let labels = collect_labels(&comm, &particles, &groups, Rank::ROOT)?;
            Ok(RankResult {
                labels,
                catalog,
                summary,
            })
        })
        .unwrap()
}

fn assert_matches_reference(volume: &SimulationVolume, all: &[Particle], ll: f64, collected: Vec<(u64, GroupId)>) {
    let mut sorted = all.to_vec();
    sorted.sort_by_key(|p| p.pid);
    let positions: Vec<[f64; 3]> = sorted.iter().map(|p| p.position).collect();
    let expected = naive_fof(&positions, volume, ll);
    assert_eq!(collected.len(), sorted.len());
    let got: Vec<u64> = collected.iter().map(|&(_, g)| g.0).collect();
    assert!(same_grouping(&expected, &got));
}

// ── Two-rank boundary pair ───────────────────────────────────────────

#[test]
fn straddling_pair_forms_one_group_of_two() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let partition = slabs(volume, 2);
    let ll = 0.02;
    for pids in [[1, 2], [2, 1], [7, 7]] {
        let mut piles = vec![
            vec![Particle::new(pids[0], ParticleKind::DarkMatter, [0.99 * 0.5, 0.5, 0.5], [0.0; 3])],
            vec![Particle::new(pids[1], ParticleKind::DarkMatter, [1.01 * 0.5, 0.5, 0.5], [0.0; 3])],
        ];
        // Fillers far from everything keep both ranks populated after migration.
        piles[0].push(Particle::new(100, ParticleKind::DarkMatter, [0.25, 0.25, 0.25], [0.0; 3]));
        piles[1].push(Particle::new(101, ParticleKind::DarkMatter, [0.75, 0.75, 0.75], [0.0; 3]));

        let out: Vec<RankResult> = run_fof(volume, &partition, &piles, ll, 2)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out[0].summary.links, 2);
        assert_eq!(out[0].catalog.total_groups(), 1);
        let sizes: Vec<u64> = out.iter().flat_map(|r| r.catalog.sizes.clone()).collect();
        assert_eq!(sizes, vec![2]);
        let labels = out[0].labels.clone().unwrap();
        let pair: Vec<GroupId> = labels
            .iter()
            .filter(|(pid, _)| *pid < 100)
            .map(|&(_, g)| g)
            .collect();
        assert_eq!(pair.len(), 2);
        assert!(pair[0].is_grouped());
        assert_eq!(pair[0], pair[1]);
        assert!(labels.iter().filter(|(pid, _)| *pid >= 100).all(|(_, g)| !g.is_grouped()));
    }
}

// ── Random clumps against the serial reference ──────────────────────

fn clumpy_box(volume: &SimulationVolume) -> Vec<Particle> {
    let mut all = uniform(400, volume, 0, 11);
    // One clump on the corner where four slabs meet, one across the
    // periodic face, one inside a single slab.
    all.extend(clump([0.5, 0.5, 0.5], 60, 0.02, ParticleKind::DarkMatter, 1000, 12));
    all.extend(clump([0.995, 0.25, 0.7], 40, 0.015, ParticleKind::DarkMatter, 2000, 13));
    all.extend(clump([0.2, 0.2, 0.2], 30, 0.015, ParticleKind::DarkMatter, 3000, 14));
    for p in &mut all {
        p.position = volume.wrap(p.position);
    }
    scatter_pids(&mut all, 15);
    all
}

#[test]
fn distributed_groups_match_serial_reference() {
    init_tracing();
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = clumpy_box(&volume);
    let ll = 0.012;
    for ranks in [1, 2, 4] {
        let partition = slabs(volume, ranks);
        let piles = by_owner(&partition, &all);
        let mut out = run_fof(volume, &partition, &piles, ll, 2);
        let root = out.remove(0).unwrap();
        for r in out {
            assert!(r.unwrap().labels.is_none());
        }
        assert_matches_reference(&volume, &all, ll, root.labels.unwrap());
    }
}

#[test]
fn group_ids_are_unique_and_contiguous() {
    let volume = SimulationVolume::periodic_cube(1.0);
    let all = clumpy_box(&volume);
    let partition = slabs(volume, 4);
    let piles = by_owner(&partition, &all);
    let out: Vec<RankResult> = run_fof(volume, &partition, &piles, 0.012, 5)
        .into_iter()
        .map(Result::unwrap)
        .collect();
    let total = out[0].catalog.total_groups();
    let mut ids: Vec<u64> = out.iter().flat_map(|r| r.catalog.ids().map(|g| g.0)).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=total).collect::<Vec<_>>());
    for r in &out {
        assert!(r.catalog.sizes.iter().all(|&s| s >= 5));
        assert!(r.catalog.sizes.windows(2).all(|w| w[0] >= w[1]));
    }
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn compaction_reports_an_emptied_rank() {
    let volume = SimulationVolume::periodic_cube(1.0);
    let partition = slabs(volume, 2);
    // Rank 1's only particle has the lower PID of a boundary pair, so the
    // group it creates is owned by rank 0 and the particle migrates away.
    let piles = vec![
        vec![
            Particle::new(5, ParticleKind::DarkMatter, [0.495, 0.5, 0.5], [0.0; 3]),
            Particle::new(6, ParticleKind::DarkMatter, [0.25, 0.5, 0.5], [0.0; 3]),
        ],
        vec![Particle::new(1, ParticleKind::DarkMatter, [0.505, 0.5, 0.5], [0.0; 3])],
    ];
    let out = run_fof(volume, &partition, &piles, 0.02, 2);
    for r in out {
        assert!(matches!(
            r,
            Err(FofError::Domain(DomainError::ZeroPopulationDomain { rank: Rank(1), total: 3, .. }))
        ));
    }
}
