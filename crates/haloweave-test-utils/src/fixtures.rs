//! Seeded synthetic particle sets.

use haloweave_core::{Particle, ParticleKind, SimulationVolume};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// `n` dark-matter particles uniformly inside `volume`, PIDs from
/// `first_pid`.
pub fn uniform(n: usize, volume: &SimulationVolume, first_pid: u64, seed: u64) -> Vec<Particle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let b = volume.bounds;
    (0..n)
        .map(|i| {
            let pos = [0, 1, 2].map(|k| rng.random_range(b.min[k]..b.max[k]));
            Particle::new(first_pid + i as u64, ParticleKind::DarkMatter, pos, [0.0; 3])
        })
        .collect()
}

/// `n` particles of `kind` within a cube of half-width `spread` around
/// `center`, PIDs from `first_pid`. Velocities are small and random.
pub fn clump(
    center: [f64; 3],
    n: usize,
    spread: f64,
    kind: ParticleKind,
    first_pid: u64,
    seed: u64,
) -> Vec<Particle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let pos = center.map(|c| c + rng.random_range(-spread..=spread));
            let vel = [0; 3].map(|_| rng.random_range(-1.0..1.0));
            Particle::new(first_pid + i as u64, kind, pos, vel)
        })
        .collect()
}

/// Deal particles round-robin onto `ranks` piles, as a parallel reader
/// would hand out file chunks without regard to position.
pub fn deal(particles: Vec<Particle>, ranks: usize) -> Vec<Vec<Particle>> {
    let mut piles: Vec<Vec<Particle>> = (0..ranks).map(|_| Vec::new()).collect();
    for (i, p) in particles.into_iter().enumerate() {
        piles[i % ranks].push(p);
    }
    piles
}

/// Replace PIDs with a seeded permutation of `0..n`, so PID order carries
/// no spatial information.
pub fn scatter_pids(particles: &mut [Particle], seed: u64) {
    use rand::seq::SliceRandom;
    let mut pids: Vec<u64> = (0..particles.len() as u64).collect();
    pids.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    for (p, pid) in particles.iter_mut().zip(pids) {
        p.pid = pid;
    }
}
