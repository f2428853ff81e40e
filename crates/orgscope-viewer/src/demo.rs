//! Demo population: a small seeded toroidal grid of replicators.
//!
//! Each update every organism ages, may die of old age or at random, and
//! may place an offspring in a neighbouring cell with a probability that
//! grows with its fitness. Offspring occasionally mutate, changing fitness
//! and founding a new genotype. The same seed always gives the same run.

use orgscope_core::run::PopulationEngine;
use orgscope_types::{MapEvent, MapMode, UpdateEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Updates an organism lives at most.
const MAX_AGE: u32 = 60;

/// Chance per update of dying regardless of age.
const BACKGROUND_DEATH: f64 = 0.02;

/// Chance that an offspring mutates.
const MUTATION_RATE: f64 = 0.1;

/// Lower edges of the fitness colour buckets.
const FITNESS_BUCKETS: [f64; 9] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0];

#[derive(Debug, Clone, Copy)]
struct Organism {
    fitness: f64,
    gestation: u32,
    age: u32,
    generation: u32,
    genotype: u32,
}

/// Seeded grid population.
#[derive(Debug)]
pub struct DemoPopulation {
    width: u32,
    height: u32,
    cells: Vec<Option<Organism>>,
    rng: StdRng,
    update: u64,
    next_genotype: u32,
}

impl DemoPopulation {
    /// A `width` x `height` grid with one ancestor in the middle.
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let len = usize::try_from(u64::from(width).saturating_mul(u64::from(height)))
            .unwrap_or(usize::MAX);
        let mut cells = vec![None; len];
        let center = usize::try_from(
            u64::from(height / 2)
                .saturating_mul(u64::from(width))
                .saturating_add(u64::from(width / 2)),
        )
        .unwrap_or(0);
        if let Some(cell) = cells.get_mut(center) {
            *cell = Some(Organism {
                fitness: 1.0,
                gestation: 20,
                age: 0,
                generation: 0,
                genotype: 0,
            });
        }
        Self {
            width,
            height,
            cells,
            rng: StdRng::seed_from_u64(seed),
            update: 0,
            next_genotype: 1,
        }
    }

    /// A random neighbour of `index` on the torus (possibly itself).
    fn neighbour(&mut self, index: usize) -> Option<usize> {
        let width = usize::try_from(self.width).ok()?;
        let height = usize::try_from(self.height).ok()?;
        let x = index.checked_rem(width)?;
        let y = index.checked_div(width)?;
        let dx = self.rng.random_range(0..3_usize);
        let dy = self.rng.random_range(0..3_usize);
        let nx = x.checked_add(width)?.checked_add(dx)?.checked_sub(1)?.checked_rem(width)?;
        let ny = y.checked_add(height)?.checked_add(dy)?.checked_sub(1)?.checked_rem(height)?;
        ny.checked_mul(width)?.checked_add(nx)
    }

    fn offspring(&mut self, parent: Organism) -> Organism {
        let mut child = Organism {
            age: 0,
            generation: parent.generation.saturating_add(1),
            ..parent
        };
        if self.rng.random_bool(MUTATION_RATE) {
            child.fitness = (parent.fitness * self.rng.random_range(0.8..1.25)).max(0.05);
            child.gestation = parent
                .gestation
                .saturating_add(self.rng.random_range(0..5))
                .saturating_sub(2)
                .max(1);
            child.genotype = self.next_genotype;
            self.next_genotype = self.next_genotype.saturating_add(1);
        }
        child
    }

    fn statistics(&self) -> UpdateEvent {
        let living: Vec<&Organism> = self.cells.iter().flatten().collect();
        let organisms = u32::try_from(living.len()).unwrap_or(u32::MAX);
        let mean = |value: fn(&Organism) -> f64| {
            if organisms == 0 {
                0.0
            } else {
                living.iter().map(|o| value(o)).sum::<f64>() / f64::from(organisms)
            }
        };
        UpdateEvent {
            update: self.update,
            organisms,
            average_fitness: mean(|o| o.fitness),
            average_gestation: mean(|o| f64::from(o.gestation)),
            average_generation: mean(|o| f64::from(o.generation)),
        }
    }
}

impl PopulationEngine for DemoPopulation {
    fn advance(&mut self) -> UpdateEvent {
        self.update = self.update.saturating_add(1);

        for cell in &mut self.cells {
            let dies = self.rng.random_bool(BACKGROUND_DEATH);
            let expired = cell.as_mut().is_some_and(|organism| {
                organism.age = organism.age.saturating_add(1);
                dies || organism.age > MAX_AGE
            });
            if expired {
                *cell = None;
            }
        }

        let parents: Vec<(usize, Organism)> = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.map(|organism| (index, organism)))
            .collect();
        for (index, parent) in parents {
            let chance = (parent.fitness / (parent.fitness + 1.0)) * 0.5;
            if !self.rng.random_bool(chance.clamp(0.0, 1.0)) {
                continue;
            }
            let Some(target) = self.neighbour(index) else {
                continue;
            };
            if target == index {
                continue;
            }
            let child = self.offspring(parent);
            if let Some(cell) = self.cells.get_mut(target) {
                *cell = Some(child);
            }
        }

        self.statistics()
    }

    fn map(&self, mode: MapMode) -> MapEvent {
        let cells = self
            .cells
            .iter()
            .map(|cell| {
                cell.map(|organism| match mode {
                    MapMode::Fitness => {
                        let bucket = FITNESS_BUCKETS
                            .iter()
                            .take_while(|&&edge| organism.fitness >= edge)
                            .count();
                        u32::try_from(bucket).unwrap_or(u32::MAX)
                    }
                    MapMode::Gestation => organism.gestation,
                    MapMode::Age => organism.age,
                    MapMode::Genotype => organism.genotype,
                })
            })
            .collect();
        MapEvent {
            update: self.update,
            width: self.width,
            height: self.height,
            mode,
            cells,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_ancestor() {
        let population = DemoPopulation::new(9, 7, 1);
        let map = population.map(MapMode::Genotype);
        assert_eq!(map.cells.len(), 63);
        assert_eq!(map.occupied(), 1);
        assert_eq!(map.cell(4, 3), Some(Some(0)));
    }

    #[test]
    fn same_seed_same_history() {
        let mut a = DemoPopulation::new(16, 16, 42);
        let mut b = DemoPopulation::new(16, 16, 42);
        for _ in 0..50 {
            assert_eq!(a.advance(), b.advance());
        }
        assert_eq!(a.map(MapMode::Fitness), b.map(MapMode::Fitness));
    }

    #[test]
    fn statistics_match_the_grid() {
        let mut population = DemoPopulation::new(12, 12, 7);
        for _ in 0..20 {
            let stats = population.advance();
            let map = population.map(MapMode::Age);
            assert_eq!(usize::try_from(stats.organisms).unwrap(), map.occupied());
            assert_eq!(map.update, stats.update);
        }
    }
}
